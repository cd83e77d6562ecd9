//! Startup services run against a freshly connected store.

pub mod admin;
pub mod bootstrap;

pub use admin::{AdminReconciler, BCRYPT_COST, ReconcileMode, ReconcileOutcome};
pub use bootstrap::{BootstrapOutcome, SchemaBootstrapper};
