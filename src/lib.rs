pub mod config;
pub mod db;
pub mod error;
pub mod service;

pub use config::{AdminConfig, BackendConfig, BackendKind, Config, DatabaseConfig};
pub use db::{Adapter, SqlStore, StorageAdapter, TransactionScope, create_adapter, in_transaction};
pub use error::StoreError;
