use crate::db::EmbeddedAdapter;
use crate::db::schema::USERS_TABLE;
use crate::error::StoreError;
use crate::service::admin::{AdminReconciler, ReconcileMode, ReconcileOutcome};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Store was empty; the script ran and the admin account was set up.
    Initialized { admin: ReconcileOutcome },
    /// Store was empty and there was no script to run.
    ScriptMissing,
    /// Schema already present; the admin account was reconciled.
    Existing { admin: ReconcileOutcome },
}

/// First-run schema setup for the embedded store.
pub struct SchemaBootstrapper {
    script_path: PathBuf,
    reconciler: AdminReconciler,
}

impl SchemaBootstrapper {
    pub fn new(script_path: impl Into<PathBuf>, reconciler: AdminReconciler) -> Self {
        Self {
            script_path: script_path.into(),
            reconciler,
        }
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Probe for the `users` table and initialize or reconcile accordingly.
    ///
    /// Schema failures are returned as [`StoreError::SchemaBootstrap`] and
    /// admin failures as [`StoreError::Reconciliation`]; both are fatal.
    pub async fn run(&self, adapter: &EmbeddedAdapter) -> Result<BootstrapOutcome, StoreError> {
        let present = adapter
            .has_table(USERS_TABLE)
            .await
            .map_err(StoreError::bootstrap)?;

        if present {
            info!(path = %adapter.path().display(), "sqlite schema present; skipping initialization");
            let admin = self
                .reconciler
                .run(adapter, ReconcileMode::Reconcile)
                .await?;
            return Ok(BootstrapOutcome::Existing { admin });
        }

        info!(path = %adapter.path().display(), "empty database; initializing schema");
        let script = match tokio::fs::read_to_string(&self.script_path).await {
            Ok(script) => script,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    script = %self.script_path.display(),
                    "migration script not found; assuming the store is provisioned elsewhere"
                );
                return Ok(BootstrapOutcome::ScriptMissing);
            }
            Err(e) => return Err(StoreError::bootstrap(e.into())),
        };

        adapter
            .apply_script(&script)
            .await
            .map_err(StoreError::bootstrap)?;

        // A script that does not create the core table leaves the store half-initialized.
        let created = adapter
            .has_table(USERS_TABLE)
            .await
            .map_err(StoreError::bootstrap)?;
        if !created {
            return Err(StoreError::bootstrap(StoreError::Config(format!(
                "migration script {} did not create table '{USERS_TABLE}'",
                self.script_path.display()
            ))));
        }
        info!(script = %self.script_path.display(), "sqlite schema initialized");

        let admin = self
            .reconciler
            .run(adapter, ReconcileMode::CreateOnly)
            .await?;
        Ok(BootstrapOutcome::Initialized { admin })
    }
}
