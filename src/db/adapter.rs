use crate::config::{AdminConfig, BackendConfig, BackendKind, DatabaseConfig};
use crate::db::models::{FieldMap, Record};
use crate::db::mysql::{NetworkedAdapter, NetworkedTransaction};
use crate::db::sqlite::{EmbeddedAdapter, EmbeddedTransaction};
use crate::db::{SqlStore, StorageAdapter, TransactionScope};
use crate::error::StoreError;
use crate::service::admin::AdminReconciler;
use crate::service::bootstrap::SchemaBootstrapper;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

/// The backend chosen at startup. It never changes afterwards.
pub enum Adapter {
    Embedded(EmbeddedAdapter),
    Networked(NetworkedAdapter),
}

pub enum AdapterTransaction {
    Embedded(EmbeddedTransaction),
    Networked(NetworkedTransaction),
}

macro_rules! dispatch {
    ($value:expr, $inner:ident => $call:expr) => {
        match $value {
            Self::Embedded($inner) => $call,
            Self::Networked($inner) => $call,
        }
    };
}

impl Adapter {
    pub fn kind(&self) -> BackendKind {
        match self {
            Adapter::Embedded(_) => BackendKind::Embedded,
            Adapter::Networked(_) => BackendKind::Networked,
        }
    }
}

#[async_trait]
impl SqlStore for Adapter {
    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Record>, StoreError> {
        dispatch!(self, a => a.get(sql, params).await)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>, StoreError> {
        dispatch!(self, a => a.query(sql, params).await)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        dispatch!(self, a => a.execute(sql, params).await)
    }

    async fn table_insert(&self, table: &str, fields: &FieldMap) -> Result<i64, StoreError> {
        dispatch!(self, a => a.table_insert(table, fields).await)
    }

    async fn table_update(
        &self,
        table: &str,
        fields: &FieldMap,
        where_clause: &str,
    ) -> Result<u64, StoreError> {
        dispatch!(self, a => a.table_update(table, fields, where_clause).await)
    }
}

#[async_trait]
impl StorageAdapter for Adapter {
    type Transaction = AdapterTransaction;

    async fn connect(&mut self) -> Result<(), StoreError> {
        dispatch!(self, a => a.connect().await)
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        dispatch!(self, a => a.close().await)
    }

    fn is_closed(&self) -> bool {
        dispatch!(self, a => a.is_closed())
    }

    async fn transaction(&self) -> Result<AdapterTransaction, StoreError> {
        match self {
            Adapter::Embedded(a) => a.transaction().await.map(AdapterTransaction::Embedded),
            Adapter::Networked(a) => a.transaction().await.map(AdapterTransaction::Networked),
        }
    }
}

#[async_trait]
impl SqlStore for AdapterTransaction {
    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Record>, StoreError> {
        dispatch!(self, t => t.get(sql, params).await)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>, StoreError> {
        dispatch!(self, t => t.query(sql, params).await)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        dispatch!(self, t => t.execute(sql, params).await)
    }

    async fn table_insert(&self, table: &str, fields: &FieldMap) -> Result<i64, StoreError> {
        dispatch!(self, t => t.table_insert(table, fields).await)
    }

    async fn table_update(
        &self,
        table: &str,
        fields: &FieldMap,
        where_clause: &str,
    ) -> Result<u64, StoreError> {
        dispatch!(self, t => t.table_update(table, fields, where_clause).await)
    }
}

#[async_trait]
impl TransactionScope for AdapterTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        dispatch!(self, t => t.commit().await)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        dispatch!(self, t => t.rollback().await)
    }
}

/// Build and connect the configured backend.
///
/// The embedded backend is also bootstrapped: schema applied on first run and
/// the admin account created or reconciled. `admin` falls back to
/// [`AdminConfig::default`] when absent. The networked backend is returned as
/// soon as its pool is up.
pub async fn create_adapter(
    config: &DatabaseConfig,
    admin: Option<&AdminConfig>,
) -> Result<Adapter, StoreError> {
    match config.backend()? {
        BackendConfig::Networked(networked) => {
            let mut adapter = NetworkedAdapter::new(networked);
            adapter.connect().await?;
            Ok(Adapter::Networked(adapter))
        }
        BackendConfig::Embedded(embedded) => {
            let mut adapter = EmbeddedAdapter::new(embedded);
            adapter.connect().await?;

            let admin = match admin {
                Some(admin) => admin.clone(),
                None => {
                    warn!("no admin configuration supplied; using built-in default credentials");
                    AdminConfig::default()
                }
            };
            let bootstrapper =
                SchemaBootstrapper::new(&config.migration_script, AdminReconciler::new(admin));

            match bootstrapper.run(&adapter).await {
                Ok(outcome) => {
                    info!(path = %adapter.path().display(), ?outcome, "sqlite store ready");
                    Ok(Adapter::Embedded(adapter))
                }
                Err(e) => {
                    error!(error = %e, "sqlite startup failed");
                    if let Err(close_err) = adapter.close().await {
                        warn!(error = %close_err, "failed to close sqlite store after startup failure");
                    }
                    Err(e)
                }
            }
        }
    }
}
