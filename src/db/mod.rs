//! Database module: one parametrized-SQL contract over two backends.
//!
//! Layout:
//! - `models.rs`: row/field map types and the typed `users` row
//! - `schema.rs`: table names and catalog lookups used at startup
//! - `sql.rs`: statement building and bind helpers shared by the backends
//! - `sqlite.rs`: embedded single-file backend
//! - `mysql.rs`: networked, pooled backend
//! - `adapter.rs`: backend enum and the startup factory

pub mod adapter;
pub mod models;
pub mod mysql;
pub mod schema;
mod sql;
pub mod sqlite;

pub use adapter::{Adapter, AdapterTransaction, create_adapter};
pub use models::{AuthType, FieldMap, Record, UserRecord};
pub use mysql::{NetworkedAdapter, NetworkedTransaction};
pub use sqlite::{EmbeddedAdapter, EmbeddedTransaction};

use crate::error::StoreError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

/// Statement surface shared by adapters and open transactions.
///
/// Parameters bind positionally to `?` placeholders.
#[async_trait]
pub trait SqlStore: Send + Sync {
    /// First row of the result, or `None` when there is none.
    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Record>, StoreError>;

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>, StoreError>;

    /// Run a statement that returns no rows. Returns the affected row count.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError>;

    /// Insert one row and return the id the backend assigned to it.
    async fn table_insert(&self, table: &str, fields: &FieldMap) -> Result<i64, StoreError>;

    /// `UPDATE table SET <fields> WHERE <where_clause>`.
    ///
    /// `where_clause` is not parametrized; only pass trusted fragments.
    async fn table_update(
        &self,
        table: &str,
        fields: &FieldMap,
        where_clause: &str,
    ) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait StorageAdapter: SqlStore {
    type Transaction: TransactionScope;

    async fn connect(&mut self) -> Result<(), StoreError>;

    /// Release the connection or pool. Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), StoreError>;

    fn is_closed(&self) -> bool;

    /// Begin a unit of work. Dropping the handle without `commit` rolls it back.
    async fn transaction(&self) -> Result<Self::Transaction, StoreError>;
}

#[async_trait]
pub trait TransactionScope: SqlStore {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
pub async fn in_transaction<A, T, F>(adapter: &A, f: F) -> Result<T, StoreError>
where
    A: StorageAdapter + ?Sized,
    F: for<'t> FnOnce(&'t A::Transaction) -> BoxFuture<'t, Result<T, StoreError>>,
{
    let tx = adapter.transaction().await?;
    match f(&tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "transaction rollback failed");
            }
            Err(e)
        }
    }
}
