use crate::config::EmbeddedConfig;
use crate::db::models::{FieldMap, Record};
use crate::db::schema::SQLITE_TABLE_EXISTS;
use crate::db::sql::{bind_params, insert_statement, update_statement};
use crate::db::{SqlStore, StorageAdapter, TransactionScope};
use crate::error::StoreError;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use futures::TryStreamExt;
use serde_json::{Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Pool, Row, Sqlite, Transaction, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub type SqlitePool = Pool<Sqlite>;

/// Path value selecting a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// How long a statement waits for the single connection before failing.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Embedded single-file backend.
///
/// All work goes through exactly one connection, so statements are serialized.
/// While a [`EmbeddedTransaction`] is open it owns that connection; issue
/// statements through the transaction, not the adapter, until it finishes.
/// A statement sent to the adapter meanwhile fails after [`ACQUIRE_TIMEOUT`].
pub struct EmbeddedAdapter {
    config: EmbeddedConfig,
    pool: Option<SqlitePool>,
}

impl EmbeddedAdapter {
    pub fn new(config: EmbeddedConfig) -> Self {
        Self { config, pool: None }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn pool(&self) -> Result<&SqlitePool, StoreError> {
        self.pool
            .as_ref()
            .filter(|pool| !pool.is_closed())
            .ok_or(StoreError::NotConnected)
    }

    pub async fn has_table(&self, table: &str) -> Result<bool, StoreError> {
        let row = self.get(SQLITE_TABLE_EXISTS, &[json!(table)]).await?;
        Ok(row.is_some())
    }

    /// Apply a multi-statement script as one transaction.
    pub async fn apply_script(&self, script: &str) -> Result<(), StoreError> {
        let mut tx = self.pool()?.begin().await?;
        sqlx::raw_sql(script).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn ensure_parent_dir(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.config.path.parent()
            && !parent.as_os_str().is_empty()
            && !tokio::fs::try_exists(parent).await.unwrap_or(false)
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Directory {
                    path: parent.to_path_buf(),
                    source,
                })?;
            info!(path = %parent.display(), "created database directory");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for EmbeddedAdapter {
    type Transaction = EmbeddedTransaction;

    async fn connect(&mut self) -> Result<(), StoreError> {
        if self.pool().is_ok() {
            return Ok(());
        }
        self.ensure_parent_dir().await?;

        let path = &self.config.path;
        let options = if path.as_os_str() == MEMORY_PATH {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StoreError::connection(MEMORY_PATH, e))?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };
        let options = options.foreign_keys(true);
        // One connection that never expires; an in-memory database lives
        // exactly as long as it does.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::connection(path.display().to_string(), e))?;

        info!(path = %path.display(), "sqlite connection established");
        self.pool = Some(pool);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            info!(path = %self.config.path.display(), "sqlite connection closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool().is_err()
    }

    async fn transaction(&self) -> Result<EmbeddedTransaction, StoreError> {
        let tx = self.pool()?.begin().await?;
        Ok(EmbeddedTransaction { tx: Mutex::new(tx) })
    }
}

#[async_trait]
impl SqlStore for EmbeddedAdapter {
    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Record>, StoreError> {
        fetch_optional(self.pool()?, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>, StoreError> {
        fetch_all(self.pool()?, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        execute(self.pool()?, sql, params).await
    }

    async fn table_insert(&self, table: &str, fields: &FieldMap) -> Result<i64, StoreError> {
        let (sql, params) = insert_statement(table, fields)?;
        insert(self.pool()?, &sql, &params).await
    }

    async fn table_update(
        &self,
        table: &str,
        fields: &FieldMap,
        where_clause: &str,
    ) -> Result<u64, StoreError> {
        let (sql, params) = update_statement(table, fields, where_clause)?;
        execute(self.pool()?, &sql, &params).await
    }
}

/// Open unit of work on the embedded store.
pub struct EmbeddedTransaction {
    tx: Mutex<Transaction<'static, Sqlite>>,
}

#[async_trait]
impl TransactionScope for EmbeddedTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.into_inner().commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.into_inner().rollback().await?;
        debug!("sqlite transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl SqlStore for EmbeddedTransaction {
    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Record>, StoreError> {
        let mut tx = self.tx.lock().await;
        fetch_optional(&mut **tx, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>, StoreError> {
        let mut tx = self.tx.lock().await;
        fetch_all(&mut **tx, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        let mut tx = self.tx.lock().await;
        execute(&mut **tx, sql, params).await
    }

    async fn table_insert(&self, table: &str, fields: &FieldMap) -> Result<i64, StoreError> {
        let (sql, params) = insert_statement(table, fields)?;
        let mut tx = self.tx.lock().await;
        insert(&mut **tx, &sql, &params).await
    }

    async fn table_update(
        &self,
        table: &str,
        fields: &FieldMap,
        where_clause: &str,
    ) -> Result<u64, StoreError> {
        let (sql, params) = update_statement(table, fields, where_clause)?;
        let mut tx = self.tx.lock().await;
        execute(&mut **tx, &sql, &params).await
    }
}

async fn fetch_optional<'e, E>(
    executor: E,
    sql: &'e str,
    params: &'e [Value],
) -> Result<Option<Record>, StoreError>
where
    E: 'e + Executor<'e, Database = Sqlite>,
{
    let row = bind_params(sqlx::query(sql), params)?
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_record).transpose()
}

async fn fetch_all<'e, E>(
    executor: E,
    sql: &'e str,
    params: &'e [Value],
) -> Result<Vec<Record>, StoreError>
where
    E: 'e + Executor<'e, Database = Sqlite>,
{
    bind_params(sqlx::query(sql), params)?
        .fetch(executor)
        .map_err(StoreError::from)
        .and_then(|row| async move { row_to_record(&row) })
        .try_collect()
        .await
}

async fn execute<'e, E>(executor: E, sql: &'e str, params: &'e [Value]) -> Result<u64, StoreError>
where
    E: 'e + Executor<'e, Database = Sqlite>,
{
    let result = bind_params(sqlx::query(sql), params)?
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

async fn insert<'e, E>(executor: E, sql: &'e str, params: &'e [Value]) -> Result<i64, StoreError>
where
    E: 'e + Executor<'e, Database = Sqlite>,
{
    let result = bind_params(sqlx::query(sql), params)?
        .execute(executor)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Decode by the storage class SQLite reports for each value. Integers in a
/// column declared `BOOLEAN` come back as booleans.
fn row_to_record(row: &SqliteRow) -> Result<Record, StoreError> {
    let mut record = Record::with_capacity(row.len());
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" if column.type_info().name() == "BOOLEAN" => {
                    Value::from(row.try_get_unchecked::<i64, _>(idx)? != 0)
                }
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(idx)?),
                "REAL" => Value::from(row.try_get_unchecked::<f64, _>(idx)?),
                "BLOB" => Value::from(STANDARD.encode(row.try_get_unchecked::<Vec<u8>, _>(idx)?)),
                _ => Value::from(row.try_get_unchecked::<String, _>(idx)?),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}
