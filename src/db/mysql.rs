//! Networked backend over a sqlx MySQL pool.
//!
//! The pool runs in autocommit mode: every statement outside a transaction is
//! committed by the server as it completes.

use crate::config::NetworkedConfig;
use crate::db::models::{FieldMap, Record};
use crate::db::sql::{bind_params, insert_statement, update_statement};
use crate::db::{SqlStore, StorageAdapter, TransactionScope};
use crate::error::StoreError;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Executor, MySql, Pool, Row, Transaction, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub type MySqlPool = Pool<MySql>;

pub struct NetworkedAdapter {
    config: NetworkedConfig,
    pool: Option<MySqlPool>,
}

impl NetworkedAdapter {
    pub fn new(config: NetworkedConfig) -> Self {
        Self { config, pool: None }
    }

    pub fn config(&self) -> &NetworkedConfig {
        &self.config
    }

    fn pool(&self) -> Result<&MySqlPool, StoreError> {
        self.pool
            .as_ref()
            .filter(|pool| !pool.is_closed())
            .ok_or(StoreError::NotConnected)
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let c = &self.config;
        MySqlConnectOptions::new()
            .host(&c.host)
            .port(c.port)
            .username(&c.user)
            .password(&c.password)
            .database(&c.database)
            .charset("utf8mb4")
    }

    fn pool_options(&self) -> MySqlPoolOptions {
        let c = &self.config;
        MySqlPoolOptions::new()
            .min_connections(c.pool_min)
            .max_connections(c.pool_max)
            .max_lifetime(c.recycle_after())
    }
}

#[async_trait]
impl StorageAdapter for NetworkedAdapter {
    type Transaction = NetworkedTransaction;

    async fn connect(&mut self) -> Result<(), StoreError> {
        if self.pool().is_ok() {
            return Ok(());
        }
        let target = self.config.target();
        let pool = self
            .pool_options()
            .connect_with(self.connect_options())
            .await
            .map_err(|e| StoreError::connection(target.clone(), e))?;

        info!(
            target = %target,
            pool_min = self.config.pool_min,
            pool_max = self.config.pool_max,
            pool_recycle_secs = self.config.pool_recycle,
            "mysql pool established"
        );
        self.pool = Some(pool);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            info!(target = %self.config.target(), "mysql pool closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool().is_err()
    }

    async fn transaction(&self) -> Result<NetworkedTransaction, StoreError> {
        let tx = self.pool()?.begin().await?;
        Ok(NetworkedTransaction { tx: Mutex::new(tx) })
    }
}

#[async_trait]
impl SqlStore for NetworkedAdapter {
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

/// Open unit of work on one pooled connection, with autocommit suspended.
pub struct NetworkedTransaction {
    tx: Mutex<Transaction<'static, MySql>>,
}

#[async_trait]
impl TransactionScope for NetworkedTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.into_inner().commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.into_inner().rollback().await?;
        debug!("mysql transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl SqlStore for NetworkedTransaction {
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
    E: 'e + Executor<'e, Database = MySql>,
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
    E: 'e + Executor<'e, Database = MySql>,
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
    E: 'e + Executor<'e, Database = MySql>,
{
    let result = bind_params(sqlx::query(sql), params)?
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

async fn insert<'e, E>(executor: E, sql: &'e str, params: &'e [Value]) -> Result<i64, StoreError>
where
    E: 'e + Executor<'e, Database = MySql>,
{
    let result = bind_params(sqlx::query(sql), params)?
        .execute(executor)
        .await?;
    i64::try_from(result.last_insert_id()).map_err(|e| StoreError::Decode {
        column: "last_insert_id".to_string(),
        message: e.to_string(),
    })
}

fn row_to_record(row: &MySqlRow) -> Result<Record, StoreError> {
    let mut record = Record::with_capacity(row.len());
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            decode_value(row, idx, raw.type_info().name())?
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn decode_value(row: &MySqlRow, idx: usize, type_name: &str) -> Result<Value, StoreError> {
    let value = match type_name {
        "BOOLEAN" => Value::from(row.try_get_unchecked::<bool, _>(idx)?),
        name if name.ends_with("UNSIGNED") => Value::from(row.try_get_unchecked::<u64, _>(idx)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            Value::from(row.try_get_unchecked::<i64, _>(idx)?)
        }
        "FLOAT" => Value::from(f64::from(row.try_get_unchecked::<f32, _>(idx)?)),
        "DOUBLE" => Value::from(row.try_get_unchecked::<f64, _>(idx)?),
        "DATETIME" | "TIMESTAMP" => Value::from(
            row.try_get_unchecked::<NaiveDateTime, _>(idx)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        "DATE" => Value::from(row.try_get_unchecked::<NaiveDate, _>(idx)?.to_string()),
        "TIME" => Value::from(row.try_get_unchecked::<NaiveTime, _>(idx)?.to_string()),
        "JSON" => {
            let text = row.try_get_unchecked::<String, _>(idx)?;
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => Value::from(STANDARD.encode(row.try_get_unchecked::<Vec<u8>, _>(idx)?)),
        // CHAR, VARCHAR, TEXT, DECIMAL, ENUM, SET
        _ => Value::from(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::in_transaction;
    use serde_json::json;
    use std::time::Duration;

    fn adapter() -> NetworkedAdapter {
        NetworkedAdapter::new(NetworkedConfig {
            host: "db.example".into(),
            port: 3307,
            user: "app".into(),
            password: "secret".into(),
            database: "appdb".into(),
            pool_min: 2,
            pool_max: 8,
            pool_recycle: 900,
        })
    }

    #[test]
    fn pool_options_follow_config() {
        let options = adapter().pool_options();
        assert_eq!(options.get_min_connections(), 2);
        assert_eq!(options.get_max_connections(), 8);
        assert_eq!(options.get_max_lifetime(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn connect_options_follow_config() {
        let options = adapter().connect_options();
        assert_eq!(options.get_host(), "db.example");
        assert_eq!(options.get_port(), 3307);
        assert_eq!(options.get_username(), "app");
        assert_eq!(options.get_database(), Some("appdb"));
        assert_eq!(options.get_charset(), "utf8mb4");
    }

    #[tokio::test]
    async fn close_without_connect_is_harmless() {
        let mut adapter = adapter();
        assert!(adapter.is_closed());
        adapter.close().await.unwrap();
        adapter.close().await.unwrap();
        assert!(matches!(
            adapter.query("SELECT 1", &[]).await,
            Err(StoreError::NotConnected)
        ));
    }

    fn fields(value: Value) -> FieldMap {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    const CHECK_TABLE: &str = "dualstore_decode_check";

    /// Runs against the server named by `DB_HOST`, `DB_PORT`, `DB_USER`,
    /// `DB_PASS` and `DB_NAME`: `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore = "needs a MySQL server"]
    async fn live_server_decodes_columns_and_scopes_transactions() {
        let cfg = Config::load().unwrap();
        let mut adapter = NetworkedAdapter::new(cfg.database.mysql);
        adapter.connect().await.unwrap();

        adapter
            .execute(&format!("DROP TABLE IF EXISTS {CHECK_TABLE}"), &[])
            .await
            .unwrap();
        adapter
            .execute(
                &format!(
                    "CREATE TABLE {CHECK_TABLE} (
                        id BIGINT PRIMARY KEY AUTO_INCREMENT,
                        flag TINYINT(1) NOT NULL,
                        counter BIGINT UNSIGNED NULL,
                        small INT NULL,
                        ratio DOUBLE NULL,
                        label VARCHAR(32) NULL,
                        price DECIMAL(6,2) NULL,
                        stamp DATETIME NULL,
                        day DATE NULL,
                        meta JSON NULL,
                        payload BLOB NULL
                    )"
                ),
                &[],
            )
            .await
            .unwrap();

        let id = adapter
            .table_insert(
                CHECK_TABLE,
                &fields(json!({
                    "flag": true,
                    "counter": 42,
                    "small": -7,
                    "ratio": 2.5,
                    "label": "ünïcode",
                    "price": "12.50",
                    "stamp": "2024-01-02 03:04:05",
                    "day": "2024-01-02",
                    "meta": {"k": [1, 2]},
                    "payload": "abc",
                })),
            )
            .await
            .unwrap();

        let row = adapter
            .get(
                &format!(
                    "SELECT flag, counter, small, ratio, label, price, stamp, day, meta, payload \
                     FROM {CHECK_TABLE} WHERE id = ?"
                ),
                &[json!(id)],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["flag"], json!(true));
        assert_eq!(row["counter"], json!(42));
        assert_eq!(row["small"], json!(-7));
        assert_eq!(row["ratio"], json!(2.5));
        assert_eq!(row["label"], json!("ünïcode"));
        assert_eq!(row["price"], json!("12.50"));
        assert_eq!(row["stamp"], json!("2024-01-02T03:04:05"));
        assert_eq!(row["day"], json!("2024-01-02"));
        assert_eq!(row["meta"], json!({"k": [1, 2]}));
        assert_eq!(row["payload"], json!("YWJj"));

        let count_sql = format!("SELECT COUNT(*) AS n FROM {CHECK_TABLE}");
        let tx = adapter.transaction().await.unwrap();
        tx.table_insert(CHECK_TABLE, &fields(json!({"flag": false})))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        let count = adapter.get(&count_sql, &[]).await.unwrap().unwrap();
        assert_eq!(count["n"], json!(1));

        in_transaction(&adapter, |tx| {
            Box::pin(async move {
                tx.table_insert(CHECK_TABLE, &fields(json!({"flag": false})))
                    .await
            })
        })
        .await
        .unwrap();
        let count = adapter.get(&count_sql, &[]).await.unwrap().unwrap();
        assert_eq!(count["n"], json!(2));

        adapter
            .execute(&format!("DROP TABLE {CHECK_TABLE}"), &[])
            .await
            .unwrap();
        adapter.close().await.unwrap();
    }
}
