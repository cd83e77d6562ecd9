//! Statement building and parameter binding shared by both backends.

use crate::db::models::FieldMap;
use crate::error::StoreError;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::{Database, Encode, Type};

/// Checks that `name` is a bare (optionally schema-qualified) identifier.
pub(crate) fn check_identifier(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
                && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        });
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// `INSERT INTO t (a, b) VALUES (?, ?)` plus the bind values, in map order.
pub(crate) fn insert_statement(
    table: &str,
    fields: &FieldMap,
) -> Result<(String, Vec<Value>), StoreError> {
    check_identifier(table)?;
    for column in fields.keys() {
        check_identifier(column)?;
    }
    let columns = fields.keys().map(String::as_str).collect::<Vec<_>>().join(", ");
    let placeholders = vec!["?"; fields.len()].join(", ");
    let sql = format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})");
    Ok((sql, fields.values().cloned().collect()))
}

/// `UPDATE t SET a = ?, b = ? WHERE <where_clause>`.
///
/// `where_clause` is spliced in verbatim and must come from trusted code.
pub(crate) fn update_statement(
    table: &str,
    fields: &FieldMap,
    where_clause: &str,
) -> Result<(String, Vec<Value>), StoreError> {
    check_identifier(table)?;
    for column in fields.keys() {
        check_identifier(column)?;
    }
    let set_clause = fields
        .keys()
        .map(|column| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE {table} SET {set_clause} WHERE {where_clause}");
    Ok((sql, fields.values().cloned().collect()))
}

/// Bind JSON values positionally. Arrays and objects are bound as JSON text.
///
/// Integers outside the signed 64-bit range are rejected; neither backend can
/// store them without changing the value.
pub(crate) fn bind_params<'q, DB>(
    mut query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    params: &'q [Value],
) -> Result<Query<'q, DB, <DB as Database>::Arguments<'q>>, StoreError>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
    Option<&'q str>: Encode<'q, DB> + Type<DB>,
{
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<&str>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => query.bind(i),
                (None, Some(f)) if n.is_f64() => query.bind(f),
                _ => return Err(StoreError::UnsupportedValue(n.to_string())),
            },
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other.to_string()),
        };
    }
    Ok(query)
}
