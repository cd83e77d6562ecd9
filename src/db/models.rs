use crate::error::StoreError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One result row: column name to value, in result column order.
pub type Record = Map<String, Value>;

/// Column name to bind value, for `table_insert` / `table_update`.
pub type FieldMap = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Local,
    /// Accounts provisioned through an external identity provider.
    Oauth,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Local => "local",
            AuthType::Oauth => "oauth",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view over a row of the `users` table.
#[derive(Clone, PartialEq, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub auth_type: AuthType,
    #[serde(deserialize_with = "int_bool")]
    pub is_admin: bool,
    #[serde(deserialize_with = "int_bool")]
    pub is_active: bool,
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("name", &self.name)
            .field("auth_type", &self.auth_type)
            .field("is_admin", &self.is_admin)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

impl TryFrom<Record> for UserRecord {
    type Error = StoreError;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        serde_json::from_value(Value::Object(record)).map_err(|e| StoreError::Decode {
            column: "users".to_string(),
            message: e.to_string(),
        })
    }
}

/// SQLite has no boolean type; accept both `true` and `1`.
fn int_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_i64().map(|i| i != 0).unwrap_or(false)),
        other => Err(serde::de::Error::custom(format!(
            "expected boolean or integer, got {other}"
        ))),
    }
}
