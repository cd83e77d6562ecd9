//! Process configuration.
//!
//! Layering (later wins): built-in defaults, `config.toml` (or the file named by
//! `DUALSTORE_CONFIG`), then the flat environment variables listed in
//! [`ENV_KEYS`].

use crate::error::StoreError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "DUALSTORE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Flat environment variables and the config key each one overrides.
pub const ENV_KEYS: &[(&str, &str)] = &[
    ("LOGLEVEL", "basic.loglevel"),
    ("DB_TYPE", "database.kind"),
    ("SQLITE_DB_PATH", "database.sqlite.path"),
    ("MIGRATION_SCRIPT", "database.migration_script"),
    ("DB_HOST", "database.mysql.host"),
    ("DB_PORT", "database.mysql.port"),
    ("DB_USER", "database.mysql.user"),
    ("DB_PASS", "database.mysql.password"),
    ("DB_NAME", "database.mysql.database"),
    ("DB_POOL_MIN", "database.mysql.pool_min"),
    ("DB_POOL_MAX", "database.mysql.pool_max"),
    ("DB_POOL_RECYCLE", "database.mysql.pool_recycle"),
    ("ADMIN_USERNAME", "admin.username"),
    ("ADMIN_PASSWORD", "admin.password"),
    ("ADMIN_NAME", "admin.name"),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub database: DatabaseConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub loglevel: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            loglevel: "info".to_string(),
        }
    }
}

/// Raw database section. `kind` stays a string so that an unknown backend is
/// reported by the adapter factory rather than by the config loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub kind: String,
    pub migration_script: PathBuf,
    pub sqlite: EmbeddedConfig,
    pub mysql: NetworkedConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: "sqlite".to_string(),
            migration_script: PathBuf::from("migrations/init_sqlite.sql"),
            sqlite: EmbeddedConfig::default(),
            mysql: NetworkedConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Resolve the configured kind into a concrete backend.
    pub fn backend(&self) -> Result<BackendConfig, StoreError> {
        match BackendKind::parse(&self.kind)? {
            BackendKind::Embedded => Ok(BackendConfig::Embedded(self.sqlite.clone())),
            BackendKind::Networked => {
                self.mysql.validate()?;
                Ok(BackendConfig::Networked(self.mysql.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Embedded,
    Networked,
}

impl BackendKind {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "embedded" => Ok(BackendKind::Embedded),
            "mysql" | "networked" => Ok(BackendKind::Networked),
            _ => Err(StoreError::UnsupportedBackend(raw.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Embedded => "sqlite",
            BackendKind::Networked => "mysql",
        })
    }
}

#[derive(Debug, Clone)]
pub enum BackendConfig {
    Embedded(EmbeddedConfig),
    Networked(NetworkedConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Embedded(_) => BackendKind::Embedded,
            BackendConfig::Networked(_) => BackendKind::Networked,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedConfig {
    pub path: PathBuf,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/dualstore.db"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkedConfig {
    pub host: String,
    pub port: u16,
    #[serde(deserialize_with = "lossy_string")]
    pub user: String,
    #[serde(deserialize_with = "lossy_string")]
    pub password: String,
    #[serde(deserialize_with = "lossy_string")]
    pub database: String,
    pub pool_min: u32,
    pub pool_max: u32,
    /// Maximum age of a pooled connection, in seconds.
    pub pool_recycle: u64,
}

impl Default for NetworkedConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: "dualstore".to_string(),
            pool_min: 3,
            pool_max: 10,
            pool_recycle: 3600,
        }
    }
}

impl NetworkedConfig {
    pub fn recycle_after(&self) -> Duration {
        Duration::from_secs(self.pool_recycle)
    }

    /// `host:port/database`, safe to log.
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.pool_max == 0 {
            return Err(StoreError::Config("database.mysql.pool_max must be > 0".into()));
        }
        if self.pool_min > self.pool_max {
            return Err(StoreError::Config(format!(
                "database.mysql.pool_min ({}) exceeds pool_max ({})",
                self.pool_min, self.pool_max
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for NetworkedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkedConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("pool_min", &self.pool_min)
            .field("pool_max", &self.pool_max)
            .field("pool_recycle", &self.pool_recycle)
            .finish()
    }
}

/// Credentials of the local administrative account.
///
/// The defaults are the well-known `admin` / `admin123` pair and are meant for
/// first-run convenience only; set `ADMIN_USERNAME` / `ADMIN_PASSWORD` in any
/// real deployment.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    #[serde(deserialize_with = "lossy_string")]
    pub username: String,
    #[serde(deserialize_with = "lossy_string")]
    pub password: String,
    #[serde(deserialize_with = "lossy_string")]
    pub name: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin123".to_string(),
            name: "Administrator".to_string(),
        }
    }
}

impl fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

impl Config {
    /// Load from the default locations.
    pub fn load() -> Result<Self, StoreError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::figment(path).extract().map_err(Into::into)
    }

    pub fn figment(path: impl Into<PathBuf>) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.into()))
            .merge(env_overrides())
    }
}

fn env_overrides() -> Env {
    Env::raw().filter_map(|key| {
        ENV_KEYS
            .iter()
            .find(|(var, _)| key.as_str().eq_ignore_ascii_case(var))
            .map(|(_, path)| (*path).into())
    })
}

/// Accepts strings as well as bare numbers/bools, so `ADMIN_PASSWORD=123456`
/// is not rejected after the environment provider parses it as an integer.
fn lossy_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct LossyString;

    impl serde::de::Visitor<'_> for LossyString {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string")
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: serde::de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(LossyString)
}
