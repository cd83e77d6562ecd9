use sqlx::Error as SqlxError;
use std::path::PathBuf;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum StoreError {
    /// The database file, server or pool could not be reached.
    #[error("connection error ({target}): {source}")]
    Connection {
        target: String,
        #[source]
        source: SqlxError,
    },

    #[error("cannot create database directory '{}': {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("adapter is not connected")]
    NotConnected,

    #[error("unsupported database backend: {0}")]
    UnsupportedBackend(String),

    #[error("schema bootstrap failed: {0}")]
    SchemaBootstrap(#[source] Box<StoreError>),

    #[error("admin account reconciliation failed: {0}")]
    Reconciliation(#[source] Box<StoreError>),

    /// Malformed SQL, constraint violation or any other driver-side failure.
    #[error("query error: {0}")]
    Query(#[from] SqlxError),

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A bind value the backends cannot store without altering it.
    #[error("unsupported bind value: {0}")]
    UnsupportedValue(String),

    #[error("cannot decode column '{column}': {message}")]
    Decode { column: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub(crate) fn connection(target: impl Into<String>, source: SqlxError) -> Self {
        StoreError::Connection {
            target: target.into(),
            source,
        }
    }

    pub(crate) fn bootstrap(err: StoreError) -> Self {
        match err {
            // Reconciliation runs inside bootstrap but keeps its own kind.
            e @ (StoreError::SchemaBootstrap(_) | StoreError::Reconciliation(_)) => e,
            e => StoreError::SchemaBootstrap(Box::new(e)),
        }
    }

    pub(crate) fn reconciliation(err: StoreError) -> Self {
        match err {
            e @ StoreError::Reconciliation(_) => e,
            e => StoreError::Reconciliation(Box::new(e)),
        }
    }

    /// True for failures that mean the store could not be reached at all.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            StoreError::Connection { .. } | StoreError::Directory { .. } | StoreError::NotConnected
        )
    }
}

impl From<figment::Error> for StoreError {
    fn from(e: figment::Error) -> Self {
        StoreError::Config(e.to_string())
    }
}
