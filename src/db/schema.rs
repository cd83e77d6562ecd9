//! Table names and catalog lookups used by startup.
//!
//! The DDL itself lives in `migrations/init_sqlite.sql` and is read at runtime,
//! so deployments can swap it without rebuilding.

/// Core application table; its presence marks an initialized store.
pub const USERS_TABLE: &str = "users";

/// SQLite catalog lookup, bound with the table name.
pub const SQLITE_TABLE_EXISTS: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?";

/// Local-account lookup by username.
pub const SELECT_LOCAL_USER: &str =
    "SELECT id, password_hash FROM users WHERE username = ? AND auth_type = 'local'";
