use crate::config::AdminConfig;
use crate::db::SqlStore;
use crate::db::models::{AuthType, FieldMap, Record};
use crate::db::schema::{SELECT_LOCAL_USER, USERS_TABLE};
use crate::error::StoreError;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// bcrypt work factor for stored password hashes.
pub const BCRYPT_COST: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Right after the schema was created; never touches an existing row.
    CreateOnly,
    /// Every later startup; converges the stored hash to configuration.
    Reconcile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created { id: i64 },
    /// Create-only run found the account already there.
    AlreadyPresent { id: i64 },
    /// Stored hash already verifies against the configured password.
    Unchanged { id: i64 },
    PasswordUpdated { id: i64 },
}

impl ReconcileOutcome {
    pub fn id(&self) -> i64 {
        match *self {
            ReconcileOutcome::Created { id }
            | ReconcileOutcome::AlreadyPresent { id }
            | ReconcileOutcome::Unchanged { id }
            | ReconcileOutcome::PasswordUpdated { id } => id,
        }
    }

    /// Whether the run wrote to the `users` table.
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Created { .. } | ReconcileOutcome::PasswordUpdated { .. }
        )
    }
}

/// Keeps exactly one local admin account in line with [`AdminConfig`].
#[derive(Debug, Clone)]
pub struct AdminReconciler {
    admin: AdminConfig,
}

impl AdminReconciler {
    pub fn new(admin: AdminConfig) -> Self {
        Self { admin }
    }

    pub fn username(&self) -> &str {
        &self.admin.username
    }

    /// Any failure comes back as [`StoreError::Reconciliation`].
    pub async fn run(
        &self,
        store: &dyn SqlStore,
        mode: ReconcileMode,
    ) -> Result<ReconcileOutcome, StoreError> {
        self.reconcile(store, mode)
            .await
            .map_err(StoreError::reconciliation)
    }

    async fn reconcile(
        &self,
        store: &dyn SqlStore,
        mode: ReconcileMode,
    ) -> Result<ReconcileOutcome, StoreError> {
        let username = self.admin.username.as_str();
        let existing = store.get(SELECT_LOCAL_USER, &[json!(username)]).await?;

        let Some(row) = existing else {
            return self.create(store).await;
        };
        let id = row_id(&row)?;

        match mode {
            ReconcileMode::CreateOnly => {
                info!(username, id, "admin account already present; leaving it untouched");
                Ok(ReconcileOutcome::AlreadyPresent { id })
            }
            ReconcileMode::Reconcile => {
                let stored_hash = row
                    .get("password_hash")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if verify_password(&self.admin.password, stored_hash).await? {
                    info!(username, id, "admin account matches configuration");
                    return Ok(ReconcileOutcome::Unchanged { id });
                }

                let password_hash = hash_password(&self.admin.password).await?;
                let mut fields = FieldMap::new();
                fields.insert("password_hash".into(), json!(password_hash));
                fields.insert("name".into(), json!(self.admin.name));
                let changed = store
                    .table_update(USERS_TABLE, &fields, &format!("id = {id}"))
                    .await?;
                if changed != 1 {
                    warn!(username, id, changed, "unexpected row count updating admin account");
                }
                info!(username, id, "admin account password updated from configuration");
                Ok(ReconcileOutcome::PasswordUpdated { id })
            }
        }
    }

    async fn create(&self, store: &dyn SqlStore) -> Result<ReconcileOutcome, StoreError> {
        let password_hash = hash_password(&self.admin.password).await?;
        let mut fields = FieldMap::new();
        fields.insert("username".into(), json!(self.admin.username));
        fields.insert("password_hash".into(), json!(password_hash));
        fields.insert("name".into(), json!(self.admin.name));
        fields.insert("auth_type".into(), json!(AuthType::Local.as_str()));
        fields.insert("is_admin".into(), json!(true));
        fields.insert("is_active".into(), json!(true));

        let id = store.table_insert(USERS_TABLE, &fields).await?;
        info!(username = %self.admin.username, id, "admin account created");
        Ok(ReconcileOutcome::Created { id })
    }
}

fn row_id(row: &Record) -> Result<i64, StoreError> {
    row.get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| StoreError::Decode {
            column: "id".to_string(),
            message: format!("expected integer id, got {:?}", row.get("id")),
        })
}

/// bcrypt hash at [`BCRYPT_COST`], off the async executor.
pub async fn hash_password(password: &str) -> Result<String, StoreError> {
    let password = password.to_owned();
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, BCRYPT_COST)).await??;
    Ok(hash)
}

/// bcrypt verification. A malformed stored hash counts as a mismatch.
pub async fn verify_password(password: &str, hash: String) -> Result<bool, StoreError> {
    let password = password.to_owned();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await?;
    Ok(verified.unwrap_or_else(|e| {
        debug!(error = %e, "stored password hash could not be verified");
        false
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddedConfig;
    use crate::db::{EmbeddedAdapter, StorageAdapter, UserRecord};
    use std::path::PathBuf;

    async fn store_with_users() -> EmbeddedAdapter {
        let mut adapter = EmbeddedAdapter::new(EmbeddedConfig {
            path: PathBuf::from(":memory:"),
        });
        adapter.connect().await.unwrap();
        adapter
            .apply_script(
                "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, username TEXT NOT NULL, \
                 password_hash TEXT, name TEXT, auth_type TEXT NOT NULL DEFAULT 'local', \
                 is_admin INTEGER NOT NULL DEFAULT 0, is_active INTEGER NOT NULL DEFAULT 1);",
            )
            .await
            .unwrap();
        adapter
    }

    fn admin(password: &str) -> AdminConfig {
        AdminConfig {
            username: "admin".into(),
            password: password.into(),
            name: "Administrator".into(),
        }
    }

    async fn users(store: &EmbeddedAdapter) -> Vec<UserRecord> {
        store
            .query("SELECT * FROM users ORDER BY id", &[])
            .await
            .unwrap()
            .into_iter()
            .map(|r| UserRecord::try_from(r).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn hashes_use_configured_cost_and_verify() {
        let hash = hash_password("admin123").await.unwrap();
        assert!(hash.starts_with("$2b$12$"));
        assert!(verify_password("admin123", hash.clone()).await.unwrap());
        assert!(!verify_password("wrong", hash).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_hash_is_a_mismatch() {
        assert!(!verify_password("admin123", "not-a-hash".into()).await.unwrap());
        assert!(!verify_password("admin123", String::new()).await.unwrap());
    }

    #[tokio::test]
    async fn create_only_inserts_admin() {
        let store = store_with_users().await;
        let outcome = AdminReconciler::new(admin("admin123"))
            .run(&store, ReconcileMode::CreateOnly)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Created { .. }));

        let users = users(&store).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, outcome.id());
        assert!(users[0].is_admin && users[0].is_active);
        assert_eq!(users[0].auth_type, AuthType::Local);
    }

    #[tokio::test]
    async fn create_only_leaves_seeded_account_alone() {
        let store = store_with_users().await;
        store
            .execute(
                "INSERT INTO users (username, password_hash, name, auth_type, is_admin) \
                 VALUES ('admin', 'seeded', 'Seed', 'local', 1)",
                &[],
            )
            .await
            .unwrap();

        let outcome = AdminReconciler::new(admin("admin123"))
            .run(&store, ReconcileMode::CreateOnly)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::AlreadyPresent { .. }));
        assert!(!outcome.wrote());

        let users = users(&store).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].password_hash.as_deref(), Some("seeded"));
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let store = store_with_users().await;
        let reconciler = AdminReconciler::new(admin("admin123"));
        let first = reconciler.run(&store, ReconcileMode::Reconcile).await.unwrap();
        assert!(matches!(first, ReconcileOutcome::Created { .. }));
        let hash_before = users(&store).await[0].password_hash.clone();

        for _ in 0..2 {
            let again = reconciler.run(&store, ReconcileMode::Reconcile).await.unwrap();
            assert_eq!(again, ReconcileOutcome::Unchanged { id: first.id() });
        }
        let after = users(&store).await;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].password_hash, hash_before);
    }

    #[tokio::test]
    async fn reconcile_rotates_changed_password() {
        let store = store_with_users().await;
        AdminReconciler::new(admin("old-password"))
            .run(&store, ReconcileMode::Reconcile)
            .await
            .unwrap();
        store
            .execute("UPDATE users SET is_active = 0 WHERE username = 'admin'", &[])
            .await
            .unwrap();
        let before = users(&store).await.remove(0);

        let mut rotated = admin("new-password");
        rotated.name = "Root".into();
        let outcome = AdminReconciler::new(rotated)
            .run(&store, ReconcileMode::Reconcile)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::PasswordUpdated { id: before.id });

        let after = users(&store).await.remove(0);
        assert_eq!(after.id, before.id);
        assert_eq!(after.username, before.username);
        assert_eq!(after.auth_type, before.auth_type);
        assert_eq!(after.is_admin, before.is_admin);
        assert!(!after.is_active);
        assert_eq!(after.name.as_deref(), Some("Root"));
        let hash = after.password_hash.unwrap();
        assert!(bcrypt::verify("new-password", &hash).unwrap());
        assert!(!bcrypt::verify("old-password", &hash).unwrap());
    }

    #[tokio::test]
    async fn reconcile_repairs_malformed_hash() {
        let store = store_with_users().await;
        store
            .execute(
                "INSERT INTO users (username, password_hash, auth_type, is_admin) \
                 VALUES ('admin', 'garbage', 'local', 1)",
                &[],
            )
            .await
            .unwrap();
        let outcome = AdminReconciler::new(admin("admin123"))
            .run(&store, ReconcileMode::Reconcile)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::PasswordUpdated { .. }));
    }

    #[tokio::test]
    async fn reconcile_creates_account_for_new_username() {
        let store = store_with_users().await;
        AdminReconciler::new(admin("admin123"))
            .run(&store, ReconcileMode::Reconcile)
            .await
            .unwrap();

        let mut renamed = admin("admin123");
        renamed.username = "ops".into();
        let outcome = AdminReconciler::new(renamed)
            .run(&store, ReconcileMode::Reconcile)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Created { .. }));

        let names: Vec<_> = users(&store).await.into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["admin", "ops"]);
    }

    #[tokio::test]
    async fn oauth_account_with_same_username_is_ignored() {
        let store = store_with_users().await;
        store
            .execute(
                "INSERT INTO users (username, auth_type) VALUES ('admin', 'oauth')",
                &[],
            )
            .await
            .unwrap();
        let outcome = AdminReconciler::new(admin("admin123"))
            .run(&store, ReconcileMode::Reconcile)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Created { .. }));
        assert_eq!(users(&store).await.len(), 2);
    }

    #[tokio::test]
    async fn missing_table_is_a_reconciliation_error() {
        let mut store = EmbeddedAdapter::new(EmbeddedConfig {
            path: PathBuf::from(":memory:"),
        });
        store.connect().await.unwrap();
        let err = AdminReconciler::new(admin("admin123"))
            .run(&store, ReconcileMode::Reconcile)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Reconciliation(_)));
    }
}
