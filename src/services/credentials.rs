//! Credential store
//!
//! Durable user accounts kept in memory and mirrored to `users.json`.
//!
//! Every mutation happens under the store's write lock and is flushed to disk
//! before the lock is released. If the flush fails, the in-memory change is
//! rolled back so memory and disk never disagree.
//!
//! Invariants:
//! - usernames are unique, compared case-insensitively
//! - at least one active admin exists; deleting, demoting or deactivating the
//!   last one is refused

use crate::config::{AuthConfig, StorageConfig};
use crate::models::{CreateUserInput, UpdateUserInput, User, UserRole, UsersFile};
use crate::services::password::{hash_password, verify_password};
use crate::store::Clock;
use anyhow::Context;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name of the credential file inside the data directory
pub const USERS_FILE: &str = "users.json";

/// Email given to the bootstrapped admin
const DEFAULT_ADMIN_EMAIL: &str = "admin@localhost";

/// Error types for credential operations
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Input failed validation
    #[error("{0}")]
    Validation(String),

    /// Username already in use
    #[error("username already exists")]
    UsernameTaken,

    /// No user with the given ID
    #[error("user not found")]
    NotFound,

    /// Operation would leave no active admin
    #[error("cannot remove the last active admin")]
    LastAdmin,

    /// Unknown username or wrong password
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Correct password but the account is switched off
    #[error("user account is disabled")]
    AccountDisabled,

    /// Writing `users.json` failed; the change was rolled back
    #[error("failed to save users: {0:#}")]
    Persistence(#[source] anyhow::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Owner of all user records
pub struct CredentialStore {
    users: RwLock<HashMap<String, User>>,
    path: PathBuf,
    min_password_length: usize,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Load users from `<data_dir>/users.json`.
    ///
    /// A missing file is treated as empty. When no users exist, a default
    /// admin is created from `auth` and written out.
    ///
    /// # Errors
    ///
    /// - `Internal` if the data directory cannot be created or the file
    ///   cannot be read or parsed
    /// - `Persistence` if the bootstrapped admin cannot be saved
    pub async fn open(
        storage: &StorageConfig,
        auth: &AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CredentialError> {
        tokio::fs::create_dir_all(&storage.data_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create data directory {}",
                    storage.data_dir.display()
                )
            })?;

        let path = storage.data_dir.join(USERS_FILE);
        let users = load_users(&path).await?;
        tracing::debug!(path = %path.display(), count = users.len(), "Loaded users");

        let store = Self {
            users: RwLock::new(users),
            path,
            min_password_length: auth.min_password_length,
            clock,
        };

        if store.users.read().await.is_empty() {
            store.bootstrap_admin(auth).await?;
        }

        Ok(store)
    }

    async fn bootstrap_admin(&self, auth: &AuthConfig) -> Result<(), CredentialError> {
        let password_hash = hash_password(&auth.default_admin_password)
            .context("Failed to hash default admin password")?;
        let admin = User::new(
            auth.default_admin_username.clone(),
            DEFAULT_ADMIN_EMAIL.to_string(),
            password_hash,
            UserRole::Admin,
            self.clock.now(),
        );

        let mut users = self.users.write().await;
        users.insert(admin.id.clone(), admin.clone());
        if let Err(e) = self.flush(&users).await {
            users.remove(&admin.id);
            return Err(CredentialError::Persistence(e));
        }

        tracing::warn!(
            username = %admin.username,
            "Default admin account created; change its password after first login"
        );
        Ok(())
    }

    /// Create a new user.
    ///
    /// # Arguments
    ///
    /// * `input` - Username, plaintext password, email and optional role
    ///   (`admin` or `user`, default `user`)
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty username or email, a short password, or
    ///   an unknown role
    /// - `UsernameTaken` if the name is in use (case-insensitive)
    /// - `Persistence` if the file write fails; the user is not kept
    pub async fn create_user(&self, input: CreateUserInput) -> Result<User, CredentialError> {
        let username = input.username.trim().to_string();
        if username.is_empty() {
            return Err(CredentialError::Validation(
                "username cannot be empty".to_string(),
            ));
        }
        self.validate_password(&input.password)?;
        let email = input.email.trim().to_string();
        if email.is_empty() {
            return Err(CredentialError::Validation(
                "email cannot be empty".to_string(),
            ));
        }
        let role = parse_role(input.role.as_deref())?.unwrap_or_default();

        if self.get_user_by_username(&username).await.is_some() {
            return Err(CredentialError::UsernameTaken);
        }

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;
        let user = User::new(username, email, password_hash, role, self.clock.now());

        let mut users = self.users.write().await;
        // Re-check under the write lock; the hash above ran unlocked.
        if find_by_username(&users, &user.username).is_some() {
            return Err(CredentialError::UsernameTaken);
        }

        users.insert(user.id.clone(), user.clone());
        if let Err(e) = self.flush(&users).await {
            users.remove(&user.id);
            return Err(CredentialError::Persistence(e));
        }

        Ok(user)
    }

    /// Look up a user by ID
    pub async fn get_user(&self, id: &str) -> Option<User> {
        self.users.read().await.get(id).cloned()
    }

    /// Look up a user by username, ignoring case and surrounding whitespace
    pub async fn get_user_by_username(&self, username: &str) -> Option<User> {
        let users = self.users.read().await;
        find_by_username(&users, username).cloned()
    }

    /// All users, oldest first
    pub async fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.username.cmp(&b.username))
        });
        users
    }

    /// Number of stored users
    pub async fn count(&self) -> usize {
        self.users.read().await.len()
    }

    /// Apply a partial update to a user.
    ///
    /// Empty strings in `input` are treated as "leave unchanged".
    ///
    /// # Errors
    ///
    /// - `NotFound` if the user doesn't exist
    /// - `Validation` for an unknown role
    /// - `LastAdmin` if the change would demote or deactivate the last active admin
    /// - `Persistence` if the file write fails; the old record is restored
    pub async fn update_user(
        &self,
        id: &str,
        input: UpdateUserInput,
    ) -> Result<User, CredentialError> {
        let role = parse_role(input.role.as_deref())?;

        let mut users = self.users.write().await;
        let previous = users.get(id).cloned().ok_or(CredentialError::NotFound)?;

        let mut updated = previous.clone();
        if let Some(email) = input.email.as_deref().map(str::trim) {
            if !email.is_empty() {
                updated.email = email.to_string();
            }
        }
        if let Some(role) = role {
            updated.role = role;
        }
        if let Some(is_active) = input.is_active {
            updated.is_active = is_active;
        }

        if previous.is_active_admin()
            && !updated.is_active_admin()
            && active_admin_count(&users) <= 1
        {
            return Err(CredentialError::LastAdmin);
        }

        updated.updated_at = self.clock.now();
        users.insert(id.to_string(), updated.clone());
        if let Err(e) = self.flush(&users).await {
            users.insert(id.to_string(), previous);
            return Err(CredentialError::Persistence(e));
        }

        Ok(updated)
    }

    /// Replace a user's password.
    ///
    /// # Errors
    ///
    /// - `Validation` if the password is too short
    /// - `NotFound` if the user doesn't exist
    /// - `Persistence` if the file write fails; the old hash is restored
    pub async fn change_password(
        &self,
        id: &str,
        new_password: &str,
    ) -> Result<(), CredentialError> {
        self.validate_password(new_password)?;
        if self.get_user(id).await.is_none() {
            return Err(CredentialError::NotFound);
        }

        let password_hash = hash_password(new_password).context("Failed to hash password")?;

        let mut users = self.users.write().await;
        let previous = users.get(id).cloned().ok_or(CredentialError::NotFound)?;

        let mut updated = previous.clone();
        updated.password_hash = password_hash;
        updated.updated_at = self.clock.now();
        users.insert(id.to_string(), updated);

        if let Err(e) = self.flush(&users).await {
            users.insert(id.to_string(), previous);
            return Err(CredentialError::Persistence(e));
        }

        Ok(())
    }

    /// Delete a user, returning the removed record.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the user doesn't exist
    /// - `LastAdmin` if the user is the last active admin
    /// - `Persistence` if the file write fails; the user is restored
    pub async fn delete_user(&self, id: &str) -> Result<User, CredentialError> {
        let mut users = self.users.write().await;
        let user = users.get(id).cloned().ok_or(CredentialError::NotFound)?;

        if user.is_active_admin() && active_admin_count(&users) <= 1 {
            return Err(CredentialError::LastAdmin);
        }

        users.remove(id);
        if let Err(e) = self.flush(&users).await {
            users.insert(id.to_string(), user);
            return Err(CredentialError::Persistence(e));
        }

        Ok(user)
    }

    /// Check a username/password pair.
    ///
    /// The password is verified before the active flag, so a disabled account
    /// is only reported to callers who know its password.
    pub async fn validate_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, CredentialError> {
        let user = self
            .get_user_by_username(username)
            .await
            .ok_or(CredentialError::InvalidCredentials)?;

        let matches =
            verify_password(password, &user.password_hash).context("Failed to verify password")?;
        if !matches {
            return Err(CredentialError::InvalidCredentials);
        }

        if !user.is_active {
            return Err(CredentialError::AccountDisabled);
        }

        Ok(user)
    }

    fn validate_password(&self, password: &str) -> Result<(), CredentialError> {
        if password.is_empty() {
            return Err(CredentialError::Validation(
                "password cannot be empty".to_string(),
            ));
        }
        if password.chars().count() < self.min_password_length {
            return Err(CredentialError::Validation(format!(
                "password must be at least {} characters",
                self.min_password_length
            )));
        }
        Ok(())
    }

    /// Write the full user list to a sibling temp file, then rename it over
    /// `users.json`. Called with the write lock held.
    async fn flush(&self, users: &HashMap<String, User>) -> anyhow::Result<()> {
        let mut list: Vec<User> = users.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let data = serde_json::to_vec_pretty(&UsersFile { users: list })
            .context("Failed to serialize users")?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}

async fn load_users(path: &Path) -> Result<HashMap<String, User>, CredentialError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to read {}", path.display()))
                .into())
        }
    };

    let file: UsersFile = serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(file
        .users
        .into_iter()
        .map(|user| (user.id.clone(), user))
        .collect())
}

fn find_by_username<'a>(users: &'a HashMap<String, User>, username: &str) -> Option<&'a User> {
    let wanted = username.trim().to_lowercase();
    users
        .values()
        .find(|user| user.username.to_lowercase() == wanted)
}

fn active_admin_count(users: &HashMap<String, User>) -> usize {
    users.values().filter(|user| user.is_active_admin()).count()
}

/// Parse an optional role string; `None` and `""` mean "not given"
fn parse_role(role: Option<&str>) -> Result<Option<UserRole>, CredentialError> {
    match role.map(str::trim) {
        None | Some("") => Ok(None),
        Some(role) => role
            .parse::<UserRole>()
            .map(Some)
            .map_err(|e| CredentialError::Validation(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;
    use chrono::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        data_dir: PathBuf,
        clock: Arc<ManualClock>,
        store: CredentialStore,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let clock = Arc::new(ManualClock::starting_now());
        let storage = StorageConfig {
            data_dir: data_dir.clone(),
            temp_dir: dir.path().join("tmp"),
        };
        let store = CredentialStore::open(&storage, &AuthConfig::default(), clock.clone())
            .await
            .unwrap();
        Fixture {
            _dir: dir,
            data_dir,
            clock,
            store,
        }
    }

    fn input(username: &str, role: Option<&str>) -> CreateUserInput {
        CreateUserInput {
            username: username.to_string(),
            password: "secret1".to_string(),
            email: format!("{}@example.com", username),
            role: role.map(str::to_string),
        }
    }

    async fn admin_id(store: &CredentialStore) -> String {
        store.get_user_by_username("admin").await.unwrap().id
    }

    #[tokio::test]
    async fn test_bootstraps_default_admin() {
        let f = fixture().await;

        let users = f.store.list_users().await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "admin");
        assert_eq!(users[0].email, "admin@localhost");
        assert!(users[0].is_active_admin());
        assert!(f.data_dir.join(USERS_FILE).exists());

        let user = f.store.validate_credentials("admin", "admin123").await.unwrap();
        assert_eq!(user.id, users[0].id);
    }

    #[tokio::test]
    async fn test_users_survive_reopen() {
        let f = fixture().await;
        let created = f.store.create_user(input("bob", None)).await.unwrap();

        let storage = StorageConfig {
            data_dir: f.data_dir.clone(),
            temp_dir: f.data_dir.join("unused"),
        };
        let reopened = CredentialStore::open(&storage, &AuthConfig::default(), f.clock.clone())
            .await
            .unwrap();

        assert_eq!(reopened.count().await, 2);
        let bob = reopened.get_user(&created.id).await.unwrap();
        assert_eq!(bob.username, "bob");
        assert_eq!(bob.role, UserRole::User);
        assert!(reopened.validate_credentials("BOB", "secret1").await.is_ok());
    }

    #[tokio::test]
    async fn test_create_user_validation() {
        let f = fixture().await;

        let mut bad = input("  ", None);
        assert!(matches!(
            f.store.create_user(bad.clone()).await,
            Err(CredentialError::Validation(_))
        ));

        bad = input("carol", None);
        bad.password = "12345".to_string();
        assert!(matches!(
            f.store.create_user(bad).await,
            Err(CredentialError::Validation(_))
        ));

        bad = input("carol", None);
        bad.email = " ".to_string();
        assert!(matches!(
            f.store.create_user(bad).await,
            Err(CredentialError::Validation(_))
        ));

        assert!(matches!(
            f.store.create_user(input("carol", Some("editor"))).await,
            Err(CredentialError::Validation(_))
        ));

        assert_eq!(f.store.count().await, 1);
    }

    #[tokio::test]
    async fn test_username_is_case_insensitive() {
        let f = fixture().await;
        f.store.create_user(input("Dave", None)).await.unwrap();

        assert!(matches!(
            f.store.create_user(input("dAVE", None)).await,
            Err(CredentialError::UsernameTaken)
        ));
        assert!(f.store.get_user_by_username(" dave ").await.is_some());
    }

    #[tokio::test]
    async fn test_create_rolls_back_when_flush_fails() {
        let f = fixture().await;
        std::fs::remove_dir_all(&f.data_dir).unwrap();

        let result = f.store.create_user(input("erin", None)).await;

        assert!(matches!(result, Err(CredentialError::Persistence(_))));
        assert!(f.store.get_user_by_username("erin").await.is_none());
        assert_eq!(f.store.count().await, 1);
    }

    #[tokio::test]
    async fn test_update_rolls_back_when_flush_fails() {
        let f = fixture().await;
        let user = f.store.create_user(input("frank", None)).await.unwrap();
        std::fs::remove_dir_all(&f.data_dir).unwrap();

        let update = UpdateUserInput {
            email: Some("new@example.com".to_string()),
            ..Default::default()
        };
        let result = f.store.update_user(&user.id, update).await;

        assert!(matches!(result, Err(CredentialError::Persistence(_))));
        let stored = f.store.get_user(&user.id).await.unwrap();
        assert_eq!(stored.email, "frank@example.com");
    }

    #[tokio::test]
    async fn test_delete_rolls_back_when_flush_fails() {
        let f = fixture().await;
        let user = f.store.create_user(input("gina", None)).await.unwrap();
        std::fs::remove_dir_all(&f.data_dir).unwrap();

        let result = f.store.delete_user(&user.id).await;

        assert!(matches!(result, Err(CredentialError::Persistence(_))));
        assert_eq!(f.store.count().await, 2);
        let stored = f.store.get_user_by_username("gina").await.unwrap();
        assert_eq!(stored.id, user.id);
    }

    #[tokio::test]
    async fn test_change_password_rolls_back_when_flush_fails() {
        let f = fixture().await;
        let user = f.store.create_user(input("hank", None)).await.unwrap();
        std::fs::remove_dir_all(&f.data_dir).unwrap();

        let result = f.store.change_password(&user.id, "brandnew").await;

        assert!(matches!(result, Err(CredentialError::Persistence(_))));
        assert!(f.store.validate_credentials("hank", "secret1").await.is_ok());
        assert!(matches!(
            f.store.validate_credentials("hank", "brandnew").await,
            Err(CredentialError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_last_admin_cannot_be_deleted() {
        let f = fixture().await;
        let admin = admin_id(&f.store).await;

        assert!(matches!(
            f.store.delete_user(&admin).await,
            Err(CredentialError::LastAdmin)
        ));

        let second = f.store.create_user(input("grace", Some("admin"))).await.unwrap();
        assert!(f.store.delete_user(&admin).await.is_ok());
        assert!(matches!(
            f.store.delete_user(&second.id).await,
            Err(CredentialError::LastAdmin)
        ));
        assert!(matches!(
            f.store.delete_user(&admin).await,
            Err(CredentialError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_last_admin_cannot_be_demoted_or_deactivated() {
        let f = fixture().await;
        let admin = admin_id(&f.store).await;

        let demote = UpdateUserInput {
            role: Some("user".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            f.store.update_user(&admin, demote.clone()).await,
            Err(CredentialError::LastAdmin)
        ));

        let deactivate = UpdateUserInput {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(matches!(
            f.store.update_user(&admin, deactivate).await,
            Err(CredentialError::LastAdmin)
        ));

        f.store.create_user(input("heidi", Some("admin"))).await.unwrap();
        let updated = f.store.update_user(&admin, demote).await.unwrap();
        assert_eq!(updated.role, UserRole::User);
    }

    #[tokio::test]
    async fn test_inactive_admin_can_be_deleted() {
        let f = fixture().await;
        let other = f.store.create_user(input("ivan", Some("admin"))).await.unwrap();
        let deactivate = UpdateUserInput {
            is_active: Some(false),
            ..Default::default()
        };
        f.store.update_user(&other.id, deactivate).await.unwrap();

        assert!(f.store.delete_user(&other.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_user_fields() {
        let f = fixture().await;
        let user = f.store.create_user(input("judy", None)).await.unwrap();
        f.clock.advance(Duration::minutes(5));

        let update = UpdateUserInput {
            email: Some("  judy@new.example  ".to_string()),
            role: Some(String::new()),
            is_active: None,
        };
        let updated = f.store.update_user(&user.id, update).await.unwrap();

        assert_eq!(updated.email, "judy@new.example");
        assert_eq!(updated.role, UserRole::User);
        assert_eq!(updated.updated_at, user.created_at + Duration::minutes(5));
        assert!(matches!(
            f.store
                .update_user("missing", UpdateUserInput::default())
                .await,
            Err(CredentialError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_change_password() {
        let f = fixture().await;
        let user = f.store.create_user(input("ken", None)).await.unwrap();

        assert!(matches!(
            f.store.change_password(&user.id, "short").await,
            Err(CredentialError::Validation(_))
        ));
        assert!(matches!(
            f.store.change_password("missing", "longenough").await,
            Err(CredentialError::NotFound)
        ));

        f.store.change_password(&user.id, "longenough").await.unwrap();
        assert!(f.store.validate_credentials("ken", "longenough").await.is_ok());
        assert!(matches!(
            f.store.validate_credentials("ken", "secret1").await,
            Err(CredentialError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_validate_credentials_checks_password_before_active_flag() {
        let f = fixture().await;
        let user = f.store.create_user(input("leo", None)).await.unwrap();
        let deactivate = UpdateUserInput {
            is_active: Some(false),
            ..Default::default()
        };
        f.store.update_user(&user.id, deactivate).await.unwrap();

        assert!(matches!(
            f.store.validate_credentials("leo", "wrong-pass").await,
            Err(CredentialError::InvalidCredentials)
        ));
        assert!(matches!(
            f.store.validate_credentials("leo", "secret1").await,
            Err(CredentialError::AccountDisabled)
        ));
        assert!(matches!(
            f.store.validate_credentials("nobody", "secret1").await,
            Err(CredentialError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_list_users_oldest_first() {
        let f = fixture().await;
        f.clock.advance(Duration::seconds(1));
        f.store.create_user(input("mallory", None)).await.unwrap();
        f.clock.advance(Duration::seconds(1));
        f.store.create_user(input("niaj", None)).await.unwrap();

        let names: Vec<String> = f
            .store
            .list_users()
            .await
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["admin", "mallory", "niaj"]);
    }
}
