//! Session manager
//!
//! Issues bearer tokens on login and resolves them back to users. Tokens are
//! 32 bytes from the OS random source, base64url-encoded without padding.
//!
//! A token is valid until its expiry and only while its user exists and is
//! active. [`SessionManager::validate`] evicts a token the moment it is found
//! to be invalid; [`SessionManager::sweep_expired`] clears the rest in bulk.

use crate::config::SessionConfig;
use crate::models::{Session, User};
use crate::services::credentials::CredentialStore;
use crate::store::{Clock, ExpiringStore};
use chrono::Duration;
use data_encoding::BASE64URL_NOPAD;
use std::sync::Arc;

/// Random bytes per token
const TOKEN_BYTES: usize = 32;

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The OS random source failed
    #[error("Failed to generate session token: {0}")]
    Entropy(getrandom::Error),
}

/// Token-keyed login sessions
#[derive(Debug)]
pub struct SessionManager {
    sessions: ExpiringStore<Session>,
    credentials: Arc<CredentialStore>,
    ttl: Duration,
    remember_me_ttl: Duration,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(
        config: &SessionConfig,
        credentials: Arc<CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: ExpiringStore::new(clock),
            credentials,
            ttl: config.ttl(),
            remember_me_ttl: config.remember_me_ttl(),
        }
    }

    /// Start a session for `user_id`.
    ///
    /// The session lasts the remember-me lifetime when `remember_me` is set,
    /// the normal lifetime otherwise.
    ///
    /// # Errors
    ///
    /// Returns `Entropy` if no random bytes could be read
    pub async fn create_session(
        &self,
        user_id: &str,
        remember_me: bool,
    ) -> Result<Session, SessionError> {
        let token = generate_token()?;
        let ttl = if remember_me {
            self.remember_me_ttl
        } else {
            self.ttl
        };

        let session = Session {
            token: token.clone(),
            user_id: user_id.to_string(),
            expires_at: self.sessions.now() + ttl,
            remember_me,
        };
        self.sessions
            .put_until(token, session.clone(), session.expires_at)
            .await;

        Ok(session)
    }

    /// Resolve a token to its user.
    ///
    /// Returns `None` for unknown or expired tokens and for tokens whose user
    /// has been deleted or deactivated. Such tokens are removed.
    pub async fn validate(&self, token: &str) -> Option<User> {
        let session = self.sessions.get_or_evict(token).await?;

        match self.credentials.get_user(&session.user_id).await {
            Some(user) if user.is_active => Some(user),
            _ => {
                self.sessions.delete(token).await;
                None
            }
        }
    }

    /// Log out one token. Unknown tokens are ignored.
    pub async fn revoke(&self, token: &str) {
        self.sessions.delete(token).await;
    }

    /// Remove every session belonging to `user_id`, returning how many went
    pub async fn revoke_all_for_user(&self, user_id: &str) -> usize {
        let removed = self
            .sessions
            .delete_where(|_, entry| entry.value.user_id == user_id)
            .await
            .len();
        if removed > 0 {
            tracing::info!(user_id, removed, "Revoked user sessions");
        }
        removed
    }

    /// Remove all expired sessions
    pub async fn sweep_expired(&self) -> usize {
        self.sessions.sweep_expired().await.len()
    }

    /// Number of stored sessions, expired-but-unswept ones included
    pub async fn count(&self) -> usize {
        self.sessions.count().await
    }
}

/// 32 random bytes as unpadded base64url (43 characters)
pub fn generate_token() -> Result<String, SessionError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes).map_err(SessionError::Entropy)?;
    Ok(BASE64URL_NOPAD.encode(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, StorageConfig};
    use crate::models::{CreateUserInput, UpdateUserInput};
    use crate::store::ManualClock;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        credentials: Arc<CredentialStore>,
        sessions: SessionManager,
        admin_id: String,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let storage = StorageConfig {
            data_dir: dir.path().join("data"),
            temp_dir: dir.path().join("tmp"),
        };
        let credentials = Arc::new(
            CredentialStore::open(&storage, &AuthConfig::default(), clock.clone())
                .await
                .unwrap(),
        );
        let sessions =
            SessionManager::new(&SessionConfig::default(), credentials.clone(), clock.clone());
        let admin_id = credentials.get_user_by_username("admin").await.unwrap().id;
        Fixture {
            _dir: dir,
            clock,
            credentials,
            sessions,
            admin_id,
        }
    }

    async fn add_user(credentials: &CredentialStore, name: &str) -> User {
        credentials
            .create_user(CreateUserInput {
                username: name.to_string(),
                password: "secret1".to_string(),
                email: format!("{}@example.com", name),
                role: None,
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token().unwrap();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, generate_token().unwrap());
    }

    #[tokio::test]
    async fn test_session_expires_after_two_hours() {
        let f = fixture().await;
        let session = f.sessions.create_session(&f.admin_id, false).await.unwrap();
        assert!(!session.remember_me);

        f.clock.advance(Duration::hours(2));
        assert!(f.sessions.validate(&session.token).await.is_some());

        f.clock.advance(Duration::seconds(1));
        assert!(f.sessions.validate(&session.token).await.is_none());
        // Evicted on sight
        assert_eq!(f.sessions.count().await, 0);
    }

    #[tokio::test]
    async fn test_remember_me_lasts_seven_days() {
        let f = fixture().await;
        let session = f.sessions.create_session(&f.admin_id, true).await.unwrap();

        f.clock.advance(Duration::hours(2) + Duration::seconds(1));
        let user = f.sessions.validate(&session.token).await.unwrap();
        assert_eq!(user.id, f.admin_id);

        f.clock.advance(Duration::days(7) - Duration::hours(2));
        assert!(f.sessions.validate(&session.token).await.is_none());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let f = fixture().await;
        let session = f.sessions.create_session(&f.admin_id, false).await.unwrap();

        f.sessions.revoke(&session.token).await;
        assert!(f.sessions.validate(&session.token).await.is_none());
        f.sessions.revoke(&session.token).await;
        f.sessions.revoke("never-issued").await;
    }

    #[tokio::test]
    async fn test_revoke_all_for_user_spares_others() {
        let f = fixture().await;
        let bob = add_user(&f.credentials, "bob").await;

        let mut bob_tokens = Vec::new();
        for _ in 0..3 {
            bob_tokens.push(f.sessions.create_session(&bob.id, false).await.unwrap().token);
        }
        let admin_token = f.sessions.create_session(&f.admin_id, false).await.unwrap().token;

        assert_eq!(f.sessions.revoke_all_for_user(&bob.id).await, 3);
        for token in &bob_tokens {
            assert!(f.sessions.validate(token).await.is_none());
        }
        assert!(f.sessions.validate(&admin_token).await.is_some());
        assert_eq!(f.sessions.revoke_all_for_user(&bob.id).await, 0);
    }

    #[tokio::test]
    async fn test_deactivated_user_sessions_self_invalidate() {
        let f = fixture().await;
        let carol = add_user(&f.credentials, "carol").await;
        let session = f.sessions.create_session(&carol.id, true).await.unwrap();
        assert!(f.sessions.validate(&session.token).await.is_some());

        let deactivate = UpdateUserInput {
            is_active: Some(false),
            ..Default::default()
        };
        f.credentials.update_user(&carol.id, deactivate).await.unwrap();

        // Still stored until someone presents it
        assert_eq!(f.sessions.count().await, 1);
        assert!(f.sessions.validate(&session.token).await.is_none());
        assert_eq!(f.sessions.count().await, 0);
    }

    #[tokio::test]
    async fn test_deleted_user_sessions_self_invalidate() {
        let f = fixture().await;
        let dave = add_user(&f.credentials, "dave").await;
        let session = f.sessions.create_session(&dave.id, false).await.unwrap();

        f.credentials.delete_user(&dave.id).await.unwrap();
        assert!(f.sessions.validate(&session.token).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let f = fixture().await;
        let short = f.sessions.create_session(&f.admin_id, false).await.unwrap();
        let long = f.sessions.create_session(&f.admin_id, true).await.unwrap();

        f.clock.advance(Duration::hours(3));
        assert_eq!(f.sessions.sweep_expired().await, 1);
        assert_eq!(f.sessions.count().await, 1);
        assert!(f.sessions.validate(&short.token).await.is_none());
        assert!(f.sessions.validate(&long.token).await.is_some());
    }
}
