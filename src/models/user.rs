//! User model
//!
//! Defines the persisted account record, the role enum, the inputs used by
//! the credential store, and the authenticated identity threaded through
//! request handling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account record as stored in `users.json`.
///
/// The password hash is serialized under `password` so the file layout
/// stays a flat list of user objects. Never send this type to clients;
/// use [`UserResponse`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Username (unique, compared case-insensitively)
    pub username: String,
    /// Password hash (argon2 PHC string)
    #[serde(rename = "password")]
    pub password_hash: String,
    /// Email address
    pub email: String,
    /// User role
    pub role: UserRole,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Disabled accounts cannot log in and their sessions stop validating
    pub is_active: bool,
}

impl User {
    /// Create a new active user with a fresh UUID.
    ///
    /// Note: The password should already be hashed before calling this function.
    /// Use `services::password::hash_password()` to hash the password.
    pub fn new(
        username: String,
        email: String,
        password_hash: String,
        role: UserRole,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username,
            password_hash,
            email,
            role,
            created_at: now,
            updated_at: now,
            is_active: true,
        }
    }

    /// Check if the user is an administrator
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Whether this account counts toward the "at least one active admin" rule
    pub fn is_active_admin(&self) -> bool {
        self.is_active && self.is_admin()
    }
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Administrator - manages accounts and triggers cleanup
    Admin,
    /// Regular user - manages only their own account
    User,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::User
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::User => write!(f, "user"),
        }
    }
}

impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "user" => Ok(UserRole::User),
            _ => Err(anyhow::anyhow!("role must be 'admin' or 'user'")),
        }
    }
}

/// Client-facing view of a user (no password hash)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            created_at: user.created_at,
            updated_at: user.updated_at,
            is_active: user.is_active,
        }
    }
}

/// On-disk layout of the credential file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsersFile {
    #[serde(default)]
    pub users: Vec<User>,
}

/// Input for creating a new user (before password hashing)
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserInput {
    /// Username
    pub username: String,
    /// Plaintext password (will be hashed)
    pub password: String,
    /// Email address
    pub email: String,
    /// User role (optional, defaults to User)
    #[serde(default)]
    pub role: Option<String>,
}

/// Input for updating a user. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserInput {
    /// New email (optional)
    #[serde(default)]
    pub email: Option<String>,
    /// New role (optional)
    #[serde(default)]
    pub role: Option<String>,
    /// New active flag (optional)
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl UpdateUserInput {
    /// Whether applying this input switches the account off
    pub fn deactivates(&self) -> bool {
        self.is_active == Some(false)
    }

    /// Whether the input touches fields only an admin may change
    pub fn touches_privileged_fields(&self) -> bool {
        self.role.as_deref().is_some_and(|r| !r.is_empty()) || self.is_active.is_some()
    }
}

/// The caller of an operation, resolved from a valid session.
///
/// Authorization decisions go through the predicates here rather than
/// comparing roles inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub role: UserRole,
}

impl Identity {
    /// Caller holds the admin role
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Caller is `user_id` or an admin
    pub fn is_self_or_admin(&self, user_id: &str) -> bool {
        self.is_admin() || self.user_id == user_id
    }
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
        }
    }
}
