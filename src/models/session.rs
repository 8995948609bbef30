//! Session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Login session bound to a user by ID
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Bearer token (URL-safe base64 of 32 random bytes)
    pub token: String,
    /// Associated user ID
    pub user_id: String,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
    /// Whether the long lifetime was requested at login
    pub remember_me: bool,
}
