//! Services layer - Business logic
//!
//! Each service owns its own state; nothing here is global. The HTTP layer
//! receives them through [`crate::api::AppState`].
//!
//! - credentials: durable user accounts
//! - session: bearer tokens for logged-in users
//! - rate_limiter: per (IP, method) request windows
//! - security: abuse tracking and content policy
//! - clipboard: short-lived text and file items
//! - cleanup: periodic sweep of all expiring state

pub mod cleanup;
pub mod clipboard;
pub mod credentials;
pub mod password;
pub mod rate_limiter;
pub mod security;
pub mod session;
pub mod short_id;

pub use cleanup::{CleanupCoordinator, CleanupHandle, CleanupReport};
pub use clipboard::{ClipboardError, ClipboardStore};
pub use credentials::{CredentialError, CredentialStore};
pub use password::{hash_password, verify_password};
pub use rate_limiter::{RateLimiter, RateWindow};
pub use security::{AbuseTracker, ContentPolicy, FailureRecord, Rejection};
pub use session::{SessionError, SessionManager};
pub use short_id::generate_short_id;
