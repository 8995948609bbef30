//! Abuse tracking and content policy
//!
//! The [`AbuseTracker`] counts failed or rejected requests per client IP and
//! escalates to a block once an IP misbehaves often enough. Two thresholds
//! apply:
//! - when a failure is recorded, a count above [`RECORD_BLOCK_THRESHOLD`]
//!   blocks the IP immediately;
//! - when an IP asks for access, a count above [`ACCESS_BLOCK_THRESHOLD`]
//!   blocks it on the spot.
//!
//! Blocks last until the process restarts. Failure records are forgotten
//! after an hour without a new failure.
//!
//! [`ContentPolicy`] holds the stateless checks (size limits, suspicious
//! patterns, blocked file extensions) whose violations feed the tracker.

use crate::config::{AbuseConfig, ClipboardConfig};
use crate::store::{Clock, ExpiringStore};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default failure count above which recording a failure blocks the IP
pub const RECORD_BLOCK_THRESHOLD: u32 = 20;

/// Default failure count above which an access check blocks the IP
pub const ACCESS_BLOCK_THRESHOLD: u32 = 50;

/// Substrings rejected in shared text, matched case-insensitively
pub const SUSPICIOUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "data:text/html",
    "eval(",
    "document.write",
    "base64,",
    "php://",
    "file://",
    "ftp://",
    "../../",
];

/// File extensions refused for upload
pub const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "pif", "scr", "vbs", "js", "jar", "ps1", "sh", "msi", "dll", "sys",
    "php", "asp", "aspx", "jsp",
];

/// Why a request was refused.
///
/// The detail is for logs only; clients get a generic message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("IP is blocked")]
    Blocked,
    #[error("Large content")]
    ContentTooLarge,
    #[error("Suspicious pattern: {0}")]
    SuspiciousPattern(&'static str),
    #[error("File type not allowed")]
    FileTypeNotAllowed,
    #[error("File too large")]
    FileTooLarge,
}

/// Failure history for one IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub count: u32,
    pub last_attempt: DateTime<Utc>,
    pub reason: String,
}

/// Stateless request content checks
#[derive(Debug, Clone)]
pub struct ContentPolicy {
    max_text_bytes: usize,
    max_file_bytes: usize,
}

impl ContentPolicy {
    pub fn new(config: &ClipboardConfig) -> Self {
        Self {
            max_text_bytes: config.max_text_bytes,
            max_file_bytes: config.max_file_bytes,
        }
    }

    /// Check shared text for size and suspicious patterns
    pub fn check_text(&self, content: &str) -> Result<(), Rejection> {
        if content.len() > self.max_text_bytes {
            return Err(Rejection::ContentTooLarge);
        }

        let lower = content.to_lowercase();
        match SUSPICIOUS_PATTERNS.iter().find(|p| lower.contains(*p)) {
            Some(pattern) => Err(Rejection::SuspiciousPattern(*pattern)),
            None => Ok(()),
        }
    }

    /// Check an upload's name against the blocked extensions
    pub fn check_file_name(&self, file_name: &str) -> Result<(), Rejection> {
        if file_name.trim().is_empty() {
            return Err(Rejection::FileTypeNotAllowed);
        }

        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension {
            Some(ext) if BLOCKED_EXTENSIONS.contains(&ext.as_str()) => {
                Err(Rejection::FileTypeNotAllowed)
            }
            _ => Ok(()),
        }
    }

    /// Check an upload's size
    pub fn check_file_size(&self, size: usize) -> Result<(), Rejection> {
        if size > self.max_file_bytes {
            Err(Rejection::FileTooLarge)
        } else {
            Ok(())
        }
    }

    pub fn max_file_bytes(&self) -> usize {
        self.max_file_bytes
    }
}

/// Per-IP failure counters with an escalating block policy
#[derive(Debug)]
pub struct AbuseTracker {
    failures: ExpiringStore<FailureRecord>,
    blocked: RwLock<HashSet<String>>,
    config: AbuseConfig,
    policy: ContentPolicy,
}

impl AbuseTracker {
    /// Create a new tracker
    pub fn new(config: AbuseConfig, policy: ContentPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            failures: ExpiringStore::new(clock),
            blocked: RwLock::new(HashSet::new()),
            config,
            policy,
        }
    }

    pub fn policy(&self) -> &ContentPolicy {
        &self.policy
    }

    /// Record a failed or rejected request from `ip`.
    ///
    /// Returns the IP's failure count after this attempt. Crossing the record
    /// threshold adds the IP to the block set.
    pub async fn record_failure(&self, ip: &str, reason: impl Into<String>) -> u32 {
        let reason = reason.into();
        let retention = self.config.retention();

        let count = self
            .failures
            .upsert(ip, |current, now| {
                let count = current.map_or(0, |r| r.count).saturating_add(1);
                let record = FailureRecord {
                    count,
                    last_attempt: now,
                    reason: reason.clone(),
                };
                (record, now + retention, count)
            })
            .await;

        if count > self.config.record_block_threshold {
            self.block(ip).await;
            tracing::warn!(
                ip,
                count,
                reason = %reason,
                "Blocked IP after repeated failed attempts"
            );
        }

        count
    }

    /// Whether `ip` is in the block set
    pub async fn is_blocked(&self, ip: &str) -> bool {
        self.blocked.read().await.contains(ip)
    }

    /// Decide whether `ip` may fetch items.
    ///
    /// An IP not yet blocked but with more failures than the access threshold
    /// is blocked here.
    pub async fn check_access(&self, ip: &str) -> bool {
        if self.is_blocked(ip).await {
            return false;
        }

        let count = self.failures.get(ip).await.map_or(0, |r| r.count);
        if count > self.config.access_block_threshold {
            self.block(ip).await;
            tracing::warn!(ip, count, "Blocked IP for excessive failed attempts");
            return false;
        }

        true
    }

    /// Validate text about to be shared.
    ///
    /// Rejected content counts as a failure for the IP.
    pub async fn validate_content(&self, ip: &str, content: &str) -> Result<(), Rejection> {
        if self.is_blocked(ip).await {
            return Err(Rejection::Blocked);
        }

        if let Err(rejection) = self.policy.check_text(content) {
            tracing::warn!(ip, reason = %rejection, "Rejected shared text");
            self.record_failure(ip, rejection.to_string()).await;
            return Err(rejection);
        }

        Ok(())
    }

    /// Validate an upload before its bytes are stored
    pub async fn validate_upload(
        &self,
        ip: &str,
        file_name: &str,
        size: usize,
    ) -> Result<(), Rejection> {
        if self.is_blocked(ip).await {
            return Err(Rejection::Blocked);
        }

        self.policy.check_file_name(file_name)?;
        self.policy.check_file_size(size)?;
        Ok(())
    }

    /// Log a fetch of item `id`; a failed fetch counts as a failure
    pub async fn log_access(&self, ip: &str, kind: &str, id: &str, success: bool) {
        if success {
            tracing::info!(ip, kind, id, "Item accessed");
        } else {
            tracing::warn!(ip, kind, id, "Failed item access");
            self.record_failure(ip, format!("Failed access to {}", id))
                .await;
        }
    }

    /// Current failure record for `ip`, if one is live
    pub async fn failure_record(&self, ip: &str) -> Option<FailureRecord> {
        self.failures.get(ip).await
    }

    /// Forget failure records older than the retention period.
    ///
    /// The block set is left untouched.
    pub async fn sweep_expired(&self) -> usize {
        self.failures.sweep_expired().await.len()
    }

    /// Number of blocked IPs
    pub async fn blocked_count(&self) -> usize {
        self.blocked.read().await.len()
    }

    async fn block(&self, ip: &str) {
        self.blocked.write().await.insert(ip.to_string());
    }
}
