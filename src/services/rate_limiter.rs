//! Request rate limiter
//!
//! Fixed-window counters keyed by client IP and HTTP method. Each request
//! increments its window's count before comparing against the method's
//! limit, so exactly `limit` requests are admitted per window:
//! - POST: 20 per minute
//! - GET: 100 per minute
//! - anything else: 50 per minute
//!
//! Windows untouched for 2 minutes are dropped by the sweep.

use crate::config::RateLimitConfig;
use crate::store::{Clock, ExpiringStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Counter state for one (IP, method) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub window_start: DateTime<Utc>,
}

/// Per (IP, method) request limiter
#[derive(Debug)]
pub struct RateLimiter {
    windows: ExpiringStore<RateWindow>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: ExpiringStore::new(clock),
            config,
        }
    }

    /// Count one request from `ip` with `method` and decide whether it may proceed
    pub async fn is_allowed(&self, ip: &str, method: &str) -> bool {
        let window = self.config.window();
        let idle = self.config.idle();
        let limit = self.config.limit_for(method);

        let count = self
            .windows
            .upsert(window_key(ip, method), |current, now| {
                let next = match current {
                    Some(w) if now - w.window_start <= window => RateWindow {
                        count: w.count.saturating_add(1),
                        window_start: w.window_start,
                    },
                    _ => RateWindow {
                        count: 1,
                        window_start: now,
                    },
                };
                (next, next.window_start + idle, next.count)
            })
            .await;

        let allowed = count <= limit;
        if !allowed {
            tracing::debug!(ip, method, count, limit, "Rate limit exceeded");
        }
        allowed
    }

    /// Current window for a key, if one is live
    pub async fn window(&self, ip: &str, method: &str) -> Option<RateWindow> {
        self.windows.get(&window_key(ip, method)).await
    }

    /// Drop windows that started more than the idle period ago
    pub async fn sweep_expired(&self) -> usize {
        self.windows.sweep_expired().await.len()
    }

    /// Number of tracked windows, stale ones included
    pub async fn count(&self) -> usize {
        self.windows.count().await
    }
}

fn window_key(ip: &str, method: &str) -> String {
    format!("{}:{}", ip, method)
}
