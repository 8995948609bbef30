//! Cleanup coordinator
//!
//! One background task that sweeps every expiring store on a fixed period:
//! clipboard items first, then rate-limit windows, failure records and
//! sessions. A sweep in progress always runs to completion; stopping the
//! coordinator only prevents further ticks.

use crate::services::{AbuseTracker, ClipboardStore, RateLimiter, SessionManager};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What one sweep pass removed from each store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub clipboard_items: usize,
    pub rate_windows: usize,
    pub failure_records: usize,
    pub sessions: usize,
}

/// Sweeps the four expiring stores
#[derive(Debug, Clone)]
pub struct CleanupCoordinator {
    clipboard: Arc<ClipboardStore>,
    rate_limiter: Arc<RateLimiter>,
    abuse: Arc<AbuseTracker>,
    sessions: Arc<SessionManager>,
}

impl CleanupCoordinator {
    pub fn new(
        clipboard: Arc<ClipboardStore>,
        rate_limiter: Arc<RateLimiter>,
        abuse: Arc<AbuseTracker>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            clipboard,
            rate_limiter,
            abuse,
            sessions,
        }
    }

    /// Sweep every store once
    pub async fn run_once(&self) -> CleanupReport {
        let report = CleanupReport {
            clipboard_items: self.clipboard.sweep_expired().await,
            rate_windows: self.rate_limiter.sweep_expired().await,
            failure_records: self.abuse.sweep_expired().await,
            sessions: self.sessions.sweep_expired().await,
        };

        if report.clipboard_items > 0 {
            tracing::info!(
                removed = report.clipboard_items,
                "Cleaned up expired clipboard items"
            );
        }
        tracing::debug!(?report, "Cleanup pass finished");

        report
    }

    /// Start sweeping every `period`. The first sweep happens one period
    /// after the call.
    pub fn spawn(self, period: Duration) -> CleanupHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_once().await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }

            tracing::debug!("Cleanup coordinator stopped");
        });

        tracing::info!(period_secs = period.as_secs(), "Cleanup coordinator started");
        CleanupHandle { stop_tx, task }
    }
}

/// Owner of the running coordinator task
#[derive(Debug)]
pub struct CleanupHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupHandle {
    /// Stop ticking and wait for any sweep in progress to finish
    pub async fn stop(self) {
        // Receiver gone means the task already exited
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cleanup task ended abnormally");
        }
    }
}
