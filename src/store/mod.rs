//! Expiring entry store
//!
//! A string-keyed map whose entries carry an absolute expiry time, guarded by
//! a single reader/writer lock. Every piece of ephemeral state in the service
//! (clipboard items, sessions, rate-limit windows, failure records) lives in
//! one of these.
//!
//! Expiry is observed in two ways:
//! - [`ExpiringStore::get`] treats an expired entry as absent but leaves it in
//!   place until the next sweep.
//! - [`ExpiringStore::get_or_evict`] removes an expired entry on sight.
//!
//! Which one a caller uses is that caller's policy. [`ExpiringStore::sweep_expired`]
//! removes everything past expiry in one pass and hands the removed values
//! back so the caller can release external resources after the lock is gone.

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A stored value and the instant it stops being live
#[derive(Debug, Clone)]
pub struct Entry<V> {
    pub value: V,
    pub expires_at: DateTime<Utc>,
}

impl<V> Entry<V> {
    /// An entry is expired once `now` is strictly past `expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Concurrent key → entry map with TTL semantics
pub struct ExpiringStore<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<V> std::fmt::Debug for ExpiringStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringStore")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<V> ExpiringStore<V> {
    /// Create an empty store reading time from `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Insert or overwrite `key`, live for `ttl` from now
    pub async fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = self.now() + ttl;
        self.put_until(key, value, expires_at).await;
    }

    /// Insert or overwrite `key` with an absolute expiry
    pub async fn put_until(&self, key: impl Into<String>, value: V, expires_at: DateTime<Utc>) {
        self.entries
            .write()
            .await
            .insert(key.into(), Entry { value, expires_at });
    }

    /// Insert only if no entry (live or expired-but-unswept) holds `key`
    ///
    /// Returns `false` and drops `value` when the key is taken.
    pub async fn insert_new(&self, key: impl Into<String>, value: V, ttl: Duration) -> bool {
        let expires_at = self.now() + ttl;
        self.insert_new_until(key, value, expires_at).await
    }

    /// [`insert_new`](Self::insert_new) with an absolute expiry
    pub async fn insert_new_until(
        &self,
        key: impl Into<String>,
        value: V,
        expires_at: DateTime<Utc>,
    ) -> bool {
        let mut entries = self.entries.write().await;
        match entries.entry(key.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(Entry { value, expires_at });
                true
            }
        }
    }

    /// Atomically read-modify-write one key
    ///
    /// `f` receives the current live value (an expired entry is passed as
    /// `None`) and the current time, and returns the new value, its expiry,
    /// and a result handed back to the caller.
    pub async fn upsert<R, F>(&self, key: impl Into<String>, f: F) -> R
    where
        F: FnOnce(Option<V>, DateTime<Utc>) -> (V, DateTime<Utc>, R),
    {
        let key = key.into();
        let now = self.now();
        let mut entries = self.entries.write().await;
        let current = entries
            .remove(&key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value);
        let (value, expires_at, result) = f(current, now);
        entries.insert(key, Entry { value, expires_at });
        result
    }

    /// Remove `key`, returning its value if one was stored
    pub async fn delete(&self, key: &str) -> Option<V> {
        self.entries.write().await.remove(key).map(|entry| entry.value)
    }

    /// Remove every entry matching `predicate` and return what was removed
    pub async fn delete_where<F>(&self, mut predicate: F) -> Vec<(String, V)>
    where
        F: FnMut(&str, &Entry<V>) -> bool,
    {
        let mut entries = self.entries.write().await;
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| predicate(key, entry))
            .map(|(key, _)| key.clone())
            .collect();

        doomed
            .into_iter()
            .filter_map(|key| entries.remove(&key).map(|entry| (key, entry.value)))
            .collect()
    }

    /// Remove every entry past its expiry
    pub async fn sweep_expired(&self) -> Vec<(String, V)> {
        let now = self.now();
        self.delete_where(|_, entry| entry.is_expired_at(now)).await
    }

    /// Whether any entry, live or not yet swept, holds `key`
    pub async fn contains_key(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Snapshot of every key currently occupying a slot
    pub async fn keys(&self) -> HashSet<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Number of occupied slots, expired-but-unswept entries included
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl<V: Clone> ExpiringStore<V> {
    /// Expiry-aware lookup that leaves expired entries for the sweep
    pub async fn get(&self, key: &str) -> Option<V> {
        self.get_entry(key).await.map(|entry| entry.value)
    }

    /// Expiry-aware lookup returning the expiry alongside the value
    pub async fn get_entry(&self, key: &str) -> Option<Entry<V>> {
        let now = self.now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .cloned()
    }

    /// Expiry-aware lookup that evicts an expired entry immediately
    pub async fn get_or_evict(&self, key: &str) -> Option<V> {
        let now = self.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Re-check under the write lock: a put may have refreshed the key.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired_at(now)) {
            entries.remove(key);
            return None;
        }
        entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value.clone())
    }
}
