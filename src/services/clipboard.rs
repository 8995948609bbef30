//! Clipboard store
//!
//! Holds shared text and uploaded files under short random IDs for a fixed
//! lifetime. File bytes live in the temp directory as `<id>_<file name>`;
//! only metadata sits in the store.
//!
//! Lookups are lazy about expiry: an expired item reads as not found but keeps
//! its slot until [`ClipboardStore::sweep_expired`] runs. Missing, expired and
//! wrong-kind lookups all return the same [`ClipboardError::NotFound`].
//!
//! Disk I/O never happens while the store lock is held.

use crate::config::ClipboardConfig;
use crate::models::{ClipboardItem, ClipboardPayload, FileItem, SavedItem, TextItem};
use crate::services::short_id::generate_short_id;
use crate::store::{Clock, ExpiringStore};
use chrono::Duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Fresh IDs tried when the chosen one is taken between generation and insert
const INSERT_ATTEMPTS: usize = 3;

/// Error types for clipboard operations
#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    /// No live item of the requested kind
    #[error("Item not found or expired")]
    NotFound,

    /// Reading or writing the backing file failed
    #[error("File storage error: {0}")]
    Io(#[from] std::io::Error),

    /// The OS random source failed
    #[error("Failed to generate item ID: {0}")]
    Entropy(getrandom::Error),
}

/// Short-lived text and file items
#[derive(Debug)]
pub struct ClipboardStore {
    items: ExpiringStore<ClipboardItem>,
    temp_dir: PathBuf,
    ttl: Duration,
}

impl ClipboardStore {
    /// Create a new clipboard store writing files under `temp_dir`
    pub fn new(config: &ClipboardConfig, temp_dir: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            items: ExpiringStore::new(clock),
            temp_dir,
            ttl: config.ttl(),
        }
    }

    /// Create the temp directory and clear anything left from a previous run
    pub async fn init_temp_dir(&self) -> Result<usize, ClipboardError> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.temp_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to purge stale file"),
            }
        }

        if removed > 0 {
            tracing::info!(removed, dir = %self.temp_dir.display(), "Purged stale clipboard files");
        }
        Ok(removed)
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Store a text snippet.
    ///
    /// Content checks are the caller's job; this only assigns an ID.
    pub async fn save_text(&self, content: String) -> Result<SavedItem, ClipboardError> {
        let payload = ClipboardPayload::Text { content };

        for _ in 0..INSERT_ATTEMPTS {
            let id = self.next_id().await?;
            if let Some(saved) = self.try_insert(&id, payload.clone(), None).await {
                return Ok(saved);
            }
        }

        Err(exhausted_ids())
    }

    /// Store an uploaded file.
    ///
    /// The bytes are written before the item is inserted. If the write fails,
    /// any partial file is removed and no item is created.
    pub async fn save_file(
        &self,
        file_name: &str,
        content_type: Option<String>,
        data: &[u8],
    ) -> Result<SavedItem, ClipboardError> {
        let safe_name = sanitize_file_name(file_name);

        for _ in 0..INSERT_ATTEMPTS {
            let id = self.next_id().await?;
            let path = self.temp_dir.join(format!("{}_{}", id, safe_name));

            if let Err(e) = tokio::fs::write(&path, data).await {
                remove_quietly(&path).await;
                tracing::error!(path = %path.display(), error = %e, "Failed to write clipboard file");
                return Err(e.into());
            }

            let payload = ClipboardPayload::File {
                file_name: file_name.to_string(),
                path: path.clone(),
                content_type: content_type.clone(),
            };
            if let Some(saved) = self
                .try_insert(&id, payload, Some(file_name.to_string()))
                .await
            {
                return Ok(saved);
            }

            // ID was taken after generation; the file under it is ours to drop
            remove_quietly(&path).await;
        }

        Err(exhausted_ids())
    }

    /// Fetch a live text item
    pub async fn get_text(&self, id: &str) -> Result<TextItem, ClipboardError> {
        let item = self.items.get(id).await.ok_or(ClipboardError::NotFound)?;
        match item.payload {
            ClipboardPayload::Text { content } => Ok(TextItem {
                content,
                created_at: item.created_at,
            }),
            ClipboardPayload::File { .. } => Err(ClipboardError::NotFound),
        }
    }

    /// Fetch a live file item whose backing file still exists
    pub async fn get_file(&self, id: &str) -> Result<FileItem, ClipboardError> {
        let item = self.items.get(id).await.ok_or(ClipboardError::NotFound)?;
        let (file_name, path, content_type) = match item.payload {
            ClipboardPayload::File {
                file_name,
                path,
                content_type,
            } => (file_name, path, content_type),
            ClipboardPayload::Text { .. } => return Err(ClipboardError::NotFound),
        };

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::warn!(id, path = %path.display(), "Clipboard file missing on disk");
            return Err(ClipboardError::NotFound);
        }

        Ok(FileItem {
            file_name,
            path,
            content_type,
        })
    }

    /// Delete an item and its backing file. Absent IDs are not an error.
    pub async fn delete(&self, id: &str) {
        if let Some(item) = self.items.delete(id).await {
            if let Some(path) = item.payload.file_path() {
                remove_quietly(path).await;
            }
            tracing::debug!(id, kind = %item.payload.kind(), "Removed clipboard item");
        }
    }

    /// Remove expired items and their files, returning how many items went
    pub async fn sweep_expired(&self) -> usize {
        let removed = self.items.sweep_expired().await;
        for (_, item) in &removed {
            if let Some(path) = item.payload.file_path() {
                remove_quietly(path).await;
            }
        }
        removed.len()
    }

    /// Number of stored items, expired-but-unswept ones included
    pub async fn count(&self) -> usize {
        self.items.count().await
    }

    async fn next_id(&self) -> Result<String, ClipboardError> {
        let existing = self.items.keys().await;
        generate_short_id(&existing).map_err(ClipboardError::Entropy)
    }

    async fn try_insert(
        &self,
        id: &str,
        payload: ClipboardPayload,
        file_name: Option<String>,
    ) -> Option<SavedItem> {
        let created_at = self.items.now();
        let item = ClipboardItem {
            id: id.to_string(),
            payload,
            created_at,
            expires_at: created_at + self.ttl,
        };
        let expires_at = item.expires_at;

        self.items
            .insert_new_until(id, item, expires_at)
            .await
            .then(|| SavedItem {
                id: id.to_string(),
                file_name,
                expires_at,
            })
    }
}

fn exhausted_ids() -> ClipboardError {
    ClipboardError::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        "no free clipboard ID",
    ))
}

/// Keep only the final path component so uploads can't escape the temp dir
fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        "upload".to_string()
    } else {
        base.to_string()
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %e, "Failed to remove clipboard file");
    }
}
