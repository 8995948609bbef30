//! Clipboard item model

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// A shared snippet or file, reachable by its short ID until it expires
#[derive(Debug, Clone)]
pub struct ClipboardItem {
    pub id: String,
    pub payload: ClipboardPayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What an item holds. Exactly one of text or file per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardPayload {
    Text {
        content: String,
    },
    File {
        file_name: String,
        path: PathBuf,
        content_type: Option<String>,
    },
}

impl ClipboardPayload {
    /// Short label used in logs
    pub fn kind(&self) -> ItemKind {
        match self {
            ClipboardPayload::Text { .. } => ItemKind::Text,
            ClipboardPayload::File { .. } => ItemKind::File,
        }
    }

    /// Backing file on disk, if any
    pub fn file_path(&self) -> Option<&PathBuf> {
        match self {
            ClipboardPayload::File { path, .. } => Some(path),
            ClipboardPayload::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Text,
    File,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Text => write!(f, "text"),
            ItemKind::File => write!(f, "file"),
        }
    }
}

/// Returned after a successful save
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Text fetched back by ID
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextItem {
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// File metadata fetched back by ID
#[derive(Debug, Clone)]
pub struct FileItem {
    pub file_name: String,
    pub path: PathBuf,
    pub content_type: Option<String>,
}
