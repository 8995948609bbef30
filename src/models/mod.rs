//! Data models
//!
//! This module contains the data structures shared by the services and the
//! HTTP layer:
//! - Persisted accounts (User) and their client-facing view
//! - Ephemeral entities (Session, ClipboardItem)
//! - API request/response types

mod clipboard;
mod session;
mod user;

pub use clipboard::{ClipboardItem, ClipboardPayload, FileItem, ItemKind, SavedItem, TextItem};
pub use session::Session;
pub use user::{
    CreateUserInput, Identity, UpdateUserInput, User, UserResponse, UserRole, UsersFile,
};
