//! ClipShare - short-lived clipboard sharing
//!
//! Text snippets and files are shared under short IDs and vanish after a
//! fixed lifetime. Around them sit user accounts, login sessions, per-IP rate
//! limiting and abuse tracking, all swept by one background cleanup task.

pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod store;
