//! Clipboard API endpoints
//!
//! - POST /api/text - Share a text snippet
//! - GET /api/text/{id} - Fetch a snippet
//! - POST /api/file - Upload a file (multipart field `file`)
//! - GET /api/file/{id} - Download a file
//! - DELETE /api/{id} - Remove an item early
//! - GET /api/cleanup - Sweep expired state now (admin)
//!
//! IDs are matched case-insensitively. Security rejections answer with a
//! generic message; the reason only goes to the log.

use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::middleware::{ApiError, AppState, ClientIp};
use crate::models::{ItemKind, SavedItem, TextItem};
use crate::services::ClipboardError;

/// Request body for sharing text
#[derive(Debug, Deserialize)]
pub struct SaveTextRequest {
    pub content: String,
}

/// Response for a manual cleanup run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub removed_count: usize,
}

/// Routes for any logged-in user
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/text", post(save_text))
        .route("/text/{id}", get(get_text))
        .route("/file", post(save_file))
        .route("/file/{id}", get(get_file))
        .route("/{id}", delete(delete_item))
}

/// Routes that need the admin role
pub fn admin_router() -> Router<AppState> {
    Router::new().route("/cleanup", get(cleanup))
}

/// POST /api/text
async fn save_text(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<SaveTextRequest>,
) -> Result<Json<SavedItem>, ApiError> {
    if body.content.is_empty() {
        return Err(ApiError::validation_error("Content is required"));
    }

    state
        .abuse
        .validate_content(&ip, &body.content)
        .await
        .map_err(|_| ApiError::rejected())?;

    let saved = state.clipboard.save_text(body.content).await?;
    tracing::info!(ip = %ip, id = %saved.id, "Saved text item");

    Ok(Json(saved))
}

/// GET /api/text/{id}
async fn get_text(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<Json<TextItem>, ApiError> {
    if !state.abuse.check_access(&ip).await {
        return Err(ApiError::rejected());
    }

    let id = id.to_lowercase();
    let result = state.clipboard.get_text(&id).await;
    state
        .abuse
        .log_access(&ip, &ItemKind::Text.to_string(), &id, result.is_ok())
        .await;

    Ok(Json(result?))
}

/// POST /api/file
async fn save_file(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    mut multipart: Multipart,
) -> Result<Json<SavedItem>, ApiError> {
    if state.abuse.is_blocked(&ip).await {
        return Err(ApiError::rejected());
    }

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(&ip, "", e))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("").to_string();
        let content_type = field.content_type().map(String::from);
        let data = field
            .bytes()
            .await
            .map_err(|e| upload_error(&ip, &file_name, e))?;

        if let Err(rejection) = state
            .abuse
            .validate_upload(&ip, &file_name, data.len())
            .await
        {
            tracing::warn!(ip = %ip, file_name = %file_name, reason = %rejection, "Rejected upload");
            return Err(ApiError::rejected());
        }

        let saved = state
            .clipboard
            .save_file(&file_name, content_type, &data)
            .await?;
        tracing::info!(ip = %ip, id = %saved.id, size = data.len(), "Saved file item");

        return Ok(Json(saved));
    }

    Err(ApiError::validation_error("No file uploaded"))
}

/// Map a multipart read failure. Hitting the body limit means the file is
/// over the size cap, which is a security rejection like any other.
fn upload_error(ip: &str, file_name: &str, error: MultipartError) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        tracing::warn!(ip = %ip, file_name = %file_name, reason = "File too large", "Rejected upload");
        return ApiError::rejected();
    }

    tracing::debug!(ip = %ip, error = %error, "Failed to read upload");
    ApiError::validation_error("Failed to read upload")
}

/// `Content-Disposition` for a download. Non-ASCII names get an RFC 5987
/// `filename*` next to an ASCII fallback.
fn attachment_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    let value = if file_name.is_ascii() {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(file_name)
        )
    };

    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// GET /api/file/{id}
async fn get_file(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    if !state.abuse.check_access(&ip).await {
        return Err(ApiError::rejected());
    }

    let id = id.to_lowercase();
    let kind = ItemKind::File.to_string();

    let item = match state.clipboard.get_file(&id).await {
        Ok(item) => item,
        Err(e) => {
            state.abuse.log_access(&ip, &kind, &id, false).await;
            return Err(e.into());
        }
    };

    // The sweep may remove the file between lookup and read
    let data = match tokio::fs::read(&item.path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            state.abuse.log_access(&ip, &kind, &id, false).await;
            return Err(ClipboardError::NotFound.into());
        }
        Err(e) => return Err(ClipboardError::Io(e).into()),
    };
    state.abuse.log_access(&ip, &kind, &id, true).await;

    let content_type = item
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let disposition = attachment_disposition(&item.file_name);

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(data),
    )
        .into_response())
}

/// DELETE /api/{id}
async fn delete_item(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let id = id.to_lowercase();
    state.clipboard.delete(&id).await;
    tracing::info!(ip = %ip, id = %id, "Deleted item");

    Json(json!({ "message": "Item deleted" }))
}

/// GET /api/cleanup
async fn cleanup(State(state): State<AppState>) -> Json<CleanupResponse> {
    let report = state.cleanup_coordinator().run_once().await;

    Json(CleanupResponse {
        removed_count: report.clipboard_items,
    })
}
