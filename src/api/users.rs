//! User management API endpoints
//!
//! Admin only:
//! - POST /api/users - Create a user
//! - GET /api/users - List users
//! - DELETE /api/users/{id} - Delete a user
//!
//! Self or admin:
//! - GET /api/users/{id} - Get a user
//! - PUT /api/users/{id} - Update email (admins may also change role and active flag)
//! - PUT /api/users/{id}/password - Change password
//!
//! Deactivation, deletion and password changes end every session of the
//! affected user.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{CreateUserInput, UpdateUserInput, UserResponse};

/// Request body for a password change
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub new_password: String,
}

/// Response for the user list
#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub count: usize,
}

/// Routes that need the admin role
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/{id}", delete(delete_user))
}

/// Routes open to the user themselves and to admins
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_user).put(update_user))
        .route("/{id}/password", put(change_password))
}

/// POST /api/users
async fn create_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(body): Json<CreateUserInput>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.credentials.create_user(body).await?;
    tracing::info!(
        username = %user.username,
        role = %user.role,
        by = %caller.identity.username,
        "User created"
    );

    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// GET /api/users
async fn list_users(State(state): State<AppState>) -> Json<UserListResponse> {
    let users: Vec<UserResponse> = state
        .credentials
        .list_users()
        .await
        .iter()
        .map(UserResponse::from)
        .collect();

    Json(UserListResponse {
        count: users.len(),
        users,
    })
}

/// GET /api/users/{id}
async fn get_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    if !caller.identity.is_self_or_admin(&id) {
        return Err(ApiError::forbidden("Permission denied"));
    }

    let user = state
        .credentials
        .get_user(&id)
        .await
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(UserResponse::from(&user)))
}

/// PUT /api/users/{id}
async fn update_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateUserInput>,
) -> Result<Json<UserResponse>, ApiError> {
    if !caller.identity.is_self_or_admin(&id) {
        return Err(ApiError::forbidden("Permission denied"));
    }
    if !caller.identity.is_admin() && body.touches_privileged_fields() {
        return Err(ApiError::forbidden(
            "Only admins can change role or active status",
        ));
    }

    let deactivates = body.deactivates();
    let user = state.credentials.update_user(&id, body).await?;
    tracing::info!(username = %user.username, by = %caller.identity.username, "User updated");

    if deactivates {
        state.sessions.revoke_all_for_user(&id).await;
    }

    Ok(Json(UserResponse::from(&user)))
}

/// DELETE /api/users/{id}
async fn delete_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if caller.identity.user_id == id {
        return Err(ApiError::validation_error("Cannot delete your own account"));
    }

    let user = state.credentials.delete_user(&id).await?;
    state.sessions.revoke_all_for_user(&id).await;
    tracing::info!(username = %user.username, by = %caller.identity.username, "User deleted");

    Ok(Json(json!({ "message": "User deleted successfully" })))
}

/// PUT /api/users/{id}/password
async fn change_password(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !caller.identity.is_self_or_admin(&id) {
        return Err(ApiError::forbidden("Permission denied"));
    }

    state
        .credentials
        .change_password(&id, &body.new_password)
        .await?;
    state.sessions.revoke_all_for_user(&id).await;
    tracing::info!(user_id = %id, by = %caller.identity.username, "Password changed");

    Ok(Json(json!({
        "message": "Password changed successfully. Please login again."
    })))
}
