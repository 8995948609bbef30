//! Authentication API endpoints
//!
//! - POST /api/auth/login - Log in, returns a bearer token and sets the session cookie
//! - POST /api/auth/logout - Revoke the presented token
//! - GET /api/auth/me - Current user

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, ClientIp};
use crate::models::UserResponse;

/// Request body for login
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// Response for successful login
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
    pub expires_at: DateTime<Utc>,
}

/// Routes reachable without a session
pub fn public_router() -> Router<AppState> {
    Router::new().route("/login", post(login))
}

/// Routes that need the auth middleware
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .credentials
        .validate_credentials(&body.username, &body.password)
        .await
        .inspect_err(|e| {
            tracing::info!(username = %body.username, ip = %ip, reason = %e, "Login failed");
        })?;

    let session = state
        .sessions
        .create_session(&user.id, body.remember_me)
        .await?;

    tracing::info!(username = %user.username, ip = %ip, remember_me = body.remember_me, "User logged in");

    let max_age = if body.remember_me {
        state.config.session.remember_me_ttl()
    } else {
        state.config.session.ttl()
    }
    .num_seconds();
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = HeaderValue::from_str(&format!(
        "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        session.token, max_age
    )) {
        headers.insert(header::SET_COOKIE, cookie);
    }

    Ok((
        headers,
        Json(LoginResponse {
            token: session.token,
            user: UserResponse::from(&user),
            expires_at: session.expires_at,
        }),
    ))
}

/// POST /api/auth/logout
async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    state.sessions.revoke(&user.token).await;
    tracing::info!(username = %user.identity.username, "User logged out");

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    );

    (headers, Json(json!({ "message": "Logged out successfully" })))
}

/// GET /api/auth/me
async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UserResponse>, ApiError> {
    let current = state
        .credentials
        .get_user(&user.identity.user_id)
        .await
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(UserResponse::from(&current)))
}
