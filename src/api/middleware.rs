//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The JSON error type every handler returns
//! - Client IP and session token extraction
//! - Rate limiting, security headers, authentication and admin checks

use axum::{
    extract::{ConnectInfo, FromRequestParts, Query, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::models::Identity;
use crate::services::{
    AbuseTracker, CleanupCoordinator, ClipboardError, ClipboardStore, ContentPolicy,
    CredentialError, CredentialStore, RateLimiter, SessionError, SessionManager,
};
use crate::store::Clock;

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: Arc<CredentialStore>,
    pub sessions: Arc<SessionManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub abuse: Arc<AbuseTracker>,
    pub clipboard: Arc<ClipboardStore>,
}

impl AppState {
    /// Construct every service from configuration.
    ///
    /// Loads (or bootstraps) the credential file; does not touch the temp
    /// directory, see [`ClipboardStore::init_temp_dir`].
    pub async fn build(config: Config, clock: Arc<dyn Clock>) -> Result<Self, CredentialError> {
        let credentials =
            Arc::new(CredentialStore::open(&config.storage, &config.auth, clock.clone()).await?);
        let sessions = Arc::new(SessionManager::new(
            &config.session,
            credentials.clone(),
            clock.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), clock.clone()));
        let abuse = Arc::new(AbuseTracker::new(
            config.abuse.clone(),
            ContentPolicy::new(&config.clipboard),
            clock.clone(),
        ));
        let clipboard = Arc::new(ClipboardStore::new(
            &config.clipboard,
            config.storage.temp_dir.clone(),
            clock,
        ));

        Ok(Self {
            config: Arc::new(config),
            credentials,
            sessions,
            rate_limiter,
            abuse,
            clipboard,
        })
    }

    /// Coordinator sweeping this state's expiring stores
    pub fn cleanup_coordinator(&self) -> CleanupCoordinator {
        CleanupCoordinator::new(
            self.clipboard.clone(),
            self.rate_limiter.clone(),
            self.abuse.clone(),
            self.sessions.clone(),
        )
    }
}

/// Authenticated caller extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub identity: Identity,
    /// Token the caller presented
    pub token: String,
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    /// Security rejection. The message never says which rule fired.
    pub fn rejected() -> Self {
        Self::new("REJECTED", "Request rejected for security reasons")
    }

    pub fn rate_limited() -> Self {
        Self::new("RATE_LIMITED", "Rate limit exceeded. Please slow down.")
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "VALIDATION_ERROR" | "REJECTED" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Validation(msg) => ApiError::validation_error(msg),
            CredentialError::UsernameTaken => ApiError::conflict(e.to_string()),
            CredentialError::NotFound => ApiError::not_found("User not found"),
            CredentialError::LastAdmin => ApiError::validation_error(e.to_string()),
            CredentialError::InvalidCredentials | CredentialError::AccountDisabled => {
                ApiError::unauthorized(e.to_string())
            }
            CredentialError::Persistence(_) | CredentialError::Internal(_) => {
                tracing::error!(error = %e, "Credential store failure");
                ApiError::internal_error("Failed to update users")
            }
        }
    }
}

impl From<ClipboardError> for ApiError {
    fn from(e: ClipboardError) -> Self {
        match e {
            ClipboardError::NotFound => ApiError::not_found("Item not found or expired"),
            ClipboardError::Io(_) | ClipboardError::Entropy(_) => {
                tracing::error!(error = %e, "Clipboard store failure");
                ApiError::internal_error("Failed to save item")
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        tracing::error!(error = %e, "Session creation failed");
        ApiError::internal_error("Failed to create session")
    }
}

/// Resolve the client IP: first `X-Forwarded-For` entry, then `X-Real-IP`,
/// then the socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(forwarded) = header_value("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }

    if let Some(real_ip) = header_value("x-real-ip") {
        return real_ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn peer_addr(extensions: &axum::http::Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Client IP of the request being handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(&parts.headers, peer_addr(&parts.extensions))))
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Extract the session token from, in order: `Authorization: Bearer`, a bare
/// `Authorization` value, the `token` query parameter, the `session` cookie
fn extract_session_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        let token = auth.strip_prefix("Bearer ").unwrap_or(auth).trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    if let Some(token) = Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|t| !t.is_empty())
    {
        return Some(token);
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Some(token) = cookie.trim().strip_prefix("session=") {
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Rate limiting middleware; runs before everything else
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(request.headers(), peer_addr(request.extensions()));
    let method = request.method().as_str().to_string();

    if !state.rate_limiter.is_allowed(&ip, &method).await {
        tracing::warn!(ip = %ip, method = %method, "Rate limit exceeded");
        return Err(ApiError::rate_limited());
    }

    Ok(next.run(request).await)
}

/// Add security headers to every response
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("x-xss-protection", "1; mode=block"),
        ("referrer-policy", "strict-origin-when-cross-origin"),
    ] {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(request.headers(), request.uri())
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let user = state
        .sessions
        .validate(&token)
        .await
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

    request.extensions_mut().insert(AuthenticatedUser {
        identity: Identity::from(&user),
        token,
    });
    Ok(next.run(request).await)
}

/// Admin authorization middleware
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.identity.is_admin() {
        return Err(ApiError::forbidden("Admin access required"));
    }

    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(value: &str) -> Uri {
        value.parse().unwrap()
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_extract_session_token_from_bearer() {
        let h = headers(&[("authorization", "Bearer test-token-123")]);
        assert_eq!(extract_session_token(&h, &uri("/api/me")), Some("test-token-123".to_string()));
    }

    #[test]
    fn test_extract_session_token_bare_authorization() {
        let h = headers(&[("authorization", "raw-token")]);
        assert_eq!(extract_session_token(&h, &uri("/api/me")), Some("raw-token".to_string()));
    }

    #[test]
    fn test_extract_session_token_from_query() {
        let h = HeaderMap::new();
        assert_eq!(
            extract_session_token(&h, &uri("/api/me?a=1&token=q-token")),
            Some("q-token".to_string())
        );
        assert_eq!(extract_session_token(&h, &uri("/api/me?token=")), None);
    }

    #[test]
    fn test_extract_session_token_query_is_percent_decoded() {
        let h = HeaderMap::new();
        assert_eq!(
            extract_session_token(&h, &uri("/api/file/ab12?token=abc%2Ddef%5F1")),
            Some("abc-def_1".to_string())
        );
    }

    #[test]
    fn test_extract_session_token_from_cookie() {
        let h = headers(&[("cookie", "theme=dark; session=cookie-token")]);
        assert_eq!(extract_session_token(&h, &uri("/api/me")), Some("cookie-token".to_string()));
    }

    #[test]
    fn test_extract_session_token_header_priority() {
        let h = headers(&[
            ("authorization", "Bearer bearer-token"),
            ("cookie", "session=cookie-token"),
        ]);
        assert_eq!(
            extract_session_token(&h, &uri("/api/me?token=query-token")),
            Some("bearer-token".to_string())
        );
    }

    #[test]
    fn test_extract_session_token_none() {
        assert!(extract_session_token(&HeaderMap::new(), &uri("/api/me")).is_none());
    }

    #[test]
    fn test_client_ip_order() {
        let peer: SocketAddr = "192.0.2.9:4444".parse().unwrap();

        let h = headers(&[
            ("x-forwarded-for", "203.0.113.5, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&h, Some(peer)), "203.0.113.5");

        let h = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&h, Some(peer)), "198.51.100.2");

        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "192.0.2.9");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_api_error_status_mapping() {
        assert_eq!(ApiError::validation_error("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::rejected().status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::rate_limited().status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::internal_error("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_credential_errors_map_to_api_codes() {
        let e: ApiError = CredentialError::UsernameTaken.into();
        assert_eq!(e.error.code, "CONFLICT");

        let e: ApiError = CredentialError::AccountDisabled.into();
        assert_eq!(e.error.code, "UNAUTHORIZED");

        let e: ApiError = CredentialError::Persistence(anyhow::anyhow!("disk full")).into();
        assert_eq!(e.error.code, "INTERNAL_ERROR");
        assert!(!e.error.message.contains("disk full"));
    }
}
