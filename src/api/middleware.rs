//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The JSON error envelope and its status mapping
//! - Session token extraction (Bearer header, then `session` cookie)
//! - The authentication middleware and its extractor

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::db::repositories::{
    SqlxIdentityRepository, SqlxPendingSessionRepository, SqlxSessionRepository,
};
use crate::db::DynDatabasePool;
use crate::services::{
    AuthContext, AuthService, CredentialStore, ForceActionQueue, HandoffCoordinator,
    HeartbeatCoordinator, PendingSessionRegistry, PresenceBroadcaster, RateLimiter,
    RepositoryCredentialStore, SessionRegistry, SessionService, SessionServiceError,
};

/// Cookie attributes for the session cookie
#[derive(Debug, Clone, Copy)]
pub struct CookieSettings {
    pub max_age_secs: u64,
    pub secure: bool,
}

impl CookieSettings {
    /// `Set-Cookie` value carrying `token`
    pub fn session_cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            token, self.max_age_secs
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value removing the session cookie
    pub fn clear_cookie(&self) -> String {
        let mut cookie = "session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0".to_string();
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Headers setting the session cookie
    pub fn headers_with(&self, cookie: String) -> Result<HeaderMap, ApiError> {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|_| ApiError::internal_error("Invalid cookie value"))?;
        let mut headers = HeaderMap::new();
        headers.insert(header::SET_COOKIE, value);
        Ok(headers)
    }
}

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub heartbeat: Arc<HeartbeatCoordinator>,
    pub handoff: Arc<HandoffCoordinator>,
    pub session_service: Arc<SessionService>,
    pub sessions: Arc<SessionRegistry>,
    pub force_actions: Arc<ForceActionQueue>,
    pub rate_limiter: Arc<RateLimiter>,
    pub presence: Arc<PresenceBroadcaster>,
    pub credentials: Arc<RepositoryCredentialStore>,
    pub cookies: CookieSettings,
    pub trust_proxy: bool,
}

impl AppState {
    /// Wire every service onto one pool.
    ///
    /// Ephemeral state (force actions, rate limiter, presence channels) is
    /// created here, so each state owns its own.
    pub fn new(pool: DynDatabasePool, config: &Config) -> Self {
        let credentials = Arc::new(RepositoryCredentialStore::new(
            SqlxIdentityRepository::boxed(pool.clone()),
        ));
        let credential_store: Arc<dyn CredentialStore> = credentials.clone();

        let sessions = Arc::new(SessionRegistry::new(
            SqlxSessionRepository::boxed(pool.clone()),
            config.session.liveness_window(),
        ));
        let pending = Arc::new(PendingSessionRegistry::new(
            SqlxPendingSessionRepository::boxed(pool),
            config.session.pending_ttl(),
            config.session.code_retry_budget,
        ));
        let force_actions = Arc::new(ForceActionQueue::new(config.session.force_action_ttl()));
        let rate_limiter = Arc::new(RateLimiter::new());
        let presence = Arc::new(PresenceBroadcaster::new());

        let auth = Arc::new(AuthService::new(
            credential_store.clone(),
            sessions.clone(),
            rate_limiter.clone(),
            config.rate_limit,
            presence.clone(),
        ));
        let heartbeat = Arc::new(HeartbeatCoordinator::new(
            force_actions.clone(),
            sessions.clone(),
            credential_store.clone(),
            presence.clone(),
        ));
        let handoff = Arc::new(HandoffCoordinator::new(
            pending,
            sessions.clone(),
            credential_store.clone(),
            presence.clone(),
        ));
        let session_service = Arc::new(SessionService::new(
            sessions.clone(),
            force_actions.clone(),
            credential_store,
            presence.clone(),
        ));

        Self {
            auth,
            heartbeat,
            handoff,
            session_service,
            sessions,
            force_actions,
            rate_limiter,
            presence,
            credentials,
            cookies: CookieSettings {
                max_age_secs: config.session.cookie_max_age_secs,
                secure: config.server.secure_cookies,
            },
            trust_proxy: config.server.trust_proxy,
        }
    }
}

/// Peer address of the connection, when the server was started with
/// connect info
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub Option<SocketAddr>);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientAddr(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

/// Authenticated caller, inserted by [`require_auth`]
#[derive(Debug, Clone)]
pub struct CurrentSession(pub AuthContext);

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
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

    pub fn expired() -> Self {
        Self::new("EXPIRED", "Code invalid or expired")
    }

    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::with_details(
            "RATE_LIMITED",
            "Too many attempts, try again later",
            serde_json::json!({ "retry_after_ms": retry_after_ms }),
        )
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new("TRANSIENT", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    fn retry_after_secs(&self) -> Option<u64> {
        let ms = self.error.details.as_ref()?.get("retry_after_ms")?.as_u64()?;
        Some(ms.div_ceil(1000).max(1))
    }
}

impl From<SessionServiceError> for ApiError {
    fn from(err: SessionServiceError) -> Self {
        match err {
            SessionServiceError::Unauthenticated => {
                ApiError::unauthorized("Invalid or expired session")
            }
            SessionServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            SessionServiceError::NotFound(what) => ApiError::not_found(format!("{} not found", what)),
            SessionServiceError::Expired => ApiError::expired(),
            SessionServiceError::RateLimited { retry_after_ms } => {
                ApiError::rate_limited(retry_after_ms)
            }
            SessionServiceError::Validation(msg) => ApiError::validation_error(msg),
            SessionServiceError::Transient(msg) => {
                tracing::warn!("Transient failure: {}", msg);
                ApiError::transient("Temporarily unavailable, please retry")
            }
            SessionServiceError::InternalError(e) => {
                tracing::error!("Storage failure: {:#}", e);
                ApiError::transient("Temporarily unavailable, please retry")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "EXPIRED" => StatusCode::GONE,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            "TRANSIENT" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut response = (status, Json(&self)).into_response();
        if let Some(secs) = self.retry_after_secs() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Extract session token from request headers
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                let cookie = cookie.trim();
                if let Some(token) = cookie.strip_prefix("session=") {
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Authentication middleware
///
/// Resolves the token into a fresh [`AuthContext`]; capabilities are never
/// taken from the token itself.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let ctx = state.auth.authenticate(&token).await?;

    request.extensions_mut().insert(CurrentSession(ctx));
    Ok(next.run(request).await)
}

/// Client key for the login rate limiter
///
/// Forwarding headers are only honoured with `trust_proxy`; otherwise the
/// peer address is used.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) = forwarded_ip(headers) {
            return ip;
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() {
                    return Some(ip.to_string());
                }
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(String::from)
}
