//! Authentication API endpoints
//!
//! - POST /api/v1/auth/login - PIN login, sets the session cookie
//! - POST /api/v1/auth/logout - End the calling device's session
//! - GET /api/v1/auth/me - Current identity, session and capabilities

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{
    client_key, extract_session_token, user_agent, ApiError, AppState, ClientAddr, CurrentSession,
};
use crate::models::{Capability, Identity, Session};
use crate::services::{AuthContext, LoginInput};

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
    pub pin: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
}

fn default_device_type() -> String {
    "browser".to_string()
}

/// Response for login and `me`
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub identity: Identity,
    pub session: Session,
    pub capabilities: Vec<Capability>,
}

impl From<AuthContext> for SessionResponse {
    fn from(ctx: AuthContext) -> Self {
        Self {
            capabilities: ctx.capabilities.iter().collect(),
            identity: ctx.identity,
            session: ctx.session,
        }
    }
}

/// Login response; the token is also returned for non-browser clients
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub session: SessionResponse,
    pub token: String,
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
}

/// Build protected auth routes
pub fn protected_router() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    ClientAddr(peer): ClientAddr,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state
        .auth
        .login(LoginInput {
            client_key: client_key(&headers, peer, state.trust_proxy),
            user_id: body.user_id,
            pin: body.pin,
            device_type: body.device_type,
            user_agent: user_agent(&headers),
        })
        .await?;

    let token = ctx.session.token.clone();
    let response_headers = state
        .cookies
        .headers_with(state.cookies.session_cookie(&token))?;

    Ok((
        response_headers,
        Json(LoginResponse {
            session: ctx.into(),
            token,
        }),
    ))
}

/// POST /api/v1/auth/logout
///
/// Always clears the cookie; an unknown token is not an error.
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = extract_session_token(&headers) {
        state.auth.logout(&token).await?;
    }

    let response_headers = state.cookies.headers_with(state.cookies.clear_cookie())?;
    Ok((StatusCode::NO_CONTENT, response_headers))
}

/// GET /api/v1/auth/me
async fn me(CurrentSession(ctx): CurrentSession) -> Json<SessionResponse> {
    Json(ctx.into())
}
