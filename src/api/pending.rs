//! Pending session API endpoints (cross-device handoff)
//!
//! - POST /api/v1/pending-sessions - New device asks for a code
//! - GET /api/v1/pending-sessions/{id} - New device polls; adopts the cookie once approved
//! - POST /api/v1/pending-sessions/approve - Authenticated device approves a code

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{user_agent, ApiError, AppState, CurrentSession};
use crate::models::PendingStatus;

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub code: String,
    /// Location to sign in; defaults to the approver's own identity
    pub identity_id: Option<String>,
    pub redirect_to: Option<String>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_pending))
        .route("/{id}", get(poll_pending))
}

pub fn protected_router() -> Router<AppState> {
    Router::new().route("/approve", post(approve_pending))
}

/// POST /api/v1/pending-sessions
async fn create_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state
        .handoff
        .request(user_agent(&headers).as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// GET /api/v1/pending-sessions/{id}
async fn poll_pending(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let poll = state.handoff.poll(&id).await?;

    let headers = match (&poll.status, &poll.token) {
        (PendingStatus::Activated, Some(token)) => state
            .cookies
            .headers_with(state.cookies.session_cookie(token))?,
        _ => HeaderMap::new(),
    };
    Ok((headers, Json(poll)))
}

/// POST /api/v1/pending-sessions/approve
async fn approve_pending(
    State(state): State<AppState>,
    CurrentSession(ctx): CurrentSession,
    Json(body): Json<ApproveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .handoff
        .approve(
            &ctx,
            body.code.trim(),
            body.identity_id.as_deref(),
            body.redirect_to.as_deref(),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
