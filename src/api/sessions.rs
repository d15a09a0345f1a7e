//! Session API endpoints
//!
//! - POST /api/v1/sessions/heartbeat
//! - GET /api/v1/sessions
//! - PUT /api/v1/sessions/sound
//! - POST /api/v1/sessions/force-terminate
//! - POST /api/v1/sessions/force-reauth
//! - POST /api/v1/sessions/terminate-others
//! - POST /api/v1/admin/sessions/cleanup

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{extract_session_token, ApiError, AppState, CurrentSession};
use crate::services::{CleanupMode, HeartbeatOutcome, SessionView, SoundState};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub identity_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SoundRequest {
    pub session_id: Option<String>,
    pub muted: bool,
}

#[derive(Debug, Deserialize)]
pub struct TargetSessionRequest {
    pub session_id: String,
    pub redirect_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TerminateOthersRequest {
    pub identity_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub mode: CleanupMode,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

/// Heartbeat runs outside `require_auth`: a deleted row must still get
/// its `force logout` answer instead of a bare 401.
pub fn public_router() -> Router<AppState> {
    Router::new().route("/heartbeat", post(heartbeat))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/sound", put(set_sound))
        .route("/force-terminate", post(force_terminate))
        .route("/force-reauth", post(force_reauth))
        .route("/terminate-others", post(terminate_others))
}

pub fn admin_router() -> Router<AppState> {
    Router::new().route("/cleanup", post(cleanup))
}

/// POST /api/v1/sessions/heartbeat
async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HeartbeatOutcome>, ApiError> {
    let token = extract_session_token(&headers)
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;
    Ok(Json(state.heartbeat.heartbeat(&token).await?))
}

/// GET /api/v1/sessions
async fn list_sessions(
    State(state): State<AppState>,
    CurrentSession(ctx): CurrentSession,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let sessions = state
        .session_service
        .list_sessions(&ctx, query.identity_id.as_deref())
        .await?;
    Ok(Json(sessions))
}

/// PUT /api/v1/sessions/sound
async fn set_sound(
    State(state): State<AppState>,
    CurrentSession(ctx): CurrentSession,
    Json(body): Json<SoundRequest>,
) -> Result<Json<SoundState>, ApiError> {
    let sound = state
        .session_service
        .set_sound(&ctx, body.session_id.as_deref(), body.muted)
        .await?;
    Ok(Json(sound))
}

/// POST /api/v1/sessions/force-terminate
async fn force_terminate(
    State(state): State<AppState>,
    CurrentSession(ctx): CurrentSession,
    Json(body): Json<TargetSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .session_service
        .force_terminate(&ctx, &body.session_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/sessions/force-reauth
async fn force_reauth(
    State(state): State<AppState>,
    CurrentSession(ctx): CurrentSession,
    Json(body): Json<TargetSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .session_service
        .force_reauth(&ctx, &body.session_id, body.redirect_to)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/sessions/terminate-others
async fn terminate_others(
    State(state): State<AppState>,
    CurrentSession(ctx): CurrentSession,
    body: Option<Json<TerminateOthersRequest>>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let identity_id = body.and_then(|Json(b)| b.identity_id);
    let deleted = state
        .session_service
        .force_terminate_all_except(&ctx, identity_id.as_deref())
        .await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// POST /api/v1/admin/sessions/cleanup
async fn cleanup(
    State(state): State<AppState>,
    CurrentSession(ctx): CurrentSession,
    Json(body): Json<CleanupRequest>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let deleted = state
        .session_service
        .cleanup_sessions(&ctx, body.mode)
        .await?;
    Ok(Json(DeletedResponse { deleted }))
}
