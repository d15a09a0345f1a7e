//! Heartbeat coordinator
//!
//! One heartbeat reconciles three things, in this order:
//! 1. a queued force action for the token wins outright, with no other
//!    side effects;
//! 2. otherwise the session row is refreshed, and a missing row is
//!    reported as a forced logout;
//! 3. otherwise the identity is announced online.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::models::ForceAction;
use crate::services::credentials::CredentialStore;
use crate::services::error::{ServiceResult, SessionServiceError};
use crate::services::force_action::ForceActionQueue;
use crate::services::presence::PresenceBroadcaster;
use crate::services::session_registry::SessionRegistry;

/// What the device should do after its heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeartbeatOutcome {
    Ok {
        ok: bool,
        session_code: String,
        muted: bool,
    },
    Force { force: ForceAction },
}

impl HeartbeatOutcome {
    fn force(action: ForceAction) -> Self {
        HeartbeatOutcome::Force { force: action }
    }
}

pub struct HeartbeatCoordinator {
    force_actions: Arc<ForceActionQueue>,
    sessions: Arc<SessionRegistry>,
    credentials: Arc<dyn CredentialStore>,
    presence: Arc<PresenceBroadcaster>,
}

impl HeartbeatCoordinator {
    pub fn new(
        force_actions: Arc<ForceActionQueue>,
        sessions: Arc<SessionRegistry>,
        credentials: Arc<dyn CredentialStore>,
        presence: Arc<PresenceBroadcaster>,
    ) -> Self {
        Self {
            force_actions,
            sessions,
            credentials,
            presence,
        }
    }

    /// Process one heartbeat for `token`.
    ///
    /// Storage failures surface as `Transient`; the client keeps its
    /// session and simply tries again on the next beat.
    pub async fn heartbeat(&self, token: &str) -> ServiceResult<HeartbeatOutcome> {
        if token.is_empty() {
            return Err(SessionServiceError::Unauthenticated);
        }

        if let Some(action) = self.force_actions.consume(token).await {
            tracing::warn!("Delivering force {} on heartbeat", action.action);
            return Ok(HeartbeatOutcome::force(action));
        }

        if !self.sessions.mark_seen(token).await.map_err(transient)? {
            tracing::debug!("Heartbeat for a missing session, forcing logout");
            return Ok(HeartbeatOutcome::force(ForceAction::logout()));
        }

        let session = self.sessions.find_by_token(token).await.map_err(transient)?;
        let Some(session) = session else {
            return Ok(HeartbeatOutcome::force(ForceAction::logout()));
        };
        let identity = self
            .credentials
            .identity(&session.identity_id)
            .await
            .map_err(|e| transient(e.into()))?;
        let Some(identity) = identity else {
            return Ok(HeartbeatOutcome::force(ForceAction::logout()));
        };

        self.presence.online(
            &identity,
            Some(json!({
                "session_id": session.id,
                "session_code": session.session_code,
                "device_type": session.device_type,
            })),
        );
        tracing::debug!("Heartbeat from session {}", session.id);

        Ok(HeartbeatOutcome::Ok {
            ok: true,
            session_code: session.session_code,
            muted: session.muted,
        })
    }
}

fn transient(err: SessionServiceError) -> SessionServiceError {
    match err {
        SessionServiceError::InternalError(e) => {
            tracing::warn!("Heartbeat storage failure: {:#}", e);
            SessionServiceError::Transient(e.to_string())
        }
        other => other,
    }
}
