//! Handoff coordinator
//!
//! Drives the cross-device login: an unauthenticated device requests a
//! code, an authenticated party approves it, and the device picks up a
//! freshly minted session by polling.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::models::{Capability, Identity, PendingStatus, UserType};
use crate::services::auth::AuthContext;
use crate::services::credentials::CredentialStore;
use crate::services::error::{ServiceResult, SessionServiceError};
use crate::services::pending_session::PendingSessionRegistry;
use crate::services::presence::PresenceBroadcaster;
use crate::services::session_registry::SessionRegistry;

/// Device type recorded for sessions created through a handoff
pub const HANDOFF_DEVICE_TYPE: &str = "handoff";

/// Returned to the requesting device
#[derive(Debug, Clone, Serialize)]
pub struct HandoffTicket {
    pub id: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandoffPoll {
    pub status: PendingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    /// Only set once activated; the HTTP layer turns it into a cookie
    #[serde(skip)]
    pub token: Option<String>,
}

pub struct HandoffCoordinator {
    pending: Arc<PendingSessionRegistry>,
    sessions: Arc<SessionRegistry>,
    credentials: Arc<dyn CredentialStore>,
    presence: Arc<PresenceBroadcaster>,
}

impl HandoffCoordinator {
    pub fn new(
        pending: Arc<PendingSessionRegistry>,
        sessions: Arc<SessionRegistry>,
        credentials: Arc<dyn CredentialStore>,
        presence: Arc<PresenceBroadcaster>,
    ) -> Self {
        Self {
            pending,
            sessions,
            credentials,
            presence,
        }
    }

    pub async fn request(&self, user_agent: Option<&str>) -> ServiceResult<HandoffTicket> {
        let row = self.pending.create(user_agent).await?;
        Ok(HandoffTicket {
            id: row.id,
            code: row.code,
            expires_at: row.expires_at,
        })
    }

    /// Approve `code` on behalf of `target_identity` (the approver's own
    /// identity when `None`).
    ///
    /// A new session is minted for the target; the approver's own token
    /// never leaves its device.
    pub async fn approve(
        &self,
        approver: &AuthContext,
        code: &str,
        target_identity: Option<&str>,
        redirect_to: Option<&str>,
    ) -> ServiceResult<()> {
        let target = self.resolve_target(approver, target_identity).await?;
        if let Some(redirect) = redirect_to {
            validate_redirect(redirect)?;
        }

        let Some(row) = self.pending.lookup(code).await? else {
            tracing::warn!("Approval for unknown or expired code by {}", approver.identity.id);
            return Err(SessionServiceError::Expired);
        };

        let session = self
            .sessions
            .create(&target, HANDOFF_DEVICE_TYPE, row.user_agent.as_deref())
            .await?;

        let attached = match self.pending.approve(code, &session.token, redirect_to).await {
            Ok(attached) => attached,
            Err(e) => {
                self.sessions.terminate(&session.token).await?;
                return Err(e);
            }
        };
        if !attached {
            // Raced by another approval or by the TTL
            self.sessions.terminate(&session.token).await?;
            return Err(SessionServiceError::Expired);
        }

        tracing::info!(
            "{} approved handoff {} for {}",
            approver.identity.id,
            row.id,
            target.id
        );
        self.presence.online(
            &target,
            Some(json!({
                "session_id": session.id,
                "session_code": session.session_code,
                "device_type": session.device_type,
            })),
        );
        Ok(())
    }

    /// Poll a pending handoff by id
    pub async fn poll(&self, id: &str) -> ServiceResult<HandoffPoll> {
        let row = self
            .pending
            .get(id)
            .await?
            .ok_or_else(|| SessionServiceError::NotFound("pending session".to_string()))?;

        match row.effective_status(Utc::now()) {
            PendingStatus::Expired => Err(SessionServiceError::Expired),
            PendingStatus::Pending => Ok(HandoffPoll {
                status: PendingStatus::Pending,
                redirect_to: None,
                token: None,
            }),
            PendingStatus::Activated => Ok(HandoffPoll {
                status: PendingStatus::Activated,
                redirect_to: row.redirect_to,
                token: row.token,
            }),
        }
    }

    /// Drop pending rows that expired more than one TTL ago. Until then a
    /// late poll still gets `Expired` rather than `NotFound`.
    pub async fn sweep_expired(&self) -> ServiceResult<u64> {
        self.pending.sweep_expired(self.pending.ttl()).await
    }

    async fn resolve_target(
        &self,
        approver: &AuthContext,
        target_identity: Option<&str>,
    ) -> ServiceResult<Identity> {
        match target_identity {
            None => {
                approver.require(Capability::ApproveHandoff)?;
                Ok(approver.identity.clone())
            }
            Some(id) if id == approver.identity.id => {
                approver.require(Capability::ApproveHandoff)?;
                Ok(approver.identity.clone())
            }
            Some(id) => {
                approver.require(Capability::ApproveHandoffForLocation)?;
                let target = self
                    .credentials
                    .identity(id)
                    .await?
                    .ok_or_else(|| SessionServiceError::NotFound(format!("identity {}", id)))?;
                if target.tenant_id != approver.identity.tenant_id
                    || target.user_type != UserType::Location
                {
                    return Err(SessionServiceError::Forbidden(
                        "can only approve for locations of your tenant".to_string(),
                    ));
                }
                Ok(target)
            }
        }
    }
}

/// Only same-origin absolute paths
pub(crate) fn validate_redirect(redirect: &str) -> ServiceResult<()> {
    if redirect.starts_with('/') && !redirect.starts_with("//") && redirect.len() <= 512 {
        Ok(())
    } else {
        Err(SessionServiceError::Validation(
            "redirect_to must be a local path".to_string(),
        ))
    }
}
