//! Session management service
//!
//! Listing, sound toggles and the administrative force operations. Every
//! operation is authorized against the actor's freshly resolved
//! capabilities; sessions are addressed by id so tokens never leave the
//! device that holds them.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{Capability, ForceAction, Identity, Session};
use crate::services::auth::{announce_if_gone, AuthContext};
use crate::services::credentials::CredentialStore;
use crate::services::error::{ServiceResult, SessionServiceError};
use crate::services::force_action::ForceActionQueue;
use crate::services::handoff::validate_redirect;
use crate::services::presence::PresenceBroadcaster;
use crate::services::session_registry::SessionRegistry;

/// Session as shown in listings
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    /// The row belongs to the device making the request
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoundState {
    pub session_id: String,
    pub muted: bool,
}

/// Which sessions an administrative cleanup removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupMode {
    /// Not heard from within the liveness window
    Stale,
    /// Flagged offline
    Offline,
}

pub struct SessionService {
    sessions: Arc<SessionRegistry>,
    force_actions: Arc<ForceActionQueue>,
    credentials: Arc<dyn CredentialStore>,
    presence: Arc<PresenceBroadcaster>,
}

impl SessionService {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        force_actions: Arc<ForceActionQueue>,
        credentials: Arc<dyn CredentialStore>,
        presence: Arc<PresenceBroadcaster>,
    ) -> Self {
        Self {
            sessions,
            force_actions,
            credentials,
            presence,
        }
    }

    // ========================================================================
    // Listing and sound
    // ========================================================================

    /// Sessions of `identity_id` (the actor's own identity when `None`)
    pub async fn list_sessions(
        &self,
        actor: &AuthContext,
        identity_id: Option<&str>,
    ) -> ServiceResult<Vec<SessionView>> {
        let target = self.resolve_identity(actor, identity_id).await?;
        let sessions = self.sessions.list_for(&target.id).await?;

        Ok(sessions
            .into_iter()
            .map(|session| SessionView {
                is_current: session.id == actor.session.id,
                session,
            })
            .collect())
    }

    /// Mute or unmute a device (the calling device when `session_id` is `None`)
    pub async fn set_sound(
        &self,
        actor: &AuthContext,
        session_id: Option<&str>,
        muted: bool,
    ) -> ServiceResult<SoundState> {
        let target = match session_id {
            None => actor.session.clone(),
            Some(id) => self.managed_session(actor, id).await?,
        };

        if !self.sessions.set_muted(&target.token, muted).await? {
            return Err(SessionServiceError::NotFound(format!("session {}", target.id)));
        }
        self.presence
            .sound_toggle(&target.identity_id, &target.id, muted);

        Ok(SoundState {
            session_id: target.id,
            muted,
        })
    }

    // ========================================================================
    // Force operations
    // ========================================================================

    /// Log a device out: queue the logout for its next heartbeat, push the
    /// fast path, and delete the row.
    pub async fn force_terminate(&self, actor: &AuthContext, session_id: &str) -> ServiceResult<()> {
        let target = self.managed_session(actor, session_id).await?;
        let action = ForceAction::logout();

        self.force_actions.enqueue(&target.token, action.clone()).await;
        self.presence.force(&target.id, &action);
        self.sessions.terminate(&target.token).await?;

        tracing::warn!(
            "{} force-terminated session {} of {}",
            actor.identity.id,
            target.id,
            target.identity_id
        );
        announce_if_gone(
            &self.sessions,
            &*self.credentials,
            &self.presence,
            &target.identity_id,
        )
        .await
    }

    /// Ask a device to re-enter its PIN; the row stays
    pub async fn force_reauth(
        &self,
        actor: &AuthContext,
        session_id: &str,
        redirect_to: Option<String>,
    ) -> ServiceResult<()> {
        if let Some(redirect) = redirect_to.as_deref() {
            validate_redirect(redirect)?;
        }
        let target = self.managed_session(actor, session_id).await?;
        let action = ForceAction::reauth(redirect_to);

        self.force_actions.enqueue(&target.token, action.clone()).await;
        self.presence.force(&target.id, &action);

        tracing::warn!(
            "{} forced re-auth of session {}",
            actor.identity.id,
            target.id
        );
        Ok(())
    }

    /// Delete every session of `identity_id` except the caller's own.
    ///
    /// The deleted devices learn about it on their next heartbeat, which
    /// finds no row and answers with a forced logout.
    pub async fn force_terminate_all_except(
        &self,
        actor: &AuthContext,
        identity_id: Option<&str>,
    ) -> ServiceResult<u64> {
        let target = self.resolve_identity(actor, identity_id).await?;
        let deleted = self
            .sessions
            .terminate_all_except(&target.id, actor.token())
            .await?;

        if target.id != actor.identity.id {
            announce_if_gone(&self.sessions, &*self.credentials, &self.presence, &target.id)
                .await?;
        }
        Ok(deleted)
    }

    /// Bulk delete within the actor's tenant
    pub async fn cleanup_sessions(&self, actor: &AuthContext, mode: CleanupMode) -> ServiceResult<u64> {
        actor.require(Capability::CleanupSessions)?;
        let tenant = &actor.identity.tenant_id;

        let deleted = match mode {
            CleanupMode::Stale => {
                self.sessions
                    .delete_stale(tenant, self.sessions.liveness_window())
                    .await?
            }
            CleanupMode::Offline => {
                self.sessions.mark_stale_in_tenant(tenant).await?;
                self.sessions.delete_offline(tenant).await?
            }
        };

        tracing::info!(
            "{} cleaned up {} {:?} session(s) in {}",
            actor.identity.id,
            deleted,
            mode,
            tenant
        );
        Ok(deleted)
    }

    // ========================================================================
    // Authorization helpers
    // ========================================================================

    /// The actor itself, or an identity of its tenant it may manage
    async fn resolve_identity(
        &self,
        actor: &AuthContext,
        identity_id: Option<&str>,
    ) -> ServiceResult<Identity> {
        let id = match identity_id {
            None => return Ok(actor.identity.clone()),
            Some(id) if id == actor.identity.id => return Ok(actor.identity.clone()),
            Some(id) => id,
        };

        actor.require(Capability::ManageTenantSessions)?;
        let identity = self
            .credentials
            .identity(id)
            .await?
            .ok_or_else(|| SessionServiceError::NotFound(format!("identity {}", id)))?;
        if identity.tenant_id != actor.identity.tenant_id {
            return Err(SessionServiceError::Forbidden(
                "identity belongs to another tenant".to_string(),
            ));
        }
        Ok(identity)
    }

    async fn managed_session(&self, actor: &AuthContext, session_id: &str) -> ServiceResult<Session> {
        let session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| SessionServiceError::NotFound(format!("session {}", session_id)))?;

        if !actor.identity.can_manage(&session) {
            return Err(SessionServiceError::Forbidden(
                "cannot manage this session".to_string(),
            ));
        }
        Ok(session)
    }
}
