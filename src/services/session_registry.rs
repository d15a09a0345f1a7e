//! Session registry
//!
//! Owns the session rows: creation with fresh secrets, liveness-aware
//! listing, per-token updates and the bulk cleanup statements.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::db::repositories::SessionRepository;
use crate::models::{Identity, Session};
use crate::services::error::{ServiceResult, SessionServiceError};
use crate::services::tokens::{generate_numeric_code, generate_token};

const MAX_DEVICE_TYPE_LEN: usize = 32;
const MAX_USER_AGENT_LEN: usize = 512;

pub struct SessionRegistry {
    sessions: Arc<dyn SessionRepository>,
    liveness_window: Duration,
}

impl SessionRegistry {
    pub fn new(sessions: Arc<dyn SessionRepository>, liveness_window: Duration) -> Self {
        Self {
            sessions,
            liveness_window,
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    /// Issue a new online session for `identity` on one device
    pub async fn create(
        &self,
        identity: &Identity,
        device_type: &str,
        user_agent: Option<&str>,
    ) -> ServiceResult<Session> {
        let device_type = device_type.trim();
        if device_type.is_empty() || device_type.len() > MAX_DEVICE_TYPE_LEN {
            return Err(SessionServiceError::Validation(format!(
                "device_type must be 1-{} characters",
                MAX_DEVICE_TYPE_LEN
            )));
        }
        let user_agent = user_agent.map(|ua| truncate(ua, MAX_USER_AGENT_LEN));

        let session = Session::new(
            identity,
            generate_token(),
            generate_numeric_code(),
            device_type.to_string(),
            user_agent,
        );
        let session = self.sessions.create(&session).await?;

        tracing::info!(
            "Session {} created for {} {} on {}",
            session.id,
            identity.user_type,
            identity.id,
            session.device_type
        );
        Ok(session)
    }

    pub async fn find_by_token(&self, token: &str) -> ServiceResult<Option<Session>> {
        Ok(self.sessions.find_by_token(token).await?)
    }

    pub async fn find_by_id(&self, id: &str) -> ServiceResult<Option<Session>> {
        Ok(self.sessions.find_by_id(id).await?)
    }

    /// Every session of an identity with the liveness window applied
    pub async fn list_for(&self, identity_id: &str) -> ServiceResult<Vec<Session>> {
        let now = Utc::now();
        let mut sessions = self.sessions.list_for(identity_id).await?;
        for session in sessions.iter_mut() {
            session.is_online = session.is_live(now, self.liveness_window);
        }
        Ok(sessions)
    }

    /// Sessions heard from within the liveness window, newest first
    pub async fn list_online_for(&self, identity_id: &str) -> ServiceResult<Vec<Session>> {
        let since = Utc::now() - self.liveness_window;
        Ok(self.sessions.list_online_for(identity_id, since).await?)
    }

    /// Refresh liveness; false means the row no longer exists
    pub async fn mark_seen(&self, token: &str) -> ServiceResult<bool> {
        Ok(self.sessions.mark_seen(token, Utc::now()).await?)
    }

    /// Flag only this device offline; sibling sessions are untouched
    pub async fn mark_offline(&self, token: &str) -> ServiceResult<bool> {
        Ok(self.sessions.mark_offline(token).await?)
    }

    pub async fn set_muted(&self, token: &str, muted: bool) -> ServiceResult<bool> {
        Ok(self.sessions.set_muted(token, muted).await?)
    }

    pub async fn terminate(&self, token: &str) -> ServiceResult<bool> {
        Ok(self.sessions.delete_by_token(token).await?)
    }

    /// Log an identity out everywhere except the device holding `keep_token`
    pub async fn terminate_all_except(
        &self,
        identity_id: &str,
        keep_token: &str,
    ) -> ServiceResult<u64> {
        let deleted = self.sessions.delete_all_except(identity_id, keep_token).await?;
        tracing::info!("Terminated {} session(s) of {}", deleted, identity_id);
        Ok(deleted)
    }

    /// Persist the liveness window: flag silent sessions offline
    pub async fn mark_stale(&self) -> ServiceResult<u64> {
        let cutoff = Utc::now() - self.liveness_window;
        Ok(self.sessions.mark_stale(cutoff).await?)
    }

    /// `mark_stale` for one tenant only
    pub async fn mark_stale_in_tenant(&self, tenant_id: &str) -> ServiceResult<u64> {
        let cutoff = Utc::now() - self.liveness_window;
        Ok(self.sessions.mark_stale_in_tenant(tenant_id, cutoff).await?)
    }

    pub async fn delete_offline(&self, tenant_id: &str) -> ServiceResult<u64> {
        Ok(self.sessions.delete_offline(tenant_id).await?)
    }

    /// Delete sessions of a tenant silent for longer than `older_than`
    pub async fn delete_stale(&self, tenant_id: &str, older_than: Duration) -> ServiceResult<u64> {
        let cutoff = Utc::now() - older_than;
        Ok(self.sessions.delete_stale(tenant_id, cutoff).await?)
    }
}

fn truncate(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}
