//! Session model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Identity, UserType};

/// A device-scoped authentication grant bound to one secret token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub identity_id: String,
    pub user_type: UserType,
    pub tenant_id: String,
    /// Bearer secret; never echoed back in listings
    #[serde(skip_serializing, default)]
    pub token: String,
    /// 6-digit display code telling devices of one identity apart
    pub session_code: String,
    pub device_type: String,
    pub user_agent: Option<String>,
    /// Stored online flag; see [`Session::is_live`] for the read-time view
    pub is_online: bool,
    pub muted: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Session {
    /// Build a fresh, online session for `identity`
    pub fn new(
        identity: &Identity,
        token: String,
        session_code: String,
        device_type: String,
        user_agent: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            identity_id: identity.id.clone(),
            user_type: identity.user_type,
            tenant_id: identity.tenant_id.clone(),
            token,
            session_code,
            device_type,
            user_agent,
            is_online: true,
            muted: false,
            created_at: now,
            last_seen_at: now,
        }
    }

    /// Online only if flagged and refreshed within the liveness window
    pub fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.is_online && now - self.last_seen_at <= window
    }
}
