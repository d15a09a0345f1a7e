//! Pending session model
//!
//! A pending session is the short-lived placeholder a fresh device creates
//! when it asks to be logged in by an already-authenticated party.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Handoff placeholder keyed by id (for polling) and code (for approval)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSession {
    pub id: String,
    pub code: String,
    /// Stored status; readers must go through [`PendingSession::effective_status`]
    pub status: PendingStatus,
    pub user_agent: Option<String>,
    /// Token of the session minted on approval
    #[serde(skip_serializing, default)]
    pub token: Option<String>,
    pub redirect_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingSession {
    pub fn new(code: String, user_agent: Option<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code,
            status: PendingStatus::Pending,
            user_agent,
            token: None,
            redirect_to: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Expiry wins over whatever status is stored
    pub fn effective_status(&self, now: DateTime<Utc>) -> PendingStatus {
        if now > self.expires_at {
            PendingStatus::Expired
        } else {
            self.status
        }
    }
}

/// Handoff state
///
/// `Expired` is never written; it only comes out of `effective_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Activated,
    Expired,
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingStatus::Pending => write!(f, "pending"),
            PendingStatus::Activated => write!(f, "activated"),
            PendingStatus::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for PendingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PendingStatus::Pending),
            "activated" => Ok(PendingStatus::Activated),
            "expired" => Ok(PendingStatus::Expired),
            _ => Err(anyhow::anyhow!("Invalid pending session status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pending_session() {
        let pending = PendingSession::new("483920".to_string(), None, Duration::minutes(15));
        assert_eq!(pending.status, PendingStatus::Pending);
        assert_eq!(pending.expires_at - pending.created_at, Duration::minutes(15));
        assert!(pending.token.is_none());
    }

    #[test]
    fn test_expiry_wins_over_stored_status() {
        let mut pending = PendingSession::new("483920".to_string(), None, Duration::minutes(15));
        let created = pending.created_at;

        assert_eq!(
            pending.effective_status(created + Duration::minutes(14)),
            PendingStatus::Pending
        );
        assert_eq!(
            pending.effective_status(created + Duration::minutes(16)),
            PendingStatus::Expired
        );

        pending.status = PendingStatus::Activated;
        assert_eq!(
            pending.effective_status(created + Duration::minutes(1)),
            PendingStatus::Activated
        );
        assert_eq!(
            pending.effective_status(created + Duration::minutes(16)),
            PendingStatus::Expired
        );
    }

    #[test]
    fn test_status_text() {
        assert_eq!(PendingStatus::Activated.to_string(), "activated");
        assert_eq!(
            PendingStatus::from_str("pending").unwrap(),
            PendingStatus::Pending
        );
        assert!(PendingStatus::from_str("approved").is_err());
    }
}
