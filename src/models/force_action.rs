//! Force action model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction delivered to one session on its next heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceAction {
    pub action: ForceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

impl ForceAction {
    pub fn logout() -> Self {
        Self {
            action: ForceKind::Logout,
            redirect_to: None,
        }
    }

    pub fn reauth(redirect_to: Option<String>) -> Self {
        Self {
            action: ForceKind::Reauth,
            redirect_to,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceKind {
    Logout,
    Reauth,
}

impl fmt::Display for ForceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForceKind::Logout => write!(f, "logout"),
            ForceKind::Reauth => write!(f, "reauth"),
        }
    }
}
