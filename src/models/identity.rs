//! Identity model
//!
//! An identity is the durable account a session authenticates: either a
//! retail location (shared by every kiosk in the store) or an ARL who
//! oversees several locations of a tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::Session;

/// Durable account record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub tenant_id: String,
    pub user_type: UserType,
    /// Only meaningful for ARLs; locations are always `Member`
    pub role: Role,
    pub display_name: String,
    /// PIN hash (argon2)
    #[serde(skip_serializing, default)]
    pub pin_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(
        id: String,
        tenant_id: String,
        user_type: UserType,
        role: Role,
        display_name: String,
        pin_hash: String,
    ) -> Self {
        let role = match user_type {
            UserType::Location => Role::Member,
            UserType::Arl => role,
        };
        Self {
            id,
            tenant_id,
            user_type,
            role,
            display_name,
            pin_hash,
            created_at: Utc::now(),
        }
    }

    /// Capabilities derived from the current type and role.
    ///
    /// Always computed from the stored identity, never carried in a token,
    /// so a demotion takes effect on the next request.
    pub fn capabilities(&self) -> Capabilities {
        let mut set = BTreeSet::from([
            Capability::Heartbeat,
            Capability::ViewOwnSessions,
            Capability::ApproveHandoff,
        ]);
        if self.user_type == UserType::Arl {
            set.insert(Capability::ManageTenantSessions);
            set.insert(Capability::ApproveHandoffForLocation);
            if self.role == Role::Admin {
                set.insert(Capability::CleanupSessions);
            }
        }
        Capabilities(set)
    }

    /// Whether this identity may terminate or re-auth the given session
    pub fn can_manage(&self, session: &Session) -> bool {
        session.identity_id == self.id
            || (self.capabilities().has(Capability::ManageTenantSessions)
                && session.tenant_id == self.tenant_id)
    }
}

/// Identity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// A retail location, shared by its kiosks
    Location,
    /// Area/regional manager
    Arl,
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserType::Location => write!(f, "location"),
            UserType::Arl => write!(f, "arl"),
        }
    }
}

impl FromStr for UserType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "location" => Ok(UserType::Location),
            "arl" => Ok(UserType::Arl),
            _ => Err(anyhow::anyhow!("Invalid user type: {}", s)),
        }
    }
}

/// ARL role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Member => write!(f, "member"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            _ => Err(anyhow::anyhow!("Invalid role: {}", s)),
        }
    }
}

/// A single permission checked by the service layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Heartbeat,
    ViewOwnSessions,
    ApproveHandoff,
    ManageTenantSessions,
    ApproveHandoffForLocation,
    CleanupSessions,
}

/// Resolved capability set of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn has(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user_type: UserType, role: Role) -> Identity {
        Identity::new(
            "id-1".to_string(),
            "acme".to_string(),
            user_type,
            role,
            "Someone".to_string(),
            "hash".to_string(),
        )
    }

    #[test]
    fn test_location_capabilities() {
        let caps = identity(UserType::Location, Role::Member).capabilities();
        assert!(caps.has(Capability::Heartbeat));
        assert!(caps.has(Capability::ViewOwnSessions));
        assert!(caps.has(Capability::ApproveHandoff));
        assert!(!caps.has(Capability::ManageTenantSessions));
        assert!(!caps.has(Capability::CleanupSessions));
        assert_eq!(caps.iter().count(), 3);
    }

    #[test]
    fn test_arl_capabilities() {
        let caps = identity(UserType::Arl, Role::Member).capabilities();
        assert!(caps.has(Capability::ManageTenantSessions));
        assert!(caps.has(Capability::ApproveHandoffForLocation));
        assert!(!caps.has(Capability::CleanupSessions));

        let caps = identity(UserType::Arl, Role::Admin).capabilities();
        assert!(caps.has(Capability::CleanupSessions));
        assert_eq!(caps.iter().count(), 6);
    }

    #[test]
    fn test_location_cannot_be_admin() {
        let location = identity(UserType::Location, Role::Admin);
        assert_eq!(location.role, Role::Member);
        assert!(!location.capabilities().has(Capability::CleanupSessions));
    }

    #[test]
    fn test_pin_hash_not_serialized() {
        let json = serde_json::to_value(identity(UserType::Location, Role::Member)).unwrap();
        assert!(json.get("pin_hash").is_none());
        assert_eq!(json["user_type"], "location");
    }

    #[test]
    fn test_user_type_from_str() {
        assert_eq!(UserType::from_str("ARL").unwrap(), UserType::Arl);
        assert_eq!(UserType::from_str("location").unwrap(), UserType::Location);
        assert!(UserType::from_str("customer").is_err());
        assert_eq!(UserType::Arl.to_string(), "arl");
    }

    #[test]
    fn test_role_round_trips_through_text() {
        for role in [Role::Member, Role::Admin] {
            assert_eq!(Role::from_str(&role.to_string()).unwrap(), role);
        }
        assert!(Role::from_str("owner").is_err());
    }
}
