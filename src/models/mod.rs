//! Data models
//!
//! Entities of the session coordinator:
//! - Identity (durable account, with its capability set)
//! - Session (one per logged-in device)
//! - PendingSession (cross-device handoff placeholder)
//! - ForceAction (ephemeral instruction for one session)

mod force_action;
mod identity;
mod pending_session;
mod session;

pub use force_action::{ForceAction, ForceKind};
pub use identity::{Capabilities, Capability, Identity, Role, UserType};
pub use pending_session::{PendingSession, PendingStatus};
pub use session::Session;
