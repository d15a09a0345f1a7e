//! Services layer - Business logic
//!
//! Session lifecycle and presence coordination:
//! - Login, logout and per-request authentication
//! - Heartbeats with exactly-once force action delivery
//! - Cross-device handoff through short-lived pending sessions
//! - Administrative session management
//!
//! Ephemeral state (force actions, rate limiter counters, presence channels)
//! is process-local and injected, so tests can run many instances side by side.

pub mod auth;
pub mod credentials;
pub mod error;
pub mod force_action;
pub mod handoff;
pub mod heartbeat;
pub mod pending_session;
pub mod pin;
pub mod presence;
pub mod rate_limiter;
pub mod session;
pub mod session_registry;
pub mod tokens;

pub use auth::{AuthContext, AuthService, LoginInput};
pub use credentials::{CredentialStore, RepositoryCredentialStore};
pub use error::{ServiceResult, SessionServiceError};
pub use force_action::ForceActionQueue;
pub use handoff::{HandoffCoordinator, HandoffPoll, HandoffTicket};
pub use heartbeat::{HeartbeatCoordinator, HeartbeatOutcome};
pub use pending_session::PendingSessionRegistry;
pub use pin::{hash_pin, verify_pin};
pub use presence::{PresenceBroadcaster, PresenceEvent};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use session::{CleanupMode, SessionService, SessionView, SoundState};
pub use session_registry::SessionRegistry;
