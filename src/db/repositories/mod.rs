//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository owns the rows of one table.

pub mod identity;
pub mod pending_session;
pub mod session;

pub use identity::{IdentityRepository, SqlxIdentityRepository};
pub use pending_session::{PendingSessionRepository, SqlxPendingSessionRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
