//! Error taxonomy shared by the session services

/// Session service errors
///
/// Every service operation in this crate fails with one of these. The HTTP
/// layer maps each variant onto one status code.
#[derive(Debug, thiserror::Error)]
pub enum SessionServiceError {
    /// Missing, unknown or revoked credentials
    #[error("Authentication required")]
    Unauthenticated,

    /// Authenticated, but not allowed to do this
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Pending code past its TTL (or already used)
    #[error("Code invalid or expired")]
    Expired,

    #[error("Too many attempts, retry in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    /// Storage failure or exhausted retries; safe to retry
    #[error("Temporarily unavailable: {0}")]
    Transient(String),

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage failure bubbling up from a repository
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, SessionServiceError>;
