//! Rate limiter for login attempts
//!
//! A fixed window counter per client key with a lockout once the window is
//! exceeded. Entries are only dropped by `cleanup()`, which main runs from
//! the periodic sweep task.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::RateLimitConfig;

/// Outcome of one `check`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Attempts left in the current window
    pub remaining: u32,
    /// Set when denied
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug, Clone)]
struct AttemptWindow {
    count: u32,
    window_start: DateTime<Utc>,
    window: Duration,
    locked_until: Option<DateTime<Utc>>,
}

impl AttemptWindow {
    fn is_dead(&self, now: DateTime<Utc>) -> bool {
        let lock_over = self.locked_until.map_or(true, |until| until <= now);
        lock_over && now - self.window_start >= self.window
    }
}

/// Login rate limiter
pub struct RateLimiter {
    attempts: Arc<RwLock<HashMap<String, AttemptWindow>>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new() -> Self {
        Self {
            attempts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Count one attempt for `key`
    pub async fn check(
        &self,
        key: &str,
        max_attempts: u32,
        window_ms: u64,
        lockout_ms: u64,
    ) -> RateLimitDecision {
        self.check_at(key, max_attempts, window_ms, lockout_ms, Utc::now())
            .await
    }

    /// `check` with the limits from configuration
    pub async fn check_with(&self, key: &str, limits: &RateLimitConfig) -> RateLimitDecision {
        self.check(key, limits.max_attempts, limits.window_ms, limits.lockout_ms)
            .await
    }

    pub async fn check_at(
        &self,
        key: &str,
        max_attempts: u32,
        window_ms: u64,
        lockout_ms: u64,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let window = Duration::milliseconds(window_ms as i64);
        let mut attempts = self.attempts.write().await;
        let entry = attempts
            .entry(key.to_string())
            .or_insert_with(|| AttemptWindow {
                count: 0,
                window_start: now,
                window,
                locked_until: None,
            });

        if let Some(until) = entry.locked_until {
            if until > now {
                return RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    retry_after_ms: Some((until - now).num_milliseconds().max(0) as u64),
                };
            }
            // Lockout served; start over
            entry.locked_until = None;
            entry.count = 0;
            entry.window_start = now;
        }

        if now - entry.window_start >= window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.window = window;
        entry.count += 1;

        if entry.count > max_attempts {
            entry.locked_until = Some(now + Duration::milliseconds(lockout_ms as i64));
            tracing::warn!("Rate limit exceeded for {}, locked for {} ms", key, lockout_ms);
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after_ms: Some(lockout_ms),
            };
        }

        RateLimitDecision {
            allowed: true,
            remaining: max_attempts - entry.count,
            retry_after_ms: None,
        }
    }

    /// Forget all attempts for `key` (on successful login)
    pub async fn reset(&self, key: &str) {
        let mut attempts = self.attempts.write().await;
        attempts.remove(key);
    }

    /// Drop entries whose window and lockout are both over
    pub async fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now()).await
    }

    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let mut attempts = self.attempts.write().await;
        let before = attempts.len();
        attempts.retain(|_, entry| !entry.is_dead(now));
        before - attempts.len()
    }

    /// Number of tracked keys
    pub async fn tracked_keys(&self) -> usize {
        self.attempts.read().await.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
