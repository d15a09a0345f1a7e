//! Force action queue
//!
//! Process-local, token-keyed instructions (remote logout / re-auth) that
//! the target session picks up on its next heartbeat. Backed by a moka
//! cache so actions for devices that never come back age out.

use moka::future::Cache;
use std::time::Duration;

use crate::models::ForceAction;

/// Ephemeral queue of at most one pending action per token
#[derive(Clone)]
pub struct ForceActionQueue {
    actions: Cache<String, ForceAction>,
}

impl ForceActionQueue {
    /// Create a queue whose entries expire `ttl` after being enqueued
    pub fn new(ttl: Duration) -> Self {
        let actions = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();
        Self { actions }
    }

    /// Queue `action` for `token`, replacing anything still pending
    pub async fn enqueue(&self, token: &str, action: ForceAction) {
        tracing::debug!("Queued force action {} for session", action.action);
        self.actions.insert(token.to_string(), action).await;
    }

    /// Take the pending action for `token`, if any.
    ///
    /// Removal is atomic: of two concurrent consumers at most one gets it.
    pub async fn consume(&self, token: &str) -> Option<ForceAction> {
        self.actions.remove(token).await
    }

    /// Number of undelivered actions; expired entries are evicted first
    pub async fn pending_count(&self) -> u64 {
        self.actions.run_pending_tasks().await;
        self.actions.entry_count()
    }
}
