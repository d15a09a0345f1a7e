//! Pending session registry
//!
//! Allocates handoff codes and performs the single `pending -> activated`
//! transition. Expiry is judged against the clock on every read.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::db::repositories::PendingSessionRepository;
use crate::models::PendingSession;
use crate::services::error::{ServiceResult, SessionServiceError};
use crate::services::tokens::{generate_numeric_code, is_valid_code};

type CodeGenerator = Box<dyn Fn() -> String + Send + Sync>;

pub struct PendingSessionRegistry {
    pending: Arc<dyn PendingSessionRepository>,
    ttl: Duration,
    retry_budget: u32,
    generate_code: CodeGenerator,
}

impl PendingSessionRegistry {
    pub fn new(pending: Arc<dyn PendingSessionRepository>, ttl: Duration, retry_budget: u32) -> Self {
        Self {
            pending,
            ttl,
            retry_budget,
            generate_code: Box::new(generate_numeric_code),
        }
    }

    /// Replace the code source (deterministic codes in tests)
    pub fn with_code_generator(
        mut self,
        generate_code: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.generate_code = Box::new(generate_code);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Persist a new pending row under a code no live row is using.
    ///
    /// Gives up with `Transient` after `retry_budget` collisions.
    pub async fn create(&self, user_agent: Option<&str>) -> ServiceResult<PendingSession> {
        for attempt in 1..=self.retry_budget {
            let code = (self.generate_code)();
            if self.pending.code_in_use(&code, Utc::now()).await? {
                tracing::debug!("Pending code collision on attempt {}", attempt);
                continue;
            }

            let row = PendingSession::new(code, user_agent.map(str::to_string), self.ttl);
            let row = self.pending.create(&row).await?;
            tracing::info!("Pending session {} created, expires at {}", row.id, row.expires_at);
            return Ok(row);
        }

        tracing::warn!(
            "Could not allocate a pending code in {} attempts",
            self.retry_budget
        );
        Err(SessionServiceError::Transient(
            "no free pending code, try again".to_string(),
        ))
    }

    pub async fn get(&self, id: &str) -> ServiceResult<Option<PendingSession>> {
        Ok(self.pending.get_by_id(id).await?)
    }

    /// The live (pending, unexpired) row for `code`
    pub async fn lookup(&self, code: &str) -> ServiceResult<Option<PendingSession>> {
        if !is_valid_code(code) {
            return Err(SessionServiceError::Validation(
                "code must be 6 digits".to_string(),
            ));
        }
        Ok(self.pending.find_pending_by_code(code, Utc::now()).await?)
    }

    /// Activate the live row for `code`, attaching `token`.
    ///
    /// False when no pending, unexpired row has this code, including when a
    /// concurrent approval got there first.
    pub async fn approve(
        &self,
        code: &str,
        token: &str,
        redirect_to: Option<&str>,
    ) -> ServiceResult<bool> {
        let Some(row) = self.lookup(code).await? else {
            return Ok(false);
        };

        let activated = self
            .pending
            .activate(&row.id, token, redirect_to, Utc::now())
            .await?;
        if activated {
            tracing::info!("Pending session {} activated", row.id);
        }
        Ok(activated)
    }

    /// Delete rows expired for longer than `grace`
    pub async fn sweep_expired(&self, grace: Duration) -> ServiceResult<u64> {
        let cutoff = Utc::now() - grace;
        Ok(self.pending.delete_expired_before(cutoff).await?)
    }
}
