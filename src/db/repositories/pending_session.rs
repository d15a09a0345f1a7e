//! Pending session repository
//!
//! Storage for handoff placeholders. Expiry is never written; callers pass
//! `now` and the queries treat `expires_at < now` rows as dead.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{PendingSession, PendingStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Pending session repository trait
#[async_trait]
pub trait PendingSessionRepository: Send + Sync {
    /// Insert a new pending session
    async fn create(&self, pending: &PendingSession) -> Result<PendingSession>;

    /// Get pending session by ID
    async fn get_by_id(&self, id: &str) -> Result<Option<PendingSession>>;

    /// Whether a pending, unexpired row already uses `code`
    async fn code_in_use(&self, code: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Newest pending, unexpired row with `code`
    async fn find_pending_by_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingSession>>;

    /// Conditionally move one row from pending to activated.
    ///
    /// Returns false if the row is no longer pending or has expired, so of
    /// two concurrent activations exactly one wins.
    async fn activate(
        &self,
        id: &str,
        token: &str,
        redirect_to: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Delete rows that expired before `cutoff`
    async fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based pending session repository implementation
pub struct SqlxPendingSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxPendingSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PendingSessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl PendingSessionRepository for SqlxPendingSessionRepository {
    async fn create(&self, pending: &PendingSession) -> Result<PendingSession> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_pending_sqlite(self.pool.sqlite()?, pending).await,
            DatabaseDriver::Mysql => create_pending_mysql(self.pool.mysql()?, pending).await,
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<PendingSession>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_pending_by_id_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_pending_by_id_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn code_in_use(&self, code: &str, now: DateTime<Utc>) -> Result<bool> {
        let found = self.find_pending_by_code(code, now).await?;
        Ok(found.is_some())
    }

    async fn find_pending_by_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingSession>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                find_pending_by_code_sqlite(self.pool.sqlite()?, code, now).await
            }
            DatabaseDriver::Mysql => {
                find_pending_by_code_mysql(self.pool.mysql()?, code, now).await
            }
        }
    }

    async fn activate(
        &self,
        id: &str,
        token: &str,
        redirect_to: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                activate_sqlite(self.pool.sqlite()?, id, token, redirect_to, now).await?
            }
            DatabaseDriver::Mysql => {
                activate_mysql(self.pool.mysql()?, id, token, redirect_to, now).await?
            }
        };
        Ok(affected == 1)
    }

    async fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_expired_sqlite(self.pool.sqlite()?, cutoff).await,
            DatabaseDriver::Mysql => delete_expired_mysql(self.pool.mysql()?, cutoff).await,
        }
    }
}

const SELECT_PENDING: &str = r#"
    SELECT id, code, status, user_agent, token, redirect_to, created_at, expires_at
    FROM pending_sessions
"#;

const INSERT_PENDING: &str = r#"
    INSERT INTO pending_sessions (id, code, status, user_agent, token, redirect_to, created_at, expires_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
"#;

const ACTIVATE_PENDING: &str = r#"
    UPDATE pending_sessions
    SET status = 'activated', token = ?, redirect_to = ?
    WHERE id = ? AND status = 'pending' AND expires_at >= ?
"#;

fn parse_status(value: &str) -> Result<PendingStatus> {
    PendingStatus::from_str(value)
        .with_context(|| format!("Invalid pending session status in database: {}", value))
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_pending_sqlite(
    pool: &SqlitePool,
    pending: &PendingSession,
) -> Result<PendingSession> {
    sqlx::query(INSERT_PENDING)
        .bind(&pending.id)
        .bind(&pending.code)
        .bind(pending.status.to_string())
        .bind(&pending.user_agent)
        .bind(&pending.token)
        .bind(&pending.redirect_to)
        .bind(pending.created_at)
        .bind(pending.expires_at)
        .execute(pool)
        .await
        .context("Failed to create pending session")?;

    Ok(pending.clone())
}

async fn get_pending_by_id_sqlite(pool: &SqlitePool, id: &str) -> Result<Option<PendingSession>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_PENDING))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get pending session by ID")?;

    row.as_ref().map(row_to_pending_sqlite).transpose()
}

async fn find_pending_by_code_sqlite(
    pool: &SqlitePool,
    code: &str,
    now: DateTime<Utc>,
) -> Result<Option<PendingSession>> {
    let row = sqlx::query(&format!(
        "{} WHERE code = ? AND status = 'pending' AND expires_at >= ? ORDER BY created_at DESC LIMIT 1",
        SELECT_PENDING
    ))
    .bind(code)
    .bind(now)
    .fetch_optional(pool)
    .await
    .context("Failed to get pending session by code")?;

    row.as_ref().map(row_to_pending_sqlite).transpose()
}

async fn activate_sqlite(
    pool: &SqlitePool,
    id: &str,
    token: &str,
    redirect_to: Option<&str>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(ACTIVATE_PENDING)
        .bind(token)
        .bind(redirect_to)
        .bind(id)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to activate pending session")?;

    Ok(result.rows_affected())
}

async fn delete_expired_sqlite(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM pending_sessions WHERE expires_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to delete expired pending sessions")?;

    Ok(result.rows_affected())
}

fn row_to_pending_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<PendingSession> {
    Ok(PendingSession {
        id: row.get("id"),
        code: row.get("code"),
        status: parse_status(&row.get::<String, _>("status"))?,
        user_agent: row.get("user_agent"),
        token: row.get("token"),
        redirect_to: row.get("redirect_to"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_pending_mysql(
    pool: &MySqlPool,
    pending: &PendingSession,
) -> Result<PendingSession> {
    sqlx::query(INSERT_PENDING)
        .bind(&pending.id)
        .bind(&pending.code)
        .bind(pending.status.to_string())
        .bind(&pending.user_agent)
        .bind(&pending.token)
        .bind(&pending.redirect_to)
        .bind(pending.created_at)
        .bind(pending.expires_at)
        .execute(pool)
        .await
        .context("Failed to create pending session")?;

    Ok(pending.clone())
}

async fn get_pending_by_id_mysql(pool: &MySqlPool, id: &str) -> Result<Option<PendingSession>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_PENDING))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get pending session by ID")?;

    row.as_ref().map(row_to_pending_mysql).transpose()
}

async fn find_pending_by_code_mysql(
    pool: &MySqlPool,
    code: &str,
    now: DateTime<Utc>,
) -> Result<Option<PendingSession>> {
    let row = sqlx::query(&format!(
        "{} WHERE code = ? AND status = 'pending' AND expires_at >= ? ORDER BY created_at DESC LIMIT 1",
        SELECT_PENDING
    ))
    .bind(code)
    .bind(now)
    .fetch_optional(pool)
    .await
    .context("Failed to get pending session by code")?;

    row.as_ref().map(row_to_pending_mysql).transpose()
}

async fn activate_mysql(
    pool: &MySqlPool,
    id: &str,
    token: &str,
    redirect_to: Option<&str>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(ACTIVATE_PENDING)
        .bind(token)
        .bind(redirect_to)
        .bind(id)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to activate pending session")?;

    Ok(result.rows_affected())
}

async fn delete_expired_mysql(pool: &MySqlPool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM pending_sessions WHERE expires_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to delete expired pending sessions")?;

    Ok(result.rows_affected())
}

fn row_to_pending_mysql(row: &sqlx::mysql::MySqlRow) -> Result<PendingSession> {
    Ok(PendingSession {
        id: row.get("id"),
        code: row.get("code"),
        status: parse_status(&row.get::<String, _>("status"))?,
        user_agent: row.get("user_agent"),
        token: row.get("token"),
        redirect_to: row.get("redirect_to"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::Duration;

    async fn setup_test_repo() -> SqlxPendingSessionRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxPendingSessionRepository::new(pool)
    }

    fn pending(code: &str) -> PendingSession {
        PendingSession::new(
            code.to_string(),
            Some("Kiosk/1.0".to_string()),
            Duration::minutes(15),
        )
    }

    #[tokio::test]
    async fn test_create_and_get_pending() {
        let repo = setup_test_repo().await;
        let row = pending("483920");
        repo.create(&row).await.expect("Failed to create pending session");

        let found = repo
            .get_by_id(&row.id)
            .await
            .expect("Failed to get pending session")
            .expect("Pending session not found");
        assert_eq!(found.code, "483920");
        assert_eq!(found.status, PendingStatus::Pending);
        assert_eq!(found.user_agent.as_deref(), Some("Kiosk/1.0"));
        assert!(found.token.is_none());
    }

    #[tokio::test]
    async fn test_code_in_use_ignores_expired_and_activated() {
        let repo = setup_test_repo().await;
        let now = Utc::now();

        let mut expired = pending("111111");
        expired.expires_at = now - Duration::seconds(1);
        repo.create(&expired).await.unwrap();
        assert!(!repo.code_in_use("111111", now).await.unwrap());

        let live = pending("222222");
        repo.create(&live).await.unwrap();
        assert!(repo.code_in_use("222222", now).await.unwrap());

        assert!(repo.activate(&live.id, "tok", None, now).await.unwrap());
        assert!(!repo.code_in_use("222222", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_activate_exactly_once() {
        let repo = setup_test_repo().await;
        let row = pending("483920");
        repo.create(&row).await.unwrap();
        let now = Utc::now();

        assert!(repo
            .activate(&row.id, "tok-1", Some("/dashboard"), now)
            .await
            .unwrap());
        assert!(!repo.activate(&row.id, "tok-2", None, now).await.unwrap());

        let found = repo.get_by_id(&row.id).await.unwrap().unwrap();
        assert_eq!(found.status, PendingStatus::Activated);
        assert_eq!(found.token.as_deref(), Some("tok-1"));
        assert_eq!(found.redirect_to.as_deref(), Some("/dashboard"));
    }

    #[tokio::test]
    async fn test_activate_rejects_expired_row() {
        let repo = setup_test_repo().await;
        let mut row = pending("483920");
        row.expires_at = Utc::now() - Duration::seconds(5);
        repo.create(&row).await.unwrap();

        assert!(!repo.activate(&row.id, "tok", None, Utc::now()).await.unwrap());
        let found = repo.get_by_id(&row.id).await.unwrap().unwrap();
        assert_eq!(found.status, PendingStatus::Pending);
        assert_eq!(found.effective_status(Utc::now()), PendingStatus::Expired);
    }

    #[tokio::test]
    async fn test_row_is_live_at_its_expiry_instant() {
        let repo = setup_test_repo().await;
        let row = pending("483920");
        repo.create(&row).await.unwrap();
        let at = row.expires_at;

        assert_eq!(row.effective_status(at), PendingStatus::Pending);
        assert!(repo.code_in_use("483920", at).await.unwrap());
        assert!(repo
            .find_pending_by_code("483920", at)
            .await
            .unwrap()
            .is_some());
        assert!(repo.activate(&row.id, "tok", None, at).await.unwrap());

        let later = pending("111111");
        repo.create(&later).await.unwrap();
        let past = later.expires_at + Duration::milliseconds(1);
        assert_eq!(later.effective_status(past), PendingStatus::Expired);
        assert!(!repo.activate(&later.id, "tok", None, past).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_expired_before() {
        let repo = setup_test_repo().await;
        let now = Utc::now();

        let mut long_gone = pending("111111");
        long_gone.expires_at = now - Duration::hours(2);
        let mut just_expired = pending("222222");
        just_expired.expires_at = now - Duration::minutes(1);
        let live = pending("333333");

        repo.create(&long_gone).await.unwrap();
        repo.create(&just_expired).await.unwrap();
        repo.create(&live).await.unwrap();

        let deleted = repo
            .delete_expired_before(now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get_by_id(&long_gone.id).await.unwrap().is_none());
        assert!(repo.get_by_id(&just_expired.id).await.unwrap().is_some());
        assert!(repo.get_by_id(&live.id).await.unwrap().is_some());
    }
}
