//! Session repository
//!
//! Database operations for device sessions.
//!
//! This module provides:
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL
//!
//! Every mutation is a single-row (or single-statement bulk) write keyed by
//! token or identity, so sibling devices never contend on each other's rows.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Session, UserType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Get session by its bearer token
    async fn find_by_token(&self, token: &str) -> Result<Option<Session>>;

    /// Get session by row ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Session>>;

    /// All sessions of an identity, newest first
    async fn list_for(&self, identity_id: &str) -> Result<Vec<Session>>;

    /// Online sessions of an identity seen at or after `since`, newest first
    async fn list_online_for(
        &self,
        identity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Session>>;

    /// Refresh `last_seen_at` and the online flag. False if the row is gone.
    async fn mark_seen(&self, token: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Flag one session offline
    async fn mark_offline(&self, token: &str) -> Result<bool>;

    /// Set the sound preference of one session
    async fn set_muted(&self, token: &str, muted: bool) -> Result<bool>;

    /// Delete one session
    async fn delete_by_token(&self, token: &str) -> Result<bool>;

    /// Delete every session of an identity except the one holding `keep_token`
    async fn delete_all_except(&self, identity_id: &str, keep_token: &str) -> Result<u64>;

    /// Flag online sessions not seen since `cutoff` as offline
    async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Same as `mark_stale`, limited to one tenant
    async fn mark_stale_in_tenant(&self, tenant_id: &str, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Delete every session of a tenant flagged offline
    async fn delete_offline(&self, tenant_id: &str) -> Result<u64>;

    /// Delete every session of a tenant not seen since `cutoff`
    async fn delete_stale(&self, tenant_id: &str, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based session repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_session_sqlite(self.pool.sqlite()?, session).await,
            DatabaseDriver::Mysql => create_session_mysql(self.pool.mysql()?, session).await,
        }
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                find_session_sqlite(self.pool.sqlite()?, "token", token).await
            }
            DatabaseDriver::Mysql => find_session_mysql(self.pool.mysql()?, "token", token).await,
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => find_session_sqlite(self.pool.sqlite()?, "id", id).await,
            DatabaseDriver::Mysql => find_session_mysql(self.pool.mysql()?, "id", id).await,
        }
    }

    async fn list_for(&self, identity_id: &str) -> Result<Vec<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_sessions_sqlite(self.pool.sqlite()?, identity_id, None).await
            }
            DatabaseDriver::Mysql => {
                list_sessions_mysql(self.pool.mysql()?, identity_id, None).await
            }
        }
    }

    async fn list_online_for(
        &self,
        identity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_sessions_sqlite(self.pool.sqlite()?, identity_id, Some(since)).await
            }
            DatabaseDriver::Mysql => {
                list_sessions_mysql(self.pool.mysql()?, identity_id, Some(since)).await
            }
        }
    }

    async fn mark_seen(&self, token: &str, now: DateTime<Utc>) -> Result<bool> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => mark_seen_sqlite(self.pool.sqlite()?, token, now).await?,
            DatabaseDriver::Mysql => mark_seen_mysql(self.pool.mysql()?, token, now).await?,
        };
        Ok(affected > 0)
    }

    async fn mark_offline(&self, token: &str) -> Result<bool> {
        let sql = "UPDATE sessions SET is_online = 0 WHERE token = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                execute_with_key_sqlite(self.pool.sqlite()?, sql, token).await?
            }
            DatabaseDriver::Mysql => execute_with_key_mysql(self.pool.mysql()?, sql, token).await?,
        };
        Ok(affected > 0)
    }

    async fn set_muted(&self, token: &str, muted: bool) -> Result<bool> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => set_muted_sqlite(self.pool.sqlite()?, token, muted).await?,
            DatabaseDriver::Mysql => set_muted_mysql(self.pool.mysql()?, token, muted).await?,
        };
        Ok(affected > 0)
    }

    async fn delete_by_token(&self, token: &str) -> Result<bool> {
        let sql = "DELETE FROM sessions WHERE token = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                execute_with_key_sqlite(self.pool.sqlite()?, sql, token).await?
            }
            DatabaseDriver::Mysql => execute_with_key_mysql(self.pool.mysql()?, sql, token).await?,
        };
        Ok(affected > 0)
    }

    async fn delete_all_except(&self, identity_id: &str, keep_token: &str) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                delete_all_except_sqlite(self.pool.sqlite()?, identity_id, keep_token).await
            }
            DatabaseDriver::Mysql => {
                delete_all_except_mysql(self.pool.mysql()?, identity_id, keep_token).await
            }
        }
    }

    async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let sql = "UPDATE sessions SET is_online = 0 WHERE is_online = 1 AND last_seen_at < ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => execute_with_cutoff_sqlite(self.pool.sqlite()?, sql, cutoff).await,
            DatabaseDriver::Mysql => execute_with_cutoff_mysql(self.pool.mysql()?, sql, cutoff).await,
        }
    }

    async fn mark_stale_in_tenant(&self, tenant_id: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let sql = "UPDATE sessions SET is_online = 0 \
                   WHERE tenant_id = ? AND is_online = 1 AND last_seen_at < ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                execute_in_tenant_sqlite(self.pool.sqlite()?, sql, tenant_id, cutoff).await
            }
            DatabaseDriver::Mysql => {
                execute_in_tenant_mysql(self.pool.mysql()?, sql, tenant_id, cutoff).await
            }
        }
    }

    async fn delete_offline(&self, tenant_id: &str) -> Result<u64> {
        let sql = "DELETE FROM sessions WHERE tenant_id = ? AND is_online = 0";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                execute_with_key_sqlite(self.pool.sqlite()?, sql, tenant_id).await
            }
            DatabaseDriver::Mysql => execute_with_key_mysql(self.pool.mysql()?, sql, tenant_id).await,
        }
    }

    async fn delete_stale(&self, tenant_id: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let sql = "DELETE FROM sessions WHERE tenant_id = ? AND last_seen_at < ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                execute_in_tenant_sqlite(self.pool.sqlite()?, sql, tenant_id, cutoff).await
            }
            DatabaseDriver::Mysql => {
                execute_in_tenant_mysql(self.pool.mysql()?, sql, tenant_id, cutoff).await
            }
        }
    }
}

const SELECT_SESSION: &str = r#"
    SELECT id, identity_id, user_type, tenant_id, token, session_code, device_type,
           user_agent, is_online, muted, created_at, last_seen_at
    FROM sessions
"#;

const INSERT_SESSION: &str = r#"
    INSERT INTO sessions (id, identity_id, user_type, tenant_id, token, session_code,
                          device_type, user_agent, is_online, muted, created_at, last_seen_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

fn list_sql(online_only: bool) -> String {
    if online_only {
        format!(
            "{} WHERE identity_id = ? AND is_online = 1 AND last_seen_at >= ? ORDER BY created_at DESC",
            SELECT_SESSION
        )
    } else {
        format!(
            "{} WHERE identity_id = ? ORDER BY created_at DESC",
            SELECT_SESSION
        )
    }
}

fn parse_user_type(value: &str) -> Result<UserType> {
    UserType::from_str(value).with_context(|| format!("Invalid user type in database: {}", value))
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_session_sqlite(pool: &SqlitePool, session: &Session) -> Result<Session> {
    sqlx::query(INSERT_SESSION)
        .bind(&session.id)
        .bind(&session.identity_id)
        .bind(session.user_type.to_string())
        .bind(&session.tenant_id)
        .bind(&session.token)
        .bind(&session.session_code)
        .bind(&session.device_type)
        .bind(&session.user_agent)
        .bind(session.is_online)
        .bind(session.muted)
        .bind(session.created_at)
        .bind(session.last_seen_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(session.clone())
}

async fn find_session_sqlite(
    pool: &SqlitePool,
    column: &str,
    value: &str,
) -> Result<Option<Session>> {
    let row = sqlx::query(&format!("{} WHERE {} = ?", SELECT_SESSION, column))
        .bind(value)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get session by {}", column))?;

    row.as_ref().map(row_to_session_sqlite).transpose()
}

async fn list_sessions_sqlite(
    pool: &SqlitePool,
    identity_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Session>> {
    let sql = list_sql(since.is_some());
    let mut query = sqlx::query(&sql).bind(identity_id);
    if let Some(since) = since {
        query = query.bind(since);
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to list sessions")?;

    rows.iter().map(row_to_session_sqlite).collect()
}

async fn mark_seen_sqlite(pool: &SqlitePool, token: &str, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("UPDATE sessions SET last_seen_at = ?, is_online = 1 WHERE token = ?")
        .bind(now)
        .bind(token)
        .execute(pool)
        .await
        .context("Failed to mark session seen")?;

    Ok(result.rows_affected())
}

async fn set_muted_sqlite(pool: &SqlitePool, token: &str, muted: bool) -> Result<u64> {
    let result = sqlx::query("UPDATE sessions SET muted = ? WHERE token = ?")
        .bind(muted)
        .bind(token)
        .execute(pool)
        .await
        .context("Failed to update sound preference")?;

    Ok(result.rows_affected())
}

async fn execute_with_key_sqlite(pool: &SqlitePool, sql: &str, key: &str) -> Result<u64> {
    let result = sqlx::query(sql)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to execute: {}", sql))?;

    Ok(result.rows_affected())
}

async fn delete_all_except_sqlite(
    pool: &SqlitePool,
    identity_id: &str,
    keep_token: &str,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE identity_id = ? AND token <> ?")
        .bind(identity_id)
        .bind(keep_token)
        .execute(pool)
        .await
        .context("Failed to delete sibling sessions")?;

    Ok(result.rows_affected())
}

async fn execute_with_cutoff_sqlite(
    pool: &SqlitePool,
    sql: &str,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(sql)
        .bind(cutoff)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to execute: {}", sql))?;

    Ok(result.rows_affected())
}

async fn execute_in_tenant_sqlite(
    pool: &SqlitePool,
    sql: &str,
    tenant_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(sql)
        .bind(tenant_id)
        .bind(cutoff)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to execute for tenant {}: {}", tenant_id, sql))?;

    Ok(result.rows_affected())
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.get("id"),
        identity_id: row.get("identity_id"),
        user_type: parse_user_type(&row.get::<String, _>("user_type"))?,
        tenant_id: row.get("tenant_id"),
        token: row.get("token"),
        session_code: row.get("session_code"),
        device_type: row.get("device_type"),
        user_agent: row.get("user_agent"),
        is_online: row.get("is_online"),
        muted: row.get("muted"),
        created_at: row.get("created_at"),
        last_seen_at: row.get("last_seen_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(pool: &MySqlPool, session: &Session) -> Result<Session> {
    sqlx::query(INSERT_SESSION)
        .bind(&session.id)
        .bind(&session.identity_id)
        .bind(session.user_type.to_string())
        .bind(&session.tenant_id)
        .bind(&session.token)
        .bind(&session.session_code)
        .bind(&session.device_type)
        .bind(&session.user_agent)
        .bind(session.is_online)
        .bind(session.muted)
        .bind(session.created_at)
        .bind(session.last_seen_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(session.clone())
}

async fn find_session_mysql(
    pool: &MySqlPool,
    column: &str,
    value: &str,
) -> Result<Option<Session>> {
    let row = sqlx::query(&format!("{} WHERE {} = ?", SELECT_SESSION, column))
        .bind(value)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get session by {}", column))?;

    row.as_ref().map(row_to_session_mysql).transpose()
}

async fn list_sessions_mysql(
    pool: &MySqlPool,
    identity_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Session>> {
    let sql = list_sql(since.is_some());
    let mut query = sqlx::query(&sql).bind(identity_id);
    if let Some(since) = since {
        query = query.bind(since);
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to list sessions")?;

    rows.iter().map(row_to_session_mysql).collect()
}

async fn mark_seen_mysql(pool: &MySqlPool, token: &str, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("UPDATE sessions SET last_seen_at = ?, is_online = 1 WHERE token = ?")
        .bind(now)
        .bind(token)
        .execute(pool)
        .await
        .context("Failed to mark session seen")?;

    Ok(result.rows_affected())
}

async fn set_muted_mysql(pool: &MySqlPool, token: &str, muted: bool) -> Result<u64> {
    let result = sqlx::query("UPDATE sessions SET muted = ? WHERE token = ?")
        .bind(muted)
        .bind(token)
        .execute(pool)
        .await
        .context("Failed to update sound preference")?;

    Ok(result.rows_affected())
}

async fn execute_with_key_mysql(pool: &MySqlPool, sql: &str, key: &str) -> Result<u64> {
    let result = sqlx::query(sql)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to execute: {}", sql))?;

    Ok(result.rows_affected())
}

async fn delete_all_except_mysql(
    pool: &MySqlPool,
    identity_id: &str,
    keep_token: &str,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE identity_id = ? AND token <> ?")
        .bind(identity_id)
        .bind(keep_token)
        .execute(pool)
        .await
        .context("Failed to delete sibling sessions")?;

    Ok(result.rows_affected())
}

async fn execute_with_cutoff_mysql(
    pool: &MySqlPool,
    sql: &str,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(sql)
        .bind(cutoff)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to execute: {}", sql))?;

    Ok(result.rows_affected())
}

async fn execute_in_tenant_mysql(
    pool: &MySqlPool,
    sql: &str,
    tenant_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(sql)
        .bind(tenant_id)
        .bind(cutoff)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to execute for tenant {}: {}", tenant_id, sql))?;

    Ok(result.rows_affected())
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Session> {
    let is_online: i8 = row.get("is_online");
    let muted: i8 = row.get("muted");

    Ok(Session {
        id: row.get("id"),
        identity_id: row.get("identity_id"),
        user_type: parse_user_type(&row.get::<String, _>("user_type"))?,
        tenant_id: row.get("tenant_id"),
        token: row.get("token"),
        session_code: row.get("session_code"),
        device_type: row.get("device_type"),
        user_agent: row.get("user_agent"),
        is_online: is_online != 0,
        muted: muted != 0,
        created_at: row.get("created_at"),
        last_seen_at: row.get("last_seen_at"),
    })
}
