//! Database migrations module
//!
//! Code-based migrations embedded as SQL strings, with one variant for
//! SQLite and one for MySQL.
//!
//! # Usage
//!
//! ```ignore
//! use kioskhub::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

pub const MIGRATIONS: &[Migration] = &[
    // Identities are owned by the credential store; sessions only reference them.
    Migration {
        version: 1,
        name: "create_identities",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS identities (
                id VARCHAR(64) PRIMARY KEY,
                tenant_id VARCHAR(64) NOT NULL,
                user_type VARCHAR(20) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'member',
                display_name VARCHAR(255) NOT NULL,
                pin_hash VARCHAR(255) NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_identities_tenant_id ON identities(tenant_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS identities (
                id VARCHAR(64) PRIMARY KEY,
                tenant_id VARCHAR(64) NOT NULL,
                user_type VARCHAR(20) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'member',
                display_name VARCHAR(255) NOT NULL,
                pin_hash VARCHAR(255) NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_identities_tenant_id ON identities(tenant_id);
        "#,
    },
    // One row per device session; the token is the bearer secret.
    Migration {
        version: 2,
        name: "create_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                identity_id VARCHAR(64) NOT NULL,
                user_type VARCHAR(20) NOT NULL,
                tenant_id VARCHAR(64) NOT NULL,
                token VARCHAR(128) NOT NULL UNIQUE,
                session_code VARCHAR(6) NOT NULL,
                device_type VARCHAR(32) NOT NULL,
                user_agent TEXT,
                is_online INTEGER NOT NULL DEFAULT 1,
                muted INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                last_seen_at TIMESTAMP NOT NULL,
                FOREIGN KEY (identity_id) REFERENCES identities(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_identity_id ON sessions(identity_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_last_seen_at ON sessions(last_seen_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                identity_id VARCHAR(64) NOT NULL,
                user_type VARCHAR(20) NOT NULL,
                tenant_id VARCHAR(64) NOT NULL,
                token VARCHAR(128) NOT NULL UNIQUE,
                session_code VARCHAR(6) NOT NULL,
                device_type VARCHAR(32) NOT NULL,
                user_agent TEXT,
                is_online TINYINT NOT NULL DEFAULT 1,
                muted TINYINT NOT NULL DEFAULT 0,
                created_at TIMESTAMP(3) NOT NULL,
                last_seen_at TIMESTAMP(3) NOT NULL,
                FOREIGN KEY (identity_id) REFERENCES identities(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_sessions_identity_id ON sessions(identity_id);
            CREATE INDEX idx_sessions_last_seen_at ON sessions(last_seen_at);
        "#,
    },
    // Handoff placeholders; expiry is a read-time predicate, not a row state.
    Migration {
        version: 3,
        name: "create_pending_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS pending_sessions (
                id VARCHAR(64) PRIMARY KEY,
                code VARCHAR(6) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                user_agent TEXT,
                token VARCHAR(128),
                redirect_to VARCHAR(512),
                created_at TIMESTAMP NOT NULL,
                expires_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pending_sessions_code ON pending_sessions(code, status);
            CREATE INDEX IF NOT EXISTS idx_pending_sessions_expires_at ON pending_sessions(expires_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS pending_sessions (
                id VARCHAR(64) PRIMARY KEY,
                code VARCHAR(6) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                user_agent TEXT,
                token VARCHAR(128),
                redirect_to VARCHAR(512),
                created_at TIMESTAMP(3) NOT NULL,
                expires_at TIMESTAMP(3) NOT NULL
            );
            CREATE INDEX idx_pending_sessions_code ON pending_sessions(code, status);
            CREATE INDEX idx_pending_sessions_expires_at ON pending_sessions(expires_at);
        "#,
    },
];

/// Run all pending migrations
///
/// Returns the number of migrations applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

/// Create the migrations tracking table if it doesn't exist
async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

async fn get_applied_migrations(pool: &DynDatabasePool) -> Result<Vec<MigrationRecord>> {
    match pool.driver() {
        DatabaseDriver::Sqlite => get_applied_migrations_sqlite(pool.sqlite()?).await,
        DatabaseDriver::Mysql => get_applied_migrations_mysql(pool.mysql()?).await,
    }
}

async fn get_applied_migrations_sqlite(pool: &SqlitePool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}

async fn get_applied_migrations_mysql(pool: &MySqlPool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| MigrationRecord {
            version: i64::from(row.get::<i32, _>("version")),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    match pool.driver() {
        DatabaseDriver::Sqlite => apply_migration_sqlite(pool.sqlite()?, migration).await,
        DatabaseDriver::Mysql => apply_migration_mysql(pool.mysql()?, migration).await,
    }
}

async fn apply_migration_sqlite(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_sqlite) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

async fn apply_migration_mysql(pool: &MySqlPool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_mysql) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, dropping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

/// Check if a string contains only SQL comments
fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Check if migrations are up to date
pub async fn is_up_to_date(pool: &DynDatabasePool) -> Result<bool> {
    create_migrations_table(pool).await?;
    let applied = get_applied_migrations(pool).await?;
    Ok(applied.len() == MIGRATIONS.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let applied = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(applied, MIGRATIONS.len());
        assert!(is_up_to_date(&pool).await.unwrap());

        // Second run is a no-op
        let applied = run_migrations(&pool).await.expect("Failed to rerun migrations");
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn test_session_token_is_unique() {
        let pool = create_test_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let sqlite = pool.sqlite().unwrap();

        sqlx::query(
            "INSERT INTO identities (id, tenant_id, user_type, display_name, pin_hash) VALUES ('loc-1', 't1', 'location', 'Store 1', 'x')",
        )
        .execute(sqlite)
        .await
        .unwrap();

        let insert = "INSERT INTO sessions (id, identity_id, user_type, tenant_id, token, session_code, device_type, created_at, last_seen_at) \
                      VALUES (?, 'loc-1', 'location', 't1', 'same-token', '123456', 'kiosk', datetime('now'), datetime('now'))";
        sqlx::query(insert).bind("s1").execute(sqlite).await.unwrap();
        let duplicate = sqlx::query(insert).bind("s2").execute(sqlite).await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_sessions_cascade_with_identity() {
        let pool = create_test_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let sqlite = pool.sqlite().unwrap();

        sqlx::query(
            "INSERT INTO identities (id, tenant_id, user_type, display_name, pin_hash) VALUES ('loc-1', 't1', 'location', 'Store 1', 'x')",
        )
        .execute(sqlite)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO sessions (id, identity_id, user_type, tenant_id, token, session_code, device_type, created_at, last_seen_at) \
             VALUES ('s1', 'loc-1', 'location', 't1', 'tok', '123456', 'kiosk', datetime('now'), datetime('now'))",
        )
        .execute(sqlite)
        .await
        .unwrap();

        sqlx::query("DELETE FROM identities WHERE id = 'loc-1'")
            .execute(sqlite)
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(sqlite)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_split_sql_statements() {
        let statements = split_sql_statements("CREATE TABLE a (id INT); CREATE TABLE b (id INT);");
        assert_eq!(statements.len(), 2);

        let statements = split_sql_statements("-- Comment\nCREATE TABLE a (id INT);\n-- trailing");
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_is_comment_only() {
        assert!(is_comment_only("-- This is a comment"));
        assert!(is_comment_only("-- Line 1\n-- Line 2"));
        assert!(!is_comment_only("-- Comment\nCREATE TABLE test"));
    }
}
