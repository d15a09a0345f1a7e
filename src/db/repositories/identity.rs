//! Identity repository
//!
//! Read side of the credential store. Identities are only written by the
//! startup seeding; everything else looks them up by id.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Identity, Role, UserType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Identity repository trait
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Insert a new identity
    async fn create(&self, identity: &Identity) -> Result<Identity>;

    /// Get identity by ID
    async fn get_by_id(&self, id: &str) -> Result<Option<Identity>>;

    /// List identities of a tenant, by display name
    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Identity>>;
}

/// SQLx-based identity repository implementation
pub struct SqlxIdentityRepository {
    pool: DynDatabasePool,
}

impl SqlxIdentityRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn IdentityRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl IdentityRepository for SqlxIdentityRepository {
    async fn create(&self, identity: &Identity) -> Result<Identity> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_identity_sqlite(self.pool.sqlite()?, identity).await,
            DatabaseDriver::Mysql => create_identity_mysql(self.pool.mysql()?, identity).await,
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Identity>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_identity_by_id_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_identity_by_id_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Identity>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_by_tenant_sqlite(self.pool.sqlite()?, tenant_id).await,
            DatabaseDriver::Mysql => list_by_tenant_mysql(self.pool.mysql()?, tenant_id).await,
        }
    }
}

const INSERT_IDENTITY: &str = r#"
    INSERT INTO identities (id, tenant_id, user_type, role, display_name, pin_hash, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_IDENTITY: &str = r#"
    SELECT id, tenant_id, user_type, role, display_name, pin_hash, created_at
    FROM identities
"#;

fn parse_kind(user_type: &str, role: &str) -> Result<(UserType, Role)> {
    let user_type = UserType::from_str(user_type)
        .with_context(|| format!("Invalid user type in database: {}", user_type))?;
    let role =
        Role::from_str(role).with_context(|| format!("Invalid role in database: {}", role))?;
    Ok((user_type, role))
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_identity_sqlite(pool: &SqlitePool, identity: &Identity) -> Result<Identity> {
    sqlx::query(INSERT_IDENTITY)
        .bind(&identity.id)
        .bind(&identity.tenant_id)
        .bind(identity.user_type.to_string())
        .bind(identity.role.to_string())
        .bind(&identity.display_name)
        .bind(&identity.pin_hash)
        .bind(identity.created_at)
        .execute(pool)
        .await
        .context("Failed to create identity")?;

    Ok(identity.clone())
}

async fn get_identity_by_id_sqlite(pool: &SqlitePool, id: &str) -> Result<Option<Identity>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_IDENTITY))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get identity by ID")?;

    row.as_ref().map(row_to_identity_sqlite).transpose()
}

async fn list_by_tenant_sqlite(pool: &SqlitePool, tenant_id: &str) -> Result<Vec<Identity>> {
    let rows = sqlx::query(&format!(
        "{} WHERE tenant_id = ? ORDER BY display_name",
        SELECT_IDENTITY
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await
    .context("Failed to list identities by tenant")?;

    rows.iter().map(row_to_identity_sqlite).collect()
}

fn row_to_identity_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Identity> {
    let (user_type, role) = parse_kind(&row.get::<String, _>("user_type"), &row.get::<String, _>("role"))?;

    Ok(Identity {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        user_type,
        role,
        display_name: row.get("display_name"),
        pin_hash: row.get("pin_hash"),
        created_at: row.get("created_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_identity_mysql(pool: &MySqlPool, identity: &Identity) -> Result<Identity> {
    sqlx::query(INSERT_IDENTITY)
        .bind(&identity.id)
        .bind(&identity.tenant_id)
        .bind(identity.user_type.to_string())
        .bind(identity.role.to_string())
        .bind(&identity.display_name)
        .bind(&identity.pin_hash)
        .bind(identity.created_at)
        .execute(pool)
        .await
        .context("Failed to create identity")?;

    Ok(identity.clone())
}

async fn get_identity_by_id_mysql(pool: &MySqlPool, id: &str) -> Result<Option<Identity>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_IDENTITY))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get identity by ID")?;

    row.as_ref().map(row_to_identity_mysql).transpose()
}

async fn list_by_tenant_mysql(pool: &MySqlPool, tenant_id: &str) -> Result<Vec<Identity>> {
    let rows = sqlx::query(&format!(
        "{} WHERE tenant_id = ? ORDER BY display_name",
        SELECT_IDENTITY
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await
    .context("Failed to list identities by tenant")?;

    rows.iter().map(row_to_identity_mysql).collect()
}

fn row_to_identity_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Identity> {
    let (user_type, role) = parse_kind(&row.get::<String, _>("user_type"), &row.get::<String, _>("role"))?;

    Ok(Identity {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        user_type,
        role,
        display_name: row.get("display_name"),
        pin_hash: row.get("pin_hash"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxIdentityRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxIdentityRepository::new(pool)
    }

    fn identity(id: &str, tenant: &str, user_type: UserType, role: Role) -> Identity {
        Identity::new(
            id.to_string(),
            tenant.to_string(),
            user_type,
            role,
            format!("Name of {}", id),
            "$argon2id$stub".to_string(),
        )
    }

    #[tokio::test]
    async fn test_create_and_get_identity() {
        let repo = setup_test_repo().await;
        let arl = identity("arl-7", "acme", UserType::Arl, Role::Admin);

        repo.create(&arl).await.expect("Failed to create identity");

        let found = repo
            .get_by_id("arl-7")
            .await
            .expect("Failed to get identity")
            .expect("Identity not found");
        assert_eq!(found.tenant_id, "acme");
        assert_eq!(found.user_type, UserType::Arl);
        assert_eq!(found.role, Role::Admin);
        assert_eq!(found.pin_hash, "$argon2id$stub");
    }

    #[tokio::test]
    async fn test_get_identity_not_found() {
        let repo = setup_test_repo().await;
        assert!(repo.get_by_id("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let repo = setup_test_repo().await;
        let store = identity("store-101", "acme", UserType::Location, Role::Member);

        repo.create(&store).await.unwrap();
        assert!(repo.create(&store).await.is_err());
    }

    #[tokio::test]
    async fn test_list_by_tenant() {
        let repo = setup_test_repo().await;
        repo.create(&identity("store-102", "acme", UserType::Location, Role::Member))
            .await
            .unwrap();
        repo.create(&identity("store-101", "acme", UserType::Location, Role::Member))
            .await
            .unwrap();
        repo.create(&identity("store-900", "globex", UserType::Location, Role::Member))
            .await
            .unwrap();

        let acme = repo.list_by_tenant("acme").await.unwrap();
        let ids: Vec<_> = acme.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["store-101", "store-102"]);
    }
}
