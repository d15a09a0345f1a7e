//! Credential store
//!
//! Verifies `(user_id, pin)` pairs against the identities table and seeds
//! configured identities at startup.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::SeedIdentity;
use crate::db::repositories::IdentityRepository;
use crate::models::{Identity, Role, UserType};
use crate::services::pin::{hash_pin, verify_pin};

/// Verifies credentials and resolves identities
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Some(identity)` only when the PIN matches
    async fn verify(&self, user_id: &str, pin: &str) -> Result<Option<Identity>>;

    /// Current identity record, for per-request capability resolution
    async fn identity(&self, id: &str) -> Result<Option<Identity>>;
}

/// Credential store backed by the identity repository
pub struct RepositoryCredentialStore {
    identities: Arc<dyn IdentityRepository>,
}

impl RepositoryCredentialStore {
    pub fn new(identities: Arc<dyn IdentityRepository>) -> Self {
        Self { identities }
    }

    /// Create every configured identity that does not exist yet.
    ///
    /// Existing identities are left alone, so restarting never resets a PIN.
    pub async fn seed(&self, seeds: &[SeedIdentity]) -> Result<usize> {
        let mut created = 0;
        for seed in seeds {
            if self.identities.get_by_id(&seed.id).await?.is_some() {
                continue;
            }

            let user_type = UserType::from_str(&seed.user_type)
                .with_context(|| format!("Invalid seed identity '{}'", seed.id))?;
            let role = if seed.admin { Role::Admin } else { Role::Member };
            let identity = Identity::new(
                seed.id.clone(),
                seed.tenant_id.clone(),
                user_type,
                role,
                seed.display_name.clone(),
                hash_pin(&seed.pin)?,
            );

            self.identities.create(&identity).await?;
            tracing::info!("Seeded {} identity {}", identity.user_type, identity.id);
            created += 1;
        }
        Ok(created)
    }
}

#[async_trait]
impl CredentialStore for RepositoryCredentialStore {
    async fn verify(&self, user_id: &str, pin: &str) -> Result<Option<Identity>> {
        let Some(identity) = self.identities.get_by_id(user_id).await? else {
            return Ok(None);
        };

        if verify_pin(pin, &identity.pin_hash)? {
            Ok(Some(identity))
        } else {
            Ok(None)
        }
    }

    async fn identity(&self, id: &str) -> Result<Option<Identity>> {
        self.identities.get_by_id(id).await
    }
}
