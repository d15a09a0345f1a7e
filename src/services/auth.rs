//! Authentication service
//!
//! Login (rate limiter, credential check, session creation, presence),
//! logout, and per-request token authentication.

use serde_json::json;
use std::sync::Arc;

use crate::config::RateLimitConfig;
use crate::models::{Capabilities, Capability, Identity, Session};
use crate::services::credentials::CredentialStore;
use crate::services::error::{ServiceResult, SessionServiceError};
use crate::services::presence::PresenceBroadcaster;
use crate::services::rate_limiter::RateLimiter;
use crate::services::session_registry::SessionRegistry;

/// Input for login
#[derive(Debug, Clone)]
pub struct LoginInput {
    /// Rate limiter key, usually the client IP
    pub client_key: String,
    pub user_id: String,
    pub pin: String,
    pub device_type: String,
    pub user_agent: Option<String>,
}

/// Who is making the request, resolved fresh from storage
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub session: Session,
    pub identity: Identity,
    pub capabilities: Capabilities,
}

impl AuthContext {
    pub fn new(session: Session, identity: Identity) -> Self {
        let capabilities = identity.capabilities();
        Self {
            session,
            identity,
            capabilities,
        }
    }

    pub fn token(&self) -> &str {
        &self.session.token
    }

    pub fn require(&self, capability: Capability) -> ServiceResult<()> {
        if self.capabilities.has(capability) {
            Ok(())
        } else {
            Err(SessionServiceError::Forbidden(format!(
                "missing capability {:?}",
                capability
            )))
        }
    }
}

pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<SessionRegistry>,
    rate_limiter: Arc<RateLimiter>,
    limits: RateLimitConfig,
    presence: Arc<PresenceBroadcaster>,
}

impl AuthService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<SessionRegistry>,
        rate_limiter: Arc<RateLimiter>,
        limits: RateLimitConfig,
        presence: Arc<PresenceBroadcaster>,
    ) -> Self {
        Self {
            credentials,
            sessions,
            rate_limiter,
            limits,
            presence,
        }
    }

    /// Verify credentials and open a session on the calling device
    pub async fn login(&self, input: LoginInput) -> ServiceResult<AuthContext> {
        if input.user_id.trim().is_empty() || input.pin.is_empty() {
            return Err(SessionServiceError::Validation(
                "user_id and pin are required".to_string(),
            ));
        }

        // Both the caller and the targeted account are throttled, so neither
        // rotating addresses nor spreading guesses over accounts helps
        let client_key = format!("client:{}", input.client_key);
        let user_key = format!("user:{}", input.user_id.trim().to_lowercase());
        let mut remaining = u32::MAX;
        for key in [&client_key, &user_key] {
            let decision = self.rate_limiter.check_with(key, &self.limits).await;
            if !decision.allowed {
                return Err(SessionServiceError::RateLimited {
                    retry_after_ms: decision.retry_after_ms.unwrap_or(self.limits.lockout_ms),
                });
            }
            remaining = remaining.min(decision.remaining);
        }

        let Some(identity) = self.credentials.verify(&input.user_id, &input.pin).await? else {
            tracing::warn!(
                "Failed login for {} from {} ({} attempts left)",
                input.user_id,
                input.client_key,
                remaining
            );
            return Err(SessionServiceError::Unauthenticated);
        };

        self.rate_limiter.reset(&client_key).await;
        self.rate_limiter.reset(&user_key).await;

        let session = self
            .sessions
            .create(&identity, &input.device_type, input.user_agent.as_deref())
            .await?;
        self.presence.online(
            &identity,
            Some(json!({
                "session_id": session.id,
                "session_code": session.session_code,
                "device_type": session.device_type,
            })),
        );

        Ok(AuthContext::new(session, identity))
    }

    /// End the calling device's session only
    pub async fn logout(&self, token: &str) -> ServiceResult<()> {
        let Some(session) = self.sessions.find_by_token(token).await? else {
            return Ok(());
        };

        self.sessions.mark_offline(token).await?;
        self.sessions.terminate(token).await?;
        tracing::info!("Session {} logged out", session.id);

        self.announce_if_gone(&session.identity_id).await?;
        Ok(())
    }

    /// Resolve a bearer token into session, identity and capabilities
    pub async fn authenticate(&self, token: &str) -> ServiceResult<AuthContext> {
        if token.is_empty() {
            return Err(SessionServiceError::Unauthenticated);
        }
        let session = self
            .sessions
            .find_by_token(token)
            .await?
            .ok_or(SessionServiceError::Unauthenticated)?;
        let identity = self
            .credentials
            .identity(&session.identity_id)
            .await?
            .ok_or(SessionServiceError::Unauthenticated)?;

        Ok(AuthContext::new(session, identity))
    }

    /// Publish an offline event once no session of the identity is live
    pub(crate) async fn announce_if_gone(&self, identity_id: &str) -> ServiceResult<()> {
        announce_if_gone(&self.sessions, &*self.credentials, &self.presence, identity_id).await
    }
}

pub(crate) async fn announce_if_gone(
    sessions: &SessionRegistry,
    credentials: &dyn CredentialStore,
    presence: &PresenceBroadcaster,
    identity_id: &str,
) -> ServiceResult<()> {
    if !sessions.list_online_for(identity_id).await?.is_empty() {
        return Ok(());
    }
    if let Some(identity) = credentials.identity(identity_id).await? {
        presence.offline(&identity);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::repositories::{SqlxIdentityRepository, SqlxSessionRepository};
    use crate::db::DynDatabasePool;
    use crate::models::{Role, UserType};
    use crate::services::credentials::RepositoryCredentialStore;
    use crate::services::presence::TOPIC_PRESENCE;
    use crate::services::session_registry::tests::{create_identity, setup_pool};
    use chrono::Duration;

    pub(crate) struct Fixture {
        pub pool: DynDatabasePool,
        pub auth: AuthService,
        pub sessions: Arc<SessionRegistry>,
        pub credentials: Arc<dyn CredentialStore>,
        pub presence: Arc<PresenceBroadcaster>,
    }

    pub(crate) async fn fixture() -> Fixture {
        let pool = setup_pool().await;
        create_identity(&pool, "store-101", "acme", UserType::Location, Role::Member).await;
        create_identity(&pool, "store-102", "acme", UserType::Location, Role::Member).await;
        create_identity(&pool, "store-900", "globex", UserType::Location, Role::Member).await;
        create_identity(&pool, "arl-7", "acme", UserType::Arl, Role::Member).await;
        create_identity(&pool, "admin-1", "acme", UserType::Arl, Role::Admin).await;

        let credentials: Arc<dyn CredentialStore> = Arc::new(RepositoryCredentialStore::new(
            SqlxIdentityRepository::boxed(pool.clone()),
        ));
        let sessions = Arc::new(SessionRegistry::new(
            SqlxSessionRepository::boxed(pool.clone()),
            Duration::seconds(90),
        ));
        let presence = Arc::new(PresenceBroadcaster::new());
        let auth = AuthService::new(
            credentials.clone(),
            sessions.clone(),
            Arc::new(RateLimiter::new()),
            RateLimitConfig::default(),
            presence.clone(),
        );

        Fixture {
            pool,
            auth,
            sessions,
            credentials,
            presence,
        }
    }

    pub(crate) fn login_input(user_id: &str, pin: &str) -> LoginInput {
        LoginInput {
            client_key: "10.0.0.1".to_string(),
            user_id: user_id.to_string(),
            pin: pin.to_string(),
            device_type: "kiosk".to_string(),
            user_agent: Some("Kiosk/1.0".to_string()),
        }
    }

    #[tokio::test]
    async fn test_login_creates_session_and_announces() {
        let fx = fixture().await;
        let mut rx = fx.presence.subscribe(TOPIC_PRESENCE);

        let ctx = fx.auth.login(login_input("store-101", "1234")).await.expect("login");
        assert_eq!(ctx.identity.id, "store-101");
        assert!(ctx.capabilities.has(Capability::Heartbeat));
        assert!(!ctx.capabilities.has(Capability::ManageTenantSessions));

        let event = rx.recv().await.expect("presence event");
        assert_eq!(event.payload["identity_id"], "store-101");
        assert_eq!(event.payload["online"], true);
        assert_eq!(event.payload["extra"]["session_code"], ctx.session.session_code.as_str());
    }

    #[tokio::test]
    async fn test_login_wrong_pin_is_unauthenticated() {
        let fx = fixture().await;
        let err = fx.auth.login(login_input("store-101", "0000")).await.unwrap_err();
        assert!(matches!(err, SessionServiceError::Unauthenticated));

        let err = fx.auth.login(login_input("nobody", "1234")).await.unwrap_err();
        assert!(matches!(err, SessionServiceError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_login_rate_limited_after_five_failures() {
        let fx = fixture().await;
        for _ in 0..5 {
            let err = fx.auth.login(login_input("store-101", "0000")).await.unwrap_err();
            assert!(matches!(err, SessionServiceError::Unauthenticated));
        }

        // Even the correct PIN is refused while locked out
        let err = fx.auth.login(login_input("store-101", "1234")).await.unwrap_err();
        match err {
            SessionServiceError::RateLimited { retry_after_ms } => {
                assert!(retry_after_ms > 290_000 && retry_after_ms <= 300_000)
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }

        // Another client can still sign in to another account
        let mut other_client = login_input("store-102", "1234");
        other_client.client_key = "10.0.0.2".to_string();
        assert!(fx.auth.login(other_client).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_throttles_account_across_clients() {
        let fx = fixture().await;
        let mut limited = 0;
        for i in 0..20 {
            let mut input = login_input("store-101", "0000");
            input.client_key = format!("10.9.0.{}", i);
            if let Err(SessionServiceError::RateLimited { .. }) = fx.auth.login(input).await {
                limited += 1;
            }
        }
        assert_eq!(limited, 15);

        // The account stays locked even from a fresh client with the right PIN
        let mut fresh = login_input("store-101", "1234");
        fresh.client_key = "10.9.1.1".to_string();
        assert!(matches!(
            fx.auth.login(fresh).await.unwrap_err(),
            SessionServiceError::RateLimited { .. }
        ));
    }

    #[tokio::test]
    async fn test_successful_login_resets_attempts() {
        let fx = fixture().await;
        for _ in 0..4 {
            let _ = fx.auth.login(login_input("store-101", "0000")).await;
        }
        fx.auth.login(login_input("store-101", "1234")).await.unwrap();

        for _ in 0..5 {
            let err = fx.auth.login(login_input("store-101", "0000")).await.unwrap_err();
            assert!(matches!(err, SessionServiceError::Unauthenticated));
        }
    }

    #[tokio::test]
    async fn test_login_requires_fields() {
        let fx = fixture().await;
        let err = fx.auth.login(login_input("", "1234")).await.unwrap_err();
        assert!(matches!(err, SessionServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let fx = fixture().await;
        let ctx = fx.auth.login(login_input("arl-7", "1234")).await.unwrap();

        let resolved = fx.auth.authenticate(ctx.token()).await.expect("authenticate");
        assert_eq!(resolved.session.id, ctx.session.id);
        assert!(resolved.capabilities.has(Capability::ManageTenantSessions));

        assert!(matches!(
            fx.auth.authenticate("bogus").await.unwrap_err(),
            SessionServiceError::Unauthenticated
        ));
        assert!(matches!(
            fx.auth.authenticate("").await.unwrap_err(),
            SessionServiceError::Unauthenticated
        ));
    }

    #[tokio::test]
    async fn test_logout_only_touches_own_session() {
        let fx = fixture().await;
        let a = fx.auth.login(login_input("store-101", "1234")).await.unwrap();
        let b = fx.auth.login(login_input("store-101", "1234")).await.unwrap();
        let mut rx = fx.presence.subscribe(TOPIC_PRESENCE);

        fx.auth.logout(a.token()).await.expect("logout");

        assert!(fx.sessions.find_by_token(a.token()).await.unwrap().is_none());
        assert!(fx.sessions.find_by_token(b.token()).await.unwrap().is_some());
        // Sibling still online: no offline event
        assert!(rx.try_recv().is_err());

        fx.auth.logout(b.token()).await.unwrap();
        let event = rx.recv().await.expect("offline event");
        assert_eq!(event.payload["online"], false);

        // Unknown token is a no-op
        fx.auth.logout(b.token()).await.unwrap();
    }

    #[tokio::test]
    async fn test_capabilities_follow_current_identity() {
        let fx = fixture().await;
        let ctx = fx.auth.login(login_input("arl-7", "1234")).await.unwrap();

        // Promote after login; the next request sees the new role
        sqlx::query("UPDATE identities SET role = 'admin' WHERE id = 'arl-7'")
            .execute(fx.pool.sqlite().unwrap())
            .await
            .unwrap();

        let resolved = fx.auth.authenticate(ctx.token()).await.unwrap();
        assert!(resolved.capabilities.has(Capability::CleanupSessions));
        assert!(!ctx.capabilities.has(Capability::CleanupSessions));
    }
}
