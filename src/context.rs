/// Application context and dependency injection
use crate::{
    admission::AdmissionService,
    audit::AuditRecorder,
    config::ServerConfig,
    db,
    error::AdmissionResult,
    geo::GeolocationClient,
    identity::IdentityResolver,
    invitation::InvitationStore,
    rate_limit::RateLimiter,
    token::TokenService,
    waiting_room::WaitingRoomEngine,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub admission: Arc<AdmissionService>,
    pub invitations: Arc<InvitationStore>,
    pub waiting_room: Arc<WaitingRoomEngine>,
    pub identity: Arc<IdentityResolver>,
    pub audit: Arc<AuditRecorder>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> AdmissionResult<Self> {
        config.validate()?;

        // Initialize the admission database
        let pool = db::create_pool(&config.storage.admission_db, db::DatabaseOptions::default())
            .await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        let tokens = TokenService::new(
            &config.authentication.token_secret,
            &config.authentication.issuer,
        );
        let invitations = InvitationStore::new(pool.clone());
        let waiting_room = WaitingRoomEngine::new(
            pool.clone(),
            invitations.clone(),
            tokens.clone(),
            config.authentication.admitted_join_ttl_secs,
        );
        let identity = IdentityResolver::new(pool.clone());
        let audit = AuditRecorder::new(pool.clone());
        let geo = GeolocationClient::new(config.geolocation.clone())?;
        let rate_limiter = RateLimiter::new(pool.clone(), config.rate_limit.clone());

        let admission = AdmissionService::new(
            invitations.clone(),
            waiting_room.clone(),
            identity.clone(),
            tokens,
            audit.clone(),
            geo,
            config.authentication.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            db: pool,
            admission: Arc::new(admission),
            invitations: Arc::new(invitations),
            waiting_room: Arc::new(waiting_room),
            identity: Arc::new(identity),
            audit: Arc::new(audit),
            rate_limiter: Arc::new(rate_limiter),
        })
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
