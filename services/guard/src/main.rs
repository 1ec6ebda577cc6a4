use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::cache::{RedisConfig, RedisPool};
use common::database::{DatabaseConfig, init_pool};
use guard::{
    config::GuardSettings,
    geo::{GeoLocator, GeoTracker},
    jwt::{JwtConfig, JwtVerifier},
    repositories::Stores,
    routes,
    schema,
    service::SecurityService,
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting session guard service");

    let settings = GuardSettings::from_env()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    // Check database connectivity
    if common::database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    schema::ensure_schema(&pool).await?;

    let jwt_verifier = JwtVerifier::new(&JwtConfig::from_env()?)?;

    let mut builder = SecurityService::builder(Stores::postgres(pool.clone()))
        .policy(settings.lockout_policy())
        .retention_days(settings.retention_days);

    if settings.geo_enabled {
        let locator = GeoLocator::new(settings.geo_config())?;
        builder = builder.geo(GeoTracker::new(locator, settings.geo_tracking_interval()));
    }

    if settings.advisory_lock_enabled {
        let redis = RedisPool::new(&RedisConfig::from_env()?).await?;
        match redis.health_check().await {
            Ok(true) => info!("Redis connection successful"),
            _ => warn!("Redis not reachable yet; enforcing without the advisory lock until it is"),
        }
        builder = builder.advisory_lock(Arc::new(redis), settings.advisory_lock_ttl());
    }

    let service = builder.build();

    // Kept alive for the lifetime of the server
    let _scheduler = service
        .retention()
        .start_schedule(&settings.purge_schedule)
        .await?;

    if settings.internal_api_key.is_none() {
        warn!("GUARD_INTERNAL_API_KEY is not set; /internal routes will refuse every call");
    }

    let app_state = AppState {
        db_pool: pool,
        service,
        jwt_verifier,
        internal_api_key: settings.internal_api_key.as_deref().map(Arc::from),
    };

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_address).await?;
    info!("Session guard listening on {}", settings.bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
