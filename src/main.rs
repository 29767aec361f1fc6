//! OrgTrail - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use orgtrail_backend::{
    api,
    config::Config,
    db,
    error::Result,
    services::{
        audit_queue::{AuditQueue, RetryPolicy},
        audit_router::{AuditRouter, RouterConfig},
        audit_service::AuditService,
        emergency::EmergencyChannel,
        integrity_service::IntegrityService,
        metrics_service, retention,
    },
    store::{
        postgres::{PgActorDirectory, PgAuditStore},
        ActorDirectory, AuditStore,
    },
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (guard must outlive the server to flush spans)
    let _otel_guard = telemetry::init_tracing(config.otel_endpoint.as_deref(), "orgtrail-backend");
    tracing::info!(environment = %config.environment, "Starting OrgTrail backend");

    // Connect to database
    let db_pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;
    tracing::info!("Database migrations complete");

    // Persistence and identity-resolution collaborators
    let store: Arc<dyn AuditStore> = Arc::new(PgAuditStore::new(db_pool.clone()));
    let directory: Arc<dyn ActorDirectory> = Arc::new(PgActorDirectory::new(db_pool.clone()));

    // Integrity engine (fatal in production without a configured secret)
    let secret = IntegrityService::secret_from_config(&config)?;
    let integrity = Arc::new(IntegrityService::new(secret, store.clone()));

    // Audit pipeline: emergency channel -> delivery queue -> router -> facade
    let emergency = EmergencyChannel::new(64);
    let queue = AuditQueue::spawn(
        store.clone(),
        emergency.clone(),
        RetryPolicy::default(),
        config.audit_queue_capacity,
    );
    let audit_router = AuditRouter::spawn(
        queue.clone(),
        integrity.clone(),
        emergency.clone(),
        RouterConfig {
            batch_size: config.audit_batch_size,
            quiescence: Duration::from_secs(config.audit_batch_quiescence_secs),
            critical_modules: config.audit_critical_modules.clone(),
            async_enabled: config.audit_async_enabled,
        },
    );
    let audit = Arc::new(AuditService::new(audit_router, directory, emergency));
    tracing::info!(
        batch_size = config.audit_batch_size,
        async_enabled = config.audit_async_enabled,
        "Audit pipeline started"
    );

    // Background retention cleanup
    retention::spawn_retention(store.clone(), config.audit_retention_days);

    // Initialize Prometheus metrics recorder
    let metrics_handle = metrics_service::init_metrics();
    tracing::info!("Prometheus metrics recorder initialized");

    // Create application state
    let state = Arc::new(api::AppState {
        config: config.clone(),
        db: Some(db_pool),
        store,
        integrity,
        audit,
        queue,
        metrics_handle: Some(Arc::new(metrics_handle)),
    });

    // Build router
    let app: Router = api::routes::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
