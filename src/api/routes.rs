//! Route definitions for the API.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use super::SharedState;

/// Create the main API router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        // Health endpoints (no auth required)
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics))
        // Read-side ledger queries
        .route("/api/v1/audit", get(handlers::audit::list))
        .route("/api/v1/audit/export", get(handlers::audit::export))
        // Integrity verification and repair
        .route(
            "/api/v1/audit/{id}/integrity",
            get(handlers::integrity::verify_record),
        )
        .route(
            "/api/v1/audit/integrity/chain",
            get(handlers::integrity::verify_chain),
        )
        .route(
            "/api/v1/audit/integrity/repair",
            post(handlers::integrity::repair_chain),
        )
        .route(
            "/api/v1/audit/integrity/report",
            get(handlers::integrity::report),
        )
        // Dead-letter inspection and manual reprocessing
        .route(
            "/api/v1/audit/dead-letters",
            get(handlers::dead_letters::list),
        )
        .route(
            "/api/v1/audit/dead-letters/reprocess",
            post(handlers::dead_letters::reprocess),
        )
        .with_state(state)
}
