//! API module - HTTP handlers for the read-side and admin surface.

pub mod handlers;
pub mod routes;

use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::services::audit_queue::AuditQueue;
use crate::services::audit_service::AuditService;
use crate::services::integrity_service::IntegrityService;
use crate::store::AuditStore;

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    /// Present when running against PostgreSQL; None in ephemeral mode.
    pub db: Option<PgPool>,
    pub store: Arc<dyn AuditStore>,
    pub integrity: Arc<IntegrityService>,
    pub audit: Arc<AuditService>,
    pub queue: AuditQueue,
    pub metrics_handle: Option<Arc<PrometheusHandle>>,
}

pub type SharedState = Arc<AppState>;
