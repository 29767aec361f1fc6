//! Audit pipeline services.

pub mod actor_cache;
pub mod audit_queue;
pub mod audit_router;
pub mod audit_service;
pub mod emergency;
pub mod integrity_service;
pub mod metrics_service;
pub mod retention;
