//! Dead-letter inspection and manual reprocessing.
//!
//! Dead letters are never retried automatically; the reprocess endpoint is
//! the explicit administrative pass.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::api::SharedState;
use crate::error::Result;
use crate::services::audit_queue::ReprocessOutcome;
use crate::store::{AuditStore, DeadLetter};

#[derive(Serialize)]
pub struct DeadLetterListResponse {
    pub entries: Vec<DeadLetter>,
    pub count: usize,
}

/// List retained dead letters, oldest first.
pub async fn list(State(state): State<SharedState>) -> Result<Json<DeadLetterListResponse>> {
    let entries = state.store.dead_letters().await?;
    let count = entries.len();
    Ok(Json(DeadLetterListResponse { entries, count }))
}

/// Re-deliver every retained dead letter; successes are removed.
pub async fn reprocess(State(state): State<SharedState>) -> Result<Json<ReprocessOutcome>> {
    let outcome = state.queue.reprocess_dead_letters().await?;
    tracing::info!(
        reprocessed = outcome.reprocessed,
        failed = outcome.failed,
        "Manual dead-letter reprocessing finished"
    );
    Ok(Json(outcome))
}
