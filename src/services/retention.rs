//! Retention cleanup scheduler.
//!
//! Purges ledger entries older than the configured window on a daily tick.
//! An age-based purge removes chain predecessors, so verification over a
//! window spanning the purge boundary will report a broken chain; that is
//! expected and logged here.

use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::services::metrics_service;
use crate::store::AuditStore;

/// Spawn the background retention task.
pub fn spawn_retention(store: Arc<dyn AuditStore>, retention_days: u32) {
    tokio::spawn(async move {
        // Startup delay so the server finishes initializing first.
        tokio::time::sleep(Duration::from_secs(60)).await;
        let mut tick = interval(Duration::from_secs(24 * 3600));

        loop {
            tick.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
            match store.purge_older_than(cutoff).await {
                Ok(0) => {}
                Ok(purged) => {
                    metrics_service::record_retention_purge(purged);
                    tracing::warn!(
                        purged,
                        retention_days,
                        "Retention cleanup removed ledger entries; the hash chain \
                         is broken across the purge boundary"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Retention cleanup failed");
                }
            }
        }
    });
}
