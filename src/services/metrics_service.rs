//! Prometheus metrics for the audit pipeline.
//!
//! Counters here observe delivery outcomes at the queue worker, as the
//! single place every record flows through on its way to the ledger.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder and return the handle for rendering.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a successfully persisted audit record.
pub fn record_persisted(priority: &str) {
    counter!("ot_audit_records_persisted_total", "priority" => priority.to_string()).increment(1);
}

/// Record a delivery attempt that failed and will be retried.
pub fn record_delivery_retry() {
    counter!("ot_audit_delivery_retries_total").increment(1);
}

/// Record a delivery that exhausted its attempts and was dead-lettered.
pub fn record_dead_letter() {
    counter!("ot_audit_dead_letters_total").increment(1);
}

/// Record an emergency alert raised by the pipeline.
pub fn record_emergency(stage: &str) {
    counter!("ot_audit_emergency_alerts_total", "stage" => stage.to_string()).increment(1);
}

/// Record a batch flush with its size.
pub fn record_batch_flush(size: usize) {
    counter!("ot_audit_batch_flushes_total").increment(1);
    counter!("ot_audit_batched_records_total").increment(size as u64);
}

/// Record entries purged by retention cleanup.
pub fn record_retention_purge(purged: u64) {
    counter!("ot_audit_retention_purged_total").increment(purged);
}
