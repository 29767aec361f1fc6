//! Emergency alert channel.
//!
//! Last line of defense: when both the queue and the direct write path fail,
//! the full record and error context are broadcast here for out-of-band
//! alerting. An audit record must never be silently dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::audit_record::AuditRecord;
use crate::services::metrics_service;

/// An unrecoverable audit pipeline failure, carrying the full record.
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyAlert {
    /// Pipeline stage that raised the alert ("router", "queue", "facade", ...)
    pub stage: String,
    pub record: AuditRecord,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast-based emergency channel.
///
/// Every alert is also logged at error severity, so the log line is the
/// guarantee even when no subscriber is attached.
#[derive(Clone)]
pub struct EmergencyChannel {
    tx: broadcast::Sender<EmergencyAlert>,
}

impl EmergencyChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Raise an emergency alert.
    pub fn raise(&self, stage: &str, record: &AuditRecord, error: &str) {
        tracing::error!(
            stage,
            record_id = %record.id,
            entity = %format!("{}:{}", record.entity_type, record.entity_id),
            error,
            "AUDIT EMERGENCY: record could not be persisted"
        );
        metrics_service::record_emergency(stage);
        let _ = self.tx.send(EmergencyAlert {
            stage: stage.to_string(),
            record: record.clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Subscribe to emergency alerts.
    pub fn subscribe(&self) -> broadcast::Receiver<EmergencyAlert> {
        self.tx.subscribe()
    }
}
