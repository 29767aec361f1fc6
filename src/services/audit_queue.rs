//! Durable queue and retry worker.
//!
//! Finalized records are handed to a background worker over an mpsc channel
//! and written to the ledger with bounded retries and exponential backoff.
//! Exhausted deliveries move to the dead-letter store for manual
//! reprocessing. If the channel itself is unavailable the queue falls back
//! to a direct synchronous write, and only when that also fails does it
//! raise an emergency alert.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

use crate::error::{AppError, Result};
use crate::models::audit_record::AuditRecord;
use crate::services::emergency::EmergencyChannel;
use crate::services::metrics_service;
use crate::store::AuditStore;

/// Bounded-retry policy for ledger deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Backoff before the next attempt after `attempt` failures (1-based).
///
/// Doubles per failure: 2s, 4s, 8s with the default base.
pub fn retry_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    policy.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Outcome of a manual dead-letter reprocessing pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReprocessOutcome {
    pub reprocessed: usize,
    pub failed: usize,
}

enum QueueCommand {
    Deliver {
        record: Box<AuditRecord>,
        ack: Option<oneshot::Sender<Result<()>>>,
    },
    DeliverBatch {
        records: Vec<AuditRecord>,
    },
}

/// Handle to the background delivery worker.
#[derive(Clone)]
pub struct AuditQueue {
    tx: mpsc::Sender<QueueCommand>,
    store: Arc<dyn AuditStore>,
    emergency: EmergencyChannel,
}

impl AuditQueue {
    /// Spawn the delivery worker and return its handle.
    pub fn spawn(
        store: Arc<dyn AuditStore>,
        emergency: EmergencyChannel,
        policy: RetryPolicy,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let worker_store = store.clone();
        let worker_emergency = emergency.clone();
        tokio::spawn(async move {
            worker_loop(rx, worker_store, worker_emergency, policy).await;
        });
        Self {
            tx,
            store,
            emergency,
        }
    }

    /// Submit a record for asynchronous delivery.
    ///
    /// A full or closed channel is a submission failure, not a delivery
    /// failure: the record is written directly instead.
    pub async fn enqueue(&self, record: AuditRecord) {
        match self.tx.try_send(QueueCommand::Deliver {
            record: Box::new(record),
            ack: None,
        }) {
            Ok(()) => {}
            Err(err) => {
                let record = match err.into_inner() {
                    QueueCommand::Deliver { record, .. } => *record,
                    QueueCommand::DeliverBatch { .. } => unreachable!(),
                };
                tracing::warn!(
                    record_id = %record.id,
                    "Audit queue unavailable, falling back to direct write"
                );
                self.direct_write(record).await;
            }
        }
    }

    /// Submit a record and wait until it is durably persisted.
    pub async fn enqueue_sync(&self, record: AuditRecord) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        match self.tx.try_send(QueueCommand::Deliver {
            record: Box::new(record),
            ack: Some(ack_tx),
        }) {
            Ok(()) => ack_rx
                .await
                .map_err(|_| AppError::Queue("audit delivery worker stopped".into()))?,
            Err(err) => {
                let record = match err.into_inner() {
                    QueueCommand::Deliver { record, .. } => *record,
                    QueueCommand::DeliverBatch { .. } => unreachable!(),
                };
                self.direct_write_checked(record).await
            }
        }
    }

    /// Submit a batch for asynchronous delivery.
    pub async fn enqueue_batch(&self, records: Vec<AuditRecord>) {
        if records.is_empty() {
            return;
        }
        match self.tx.try_send(QueueCommand::DeliverBatch { records }) {
            Ok(()) => {}
            Err(err) => {
                let records = match err.into_inner() {
                    QueueCommand::DeliverBatch { records } => records,
                    QueueCommand::Deliver { .. } => unreachable!(),
                };
                tracing::warn!(
                    count = records.len(),
                    "Audit queue unavailable, falling back to direct writes"
                );
                for record in records {
                    self.direct_write(record).await;
                }
            }
        }
    }

    /// Re-deliver retained dead letters; each success removes the entry.
    /// Never invoked automatically.
    pub async fn reprocess_dead_letters(&self) -> Result<ReprocessOutcome> {
        let dead = self.store.dead_letters().await?;
        let mut reprocessed = 0;
        let mut failed = 0;
        for letter in dead {
            match self.store.insert(&letter.record).await {
                Ok(_) => {
                    self.store.remove_dead_letter(letter.id).await?;
                    reprocessed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        dead_letter_id = %letter.id,
                        record_id = %letter.record.id,
                        error = %e,
                        "Dead letter reprocessing failed"
                    );
                    failed += 1;
                }
            }
        }
        Ok(ReprocessOutcome {
            reprocessed,
            failed,
        })
    }

    async fn direct_write(&self, record: AuditRecord) {
        if let Err(e) = self.direct_write_checked(record).await {
            tracing::error!(error = %e, "Direct audit write failed after queue fallback");
        }
    }

    async fn direct_write_checked(&self, record: AuditRecord) -> Result<()> {
        match self.store.insert(&record).await {
            Ok(_) => {
                metrics_service::record_persisted("direct");
                Ok(())
            }
            Err(e) => {
                self.emergency.raise("direct-write", &record, &e.to_string());
                Err(AppError::Queue(format!(
                    "queue unavailable and direct write failed: {e}"
                )))
            }
        }
    }
}

async fn worker_loop(
    mut rx: mpsc::Receiver<QueueCommand>,
    store: Arc<dyn AuditStore>,
    emergency: EmergencyChannel,
    policy: RetryPolicy,
) {
    while let Some(command) = rx.recv().await {
        match command {
            QueueCommand::Deliver { record, ack } => {
                let outcome = deliver_with_retry(&*store, &emergency, &policy, &record).await;
                if let Some(ack) = ack {
                    let _ = ack.send(outcome);
                }
            }
            QueueCommand::DeliverBatch { records } => {
                deliver_batch(&*store, &emergency, &policy, records).await;
            }
        }
    }
    tracing::debug!("Audit delivery worker stopped");
}

/// Deliver one record with bounded retries; exhaustion dead-letters it.
async fn deliver_with_retry(
    store: &dyn AuditStore,
    emergency: &EmergencyChannel,
    policy: &RetryPolicy,
    record: &AuditRecord,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        match store.insert(record).await {
            Ok(written) => {
                if !written {
                    tracing::debug!(record_id = %record.id, "Duplicate delivery skipped");
                }
                metrics_service::record_persisted("queued");
                return Ok(());
            }
            Err(e) if attempt < policy.max_attempts => {
                let delay = retry_delay(policy, attempt);
                tracing::warn!(
                    record_id = %record.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Audit delivery failed, retrying"
                );
                metrics_service::record_delivery_retry();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    record_id = %record.id,
                    attempts = policy.max_attempts,
                    error = %e,
                    "Audit delivery exhausted, moving to dead letters"
                );
                metrics_service::record_dead_letter();
                if let Err(dl_err) = store.insert_dead_letter(record, &e.to_string()).await {
                    // Both the ledger and the dead-letter store refused it.
                    emergency.raise("queue", record, &dl_err.to_string());
                }
                return Err(AppError::Queue(format!(
                    "delivery exhausted after {} attempts: {e}",
                    policy.max_attempts
                )));
            }
        }
    }
}

/// Deliver a batch, falling back to per-record delivery when the bulk
/// insert fails. Partial success is expected.
async fn deliver_batch(
    store: &dyn AuditStore,
    emergency: &EmergencyChannel,
    policy: &RetryPolicy,
    records: Vec<AuditRecord>,
) {
    match store.insert_batch(&records).await {
        Ok(written) => {
            metrics_service::record_batch_flush(written as usize);
            tracing::debug!(
                submitted = records.len(),
                written,
                "Audit batch persisted"
            );
        }
        Err(e) => {
            tracing::warn!(
                count = records.len(),
                error = %e,
                "Audit batch delivery failed, retrying records individually"
            );
            for record in &records {
                let _ = deliver_with_retry(store, emergency, policy, record).await;
            }
        }
    }
}
