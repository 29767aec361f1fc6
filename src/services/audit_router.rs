//! Event router and batching scheduler.
//!
//! All chain-link generation is serialized through one background task that
//! owns the last-chain-hash accumulator and the pending batch. Concurrent
//! `log` calls therefore cannot compute links against the same stale hash
//! and fork the chain.
//!
//! Dispatch rules: critical and high priority entries go straight to the
//! delivery queue (critical ones synchronously); normal and low priority
//! entries accumulate into a batch that flushes on a size threshold or a
//! quiescence timer, whichever fires first.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::audit_record::{AuditAction, AuditPriority, AuditRecord};
use crate::services::audit_queue::AuditQueue;
use crate::services::emergency::EmergencyChannel;
use crate::services::integrity_service::IntegrityService;

/// Router tuning knobs, sourced from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Pending-batch size that forces a flush.
    pub batch_size: usize,
    /// Maximum time a non-empty batch may sit unflushed.
    pub quiescence: Duration,
    /// Modules whose entries are always critical and synchronous (lowercase).
    pub critical_modules: Vec<String>,
    /// When false every entry is routed synchronously.
    pub async_enabled: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            quiescence: Duration::from_secs(5),
            critical_modules: vec![
                "auth".into(),
                "user".into(),
                "permission".into(),
                "approval".into(),
            ],
            async_enabled: true,
        }
    }
}

/// Caller preferences for one routed entry.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub priority: Option<AuditPriority>,
    pub synchronous: Option<bool>,
    /// Skip chain-link generation (the entry already carries one).
    pub skip_chain: bool,
}

/// Decide the effective priority and synchronicity of an entry.
///
/// Entries from a critical module, DELETE actions, and permission/role
/// subjects are forced to critical + synchronous regardless of caller
/// preference; everything else defaults to asynchronous normal priority.
pub fn classify(
    record: &AuditRecord,
    options: &RouteOptions,
    critical_modules: &[String],
) -> (AuditPriority, bool) {
    let module = record.module.to_ascii_lowercase();
    let forced = critical_modules.iter().any(|m| *m == module)
        || record.action == AuditAction::Delete
        || matches!(record.entity_type.as_str(), "Permission" | "Role");
    if forced {
        (AuditPriority::Critical, true)
    } else {
        (
            options.priority.unwrap_or(AuditPriority::Normal),
            options.synchronous.unwrap_or(false),
        )
    }
}

enum RouterCommand {
    Route {
        record: Box<AuditRecord>,
        priority: AuditPriority,
        synchronous: bool,
        skip_chain: bool,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
}

/// Handle to the routing task.
#[derive(Clone)]
pub struct AuditRouter {
    tx: mpsc::Sender<RouterCommand>,
    critical_modules: Arc<Vec<String>>,
    async_enabled: bool,
}

impl AuditRouter {
    /// Spawn the routing task and return its handle.
    pub fn spawn(
        queue: AuditQueue,
        integrity: Arc<IntegrityService>,
        emergency: EmergencyChannel,
        config: RouterConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let critical_modules = Arc::new(config.critical_modules.clone());
        let async_enabled = config.async_enabled;
        let mut actor = RouterActor {
            rx,
            queue,
            integrity,
            emergency,
            batch_size: config.batch_size.max(1),
            quiescence: config.quiescence,
            pending: Vec::new(),
            deadline: None,
            last_hash: None,
        };
        tokio::spawn(async move {
            actor.run().await;
        });
        Self {
            tx,
            critical_modules,
            async_enabled,
        }
    }

    /// Route one entry. Synchronous entries (forced or requested) block
    /// until durably enqueued and propagate delivery errors; asynchronous
    /// entries return once handed to the routing task.
    pub async fn route(&self, record: AuditRecord, options: RouteOptions) -> Result<()> {
        let (priority, synchronous) = classify(&record, &options, &self.critical_modules);
        let synchronous = synchronous || !self.async_enabled;

        if synchronous {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.tx
                .send(RouterCommand::Route {
                    record: Box::new(record),
                    priority,
                    synchronous: true,
                    skip_chain: options.skip_chain,
                    reply: Some(reply_tx),
                })
                .await
                .map_err(|_| AppError::Queue("audit router stopped".into()))?;
            reply_rx
                .await
                .map_err(|_| AppError::Queue("audit router dropped the reply".into()))?
        } else {
            self.tx
                .send(RouterCommand::Route {
                    record: Box::new(record),
                    priority,
                    synchronous: false,
                    skip_chain: options.skip_chain,
                    reply: None,
                })
                .await
                .map_err(|_| AppError::Queue("audit router stopped".into()))
        }
    }
}

struct RouterActor {
    rx: mpsc::Receiver<RouterCommand>,
    queue: AuditQueue,
    integrity: Arc<IntegrityService>,
    emergency: EmergencyChannel,
    batch_size: usize,
    quiescence: Duration,
    pending: Vec<AuditRecord>,
    deadline: Option<Instant>,
    /// Outer None = not yet loaded from the store; inner None = empty ledger.
    last_hash: Option<Option<String>>,
}

impl RouterActor {
    async fn run(&mut self) {
        loop {
            match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        command = self.rx.recv() => match command {
                            Some(command) => self.handle(command).await,
                            None => break,
                        },
                        _ = tokio::time::sleep_until(deadline) => {
                            self.flush().await;
                        }
                    }
                }
                None => match self.rx.recv().await {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        // Drain whatever is still pending on shutdown.
        self.flush().await;
        tracing::debug!("Audit router stopped");
    }

    async fn handle(&mut self, command: RouterCommand) {
        let RouterCommand::Route {
            mut record,
            priority,
            synchronous,
            skip_chain,
            reply,
        } = command;

        if !skip_chain {
            if let Err(e) = self.attach_chain(&mut record).await {
                self.emergency.raise("router", &record, &e.to_string());
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        }
        attach_correlation(&mut record);

        if synchronous {
            let outcome = self.queue.enqueue_sync(*record).await;
            if let Some(reply) = reply {
                let _ = reply.send(outcome);
            }
        } else if priority.is_direct() {
            self.queue.enqueue(*record).await;
            if let Some(reply) = reply {
                let _ = reply.send(Ok(()));
            }
        } else {
            self.pending.push(*record);
            if self.pending.len() >= self.batch_size {
                self.flush().await;
            } else if self.pending.len() == 1 {
                // First item into an empty batch starts the quiescence timer.
                self.deadline = Some(Instant::now() + self.quiescence);
            }
            if let Some(reply) = reply {
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Generate and attach this entry's chain link, advancing the
    /// accumulator so the next entry chains to this one even before either
    /// reaches durable storage.
    async fn attach_chain(&mut self, record: &mut AuditRecord) -> Result<()> {
        if self.last_hash.is_none() {
            self.last_hash = Some(self.integrity.last_chain_hash().await?);
        }
        let previous = self
            .last_hash
            .as_ref()
            .and_then(|hash| hash.as_deref().map(str::to_owned));
        let link = self.integrity.generate_link(record, previous.as_deref());
        self.last_hash = Some(Some(link.hash.clone()));
        record.chain = Some(link);
        Ok(())
    }

    async fn flush(&mut self) {
        self.deadline = None;
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        tracing::debug!(count = batch.len(), "Flushing audit batch");
        self.queue.enqueue_batch(batch).await;
    }
}

/// Stamp a correlation id into the entry's metadata for tracing.
fn attach_correlation(record: &mut AuditRecord) {
    let correlation = serde_json::Value::String(Uuid::new_v4().to_string());
    match record.metadata.as_mut() {
        Some(serde_json::Value::Object(map)) => {
            map.entry("correlation_id").or_insert(correlation);
        }
        _ => {
            record.metadata = Some(serde_json::json!({ "correlation_id": correlation }));
        }
    }
}
