//! Ledger persistence traits.
//!
//! The relational store is an external collaborator; the pipeline only
//! depends on these seams. `postgres` is the production implementation,
//! `memory` backs tests and ephemeral development mode.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::audit_record::{AuditRecord, ChainLink};

/// A delivery-exhausted record retained for manual inspection.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub record: AuditRecord,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Filters for the read-side ledger query.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub actor_id: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub module: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: i64,
    pub limit: i64,
}

/// Append-mostly ledger store keyed by record id.
///
/// Inserts must be idempotent on id: a duplicate single insert is a no-op
/// reported as `false`, and duplicates inside a bulk insert are skipped
/// rather than failing the batch.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert one record. Returns false when the id already existed.
    async fn insert(&self, record: &AuditRecord) -> Result<bool>;

    /// Insert a batch, skipping duplicate ids. Returns rows actually written.
    async fn insert_batch(&self, records: &[AuditRecord]) -> Result<u64>;

    /// Point lookup by id.
    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>>;

    /// Ordered scan by creation time (then id) over an optional window.
    async fn range_asc(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditRecord>>;

    /// Filtered, paged read-side query, newest first.
    async fn query(&self, filter: &AuditQuery) -> Result<Vec<AuditRecord>>;

    /// Total record count.
    async fn count(&self) -> Result<i64>;

    /// The most recently created record, or None for an empty ledger.
    async fn latest(&self) -> Result<Option<AuditRecord>>;

    /// The most recently created record strictly before `cutoff`.
    async fn latest_before(&self, cutoff: DateTime<Utc>) -> Result<Option<AuditRecord>>;

    /// Overwrite only the integrity envelope of an existing record.
    async fn update_chain_link(&self, id: Uuid, link: &ChainLink) -> Result<()>;

    /// Bulk age-based delete. Breaks the chain across the purge boundary.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Retain a delivery-exhausted record for manual inspection.
    async fn insert_dead_letter(&self, record: &AuditRecord, error: &str) -> Result<()>;

    /// All retained dead letters, oldest first.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;

    /// Remove a dead letter after successful reprocessing.
    async fn remove_dead_letter(&self, id: Uuid) -> Result<()>;
}

/// Resolves an external actor identity to a durable profile id.
///
/// "Not found" is a valid answer, not an error: the record is then logged
/// with the actor id only.
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn resolve(&self, actor_id: &str) -> Result<Option<Uuid>>;
}
