//! In-memory ledger store.
//!
//! Backs tests and ephemeral development mode. A single async mutex guards
//! the whole ledger, which keeps insert-then-read sequences atomic the same
//! way a transaction does in the Postgres implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ActorDirectory, AuditQuery, AuditStore, DeadLetter};
use crate::error::Result;
use crate::models::audit_record::{AuditRecord, ChainLink};

#[derive(Default)]
struct MemoryInner {
    records: Vec<AuditRecord>,
    dead: Vec<DeadLetter>,
}

impl MemoryInner {
    fn sorted_asc(&self) -> Vec<AuditRecord> {
        let mut out = self.records.clone();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        out
    }
}

/// Ledger store holding everything in process memory.
#[derive(Default)]
pub struct MemoryAuditStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert(&self, record: &AuditRecord) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.records.iter().any(|r| r.id == record.id) {
            return Ok(false);
        }
        inner.records.push(record.clone());
        Ok(true)
    }

    async fn insert_batch(&self, records: &[AuditRecord]) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut written = 0;
        for record in records {
            if inner.records.iter().any(|r| r.id == record.id) {
                continue;
            }
            inner.records.push(record.clone());
            written += 1;
        }
        Ok(written)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.iter().find(|r| r.id == id).cloned())
    }

    async fn range_asc(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sorted_asc()
            .into_iter()
            .filter(|r| from.is_none_or(|f| r.created_at >= f))
            .filter(|r| to.is_none_or(|t| r.created_at <= t))
            .collect())
    }

    async fn query(&self, filter: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let inner = self.inner.lock().await;
        let mut matched: Vec<AuditRecord> = inner
            .sorted_asc()
            .into_iter()
            .filter(|r| filter.actor_id.as_deref().is_none_or(|a| r.actor_id == a))
            .filter(|r| {
                filter
                    .entity_type
                    .as_deref()
                    .is_none_or(|t| r.entity_type == t)
            })
            .filter(|r| filter.entity_id.as_deref().is_none_or(|e| r.entity_id == e))
            .filter(|r| {
                filter
                    .action
                    .as_deref()
                    .is_none_or(|a| r.action.as_str() == a)
            })
            .filter(|r| filter.module.as_deref().is_none_or(|m| r.module == m))
            .filter(|r| filter.from.is_none_or(|f| r.created_at >= f))
            .filter(|r| filter.to.is_none_or(|t| r.created_at <= t))
            .collect();
        matched.reverse(); // newest first
        Ok(matched
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn count(&self) -> Result<i64> {
        let inner = self.inner.lock().await;
        Ok(inner.records.len() as i64)
    }

    async fn latest(&self) -> Result<Option<AuditRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.sorted_asc().into_iter().next_back())
    }

    async fn latest_before(&self, cutoff: DateTime<Utc>) -> Result<Option<AuditRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sorted_asc()
            .into_iter()
            .filter(|r| r.created_at < cutoff)
            .next_back())
    }

    async fn update_chain_link(&self, id: Uuid, link: &ChainLink) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.chain = Some(link.clone());
                Ok(())
            }
            None => Err(crate::error::AppError::NotFound(format!(
                "audit record {id}"
            ))),
        }
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.records.len();
        inner.records.retain(|r| r.created_at >= cutoff);
        Ok((before - inner.records.len()) as u64)
    }

    async fn insert_dead_letter(&self, record: &AuditRecord, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.dead.push(DeadLetter {
            id: Uuid::new_v4(),
            record: record.clone(),
            error: error.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let inner = self.inner.lock().await;
        Ok(inner.dead.clone())
    }

    async fn remove_dead_letter(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.dead.retain(|d| d.id != id);
        Ok(())
    }
}

/// Fixed-map directory for tests and ephemeral mode.
#[derive(Default)]
pub struct StaticActorDirectory {
    profiles: HashMap<String, Uuid>,
}

impl StaticActorDirectory {
    pub fn new(profiles: HashMap<String, Uuid>) -> Self {
        Self { profiles }
    }
}

#[async_trait]
impl ActorDirectory for StaticActorDirectory {
    async fn resolve(&self, actor_id: &str) -> Result<Option<Uuid>> {
        Ok(self.profiles.get(actor_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audit_record::{AuditAction, SYSTEM_ACTOR};

    fn record(entity_id: &str) -> AuditRecord {
        AuditRecord {
            id: Uuid::now_v7(),
            actor_id: SYSTEM_ACTOR.into(),
            actor_profile_id: None,
            entity_type: "School".into(),
            entity_id: entity_id.into(),
            entity_display: None,
            action: AuditAction::Create,
            module: "school".into(),
            old_values: None,
            new_values: None,
            changed_fields: vec![],
            ip_address: None,
            user_agent: None,
            metadata: None,
            chain: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_id() {
        let store = MemoryAuditStore::new();
        let r = record("s1");
        assert!(store.insert(&r).await.unwrap());
        assert!(!store.insert(&r).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn batch_insert_skips_duplicates() {
        let store = MemoryAuditStore::new();
        let a = record("s1");
        let b = record("s2");
        store.insert(&a).await.unwrap();
        let written = store.insert_batch(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn latest_orders_by_creation() {
        let store = MemoryAuditStore::new();
        let mut a = record("s1");
        a.created_at = Utc::now() - chrono::Duration::seconds(10);
        let b = record("s2");
        store.insert(&b).await.unwrap();
        store.insert(&a).await.unwrap();
        assert_eq!(store.latest().await.unwrap().unwrap().id, b.id);
        assert_eq!(
            store
                .latest_before(b.created_at)
                .await
                .unwrap()
                .unwrap()
                .id,
            a.id
        );
    }

    #[tokio::test]
    async fn purge_removes_only_older() {
        let store = MemoryAuditStore::new();
        let mut old = record("s1");
        old.created_at = Utc::now() - chrono::Duration::days(400);
        let fresh = record("s2");
        store.insert(&old).await.unwrap();
        store.insert(&fresh).await.unwrap();
        let purged = store
            .purge_older_than(Utc::now() - chrono::Duration::days(365))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get(fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dead_letters_round_trip() {
        let store = MemoryAuditStore::new();
        let r = record("s1");
        store.insert_dead_letter(&r, "boom").await.unwrap();
        let dead = store.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].record.id, r.id);
        store.remove_dead_letter(dead[0].id).await.unwrap();
        assert!(store.dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_filters_and_pages() {
        let store = MemoryAuditStore::new();
        for i in 0..5 {
            let mut r = record(&format!("s{i}"));
            r.module = if i % 2 == 0 { "school" } else { "auth" }.into();
            store.insert(&r).await.unwrap();
        }
        let filter = AuditQuery {
            module: Some("school".into()),
            limit: 10,
            ..Default::default()
        };
        let rows = store.query(&filter).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.module == "school"));
    }
}
