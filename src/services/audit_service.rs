//! Audit facade.
//!
//! Public ingestion contract used by business-logic collaborators. Resolves
//! the acting identity's durable profile id, computes field-level diffs,
//! assembles the record, and hands off to the router.
//!
//! Logging failures never propagate to the business operation that
//! triggered the audit: they are caught and escalated through the
//! emergency channel instead.

use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::audit_record::{AuditAction, AuditPriority, AuditRecord, SYSTEM_ACTOR};
use crate::services::actor_cache::ActorProfileCache;
use crate::services::audit_router::{AuditRouter, RouteOptions};
use crate::services::emergency::EmergencyChannel;
use crate::store::ActorDirectory;

/// Bookkeeping fields excluded from change diffs.
const BOOKKEEPING_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Who performed the operation and from where.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    /// External actor identity; None records the SYSTEM sentinel.
    pub actor_id: Option<String>,
    /// Durable profile id, when the caller already resolved it.
    pub actor_profile_id: Option<Uuid>,
    /// Logical subsystem name (e.g. "school", "auth").
    pub module: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditContext {
    pub fn system(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            ..Default::default()
        }
    }

    pub fn actor(actor_id: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            module: module.into(),
            ..Default::default()
        }
    }
}

/// What happened to which entity.
#[derive(Debug, Clone)]
pub struct AuditChange {
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_display: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub metadata: Option<Value>,
    pub priority: Option<AuditPriority>,
    pub synchronous: Option<bool>,
}

impl AuditChange {
    pub fn new(
        action: AuditAction,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            entity_display: None,
            old_values: None,
            new_values: None,
            metadata: None,
            priority: None,
            synchronous: None,
        }
    }

    pub fn display(mut self, display: impl Into<String>) -> Self {
        self.entity_display = Some(display.into());
        self
    }

    pub fn old_values(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn priority(mut self, priority: AuditPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = Some(synchronous);
        self
    }
}

/// Merged single-object form of `(context, change)`.
///
/// A convenience for call sites that build one value; normalized into the
/// same pair before anything else happens.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub context: AuditContext,
    pub change: AuditChange,
}

/// Top-level keys whose serialized value differs between the snapshots.
///
/// Diffing only applies when both snapshots are present as JSON objects;
/// a create (no old values) or delete (no new values) yields an empty list.
/// Nested objects compare coarsely: any nested change reports the whole
/// top-level key.
pub fn changed_fields(old: Option<&Value>, new: Option<&Value>) -> Vec<String> {
    let (Some(Value::Object(old)), Some(Value::Object(new))) = (old, new) else {
        return Vec::new();
    };

    let mut fields: Vec<String> = old
        .keys()
        .chain(new.keys())
        .filter(|key| !BOOKKEEPING_FIELDS.contains(&key.as_str()))
        .filter(|key| old.get(*key) != new.get(*key))
        .cloned()
        .collect();
    fields.sort();
    fields.dedup();
    fields
}

/// Audit ingestion facade.
pub struct AuditService {
    router: AuditRouter,
    directory: Arc<dyn ActorDirectory>,
    cache: ActorProfileCache,
    emergency: EmergencyChannel,
}

impl AuditService {
    pub fn new(
        router: AuditRouter,
        directory: Arc<dyn ActorDirectory>,
        emergency: EmergencyChannel,
    ) -> Self {
        Self {
            router,
            directory,
            cache: ActorProfileCache::default(),
            emergency,
        }
    }

    pub fn with_cache(mut self, cache: ActorProfileCache) -> Self {
        self.cache = cache;
        self
    }

    /// Record one audited operation.
    ///
    /// Infallible by contract: a create/update/delete must succeed even if
    /// its audit trail write fails, subject only to the emergency alerting
    /// guarantee.
    pub async fn log(&self, context: AuditContext, change: AuditChange) {
        let record = self.assemble(context, &change).await;
        let options = RouteOptions {
            priority: change.priority,
            synchronous: change.synchronous,
            skip_chain: false,
        };
        if let Err(e) = self.router.route(record.clone(), options).await {
            self.emergency.raise("facade", &record, &e.to_string());
        }
    }

    /// Record one audited operation from the merged single-object form.
    pub async fn log_event(&self, event: AuditEvent) {
        self.log(event.context, event.change).await;
    }

    /// Record a sequence of changes sharing one context.
    pub async fn log_batch(&self, context: AuditContext, changes: Vec<AuditChange>) {
        for change in changes {
            self.log(context.clone(), change).await;
        }
    }

    pub async fn log_create(
        &self,
        context: AuditContext,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        new_values: Value,
    ) {
        self.log(
            context,
            AuditChange::new(AuditAction::Create, entity_type, entity_id).new_values(new_values),
        )
        .await;
    }

    pub async fn log_update(
        &self,
        context: AuditContext,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        old_values: Value,
        new_values: Value,
    ) {
        self.log(
            context,
            AuditChange::new(AuditAction::Update, entity_type, entity_id)
                .old_values(old_values)
                .new_values(new_values),
        )
        .await;
    }

    pub async fn log_delete(
        &self,
        context: AuditContext,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        old_values: Value,
    ) {
        self.log(
            context,
            AuditChange::new(AuditAction::Delete, entity_type, entity_id).old_values(old_values),
        )
        .await;
    }

    pub async fn log_approve(
        &self,
        context: AuditContext,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        metadata: Value,
    ) {
        self.log(
            context,
            AuditChange::new(AuditAction::Approve, entity_type, entity_id).metadata(metadata),
        )
        .await;
    }

    pub async fn log_reject(
        &self,
        context: AuditContext,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        metadata: Value,
    ) {
        self.log(
            context,
            AuditChange::new(AuditAction::Reject, entity_type, entity_id).metadata(metadata),
        )
        .await;
    }

    /// Record a structural move (department/position reassignment).
    pub async fn log_organizational_change(
        &self,
        context: AuditContext,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        old_values: Value,
        new_values: Value,
    ) {
        self.log(
            context,
            AuditChange::new(AuditAction::Assign, entity_type, entity_id)
                .old_values(old_values)
                .new_values(new_values),
        )
        .await;
    }

    async fn assemble(&self, context: AuditContext, change: &AuditChange) -> AuditRecord {
        let actor_id = context
            .actor_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| SYSTEM_ACTOR.to_string());
        let actor_profile_id = match context.actor_profile_id {
            Some(profile) => Some(profile),
            None => self.resolve_profile(&actor_id).await,
        };

        AuditRecord {
            id: Uuid::now_v7(),
            actor_id,
            actor_profile_id,
            entity_type: change.entity_type.clone(),
            entity_id: change.entity_id.clone(),
            entity_display: change.entity_display.clone(),
            action: change.action,
            module: context.module,
            old_values: change.old_values.clone(),
            new_values: change.new_values.clone(),
            changed_fields: changed_fields(change.old_values.as_ref(), change.new_values.as_ref()),
            ip_address: context.ip_address,
            user_agent: context.user_agent,
            metadata: change.metadata.clone(),
            chain: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Resolve the durable profile id for an actor, caching both hits and
    /// "no profile" answers. Lookup failures degrade to logging with the
    /// actor id only.
    async fn resolve_profile(&self, actor_id: &str) -> Option<Uuid> {
        if actor_id == SYSTEM_ACTOR {
            return None;
        }
        if let Some(cached) = self.cache.get(actor_id) {
            return cached;
        }
        match self.directory.resolve(actor_id).await {
            Ok(profile) => {
                self.cache.insert(actor_id, profile);
                profile
            }
            Err(e) => {
                tracing::warn!(actor_id, error = %e, "Actor profile resolution failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::audit_queue::{AuditQueue, RetryPolicy};
    use crate::services::audit_router::RouterConfig;
    use crate::services::integrity_service::IntegrityService;
    use crate::store::memory::{MemoryAuditStore, StaticActorDirectory};
    use crate::store::AuditStore;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::time::Duration;

    fn pipeline(
        profiles: HashMap<String, Uuid>,
    ) -> (Arc<MemoryAuditStore>, AuditService) {
        let store = Arc::new(MemoryAuditStore::new());
        let integrity = Arc::new(IntegrityService::new(
            b"facade-test".to_vec(),
            store.clone(),
        ));
        let emergency = EmergencyChannel::new(16);
        let queue = AuditQueue::spawn(
            store.clone(),
            emergency.clone(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
            },
            64,
        );
        let router = AuditRouter::spawn(
            queue,
            integrity,
            emergency.clone(),
            RouterConfig {
                batch_size: 2,
                quiescence: Duration::from_millis(30),
                ..Default::default()
            },
        );
        let service = AuditService::new(
            router,
            Arc::new(StaticActorDirectory::new(profiles)),
            emergency,
        );
        (store, service)
    }

    async fn wait_for_count(store: &MemoryAuditStore, expected: i64) {
        for _ in 0..200 {
            if store.count().await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "store never reached {expected} records (got {})",
            store.count().await.unwrap()
        );
    }

    #[test]
    fn changed_fields_update_reports_exact_keys() {
        let old = json!({"name": "A", "city": "X"});
        let new = json!({"name": "B", "city": "X"});
        assert_eq!(
            changed_fields(Some(&old), Some(&new)),
            vec!["name".to_string()]
        );
    }

    #[test]
    fn changed_fields_empty_without_old_snapshot() {
        let new = json!({"name": "A"});
        assert!(changed_fields(None, Some(&new)).is_empty());
        assert!(changed_fields(Some(&new), None).is_empty());
        assert!(changed_fields(None, None).is_empty());
    }

    #[test]
    fn changed_fields_includes_added_and_removed_keys() {
        let old = json!({"name": "A", "head": "h1"});
        let new = json!({"name": "A", "budget": 100});
        assert_eq!(
            changed_fields(Some(&old), Some(&new)),
            vec!["budget".to_string(), "head".to_string()]
        );
    }

    #[test]
    fn changed_fields_skips_bookkeeping_keys() {
        let old = json!({"id": 1, "created_at": "x", "updated_at": "y", "name": "A"});
        let new = json!({"id": 2, "created_at": "z", "updated_at": "w", "name": "B"});
        assert_eq!(
            changed_fields(Some(&old), Some(&new)),
            vec!["name".to_string()]
        );
    }

    #[test]
    fn changed_fields_nested_change_reports_top_level_key() {
        let old = json!({"address": {"city": "X", "zip": "1"}});
        let new = json!({"address": {"city": "X", "zip": "2"}});
        assert_eq!(
            changed_fields(Some(&old), Some(&new)),
            vec!["address".to_string()]
        );
    }

    #[test]
    fn changed_fields_non_object_snapshots_yield_empty() {
        let old = json!([1, 2, 3]);
        let new = json!({"name": "A"});
        assert!(changed_fields(Some(&old), Some(&new)).is_empty());
    }

    #[tokio::test]
    async fn create_scenario_has_no_diff_and_chains_to_tail() {
        let (store, service) = pipeline(HashMap::new());
        service
            .log_create(
                AuditContext::actor("u1", "school"),
                "School",
                "s1",
                json!({"name": "A"}),
            )
            .await;
        wait_for_count(&store, 1).await;

        let record = store.latest().await.unwrap().unwrap();
        assert_eq!(record.action, AuditAction::Create);
        assert_eq!(record.actor_id, "u1");
        assert!(record.old_values.is_none());
        assert!(record.changed_fields.is_empty());
        let link = record.chain.expect("chained");
        assert!(link.previous_hash.is_none(), "first record is genesis");
    }

    #[tokio::test]
    async fn update_scenario_reports_changed_name() {
        let (store, service) = pipeline(HashMap::new());
        service
            .log_update(
                AuditContext::actor("u1", "school"),
                "School",
                "s1",
                json!({"name": "A"}),
                json!({"name": "B"}),
            )
            .await;
        wait_for_count(&store, 1).await;

        let record = store.latest().await.unwrap().unwrap();
        assert_eq!(record.action, AuditAction::Update);
        assert_eq!(record.changed_fields, vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn missing_actor_defaults_to_system() {
        let (store, service) = pipeline(HashMap::new());
        service
            .log_create(
                AuditContext::system("school"),
                "School",
                "s1",
                json!({"name": "A"}),
            )
            .await;
        wait_for_count(&store, 1).await;
        assert_eq!(store.latest().await.unwrap().unwrap().actor_id, SYSTEM_ACTOR);
    }

    #[tokio::test]
    async fn actor_profile_is_resolved_and_recorded() {
        let profile = Uuid::new_v4();
        let mut profiles = HashMap::new();
        profiles.insert("u1".to_string(), profile);
        let (store, service) = pipeline(profiles);

        service
            .log_create(
                AuditContext::actor("u1", "school"),
                "School",
                "s1",
                json!({"name": "A"}),
            )
            .await;
        wait_for_count(&store, 1).await;
        assert_eq!(
            store.latest().await.unwrap().unwrap().actor_profile_id,
            Some(profile)
        );
    }

    #[tokio::test]
    async fn unknown_actor_logs_without_profile() {
        let (store, service) = pipeline(HashMap::new());
        service
            .log_create(
                AuditContext::actor("stranger", "school"),
                "School",
                "s1",
                json!({"name": "A"}),
            )
            .await;
        wait_for_count(&store, 1).await;
        let record = store.latest().await.unwrap().unwrap();
        assert_eq!(record.actor_id, "stranger");
        assert!(record.actor_profile_id.is_none());
    }

    #[tokio::test]
    async fn delete_is_forced_synchronous() {
        let (store, service) = pipeline(HashMap::new());
        service
            .log_delete(
                AuditContext::actor("u1", "school"),
                "School",
                "s1",
                json!({"name": "A"}),
            )
            .await;
        // No waiting: critical-path deletes persist before log returns.
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn log_event_merged_form_matches_pair_form() {
        let (store, service) = pipeline(HashMap::new());
        service
            .log_event(AuditEvent {
                context: AuditContext::actor("u1", "school"),
                change: AuditChange::new(AuditAction::Update, "School", "s1")
                    .old_values(json!({"name": "A"}))
                    .new_values(json!({"name": "B"})),
            })
            .await;
        wait_for_count(&store, 1).await;
        let record = store.latest().await.unwrap().unwrap();
        assert_eq!(record.changed_fields, vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn log_batch_routes_every_change() {
        let (store, service) = pipeline(HashMap::new());
        let changes = (0..4)
            .map(|i| {
                AuditChange::new(AuditAction::Update, "School", format!("s{i}"))
                    .old_values(json!({"n": 0}))
                    .new_values(json!({"n": i}))
            })
            .collect();
        service
            .log_batch(AuditContext::actor("u1", "school"), changes)
            .await;
        wait_for_count(&store, 4).await;
    }
}
