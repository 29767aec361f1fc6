//! Integrity chain engine.
//!
//! Every persisted record carries a [`ChainLink`]: a SHA-256 hash chained to
//! the previous record's hash and an HMAC-SHA256 signature over that hash.
//! Recomputing the hash from stored fields detects semantic tampering;
//! the signature detects tampering by anyone without the secret key, even
//! one able to recompute hashes.

use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::audit_record::{AuditRecord, ChainLink};
use crate::store::AuditStore;

type HmacSha256 = Hmac<Sha256>;

/// Field separator in the canonical string. Field order is part of the
/// on-disk contract: reordering breaks verification of existing ledgers.
const FIELD_SEPARATOR: char = '|';

/// Verification verdict for a single record.
#[derive(Debug, Clone, Serialize)]
pub struct LinkVerification {
    pub record_id: Uuid,
    pub is_valid: bool,
    pub reason: String,
}

/// A record that failed verification during a chain walk.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidEntry {
    pub record_id: Uuid,
    pub reason: String,
}

/// Outcome of a chain walk over a time window.
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerification {
    pub is_valid: bool,
    pub total_checked: usize,
    pub invalid_entries: Vec<InvalidEntry>,
    pub broken_chain_at: Option<Uuid>,
}

/// Outcome of a repair pass.
#[derive(Debug, Clone, Serialize)]
pub struct ChainRepair {
    pub repaired: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Computes and verifies chain links against the ledger store.
pub struct IntegrityService {
    secret: Vec<u8>,
    store: Arc<dyn AuditStore>,
}

impl IntegrityService {
    pub fn new(secret: Vec<u8>, store: Arc<dyn AuditStore>) -> Self {
        Self { secret, store }
    }

    /// Resolve the signing secret from configuration.
    ///
    /// Missing secret is fatal in production. Elsewhere a random ephemeral
    /// secret is generated: signatures written under it cannot be verified
    /// after a restart.
    pub fn secret_from_config(config: &Config) -> Result<Vec<u8>> {
        match &config.integrity_secret {
            Some(secret) if !secret.is_empty() => Ok(secret.as_bytes().to_vec()),
            _ if config.is_production() => Err(AppError::Config(
                "AUDIT_INTEGRITY_SECRET must be set in production".into(),
            )),
            _ => {
                tracing::warn!(
                    "AUDIT_INTEGRITY_SECRET not set; using an ephemeral secret. \
                     Signatures from previous runs will not verify against this instance."
                );
                let secret: [u8; 32] = rand::random();
                Ok(secret.to_vec())
            }
        }
    }

    /// Canonical string a record's hash commits to.
    ///
    /// JSON snapshots serialize with sorted keys (serde_json without
    /// `preserve_order`), so a value surviving a JSONB round trip re-hashes
    /// identically.
    pub fn canonical_string(record: &AuditRecord) -> String {
        let old = record
            .old_values
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        let new = record
            .new_values
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        [
            record.actor_id.as_str(),
            record.action.as_str(),
            record.module.as_str(),
            record.entity_type.as_str(),
            record.entity_id.as_str(),
            old.as_str(),
            new.as_str(),
            &canonical_timestamp(record.created_at),
        ]
        .join(&FIELD_SEPARATOR.to_string())
    }

    fn chain_hash(&self, record: &AuditRecord, previous_hash: Option<&str>) -> String {
        let canonical = Self::canonical_string(record);
        let mut hasher = Sha256::new();
        if let Some(prev) = previous_hash {
            hasher.update(prev.as_bytes());
            hasher.update(b":");
        }
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn sign(&self, hash: &str) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .expect("HMAC-SHA256 accepts any key length");
        mac.update(hash.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Build the integrity envelope for a record.
    pub fn generate_link(&self, record: &AuditRecord, previous_hash: Option<&str>) -> ChainLink {
        let hash = self.chain_hash(record, previous_hash);
        let signature = self.sign(&hash);
        ChainLink {
            hash,
            previous_hash: previous_hash.map(str::to_owned),
            signature,
            timestamp: Utc::now(),
        }
    }

    /// Verify one record's integrity envelope against its stored fields.
    ///
    /// The signature is checked before the hash is recomputed: a broken
    /// signature is the stronger signal when both fail.
    pub fn verify_link(&self, record: &AuditRecord) -> LinkVerification {
        let Some(link) = &record.chain else {
            return LinkVerification {
                record_id: record.id,
                is_valid: false,
                reason: "No integrity metadata found".into(),
            };
        };

        if self.sign(&link.hash) != link.signature {
            return LinkVerification {
                record_id: record.id,
                is_valid: false,
                reason: "Invalid signature detected: possible tampering".into(),
            };
        }

        let recomputed = self.chain_hash(record, link.previous_hash.as_deref());
        if recomputed != link.hash {
            return LinkVerification {
                record_id: record.id,
                is_valid: false,
                reason: "Hash mismatch detected".into(),
            };
        }

        LinkVerification {
            record_id: record.id,
            is_valid: true,
            reason: "Integrity verified".into(),
        }
    }

    /// Load a record and verify it.
    pub async fn verify_record(&self, id: Uuid) -> Result<LinkVerification> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("audit record {id}")))?;
        Ok(self.verify_link(&record))
    }

    /// Walk the chain over an optional window, checking continuity and each
    /// record's own envelope.
    ///
    /// Findings are data: a broken chain produces a report, not an error.
    pub async fn verify_chain(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ChainVerification> {
        let records = self.store.range_asc(start, end).await?;

        let mut invalid_entries = Vec::new();
        let mut broken_chain_at = None;
        // None until the first linked record seeds the walk. The first
        // record inside a window is taken as the seed: its predecessor lies
        // outside the window and cannot be judged.
        let mut expected_previous: Option<String> = None;
        let mut continuity_intact = true;

        for (index, record) in records.iter().enumerate() {
            let verdict = self.verify_link(record);
            if !verdict.is_valid {
                invalid_entries.push(InvalidEntry {
                    record_id: record.id,
                    reason: verdict.reason,
                });
            }

            if continuity_intact {
                match &record.chain {
                    Some(link) => {
                        if index > 0 && link.previous_hash != expected_previous {
                            broken_chain_at = Some(record.id);
                            continuity_intact = false;
                        } else {
                            expected_previous = Some(link.hash.clone());
                        }
                    }
                    None => {
                        // No envelope to carry the expected hash through.
                        broken_chain_at = Some(record.id);
                        continuity_intact = false;
                    }
                }
            }
        }

        Ok(ChainVerification {
            is_valid: broken_chain_at.is_none() && invalid_entries.is_empty(),
            total_checked: records.len(),
            invalid_entries,
            broken_chain_at,
        })
    }

    /// Rewrite the integrity envelopes over a window, re-chaining each record
    /// to its true predecessor. Semantic fields are never touched.
    pub async fn repair_chain(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ChainRepair> {
        let records = self.store.range_asc(start, end).await?;

        // A windowed repair seeds from the stored hash of the latest record
        // before the window; a full repair starts at genesis.
        let mut previous_hash: Option<String> = match start {
            Some(cutoff) => self
                .store
                .latest_before(cutoff)
                .await?
                .and_then(|r| r.chain.map(|link| link.hash)),
            None => None,
        };

        let mut repaired = 0;
        let mut failed = 0;
        let mut errors = Vec::new();

        for record in &records {
            let link = self.generate_link(record, previous_hash.as_deref());
            previous_hash = Some(link.hash.clone());
            match self.store.update_chain_link(record.id, &link).await {
                Ok(()) => repaired += 1,
                Err(e) => {
                    failed += 1;
                    errors.push(format!("record {}: {e}", record.id));
                }
            }
        }

        if repaired > 0 || failed > 0 {
            tracing::info!(repaired, failed, "Chain repair pass finished");
        }

        Ok(ChainRepair {
            repaired,
            failed,
            errors,
        })
    }

    /// Chain hash of the most recently created record, or None for an empty
    /// ledger. Seed for the next record's link.
    pub async fn last_chain_hash(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .latest()
            .await?
            .and_then(|record| record.chain.map(|link| link.hash)))
    }
}

fn canonical_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audit_record::AuditAction;
    use crate::store::memory::MemoryAuditStore;
    use serde_json::json;

    fn service() -> IntegrityService {
        IntegrityService::new(b"test-secret".to_vec(), Arc::new(MemoryAuditStore::new()))
    }

    fn service_with(store: Arc<MemoryAuditStore>) -> IntegrityService {
        IntegrityService::new(b"test-secret".to_vec(), store)
    }

    fn record(entity_id: &str) -> AuditRecord {
        AuditRecord {
            id: Uuid::now_v7(),
            actor_id: "u1".into(),
            actor_profile_id: None,
            entity_type: "School".into(),
            entity_id: entity_id.into(),
            entity_display: None,
            action: AuditAction::Update,
            module: "school".into(),
            old_values: Some(json!({"name": "A"})),
            new_values: Some(json!({"name": "B"})),
            changed_fields: vec!["name".into()],
            ip_address: None,
            user_agent: None,
            metadata: None,
            chain: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn generate_link_is_deterministic() {
        let svc = service();
        let r = record("s1");
        let a = svc.generate_link(&r, Some("prev"));
        let b = svc.generate_link(&r, Some("prev"));
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.signature, b.signature);
        assert_eq!(a.previous_hash.as_deref(), Some("prev"));
    }

    #[test]
    fn previous_hash_changes_hash() {
        let svc = service();
        let r = record("s1");
        let genesis = svc.generate_link(&r, None);
        let chained = svc.generate_link(&r, Some(&genesis.hash));
        assert_ne!(genesis.hash, chained.hash);
        assert!(genesis.previous_hash.is_none());
    }

    #[test]
    fn canonical_string_field_order() {
        let r = record("s1");
        let canonical = IntegrityService::canonical_string(&r);
        let parts: Vec<&str> = canonical.split('|').collect();
        assert_eq!(parts[0], "u1");
        assert_eq!(parts[1], "UPDATE");
        assert_eq!(parts[2], "school");
        assert_eq!(parts[3], "School");
        assert_eq!(parts[4], "s1");
        assert_eq!(parts[5], r#"{"name":"A"}"#);
        assert_eq!(parts[6], r#"{"name":"B"}"#);
    }

    #[test]
    fn canonical_string_empty_snapshots() {
        let mut r = record("s1");
        r.old_values = None;
        r.new_values = None;
        let canonical = IntegrityService::canonical_string(&r);
        assert!(canonical.contains("||"));
    }

    #[test]
    fn verify_link_accepts_untampered() {
        let svc = service();
        let mut r = record("s1");
        r.chain = Some(svc.generate_link(&r, None));
        let verdict = svc.verify_link(&r);
        assert!(verdict.is_valid);
        assert_eq!(verdict.reason, "Integrity verified");
    }

    #[test]
    fn verify_link_missing_metadata() {
        let svc = service();
        let r = record("s1");
        let verdict = svc.verify_link(&r);
        assert!(!verdict.is_valid);
        assert_eq!(verdict.reason, "No integrity metadata found");
    }

    #[test]
    fn verify_link_detects_semantic_tamper() {
        let svc = service();
        let mut r = record("s1");
        r.chain = Some(svc.generate_link(&r, None));
        r.action = AuditAction::Delete;
        let verdict = svc.verify_link(&r);
        assert!(!verdict.is_valid);
        assert_eq!(verdict.reason, "Hash mismatch detected");
    }

    #[test]
    fn verify_link_detects_forged_signature() {
        let svc = service();
        let mut r = record("s1");
        let mut link = svc.generate_link(&r, None);
        link.signature = "deadbeef".into();
        r.chain = Some(link);
        let verdict = svc.verify_link(&r);
        assert!(!verdict.is_valid);
        assert_eq!(verdict.reason, "Invalid signature detected: possible tampering");
    }

    #[test]
    fn signature_check_runs_before_hash_check() {
        // Tamper both the payload and the signature: the broken signature
        // must win as the reported reason.
        let svc = service();
        let mut r = record("s1");
        let mut link = svc.generate_link(&r, None);
        link.signature = "deadbeef".into();
        r.chain = Some(link);
        r.entity_id = "s2".into();
        let verdict = svc.verify_link(&r);
        assert_eq!(verdict.reason, "Invalid signature detected: possible tampering");
    }

    #[test]
    fn different_secret_invalidates_signature() {
        let store: Arc<MemoryAuditStore> = Arc::new(MemoryAuditStore::new());
        let signer = IntegrityService::new(b"key-one".to_vec(), store.clone());
        let verifier = IntegrityService::new(b"key-two".to_vec(), store);
        let mut r = record("s1");
        r.chain = Some(signer.generate_link(&r, None));
        assert!(!verifier.verify_link(&r).is_valid);
    }

    #[tokio::test]
    async fn verify_chain_accepts_contiguous_ledger() {
        let store = Arc::new(MemoryAuditStore::new());
        let svc = service_with(store.clone());
        let mut previous: Option<String> = None;
        for i in 0..5 {
            let mut r = record(&format!("s{i}"));
            let link = svc.generate_link(&r, previous.as_deref());
            previous = Some(link.hash.clone());
            r.chain = Some(link);
            store.insert(&r).await.unwrap();
        }
        let report = svc.verify_chain(None, None).await.unwrap();
        assert!(report.is_valid);
        assert_eq!(report.total_checked, 5);
        assert!(report.invalid_entries.is_empty());
        assert!(report.broken_chain_at.is_none());
    }

    #[tokio::test]
    async fn verify_chain_reports_broken_link() {
        let store = Arc::new(MemoryAuditStore::new());
        let svc = service_with(store.clone());
        let mut previous: Option<String> = None;
        let mut ids = Vec::new();
        for i in 0..4 {
            let mut r = record(&format!("s{i}"));
            let link = svc.generate_link(&r, previous.as_deref());
            previous = Some(link.hash.clone());
            r.chain = Some(link);
            ids.push(r.id);
            store.insert(&r).await.unwrap();
        }
        // Overwrite record 2's previous_hash with an unrelated value,
        // re-deriving a self-consistent hash and signature so only the
        // continuity check can catch it.
        let victim = store.get(ids[2]).await.unwrap().unwrap();
        let mut link = victim.chain.clone().unwrap();
        link.previous_hash = Some("f".repeat(64));
        link.hash = svc.chain_hash(&victim, link.previous_hash.as_deref());
        link.signature = svc.sign(&link.hash);
        store.update_chain_link(ids[2], &link).await.unwrap();

        let report = svc.verify_chain(None, None).await.unwrap();
        assert!(!report.is_valid);
        assert_eq!(report.broken_chain_at, Some(ids[2]));
        // The record itself verifies (hash and signature are consistent);
        // only continuity is broken.
        assert!(report.invalid_entries.is_empty());
        assert_eq!(report.total_checked, 4);
    }

    #[tokio::test]
    async fn repair_chain_restores_continuity() {
        let store = Arc::new(MemoryAuditStore::new());
        let svc = service_with(store.clone());
        // Persist records with no integrity metadata at all.
        for i in 0..3 {
            let r = record(&format!("s{i}"));
            store.insert(&r).await.unwrap();
        }
        let before = svc.verify_chain(None, None).await.unwrap();
        assert!(!before.is_valid);

        let outcome = svc.repair_chain(None, None).await.unwrap();
        assert_eq!(outcome.repaired, 3);
        assert_eq!(outcome.failed, 0);

        let after = svc.verify_chain(None, None).await.unwrap();
        assert!(after.is_valid, "repair must restore a verifiable chain");
    }

    #[tokio::test]
    async fn last_chain_hash_tracks_latest() {
        let store = Arc::new(MemoryAuditStore::new());
        let svc = service_with(store.clone());
        assert!(svc.last_chain_hash().await.unwrap().is_none());
        let mut r = record("s1");
        let link = svc.generate_link(&r, None);
        let hash = link.hash.clone();
        r.chain = Some(link);
        store.insert(&r).await.unwrap();
        assert_eq!(svc.last_chain_hash().await.unwrap(), Some(hash));
    }

    #[test]
    fn secret_required_in_production() {
        let config = Config {
            database_url: "postgres://".into(),
            bind_address: "0.0.0.0:8080".into(),
            log_level: "info".into(),
            environment: "production".into(),
            integrity_secret: None,
            audit_async_enabled: true,
            audit_batch_size: 10,
            audit_batch_quiescence_secs: 5,
            audit_critical_modules: vec![],
            audit_retention_days: 365,
            audit_queue_capacity: 1024,
            otel_endpoint: None,
        };
        assert!(IntegrityService::secret_from_config(&config).is_err());

        let dev = Config {
            environment: "development".into(),
            ..config
        };
        let secret = IntegrityService::secret_from_config(&dev).unwrap();
        assert_eq!(secret.len(), 32);
    }
}
