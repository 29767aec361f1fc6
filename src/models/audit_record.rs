//! Audit ledger record types.
//!
//! An [`AuditRecord`] is the immutable unit of history: who did what to
//! which entity, with optional before/after snapshots and the integrity
//! envelope ([`ChainLink`]) that chains it to its predecessor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Actor id recorded when no authenticated identity is present.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// Audit action types.
///
/// Closed enumeration stored in SCREAMING_SNAKE form. Extend here rather
/// than passing free text through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Approve,
    Reject,
    Assign,
    View,
    Close,
    Export,
    Login,
    Logout,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Approve => "APPROVE",
            AuditAction::Reject => "REJECT",
            AuditAction::Assign => "ASSIGN",
            AuditAction::View => "VIEW",
            AuditAction::Close => "CLOSE",
            AuditAction::Export => "EXPORT",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(AuditAction::Create),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            "APPROVE" => Ok(AuditAction::Approve),
            "REJECT" => Ok(AuditAction::Reject),
            "ASSIGN" => Ok(AuditAction::Assign),
            "VIEW" => Ok(AuditAction::View),
            "CLOSE" => Ok(AuditAction::Close),
            "EXPORT" => Ok(AuditAction::Export),
            "LOGIN" => Ok(AuditAction::Login),
            "LOGOUT" => Ok(AuditAction::Logout),
            other => Err(format!("unknown audit action '{other}'")),
        }
    }
}

/// Delivery priority for a routed audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl AuditPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditPriority::Low => "low",
            AuditPriority::Normal => "normal",
            AuditPriority::High => "high",
            AuditPriority::Critical => "critical",
        }
    }

    /// High and critical entries bypass batching and go straight to the queue.
    pub fn is_direct(&self) -> bool {
        matches!(self, AuditPriority::High | AuditPriority::Critical)
    }
}

/// Integrity envelope attached to a persisted record.
///
/// `previous_hash` is `None` only for the very first record ever written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    pub hash: String,
    pub previous_hash: Option<String>,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

/// A single entry in the audit ledger.
///
/// Semantic fields (actor, action, subject, values, `created_at`) are
/// immutable once persisted; only the `chain` envelope may be rewritten,
/// and only by an explicit repair pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Time-sortable UUIDv7, generated at creation and never reused.
    pub id: Uuid,
    /// External actor identity; `SYSTEM` when no authenticated actor exists.
    pub actor_id: String,
    /// Durable profile id resolved from the actor identity, when known.
    pub actor_profile_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_display: Option<String>,
    pub action: AuditAction,
    /// Logical subsystem that produced the entry (e.g. "school", "auth").
    pub module: String,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    /// Top-level keys whose serialized value differs between the snapshots.
    pub changed_fields: Vec<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub chain: Option<ChainLink>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Chain hash of this record, when integrity metadata is present.
    pub fn chain_hash(&self) -> Option<&str> {
        self.chain.as_ref().map(|link| link.hash.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_as_str_round_trips() {
        for action in [
            AuditAction::Create,
            AuditAction::Update,
            AuditAction::Delete,
            AuditAction::Approve,
            AuditAction::Reject,
            AuditAction::Assign,
            AuditAction::View,
            AuditAction::Close,
            AuditAction::Export,
            AuditAction::Login,
            AuditAction::Logout,
        ] {
            assert_eq!(action.as_str().parse::<AuditAction>(), Ok(action));
        }
    }

    #[test]
    fn action_from_str_rejects_free_text() {
        assert!("create".parse::<AuditAction>().is_err());
        assert!("DROP TABLE".parse::<AuditAction>().is_err());
        assert!("".parse::<AuditAction>().is_err());
    }

    #[test]
    fn action_serializes_screaming_snake() {
        let json = serde_json::to_string(&AuditAction::Delete).unwrap();
        assert_eq!(json, r#""DELETE""#);
    }

    #[test]
    fn priority_direct_split() {
        assert!(!AuditPriority::Low.is_direct());
        assert!(!AuditPriority::Normal.is_direct());
        assert!(AuditPriority::High.is_direct());
        assert!(AuditPriority::Critical.is_direct());
    }

    #[test]
    fn priority_ordering() {
        assert!(AuditPriority::Low < AuditPriority::Normal);
        assert!(AuditPriority::Normal < AuditPriority::High);
        assert!(AuditPriority::High < AuditPriority::Critical);
    }

    #[test]
    fn priority_serializes_lowercase() {
        let json = serde_json::to_string(&AuditPriority::Critical).unwrap();
        assert_eq!(json, r#""critical""#);
        let parsed: AuditPriority = serde_json::from_str(r#""low""#).unwrap();
        assert_eq!(parsed, AuditPriority::Low);
    }

    #[test]
    fn chain_hash_accessor() {
        let mut record = AuditRecord {
            id: Uuid::now_v7(),
            actor_id: SYSTEM_ACTOR.into(),
            actor_profile_id: None,
            entity_type: "School".into(),
            entity_id: "s1".into(),
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
        };
        assert!(record.chain_hash().is_none());
        record.chain = Some(ChainLink {
            hash: "abc".into(),
            previous_hash: None,
            signature: "sig".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(record.chain_hash(), Some("abc"));
    }
}
