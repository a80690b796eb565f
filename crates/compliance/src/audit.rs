//! Hash-chained audit events.
//!
//! Each appended event links to the prior event's hash; the chain is never
//! edited, only appended. `hash = SHA-256(canonical_json({id, category,
//! event_type, action, timestamp, previous_hash}))` where canonical JSON has
//! sorted keys. Verification re-derives the chain in insertion order; any
//! mismatch is a hard alarm.

use chrono::{DateTime, SecondsFormat, Utc};
use forge_core::{AuditEventCategory, DataClassification, RiskLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Input for a new audit event. The repository assigns id, hashes and the
/// timestamp.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub category: AuditEventCategory,
    pub event_type: String,
    pub action: String,
    pub actor_id: Option<String>,
    pub actor_type: String,
    pub actor_ip: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub correlation_id: Option<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub risk_level: RiskLevel,
    pub data_classification: Option<DataClassification>,
    /// Break-glass justification for privileged access to sensitive
    /// resources.
    pub justification: Option<String>,
}

impl NewAuditEvent {
    pub fn new(
        category: AuditEventCategory,
        event_type: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            category,
            event_type: event_type.into(),
            action: action.into(),
            actor_id: None,
            actor_type: "user".to_string(),
            actor_ip: None,
            entity_type: None,
            entity_id: None,
            correlation_id: None,
            old_value: None,
            new_value: None,
            success: true,
            error_message: None,
            risk_level: RiskLevel::Low,
            data_classification: None,
            justification: None,
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }

    pub fn values(mut self, old: Option<Value>, new: Option<Value>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    pub fn classification(mut self, classification: DataClassification) -> Self {
        self.data_classification = Some(classification);
        self
    }

    pub fn justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }
}

/// A persisted, immutable audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEventRecord {
    pub id: String,
    pub category: AuditEventCategory,
    pub event_type: String,
    pub action: String,
    pub actor_id: Option<String>,
    pub actor_type: String,
    pub actor_ip: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub correlation_id: Option<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub risk_level: RiskLevel,
    pub data_classification: Option<DataClassification>,
    pub justification: Option<String>,
    pub previous_hash: Option<String>,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// Canonical timestamp rendering used in the hash input and in storage.
pub fn canonical_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Compute the chain hash for an event.
pub fn compute_event_hash(
    id: &str,
    category: AuditEventCategory,
    event_type: &str,
    action: &str,
    timestamp: &str,
    previous_hash: Option<&str>,
) -> String {
    // BTreeMap gives sorted keys, so the serialization is canonical.
    let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
    fields.insert("id", Value::String(id.to_string()));
    fields.insert("category", Value::String(category.to_string()));
    fields.insert("event_type", Value::String(event_type.to_string()));
    fields.insert("action", Value::String(action.to_string()));
    fields.insert("timestamp", Value::String(timestamp.to_string()));
    fields.insert(
        "previous_hash",
        previous_hash
            .map(|h| Value::String(h.to_string()))
            .unwrap_or(Value::Null),
    );

    let payload = serde_json::to_string(&fields).expect("hash payload serializes");
    let digest = Sha256::digest(payload.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Outcome of a chain scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerification {
    Verified { events: usize },
    BrokenLink { event_id: String, position: usize },
    HashMismatch { event_id: String, position: usize },
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainVerification::Verified { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            ChainVerification::Verified { events } => {
                format!("Chain verified: {} events", events)
            }
            ChainVerification::BrokenLink { event_id, .. } => {
                format!("Chain broken at event {}", event_id)
            }
            ChainVerification::HashMismatch { event_id, .. } => {
                format!("Hash mismatch at event {}", event_id)
            }
        }
    }
}
