//! Compliance repository.
//!
//! Persists DSARs, consents, breaches, audit events, AI-system registrations
//! and AI-decision logs through the dialect-agnostic [`GraphStore`]. Typed
//! rows on the Rust side; list-valued columns are JSON-encoded exactly once
//! at the storage boundary. Constraints are pre-created at startup and
//! schema evolution is additive only.

use crate::audit::{
    canonical_timestamp, compute_event_hash, AuditEventRecord, ChainVerification, NewAuditEvent,
};
use crate::breach::BreachIncident;
use crate::consent::ConsentRecord;
use crate::dsar::{Dsar, DsarStatus};
use chrono::{DateTime, Utc};
use forge_core::{
    Clock, Error, GraphStore, IdMinter, NodeFilter, NodeProps, Result, SortOrder, UuidMinter,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const DSAR_LABEL: &str = "Dsar";
const CONSENT_LABEL: &str = "ConsentRecord";
const BREACH_LABEL: &str = "BreachIncident";
const AUDIT_LABEL: &str = "AuditEvent";
const AI_SYSTEM_LABEL: &str = "AiSystemRegistration";
const AI_DECISION_LABEL: &str = "AiDecisionLog";

/// Registration record for an AI system. One active version per
/// (name, version).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSystemRegistration {
    pub id: String,
    pub system_name: String,
    pub system_version: String,
    pub provider: Option<String>,
    pub risk_classification: String,
    pub intended_purpose: String,
    pub use_cases: Vec<String>,
    pub model_type: Option<String>,
    pub human_oversight_measures: Vec<String>,
    pub override_capability: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A logged AI decision. The reasoning chain is immutable once written;
/// human-review fields may be patched afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiDecisionLog {
    pub id: String,
    pub ai_system_id: String,
    pub model_version: String,
    pub decision_type: String,
    pub decision_outcome: String,
    pub confidence_score: f64,
    pub input_summary: Value,
    pub reasoning_chain: Vec<String>,
    pub key_factors: Vec<String>,
    pub subject_id: Option<String>,
    pub human_reviewed: bool,
    pub human_reviewer: Option<String>,
    pub human_override: bool,
    pub override_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn encode_list<T: Serialize>(items: &[T]) -> Value {
    Value::String(serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string()))
}

fn decode_list<T: for<'de> Deserialize<'de>>(value: Option<&Value>) -> Vec<T> {
    match value {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn get_str(props: &NodeProps, key: &str) -> Option<String> {
    props.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn get_time(props: &NodeProps, key: &str) -> Option<DateTime<Utc>> {
    get_str(props, key).and_then(|s| s.parse().ok())
}

fn get_time_or_epoch(props: &NodeProps, key: &str) -> DateTime<Utc> {
    get_time(props, key).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Graph-backed repository for all compliance entities.
pub struct ComplianceRepository {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdMinter>,
    /// Audit events are strictly linearized through a dedicated writer lock
    /// so the hash chain stays a single global chain.
    audit_writer: Mutex<()>,
}

impl ComplianceRepository {
    pub fn new(store: Arc<dyn GraphStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ids: Arc::new(UuidMinter),
            audit_writer: Mutex::new(()),
        }
    }

    /// Substitute the id source. Tests use a sequential minter for stable
    /// chain fixtures.
    pub fn with_id_minter(mut self, ids: Arc<dyn IdMinter>) -> Self {
        self.ids = ids;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create required constraints and indexes. Idempotent; call at startup.
    pub async fn initialize(&self) -> Result<()> {
        self.store.ensure_constraint(DSAR_LABEL, "id").await?;
        self.store.ensure_index(DSAR_LABEL, &["status"]).await?;
        self.store
            .ensure_index(DSAR_LABEL, &["subject_email"])
            .await?;

        self.store.ensure_constraint(CONSENT_LABEL, "id").await?;
        self.store.ensure_index(CONSENT_LABEL, &["user_id"]).await?;
        self.store
            .ensure_index(CONSENT_LABEL, &["consent_type"])
            .await?;

        self.store.ensure_constraint(BREACH_LABEL, "id").await?;
        self.store.ensure_index(BREACH_LABEL, &["status"]).await?;
        self.store.ensure_index(BREACH_LABEL, &["severity"]).await?;

        self.store.ensure_constraint(AUDIT_LABEL, "id").await?;
        self.store.ensure_index(AUDIT_LABEL, &["category"]).await?;
        self.store.ensure_index(AUDIT_LABEL, &["actor_id"]).await?;
        self.store
            .ensure_index(AUDIT_LABEL, &["entity_type", "entity_id"])
            .await?;
        self.store
            .ensure_index(AUDIT_LABEL, &["created_at"])
            .await?;

        self.store.ensure_constraint(AI_SYSTEM_LABEL, "id").await?;
        self.store
            .ensure_index(AI_SYSTEM_LABEL, &["system_name"])
            .await?;

        self.store
            .ensure_constraint(AI_DECISION_LABEL, "id")
            .await?;
        self.store
            .ensure_index(AI_DECISION_LABEL, &["ai_system_id"])
            .await?;
        self.store
            .ensure_index(AI_DECISION_LABEL, &["subject_id"])
            .await?;

        info!("compliance repository initialized");
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────
    // DSAR operations
    // ───────────────────────────────────────────────────────────────

    pub async fn create_dsar(&self, dsar: &Dsar) -> Result<()> {
        self.store
            .create_node(DSAR_LABEL, dsar.to_props())
            .await
            .map(|_| ())
    }

    pub async fn update_dsar(&self, dsar: &Dsar) -> Result<()> {
        let mut props = dsar.to_props();
        props.insert(
            "updated_at".into(),
            json!(canonical_timestamp(self.clock.now())),
        );
        self.store
            .update_node(DSAR_LABEL, &dsar.id, props)
            .await?
            .ok_or_else(|| Error::not_found(format!("DSAR not found: {}", dsar.id)))?;
        Ok(())
    }

    pub async fn get_dsar(&self, dsar_id: &str) -> Result<Option<Dsar>> {
        Ok(self
            .store
            .get_node(DSAR_LABEL, dsar_id)
            .await?
            .map(|props| Dsar::from_props(&props)))
    }

    pub async fn get_dsars_by_status(&self, status: DsarStatus) -> Result<Vec<Dsar>> {
        let rows = self
            .store
            .query(
                DSAR_LABEL,
                NodeFilter::new()
                    .equals("status", serde_json::to_value(status).unwrap_or(Value::Null))
                    .order_by("created_at", SortOrder::Descending),
            )
            .await?;
        Ok(rows.iter().map(Dsar::from_props).collect())
    }

    /// All DSARs in a non-terminal status whose deadline has passed.
    pub async fn get_overdue_dsars(&self) -> Result<Vec<Dsar>> {
        let open = [
            DsarStatus::Received,
            DsarStatus::Verified,
            DsarStatus::Processing,
        ]
        .iter()
        .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
        .collect();

        let rows = self
            .store
            .query(
                DSAR_LABEL,
                NodeFilter::new()
                    .value_in("status", open)
                    .order_by("deadline", SortOrder::Ascending),
            )
            .await?;

        let now = self.clock.now();
        Ok(rows
            .iter()
            .map(Dsar::from_props)
            .filter(|d| d.deadline < now)
            .collect())
    }

    pub async fn load_all_dsars(&self) -> Result<Vec<Dsar>> {
        let rows = self.store.query(DSAR_LABEL, NodeFilter::new()).await?;
        Ok(rows.iter().map(Dsar::from_props).collect())
    }

    // ───────────────────────────────────────────────────────────────
    // Consent operations
    // ───────────────────────────────────────────────────────────────

    pub async fn create_consent(&self, consent: &ConsentRecord) -> Result<()> {
        self.store
            .create_node(CONSENT_LABEL, consent.to_props())
            .await
            .map(|_| ())
    }

    /// Mark a consent withdrawn. Idempotent: an already-withdrawn record is
    /// returned unchanged, keeping the original withdrawal timestamp.
    pub async fn withdraw_consent(&self, consent_id: &str) -> Result<Option<ConsentRecord>> {
        let Some(props) = self.store.get_node(CONSENT_LABEL, consent_id).await? else {
            return Ok(None);
        };
        let existing = ConsentRecord::from_props(&props);
        if existing.withdrawn_at.is_some() {
            return Ok(Some(existing));
        }

        let mut updates = NodeProps::new();
        updates.insert("granted".into(), json!(false));
        updates.insert(
            "withdrawn_at".into(),
            json!(canonical_timestamp(self.clock.now())),
        );
        let updated = self
            .store
            .update_node(CONSENT_LABEL, consent_id, updates)
            .await?;
        Ok(updated.map(|props| ConsentRecord::from_props(&props)))
    }

    pub async fn get_consent(&self, consent_id: &str) -> Result<Option<ConsentRecord>> {
        Ok(self
            .store
            .get_node(CONSENT_LABEL, consent_id)
            .await?
            .map(|props| ConsentRecord::from_props(&props)))
    }

    pub async fn get_user_consents(&self, user_id: &str) -> Result<Vec<ConsentRecord>> {
        let rows = self
            .store
            .query(
                CONSENT_LABEL,
                NodeFilter::new()
                    .equals("user_id", user_id)
                    .order_by("created_at", SortOrder::Descending),
            )
            .await?;
        Ok(rows.iter().map(ConsentRecord::from_props).collect())
    }

    /// Valid consent exists iff granted, never withdrawn and unexpired.
    pub async fn check_consent(&self, user_id: &str, consent_type: &str) -> Result<bool> {
        let rows = self
            .store
            .query(
                CONSENT_LABEL,
                NodeFilter::new()
                    .equals("user_id", user_id)
                    .equals("consent_type", consent_type)
                    .equals("granted", true)
                    .is_null("withdrawn_at"),
            )
            .await?;

        let now = self.clock.now();
        Ok(rows.iter().map(ConsentRecord::from_props).any(|c| {
            c.expires_at.map(|exp| now < exp).unwrap_or(true)
        }))
    }

    // ───────────────────────────────────────────────────────────────
    // Breach operations
    // ───────────────────────────────────────────────────────────────

    pub async fn create_breach(&self, incident: &BreachIncident) -> Result<()> {
        self.store
            .create_node(BREACH_LABEL, incident.to_props())
            .await
            .map(|_| ())
    }

    pub async fn update_breach(&self, incident: &BreachIncident) -> Result<()> {
        let mut props = incident.to_props();
        props.insert(
            "updated_at".into(),
            json!(canonical_timestamp(self.clock.now())),
        );
        self.store
            .update_node(BREACH_LABEL, &incident.incident_id, props)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("Incident not found: {}", incident.incident_id))
            })?;
        Ok(())
    }

    pub async fn get_breach(&self, incident_id: &str) -> Result<Option<BreachIncident>> {
        Ok(self
            .store
            .get_node(BREACH_LABEL, incident_id)
            .await?
            .map(|props| BreachIncident::from_props(&props)))
    }

    pub async fn get_active_breaches(&self) -> Result<Vec<BreachIncident>> {
        let rows = self
            .store
            .query(
                BREACH_LABEL,
                NodeFilter::new()
                    .not_equals("status", "closed")
                    .order_by("created_at", SortOrder::Descending),
            )
            .await?;
        Ok(rows.iter().map(BreachIncident::from_props).collect())
    }

    // ───────────────────────────────────────────────────────────────
    // Audit events (append-only, hash-chained)
    // ───────────────────────────────────────────────────────────────

    /// Append an audit event to the global chain. Writers serialize through
    /// a dedicated lock. Write errors are retried once, then escalated.
    pub async fn append_audit_event(&self, event: NewAuditEvent) -> Result<AuditEventRecord> {
        let _writer = self.audit_writer.lock().await;

        let previous_hash = self.get_last_audit_hash().await?;
        let now = self.clock.now();
        let timestamp = canonical_timestamp(now);
        let id = self.ids.mint();
        let hash = compute_event_hash(
            &id,
            event.category,
            &event.event_type,
            &event.action,
            &timestamp,
            previous_hash.as_deref(),
        );

        let record = AuditEventRecord {
            id,
            category: event.category,
            event_type: event.event_type,
            action: event.action,
            actor_id: event.actor_id,
            actor_type: event.actor_type,
            actor_ip: event.actor_ip,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            correlation_id: event.correlation_id,
            old_value: event.old_value,
            new_value: event.new_value,
            success: event.success,
            error_message: event.error_message,
            risk_level: event.risk_level,
            data_classification: event.data_classification,
            justification: event.justification,
            previous_hash,
            hash,
            created_at: now,
        };

        let props = Self::audit_to_props(&record);
        match self.store.create_node(AUDIT_LABEL, props.clone()).await {
            Ok(_) => Ok(record),
            Err(first) => {
                warn!(error = %first, "audit write failed, retrying once");
                self.store.create_node(AUDIT_LABEL, props).await.map_err(|e| {
                    Error::fatal(format!("audit write failed after retry: {}", e))
                })?;
                Ok(record)
            }
        }
    }

    fn audit_to_props(record: &AuditEventRecord) -> NodeProps {
        let mut props = NodeProps::new();
        props.insert("id".into(), json!(record.id));
        props.insert("category".into(), json!(record.category.to_string()));
        props.insert("event_type".into(), json!(record.event_type));
        props.insert("action".into(), json!(record.action));
        props.insert("actor_id".into(), json!(record.actor_id));
        props.insert("actor_type".into(), json!(record.actor_type));
        props.insert("actor_ip".into(), json!(record.actor_ip));
        props.insert("entity_type".into(), json!(record.entity_type));
        props.insert("entity_id".into(), json!(record.entity_id));
        props.insert("correlation_id".into(), json!(record.correlation_id));
        props.insert(
            "old_value".into(),
            record
                .old_value
                .as_ref()
                .map(|v| json!(v.to_string()))
                .unwrap_or(Value::Null),
        );
        props.insert(
            "new_value".into(),
            record
                .new_value
                .as_ref()
                .map(|v| json!(v.to_string()))
                .unwrap_or(Value::Null),
        );
        props.insert("success".into(), json!(record.success));
        props.insert("error_message".into(), json!(record.error_message));
        props.insert("risk_level".into(), json!(record.risk_level.to_string()));
        props.insert(
            "data_classification".into(),
            serde_json::to_value(record.data_classification).unwrap_or(Value::Null),
        );
        props.insert("justification".into(), json!(record.justification));
        props.insert("previous_hash".into(), json!(record.previous_hash));
        props.insert("hash".into(), json!(record.hash));
        props.insert(
            "created_at".into(),
            json!(canonical_timestamp(record.created_at)),
        );
        props
    }

    pub async fn get_last_audit_hash(&self) -> Result<Option<String>> {
        let rows = self
            .store
            .query(
                AUDIT_LABEL,
                NodeFilter::new()
                    .order_by("created_at", SortOrder::Descending)
                    .limit(1),
            )
            .await?;
        Ok(rows.first().and_then(|props| get_str(props, "hash")))
    }

    /// Audit events for one entity, oldest first.
    pub async fn get_audit_events_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<NodeProps>> {
        self.store
            .query(
                AUDIT_LABEL,
                NodeFilter::new()
                    .equals("entity_type", entity_type)
                    .equals("entity_id", entity_id)
                    .order_by("created_at", SortOrder::Ascending),
            )
            .await
    }

    /// Audit events filtered by category and/or actor, newest first.
    pub async fn get_audit_events(
        &self,
        category: Option<&str>,
        actor_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<NodeProps>> {
        let mut filter = NodeFilter::new()
            .order_by("created_at", SortOrder::Descending)
            .limit(limit);
        if let Some(category) = category {
            filter = filter.equals("category", category);
        }
        if let Some(actor_id) = actor_id {
            filter = filter.equals("actor_id", actor_id);
        }
        self.store.query(AUDIT_LABEL, filter).await
    }

    /// Scan the whole chain in insertion order and re-derive every hash.
    pub async fn verify_audit_chain(&self) -> Result<ChainVerification> {
        let rows = self
            .store
            .query(
                AUDIT_LABEL,
                NodeFilter::new().order_by("created_at", SortOrder::Ascending),
            )
            .await?;

        if rows.is_empty() {
            return Ok(ChainVerification::Verified { events: 0 });
        }

        let mut previous_hash: Option<String> = None;
        for (position, props) in rows.iter().enumerate() {
            let event_id = get_str(props, "id").unwrap_or_default();

            if get_str(props, "previous_hash") != previous_hash {
                return Ok(ChainVerification::BrokenLink { event_id, position });
            }

            let category: forge_core::AuditEventCategory = props
                .get("category")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .ok_or_else(|| Error::fatal("audit event with unreadable category"))?;

            let computed = compute_event_hash(
                &event_id,
                category,
                &get_str(props, "event_type").unwrap_or_default(),
                &get_str(props, "action").unwrap_or_default(),
                &get_str(props, "created_at").unwrap_or_default(),
                previous_hash.as_deref(),
            );

            match get_str(props, "hash") {
                Some(stored) if stored == computed => previous_hash = Some(stored),
                Some(_) => {
                    return Ok(ChainVerification::HashMismatch { event_id, position });
                }
                None => {
                    return Ok(ChainVerification::BrokenLink { event_id, position });
                }
            }
        }

        Ok(ChainVerification::Verified { events: rows.len() })
    }

    // ───────────────────────────────────────────────────────────────
    // AI system registrations
    // ───────────────────────────────────────────────────────────────

    pub async fn create_ai_system(&self, system: &AiSystemRegistration) -> Result<()> {
        // One active registration per (name, version).
        let existing = self
            .store
            .query(
                AI_SYSTEM_LABEL,
                NodeFilter::new()
                    .equals("system_name", system.system_name.clone())
                    .equals("system_version", system.system_version.clone()),
            )
            .await?;
        if !existing.is_empty() {
            return Err(Error::conflict(format!(
                "AI system already registered: {} v{}",
                system.system_name, system.system_version
            )));
        }

        let mut props = serde_json::to_value(system)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        props.insert("use_cases".into(), encode_list(&system.use_cases));
        props.insert(
            "human_oversight_measures".into(),
            encode_list(&system.human_oversight_measures),
        );
        props.insert(
            "created_at".into(),
            json!(canonical_timestamp(system.created_at)),
        );
        props.insert(
            "updated_at".into(),
            json!(canonical_timestamp(system.updated_at)),
        );

        self.store.create_node(AI_SYSTEM_LABEL, props).await?;
        info!(system_id = %system.id, name = %system.system_name, "ai system registered");
        Ok(())
    }

    pub async fn get_ai_system(&self, system_id: &str) -> Result<Option<AiSystemRegistration>> {
        let Some(props) = self.store.get_node(AI_SYSTEM_LABEL, system_id).await? else {
            return Ok(None);
        };
        Ok(Some(AiSystemRegistration {
            id: get_str(&props, "id").unwrap_or_default(),
            system_name: get_str(&props, "system_name").unwrap_or_default(),
            system_version: get_str(&props, "system_version").unwrap_or_default(),
            provider: get_str(&props, "provider"),
            risk_classification: get_str(&props, "risk_classification").unwrap_or_default(),
            intended_purpose: get_str(&props, "intended_purpose").unwrap_or_default(),
            use_cases: decode_list(props.get("use_cases")),
            model_type: get_str(&props, "model_type"),
            human_oversight_measures: decode_list(props.get("human_oversight_measures")),
            override_capability: props
                .get("override_capability")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            created_at: get_time_or_epoch(&props, "created_at"),
            updated_at: get_time_or_epoch(&props, "updated_at"),
        }))
    }

    pub async fn get_all_ai_systems(&self) -> Result<Vec<NodeProps>> {
        self.store
            .query(
                AI_SYSTEM_LABEL,
                NodeFilter::new().order_by("created_at", SortOrder::Descending),
            )
            .await
    }

    // ───────────────────────────────────────────────────────────────
    // AI decision logs
    // ───────────────────────────────────────────────────────────────

    pub async fn create_ai_decision(&self, decision: &AiDecisionLog) -> Result<()> {
        let mut props = NodeProps::new();
        props.insert("id".into(), json!(decision.id));
        props.insert("ai_system_id".into(), json!(decision.ai_system_id));
        props.insert("model_version".into(), json!(decision.model_version));
        props.insert("decision_type".into(), json!(decision.decision_type));
        props.insert("decision_outcome".into(), json!(decision.decision_outcome));
        props.insert("confidence_score".into(), json!(decision.confidence_score));
        props.insert(
            "input_summary".into(),
            json!(decision.input_summary.to_string()),
        );
        props.insert(
            "reasoning_chain".into(),
            encode_list(&decision.reasoning_chain),
        );
        props.insert("key_factors".into(), encode_list(&decision.key_factors));
        props.insert("subject_id".into(), json!(decision.subject_id));
        props.insert("human_reviewed".into(), json!(decision.human_reviewed));
        props.insert("human_reviewer".into(), json!(decision.human_reviewer));
        props.insert("human_override".into(), json!(decision.human_override));
        props.insert("override_reason".into(), json!(decision.override_reason));
        props.insert(
            "created_at".into(),
            json!(canonical_timestamp(decision.created_at)),
        );

        self.store.create_node(AI_DECISION_LABEL, props).await?;
        Ok(())
    }

    /// Patch human-review fields of a decision. The reasoning chain itself
    /// is never rewritten.
    pub async fn record_human_review(
        &self,
        decision_id: &str,
        reviewer: &str,
        human_override: bool,
        override_reason: Option<&str>,
    ) -> Result<Option<AiDecisionLog>> {
        let mut updates = NodeProps::new();
        updates.insert("human_reviewed".into(), json!(true));
        updates.insert("human_reviewer".into(), json!(reviewer));
        updates.insert("human_override".into(), json!(human_override));
        updates.insert("override_reason".into(), json!(override_reason));

        let updated = self
            .store
            .update_node(AI_DECISION_LABEL, decision_id, updates)
            .await?;
        Ok(updated.map(|props| Self::decision_from_props(&props)))
    }

    pub async fn get_ai_decisions(
        &self,
        ai_system_id: Option<&str>,
        subject_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AiDecisionLog>> {
        let mut filter = NodeFilter::new()
            .order_by("created_at", SortOrder::Descending)
            .limit(limit);
        if let Some(system) = ai_system_id {
            filter = filter.equals("ai_system_id", system);
        }
        if let Some(subject) = subject_id {
            filter = filter.equals("subject_id", subject);
        }
        let rows = self.store.query(AI_DECISION_LABEL, filter).await?;
        Ok(rows.iter().map(Self::decision_from_props).collect())
    }

    fn decision_from_props(props: &NodeProps) -> AiDecisionLog {
        AiDecisionLog {
            id: get_str(props, "id").unwrap_or_default(),
            ai_system_id: get_str(props, "ai_system_id").unwrap_or_default(),
            model_version: get_str(props, "model_version").unwrap_or_default(),
            decision_type: get_str(props, "decision_type").unwrap_or_default(),
            decision_outcome: get_str(props, "decision_outcome").unwrap_or_default(),
            confidence_score: props
                .get("confidence_score")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            input_summary: get_str(props, "input_summary")
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(Value::Null),
            reasoning_chain: decode_list(props.get("reasoning_chain")),
            key_factors: decode_list(props.get("key_factors")),
            subject_id: get_str(props, "subject_id"),
            human_reviewed: props
                .get("human_reviewed")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            human_reviewer: get_str(props, "human_reviewer"),
            human_override: props
                .get("human_override")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            override_reason: get_str(props, "override_reason"),
            created_at: get_time_or_epoch(props, "created_at"),
        }
    }
}
