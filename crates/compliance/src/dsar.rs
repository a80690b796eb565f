//! Data Subject Access Request workflow.
//!
//! Status transitions follow a fixed DAG:
//!
//! ```text
//! received ── verify() ──▶ verified ── assign() ──▶ processing ── complete() ──▶ completed
//!            \                       \                           \
//!             └──▶ rejected           └──▶ rejected               └──▶ rejected
//!    any non-terminal state with deadline < now ──▶ expired
//! ```
//!
//! Deadlines derive from the jurisdiction and are frozen at creation; they
//! never shorten. Extensions append a processing note.

use crate::audit::{canonical_timestamp, NewAuditEvent};
use crate::repository::ComplianceRepository;
use chrono::{DateTime, Duration, Utc};
use forge_core::{
    AuditEventCategory, Clock, ComplianceFramework, Error, Jurisdiction, NodeProps, Result,
    RiskLevel,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DsarRequestType {
    Access,
    Deletion,
    Rectification,
    Portability,
    Restriction,
    Objection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DsarStatus {
    Received,
    Verified,
    Processing,
    Completed,
    Rejected,
    Expired,
}

impl DsarStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DsarStatus::Completed | DsarStatus::Rejected | DsarStatus::Expired
        )
    }

    /// Allowed forward transitions.
    fn can_transition_to(&self, next: DsarStatus) -> bool {
        match (self, next) {
            (DsarStatus::Received, DsarStatus::Verified) => true,
            (DsarStatus::Verified, DsarStatus::Processing) => true,
            (DsarStatus::Processing, DsarStatus::Completed) => true,
            (DsarStatus::Received, DsarStatus::Rejected)
            | (DsarStatus::Verified, DsarStatus::Rejected)
            | (DsarStatus::Processing, DsarStatus::Rejected) => true,
            (from, DsarStatus::Expired) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// A Data Subject Access Request. Processing notes are an append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dsar {
    pub id: String,
    pub request_type: DsarRequestType,
    pub jurisdiction: Jurisdiction,
    pub applicable_frameworks: Vec<ComplianceFramework>,
    pub subject_id: Option<String>,
    pub subject_email: String,
    pub subject_name: Option<String>,
    pub request_text: Option<String>,
    pub specific_data_categories: Vec<String>,
    pub status: DsarStatus,
    pub verified: bool,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_to: Option<String>,
    pub processing_notes: Vec<String>,
}

impl Dsar {
    pub fn to_props(&self) -> NodeProps {
        let mut props = NodeProps::new();
        props.insert("id".into(), json!(self.id));
        props.insert(
            "request_type".into(),
            serde_json::to_value(self.request_type).unwrap_or(Value::Null),
        );
        props.insert(
            "jurisdiction".into(),
            serde_json::to_value(self.jurisdiction).unwrap_or(Value::Null),
        );
        props.insert(
            "applicable_frameworks".into(),
            json!(serde_json::to_string(&self.applicable_frameworks).unwrap_or_default()),
        );
        props.insert("subject_id".into(), json!(self.subject_id));
        props.insert("subject_email".into(), json!(self.subject_email));
        props.insert("subject_name".into(), json!(self.subject_name));
        props.insert("request_text".into(), json!(self.request_text));
        props.insert(
            "specific_data_categories".into(),
            json!(serde_json::to_string(&self.specific_data_categories).unwrap_or_default()),
        );
        props.insert("status".into(), serde_json::to_value(self.status).unwrap_or(Value::Null));
        props.insert("verified".into(), json!(self.verified));
        props.insert("deadline".into(), json!(canonical_timestamp(self.deadline)));
        props.insert(
            "created_at".into(),
            json!(canonical_timestamp(self.created_at)),
        );
        props.insert(
            "updated_at".into(),
            json!(canonical_timestamp(self.updated_at)),
        );
        props.insert("assigned_to".into(), json!(self.assigned_to));
        props.insert(
            "processing_notes".into(),
            json!(serde_json::to_string(&self.processing_notes).unwrap_or_default()),
        );
        props
    }

    pub fn from_props(props: &NodeProps) -> Self {
        fn get_str(props: &NodeProps, key: &str) -> Option<String> {
            props.get(key).and_then(|v| v.as_str()).map(String::from)
        }
        fn get_time(props: &NodeProps, key: &str) -> DateTime<Utc> {
            get_str(props, key)
                .and_then(|s| s.parse().ok())
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        }
        fn decode<T: serde::de::DeserializeOwned + Default>(props: &NodeProps, key: &str) -> T {
            get_str(props, key)
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default()
        }
        let get_str = |key: &str| get_str(props, key);
        let get_time = |key: &str| get_time(props, key);

        Self {
            id: get_str("id").unwrap_or_default(),
            request_type: props
                .get("request_type")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or(DsarRequestType::Access),
            jurisdiction: props
                .get("jurisdiction")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or(Jurisdiction::Global),
            applicable_frameworks: decode(props, "applicable_frameworks"),
            subject_id: get_str("subject_id"),
            subject_email: get_str("subject_email").unwrap_or_default(),
            subject_name: get_str("subject_name"),
            request_text: get_str("request_text"),
            specific_data_categories: decode(props, "specific_data_categories"),
            status: props
                .get("status")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or(DsarStatus::Received),
            verified: props
                .get("verified")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            deadline: get_time("deadline"),
            created_at: get_time("created_at"),
            updated_at: get_time("updated_at"),
            assigned_to: get_str("assigned_to"),
            processing_notes: decode(props, "processing_notes"),
        }
    }
}

/// Response-window days per jurisdiction.
fn deadline_days(jurisdiction: Jurisdiction) -> i64 {
    match jurisdiction {
        Jurisdiction::Eu | Jurisdiction::Uk => 30,
        Jurisdiction::UsCalifornia => 45,
        Jurisdiction::Brazil => 15,
        _ => 30,
    }
}

/// CCPA allows extending the 45-day window up to 90 days total.
fn max_deadline_days(jurisdiction: Jurisdiction) -> i64 {
    match jurisdiction {
        Jurisdiction::UsCalifornia => 90,
        other => deadline_days(other),
    }
}

/// Inbound DSAR intake payload.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDsarRequest {
    pub request_type: DsarRequestType,
    pub jurisdiction: Jurisdiction,
    #[serde(default)]
    pub applicable_frameworks: Vec<ComplianceFramework>,
    #[validate(email)]
    pub subject_email: String,
    #[validate(length(max = 200))]
    pub subject_name: Option<String>,
    #[validate(length(max = 10000))]
    pub request_text: Option<String>,
}

/// Drives DSARs through their lifecycle, writing an audit event for every
/// state change.
pub struct DsarWorkflow {
    repository: Arc<ComplianceRepository>,
    clock: Arc<dyn Clock>,
}

impl DsarWorkflow {
    pub fn new(repository: Arc<ComplianceRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_request(
        &self,
        request_type: DsarRequestType,
        jurisdiction: Jurisdiction,
        applicable_frameworks: Vec<ComplianceFramework>,
        subject_email: &str,
        subject_name: Option<&str>,
        request_text: Option<&str>,
        actor: &str,
    ) -> Result<Dsar> {
        let now = self.clock.now();
        let dsar = Dsar {
            id: Uuid::new_v4().to_string(),
            request_type,
            jurisdiction,
            applicable_frameworks,
            subject_id: None,
            subject_email: subject_email.to_string(),
            subject_name: subject_name.map(String::from),
            request_text: request_text.map(String::from),
            specific_data_categories: Vec::new(),
            status: DsarStatus::Received,
            verified: false,
            deadline: now + Duration::days(deadline_days(jurisdiction)),
            created_at: now,
            updated_at: now,
            assigned_to: None,
            processing_notes: Vec::new(),
        };

        self.repository.create_dsar(&dsar).await?;
        self.audit(&dsar, "create", actor).await?;

        info!(dsar_id = %dsar.id, jurisdiction = %jurisdiction, "dsar created");
        Ok(dsar)
    }

    /// Intake entry point for untrusted payloads: shape-validate, then
    /// create.
    pub async fn create_from_request(
        &self,
        request: &CreateDsarRequest,
        actor: &str,
    ) -> Result<Dsar> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;
        self.create_request(
            request.request_type,
            request.jurisdiction,
            request.applicable_frameworks.clone(),
            &request.subject_email,
            request.subject_name.as_deref(),
            request.request_text.as_deref(),
            actor,
        )
        .await
    }

    /// Verify the requester's identity.
    pub async fn verify(&self, dsar_id: &str, verified_by: &str) -> Result<Dsar> {
        let mut dsar = self.load(dsar_id).await?;
        self.transition(&mut dsar, DsarStatus::Verified)?;
        dsar.verified = true;
        dsar.processing_notes
            .push(self.note(format!("identity verified by {}", verified_by)));

        self.repository.update_dsar(&dsar).await?;
        self.audit(&dsar, "verify", verified_by).await?;
        Ok(dsar)
    }

    /// Assign to a handler, moving the request into processing.
    pub async fn assign(&self, dsar_id: &str, assignee: &str, assigned_by: &str) -> Result<Dsar> {
        let mut dsar = self.load(dsar_id).await?;
        self.transition(&mut dsar, DsarStatus::Processing)?;
        dsar.assigned_to = Some(assignee.to_string());
        dsar.processing_notes
            .push(self.note(format!("assigned to {} by {}", assignee, assigned_by)));

        self.repository.update_dsar(&dsar).await?;
        self.audit(&dsar, "assign", assigned_by).await?;
        Ok(dsar)
    }

    pub async fn complete(&self, dsar_id: &str, completed_by: &str) -> Result<Dsar> {
        let mut dsar = self.load(dsar_id).await?;
        self.transition(&mut dsar, DsarStatus::Completed)?;
        dsar.processing_notes
            .push(self.note(format!("completed by {}", completed_by)));

        self.repository.update_dsar(&dsar).await?;
        self.audit(&dsar, "complete", completed_by).await?;
        Ok(dsar)
    }

    pub async fn reject(&self, dsar_id: &str, reason: &str, rejected_by: &str) -> Result<Dsar> {
        let mut dsar = self.load(dsar_id).await?;
        self.transition(&mut dsar, DsarStatus::Rejected)?;
        dsar.processing_notes
            .push(self.note(format!("rejected by {}: {}", rejected_by, reason)));

        self.repository.update_dsar(&dsar).await?;
        self.audit(&dsar, "reject", rejected_by).await?;
        Ok(dsar)
    }

    /// Extend the deadline. The deadline is monotonic non-decreasing and,
    /// for CCPA requests, capped at 90 days from creation.
    pub async fn extend_deadline(
        &self,
        dsar_id: &str,
        new_deadline: DateTime<Utc>,
        note: &str,
        extended_by: &str,
    ) -> Result<Dsar> {
        let mut dsar = self.load(dsar_id).await?;

        if new_deadline < dsar.deadline {
            return Err(Error::validation("deadline can never shorten"));
        }
        let cap = dsar.created_at + Duration::days(max_deadline_days(dsar.jurisdiction));
        if new_deadline > cap {
            return Err(Error::validation(format!(
                "deadline cannot extend past {} days from creation",
                max_deadline_days(dsar.jurisdiction)
            )));
        }

        dsar.deadline = new_deadline;
        dsar.processing_notes
            .push(self.note(format!("deadline extended by {}: {}", extended_by, note)));

        self.repository.update_dsar(&dsar).await?;
        self.audit(&dsar, "extend_deadline", extended_by).await?;
        Ok(dsar)
    }

    /// Expire every non-terminal request whose deadline passed. Returns the
    /// expired ids.
    pub async fn expire_overdue(&self) -> Result<Vec<String>> {
        let overdue = self.repository.get_overdue_dsars().await?;
        let mut expired = Vec::new();

        for mut dsar in overdue {
            self.transition(&mut dsar, DsarStatus::Expired)?;
            dsar.processing_notes
                .push(self.note("expired past jurisdictional deadline".to_string()));
            self.repository.update_dsar(&dsar).await?;
            self.audit(&dsar, "expire", "system").await?;
            expired.push(dsar.id);
        }

        Ok(expired)
    }

    pub async fn get(&self, dsar_id: &str) -> Result<Option<Dsar>> {
        self.repository.get_dsar(dsar_id).await
    }

    pub async fn overdue(&self) -> Result<Vec<Dsar>> {
        self.repository.get_overdue_dsars().await
    }

    async fn load(&self, dsar_id: &str) -> Result<Dsar> {
        self.repository
            .get_dsar(dsar_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("DSAR not found: {}", dsar_id)))
    }

    fn transition(&self, dsar: &mut Dsar, next: DsarStatus) -> Result<()> {
        if !dsar.status.can_transition_to(next) {
            return Err(Error::conflict(format!(
                "invalid DSAR transition: {:?} -> {:?}",
                dsar.status, next
            )));
        }
        dsar.status = next;
        dsar.updated_at = self.clock.now();
        Ok(())
    }

    fn note(&self, text: String) -> String {
        format!("[{}] {}", canonical_timestamp(self.clock.now()), text)
    }

    async fn audit(&self, dsar: &Dsar, action: &str, actor: &str) -> Result<()> {
        self.repository
            .append_audit_event(
                NewAuditEvent::new(
                    AuditEventCategory::DsarProcessing,
                    format!("dsar_{}", action),
                    action,
                )
                .actor(actor)
                .entity("dsar", dsar.id.clone())
                .risk(RiskLevel::Medium),
            )
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use forge_core::{ManualClock, MemoryGraph};

    async fn workflow() -> (Arc<ManualClock>, Arc<ComplianceRepository>, DsarWorkflow) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryGraph::new());
        let repository = Arc::new(ComplianceRepository::new(store, clock.clone()));
        repository.initialize().await.unwrap();
        let workflow = DsarWorkflow::new(repository.clone(), clock.clone());
        (clock, repository, workflow)
    }

    async fn create_eu_access(workflow: &DsarWorkflow) -> Dsar {
        workflow
            .create_request(
                DsarRequestType::Access,
                Jurisdiction::Eu,
                vec![ComplianceFramework::Gdpr],
                "subject@example.com",
                Some("Data Subject"),
                Some("please send me everything"),
                "intake",
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn eu_deadline_is_thirty_days() {
        let (clock, _, workflow) = workflow().await;
        let dsar = create_eu_access(&workflow).await;
        assert_eq!(dsar.deadline, clock.now() + Duration::days(30));
        assert_eq!(dsar.status, DsarStatus::Received);
    }

    #[tokio::test]
    async fn jurisdiction_deadlines() {
        let (clock, _, workflow) = workflow().await;
        for (jurisdiction, days) in [
            (Jurisdiction::Uk, 30),
            (Jurisdiction::UsCalifornia, 45),
            (Jurisdiction::Brazil, 15),
            (Jurisdiction::Singapore, 30),
        ] {
            let dsar = workflow
                .create_request(
                    DsarRequestType::Deletion,
                    jurisdiction,
                    vec![],
                    "s@example.com",
                    None,
                    None,
                    "intake",
                )
                .await
                .unwrap();
            assert_eq!(dsar.deadline, clock.now() + Duration::days(days));
        }
    }

    #[tokio::test]
    async fn full_lifecycle_writes_four_audit_events_and_chain_verifies() {
        let (_, repository, workflow) = workflow().await;
        let dsar = create_eu_access(&workflow).await;

        workflow.verify(&dsar.id, "officer").await.unwrap();
        workflow.assign(&dsar.id, "handler", "officer").await.unwrap();
        let done = workflow.complete(&dsar.id, "handler").await.unwrap();

        assert_eq!(done.status, DsarStatus::Completed);
        assert_eq!(done.processing_notes.len(), 3);

        let events = repository
            .get_audit_events_for_entity("dsar", &dsar.id)
            .await
            .unwrap();
        assert_eq!(events.len(), 4);

        let verification = repository.verify_audit_chain().await.unwrap();
        assert!(verification.is_valid(), "{}", verification.describe());
    }

    #[tokio::test]
    async fn transitions_outside_the_dag_are_conflicts() {
        let (_, _, workflow) = workflow().await;
        let dsar = create_eu_access(&workflow).await;

        // received -> completed skips verification and assignment
        let err = workflow.complete(&dsar.id, "handler").await.unwrap_err();
        assert_eq!(err.kind, forge_core::ErrorKind::Conflict);

        // rejection is allowed from received
        let rejected = workflow
            .reject(&dsar.id, "cannot verify identity", "officer")
            .await
            .unwrap();
        assert_eq!(rejected.status, DsarStatus::Rejected);

        // terminal states accept nothing further
        let err = workflow.verify(&dsar.id, "officer").await.unwrap_err();
        assert_eq!(err.kind, forge_core::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn deadline_never_shortens_and_ccpa_caps_at_ninety_days() {
        let (clock, _, workflow) = workflow().await;
        let dsar = workflow
            .create_request(
                DsarRequestType::Access,
                Jurisdiction::UsCalifornia,
                vec![ComplianceFramework::Ccpa],
                "s@example.com",
                None,
                None,
                "intake",
            )
            .await
            .unwrap();

        let shorter = dsar.deadline - Duration::days(1);
        assert!(workflow
            .extend_deadline(&dsar.id, shorter, "oops", "officer")
            .await
            .is_err());

        let extended = workflow
            .extend_deadline(
                &dsar.id,
                clock.now() + Duration::days(90),
                "complex request",
                "officer",
            )
            .await
            .unwrap();
        assert_eq!(extended.deadline, clock.now() + Duration::days(90));

        assert!(workflow
            .extend_deadline(
                &dsar.id,
                clock.now() + Duration::days(91),
                "too far",
                "officer",
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn malformed_intake_payload_is_rejected() {
        let (_, _, workflow) = workflow().await;
        let request = CreateDsarRequest {
            request_type: DsarRequestType::Access,
            jurisdiction: Jurisdiction::Eu,
            applicable_frameworks: vec![],
            subject_email: "not-an-email".to_string(),
            subject_name: None,
            request_text: None,
        };

        let err = workflow
            .create_from_request(&request, "portal")
            .await
            .unwrap_err();
        assert_eq!(err.kind, forge_core::ErrorKind::ValidationFailed);

        let valid = CreateDsarRequest {
            subject_email: "subject@example.com".to_string(),
            ..request
        };
        let dsar = workflow.create_from_request(&valid, "portal").await.unwrap();
        assert_eq!(dsar.status, DsarStatus::Received);
    }

    #[tokio::test]
    async fn overdue_requests_expire() {
        let (clock, _, workflow) = workflow().await;
        let dsar = create_eu_access(&workflow).await;

        clock.advance(Duration::days(31));
        let overdue = workflow.overdue().await.unwrap();
        assert_eq!(overdue.len(), 1);

        let expired = workflow.expire_overdue().await.unwrap();
        assert_eq!(expired, vec![dsar.id.clone()]);

        let stored = workflow.get(&dsar.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DsarStatus::Expired);
        assert!(workflow.overdue().await.unwrap().is_empty());
    }
}
