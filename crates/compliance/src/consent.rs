//! Consent registry.
//!
//! Consents are append-only; withdrawal is a terminal, idempotent state
//! transition. A consent is active iff granted, never withdrawn and not past
//! its expiry.

use crate::audit::{canonical_timestamp, NewAuditEvent};
use crate::repository::ComplianceRepository;
use chrono::{DateTime, Utc};
use forge_core::{AuditEventCategory, Clock, NodeProps, Result, RiskLevel};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Time-bounded consent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub id: String,
    pub user_id: String,
    pub consent_type: String,
    pub purpose: String,
    pub granted: bool,
    pub granted_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub collected_via: Option<String>,
    pub consent_text_version: Option<String>,
    pub consent_text_hash: Option<String>,
    pub third_parties: Vec<String>,
    pub cross_border_transfer: bool,
    pub transfer_safeguards: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ConsentRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.granted
            && self.withdrawn_at.is_none()
            && self.expires_at.map(|exp| now < exp).unwrap_or(true)
    }

    pub fn to_props(&self) -> NodeProps {
        let mut props = NodeProps::new();
        props.insert("id".into(), json!(self.id));
        props.insert("user_id".into(), json!(self.user_id));
        props.insert("consent_type".into(), json!(self.consent_type));
        props.insert("purpose".into(), json!(self.purpose));
        props.insert("granted".into(), json!(self.granted));
        props.insert(
            "granted_at".into(),
            json!(self.granted_at.map(canonical_timestamp)),
        );
        props.insert(
            "withdrawn_at".into(),
            json!(self.withdrawn_at.map(canonical_timestamp)),
        );
        props.insert(
            "expires_at".into(),
            json!(self.expires_at.map(canonical_timestamp)),
        );
        props.insert("collected_via".into(), json!(self.collected_via));
        props.insert(
            "consent_text_version".into(),
            json!(self.consent_text_version),
        );
        props.insert("consent_text_hash".into(), json!(self.consent_text_hash));
        props.insert(
            "third_parties".into(),
            json!(serde_json::to_string(&self.third_parties).unwrap_or_default()),
        );
        props.insert(
            "cross_border_transfer".into(),
            json!(self.cross_border_transfer),
        );
        props.insert(
            "transfer_safeguards".into(),
            json!(serde_json::to_string(&self.transfer_safeguards).unwrap_or_default()),
        );
        props.insert(
            "created_at".into(),
            json!(canonical_timestamp(self.created_at)),
        );
        props
    }

    pub fn from_props(props: &NodeProps) -> Self {
        let get_str = |key: &str| {
            props
                .get(key)
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        let get_time = |key: &str| get_str(key).and_then(|s| s.parse().ok());
        let decode = |key: &str| {
            get_str(key)
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default()
        };

        Self {
            id: get_str("id").unwrap_or_default(),
            user_id: get_str("user_id").unwrap_or_default(),
            consent_type: get_str("consent_type").unwrap_or_default(),
            purpose: get_str("purpose").unwrap_or_default(),
            granted: props
                .get("granted")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            granted_at: get_time("granted_at"),
            withdrawn_at: get_time("withdrawn_at"),
            expires_at: get_time("expires_at"),
            collected_via: get_str("collected_via"),
            consent_text_version: get_str("consent_text_version"),
            consent_text_hash: get_str("consent_text_hash"),
            third_parties: decode("third_parties"),
            cross_border_transfer: props
                .get("cross_border_transfer")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            transfer_safeguards: decode("transfer_safeguards"),
            created_at: get_time("created_at").unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

/// Registry for recording, withdrawing and checking consents.
pub struct ConsentRegistry {
    repository: Arc<ComplianceRepository>,
    clock: Arc<dyn Clock>,
}

impl ConsentRegistry {
    pub fn new(repository: Arc<ComplianceRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record_consent(
        &self,
        user_id: &str,
        consent_type: &str,
        purpose: &str,
        granted: bool,
        expires_at: Option<DateTime<Utc>>,
        collected_via: Option<&str>,
        consent_text_version: Option<&str>,
    ) -> Result<ConsentRecord> {
        let now = self.clock.now();
        let consent = ConsentRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            consent_type: consent_type.to_string(),
            purpose: purpose.to_string(),
            granted,
            granted_at: granted.then_some(now),
            withdrawn_at: None,
            expires_at,
            collected_via: collected_via.map(String::from),
            consent_text_version: consent_text_version.map(String::from),
            consent_text_hash: None,
            third_parties: Vec::new(),
            cross_border_transfer: false,
            transfer_safeguards: Vec::new(),
            created_at: now,
        };

        self.repository.create_consent(&consent).await?;
        self.repository
            .append_audit_event(
                NewAuditEvent::new(
                    AuditEventCategory::DataAccess,
                    "consent_recorded",
                    "record_consent",
                )
                .actor(user_id)
                .entity("consent", consent.id.clone())
                .risk(RiskLevel::Low),
            )
            .await?;

        info!(consent_id = %consent.id, user_id, consent_type, "consent recorded");
        Ok(consent)
    }

    /// Withdraw a consent. Idempotent: withdrawing twice leaves the record
    /// exactly as the first withdrawal did.
    pub async fn withdraw(&self, consent_id: &str) -> Result<Option<ConsentRecord>> {
        let before = self.repository.get_consent(consent_id).await?;
        let already_withdrawn = matches!(&before, Some(c) if c.withdrawn_at.is_some());

        let withdrawn = self.repository.withdraw_consent(consent_id).await?;

        if withdrawn.is_some() && !already_withdrawn {
            self.repository
                .append_audit_event(
                    NewAuditEvent::new(
                        AuditEventCategory::DataAccess,
                        "consent_withdrawn",
                        "withdraw_consent",
                    )
                    .entity("consent", consent_id)
                    .risk(RiskLevel::Medium),
                )
                .await?;
        }

        Ok(withdrawn)
    }

    /// Whether the user currently holds an active consent of this type.
    pub async fn check(&self, user_id: &str, consent_type: &str) -> Result<bool> {
        self.repository.check_consent(user_id, consent_type).await
    }

    pub async fn user_consents(&self, user_id: &str) -> Result<Vec<ConsentRecord>> {
        self.repository.get_user_consents(user_id).await
    }
}
