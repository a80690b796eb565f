//! Breach notification workflow.
//!
//! Reporting a breach assesses notification requirements, computes
//! per-jurisdiction deadlines and stores the incident. A periodic scheduler
//! maps time-to-deadline onto a tiered alert ladder and fires each
//! (incident, jurisdiction, level) alert exactly once through the configured
//! callback.

use crate::audit::NewAuditEvent;
use crate::repository::ComplianceRepository;
use chrono::{DateTime, Duration, Utc};
use forge_core::{
    AuditEventCategory, BreachSeverity, Clock, DataClassification, Error, Jurisdiction, NodeProps,
    Result, RiskLevel,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachType {
    UnauthorizedAccess,
    UnauthorizedDisclosure,
    DataTheft,
    DataExfiltration,
    Ransomware,
    LostDevice,
    AccidentalDisclosure,
    InsiderThreat,
    Phishing,
    SystemCompromise,
    VendorBreach,
    PhysicalBreach,
}

/// Incident lifecycle: detected → investigating → contained → assessed →
/// notifying → remediated → closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachStatus {
    Detected,
    Investigating,
    Contained,
    Assessed,
    Notifying,
    Remediated,
    Closed,
}

impl BreachStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BreachStatus::Remediated | BreachStatus::Closed)
    }

    fn rank(&self) -> u8 {
        match self {
            BreachStatus::Detected => 0,
            BreachStatus::Investigating => 1,
            BreachStatus::Contained => 2,
            BreachStatus::Assessed => 3,
            BreachStatus::Notifying => 4,
            BreachStatus::Remediated => 5,
            BreachStatus::Closed => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Acknowledged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationRecipient {
    SupervisoryAuthority,
    DataSubjects,
    Media,
    LawEnforcement,
    PaymentBrands,
    HhsOcr,
    StateAttorneyGeneral,
}

/// Data breach incident record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreachIncident {
    pub incident_id: String,
    pub discovered_at: DateTime<Utc>,
    pub discovered_by: String,
    pub discovery_method: String,
    pub breach_type: BreachType,
    pub severity: BreachSeverity,
    pub status: BreachStatus,
    pub data_categories: Vec<DataClassification>,
    pub data_elements: Vec<String>,
    pub jurisdictions: Vec<Jurisdiction>,
    pub record_count: u64,
    pub affected_systems: Vec<String>,
    pub breach_occurred_at: Option<DateTime<Utc>>,
    pub contained_at: Option<DateTime<Utc>>,
    pub remediated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub risk_assessment: String,
    pub likely_harm: bool,
    pub encryption_in_place: bool,
    pub dpa_notification_required: bool,
    pub dpa_notification_deadline: Option<DateTime<Utc>>,
    pub individual_notification_required: bool,
    pub individual_notification_deadline: Option<DateTime<Utc>>,
    pub investigation_notes: Vec<String>,
    pub root_cause: Option<String>,
    pub remediation_actions: Vec<String>,
}

impl BreachIncident {
    pub fn to_props(&self) -> NodeProps {
        let mut props = NodeProps::new();
        props.insert("id".into(), json!(self.incident_id));
        props.insert(
            "discovered_at".into(),
            json!(crate::audit::canonical_timestamp(self.discovered_at)),
        );
        props.insert("discovered_by".into(), json!(self.discovered_by));
        props.insert("discovery_method".into(), json!(self.discovery_method));
        props.insert(
            "breach_type".into(),
            serde_json::to_value(self.breach_type).unwrap_or(Value::Null),
        );
        props.insert("severity".into(), json!(self.severity.to_string()));
        props.insert("status".into(), serde_json::to_value(self.status).unwrap_or(Value::Null));
        props.insert(
            "data_categories".into(),
            json!(serde_json::to_string(&self.data_categories).unwrap_or_default()),
        );
        props.insert(
            "data_elements".into(),
            json!(serde_json::to_string(&self.data_elements).unwrap_or_default()),
        );
        props.insert(
            "jurisdictions".into(),
            json!(serde_json::to_string(&self.jurisdictions).unwrap_or_default()),
        );
        props.insert("record_count".into(), json!(self.record_count));
        props.insert(
            "affected_systems".into(),
            json!(serde_json::to_string(&self.affected_systems).unwrap_or_default()),
        );
        props.insert(
            "dpa_notification_required".into(),
            json!(self.dpa_notification_required),
        );
        props.insert(
            "dpa_notification_deadline".into(),
            json!(self
                .dpa_notification_deadline
                .map(crate::audit::canonical_timestamp)),
        );
        props.insert(
            "individual_notification_required".into(),
            json!(self.individual_notification_required),
        );
        props.insert("likely_harm".into(), json!(self.likely_harm));
        props.insert(
            "encryption_in_place".into(),
            json!(self.encryption_in_place),
        );
        props.insert(
            "remediation_actions".into(),
            json!(serde_json::to_string(&self.remediation_actions).unwrap_or_default()),
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
        let decode_str_list = |key: &str| -> Vec<String> {
            get_str(key)
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default()
        };

        Self {
            incident_id: get_str("id").unwrap_or_default(),
            discovered_at: get_time("discovered_at").unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            discovered_by: get_str("discovered_by").unwrap_or_default(),
            discovery_method: get_str("discovery_method").unwrap_or_default(),
            breach_type: props
                .get("breach_type")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or(BreachType::UnauthorizedAccess),
            severity: get_str("severity")
                .and_then(|s| serde_json::from_str(&format!("\"{}\"", s)).ok())
                .unwrap_or(BreachSeverity::Medium),
            status: props
                .get("status")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or(BreachStatus::Detected),
            data_categories: get_str("data_categories")
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            data_elements: decode_str_list("data_elements"),
            jurisdictions: get_str("jurisdictions")
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            record_count: props
                .get("record_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            affected_systems: decode_str_list("affected_systems"),
            breach_occurred_at: None,
            contained_at: None,
            remediated_at: None,
            closed_at: None,
            risk_assessment: String::new(),
            likely_harm: props
                .get("likely_harm")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            encryption_in_place: props
                .get("encryption_in_place")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            dpa_notification_required: props
                .get("dpa_notification_required")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            dpa_notification_deadline: get_time("dpa_notification_deadline"),
            individual_notification_required: props
                .get("individual_notification_required")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            individual_notification_deadline: None,
            investigation_notes: Vec::new(),
            root_cause: None,
            remediation_actions: decode_str_list("remediation_actions"),
        }
    }
}

/// Record of a breach notification sent to a recipient. The deadline is
/// preserved after sending for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub notification_id: String,
    pub incident_id: String,
    pub recipient_type: NotificationRecipient,
    pub recipient_email: String,
    pub jurisdiction: Jurisdiction,
    pub subject: String,
    pub status: NotificationStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Tiered alert levels, ordered by urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Urgent,
    Critical,
    Imminent,
    Overdue,
}

impl AlertLevel {
    /// Map hours-to-deadline onto the ladder: >24h none, (12,24] warning,
    /// (6,12] urgent, (1,6] critical, (0,1] imminent, <=0 overdue.
    pub fn for_hours_remaining(hours: f64) -> Option<AlertLevel> {
        if hours <= 0.0 {
            Some(AlertLevel::Overdue)
        } else if hours <= 1.0 {
            Some(AlertLevel::Imminent)
        } else if hours <= 6.0 {
            Some(AlertLevel::Critical)
        } else if hours <= 12.0 {
            Some(AlertLevel::Urgent)
        } else if hours <= 24.0 {
            Some(AlertLevel::Warning)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Urgent => "urgent",
            AlertLevel::Critical => "critical",
            AlertLevel::Imminent => "imminent",
            AlertLevel::Overdue => "overdue",
        }
    }
}

/// Alert for an approaching or missed notification deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineAlert {
    pub incident_id: String,
    pub jurisdiction: Jurisdiction,
    pub deadline: DateTime<Utc>,
    pub level: AlertLevel,
    pub hours_remaining: f64,
}

/// Async callback invoked for every delivered alert.
pub type AlertCallback = Arc<dyn Fn(DeadlineAlert) -> BoxFuture<'static, ()> + Send + Sync>;

/// Data elements whose exposure forces DPA notification.
const SENSITIVE_ELEMENTS: &[&str] = &[
    "ssn",
    "social_security",
    "passport",
    "drivers_license",
    "credit_card",
    "bank_account",
    "health_record",
    "medical",
    "biometric",
    "password",
    "credentials",
];

/// DPA notification windows in hours, per jurisdiction. `None` means no
/// fixed DPA deadline for that jurisdiction.
fn dpa_hours(jurisdiction: Jurisdiction) -> Option<i64> {
    match jurisdiction {
        Jurisdiction::Eu
        | Jurisdiction::Uk
        | Jurisdiction::UsCalifornia
        | Jurisdiction::Brazil
        | Jurisdiction::Australia
        | Jurisdiction::Singapore
        | Jurisdiction::India
        | Jurisdiction::China => Some(72),
        Jurisdiction::UsColorado | Jurisdiction::UsVirginia => None,
        Jurisdiction::UsFederal | Jurisdiction::Global => Some(72),
    }
}

/// Individual notification windows in hours. `None` means "without undue
/// delay" with no fixed number.
fn individual_hours(jurisdiction: Jurisdiction) -> Option<i64> {
    match jurisdiction {
        Jurisdiction::UsCalifornia | Jurisdiction::Singapore => Some(72),
        Jurisdiction::Australia => Some(720),
        Jurisdiction::UsColorado => Some(720),
        Jurisdiction::UsVirginia => Some(1440),
        _ => None,
    }
}

struct BreachState {
    incidents: HashMap<String, BreachIncident>,
    notifications: HashMap<String, Vec<NotificationRecord>>,
    /// Idempotency keys `"{incident}_{level}"` for delivered alerts.
    sent_alerts: HashSet<String>,
}

/// Breach detection, assessment and notification service.
pub struct BreachNotificationService {
    clock: Arc<dyn Clock>,
    repository: Option<Arc<ComplianceRepository>>,
    state: Mutex<BreachState>,
    alert_callback: Mutex<Option<AlertCallback>>,
}

impl BreachNotificationService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            repository: None,
            state: Mutex::new(BreachState {
                incidents: HashMap::new(),
                notifications: HashMap::new(),
                sent_alerts: HashSet::new(),
            }),
            alert_callback: Mutex::new(None),
        }
    }

    /// Attach a repository so incidents and status changes persist and audit.
    pub fn with_repository(mut self, repository: Arc<ComplianceRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub async fn set_alert_callback(&self, callback: AlertCallback) {
        *self.alert_callback.lock().await = Some(callback);
    }

    /// Report a new breach. Assesses notification requirements and computes
    /// the DPA deadline as discovery + the most urgent jurisdictional window.
    #[allow(clippy::too_many_arguments)]
    pub async fn report_breach(
        &self,
        discovered_by: &str,
        discovery_method: &str,
        breach_type: BreachType,
        severity: BreachSeverity,
        data_categories: Vec<DataClassification>,
        data_elements: Vec<String>,
        jurisdictions: Vec<Jurisdiction>,
        record_count: u64,
        affected_systems: Vec<String>,
        breach_occurred_at: Option<DateTime<Utc>>,
        encryption_in_place: bool,
    ) -> Result<BreachIncident> {
        let now = self.clock.now();
        let mut incident = BreachIncident {
            incident_id: Uuid::new_v4().to_string(),
            discovered_at: now,
            discovered_by: discovered_by.to_string(),
            discovery_method: discovery_method.to_string(),
            breach_type,
            severity,
            status: BreachStatus::Detected,
            data_categories,
            data_elements,
            jurisdictions,
            record_count,
            affected_systems,
            breach_occurred_at: breach_occurred_at.or(Some(now)),
            contained_at: None,
            remediated_at: None,
            closed_at: None,
            risk_assessment: String::new(),
            likely_harm: false,
            encryption_in_place,
            dpa_notification_required: false,
            dpa_notification_deadline: None,
            individual_notification_required: false,
            individual_notification_deadline: None,
            investigation_notes: Vec::new(),
            root_cause: None,
            remediation_actions: Vec::new(),
        };

        self.assess_notification_requirements(&mut incident);
        self.calculate_deadlines(&mut incident);
        incident.individual_notification_required =
            self.requires_individual_notification(&incident);

        if let Some(repository) = &self.repository {
            repository.create_breach(&incident).await?;
            repository
                .append_audit_event(
                    NewAuditEvent::new(
                        AuditEventCategory::BreachResponse,
                        "breach_reported",
                        "report",
                    )
                    .actor(discovered_by)
                    .entity("breach", incident.incident_id.clone())
                    .risk(RiskLevel::Critical),
                )
                .await?;
        }

        let mut state = self.state.lock().await;
        state
            .notifications
            .insert(incident.incident_id.clone(), Vec::new());
        state
            .incidents
            .insert(incident.incident_id.clone(), incident.clone());

        error!(
            incident_id = %incident.incident_id,
            severity = %severity,
            record_count,
            dpa_deadline = ?incident.dpa_notification_deadline,
            "breach reported"
        );

        Ok(incident)
    }

    /// High-risk categories, sensitive elements and large scale each force
    /// DPA notification. Encryption reduces assessed risk but never waives
    /// the duty on its own.
    fn assess_notification_requirements(&self, incident: &mut BreachIncident) {
        if incident
            .data_categories
            .iter()
            .any(|c| c.is_high_risk())
        {
            incident.dpa_notification_required = true;
            incident.likely_harm = true;
        }

        if incident.data_elements.iter().any(|e| {
            let element = e.to_lowercase();
            SENSITIVE_ELEMENTS.iter().any(|s| element.contains(s))
        }) {
            incident.dpa_notification_required = true;
            incident.likely_harm = true;
        }

        if incident.record_count >= 500 {
            incident.dpa_notification_required = true;
        }

        if incident.encryption_in_place {
            incident.risk_assessment = "Data was encrypted - reduced risk".to_string();
        }
    }

    fn requires_individual_notification(&self, incident: &BreachIncident) -> bool {
        if incident.likely_harm {
            return true;
        }
        if incident.record_count >= 500 {
            return true;
        }
        incident.data_categories.iter().any(|c| {
            matches!(
                c,
                DataClassification::SensitivePersonal
                    | DataClassification::Phi
                    | DataClassification::Pci
            )
        })
    }

    /// DPA deadline = discovery + min(window) across affected jurisdictions.
    /// PHI breaches add the HIPAA window: 72h to HHS for 500+ records,
    /// otherwise 60 days.
    fn calculate_deadlines(&self, incident: &mut BreachIncident) {
        let discovery = incident.discovered_at;
        let mut windows: Vec<i64> = incident
            .jurisdictions
            .iter()
            .filter_map(|j| dpa_hours(*j))
            .collect();

        if incident
            .data_categories
            .contains(&DataClassification::Phi)
        {
            windows.push(if incident.record_count >= 500 { 72 } else { 1440 });
        }

        if let Some(hours) = windows.into_iter().min() {
            incident.dpa_notification_deadline = Some(discovery + Duration::hours(hours));
        }

        if let Some(hours) = incident
            .jurisdictions
            .iter()
            .filter_map(|j| individual_hours(*j))
            .min()
        {
            incident.individual_notification_deadline = Some(discovery + Duration::hours(hours));
        }
    }

    /// Advance the incident through its lifecycle, stamping containment,
    /// remediation and closure times. Backward transitions are conflicts,
    /// and closing requires remediation first.
    pub async fn update_status(
        &self,
        incident_id: &str,
        status: BreachStatus,
        notes: &str,
        updated_by: &str,
    ) -> Result<BreachIncident> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let incident = state
            .incidents
            .get_mut(incident_id)
            .ok_or_else(|| Error::not_found(format!("Incident not found: {}", incident_id)))?;

        if status.rank() < incident.status.rank() {
            return Err(Error::conflict(format!(
                "invalid breach transition: {:?} -> {:?}",
                incident.status, status
            )));
        }
        if status == BreachStatus::Closed && incident.remediated_at.is_none() {
            return Err(Error::conflict("incident must be remediated before close"));
        }

        let old_status = incident.status;
        incident.status = status;
        match status {
            BreachStatus::Contained => incident.contained_at = Some(now),
            BreachStatus::Remediated => incident.remediated_at = Some(now),
            BreachStatus::Closed => incident.closed_at = Some(now),
            _ => {}
        }
        if !notes.is_empty() {
            incident
                .investigation_notes
                .push(format!("[{}] {}", now.to_rfc3339(), notes));
        }

        let snapshot = incident.clone();
        if status.is_terminal() {
            Self::clear_alert_keys(&mut state, incident_id);
        }
        drop(state);

        if let Some(repository) = &self.repository {
            repository.update_breach(&snapshot).await?;
            repository
                .append_audit_event(
                    NewAuditEvent::new(
                        AuditEventCategory::BreachResponse,
                        "breach_status_updated",
                        "update_status",
                    )
                    .actor(updated_by)
                    .entity("breach", incident_id)
                    .values(
                        serde_json::to_value(old_status).ok(),
                        serde_json::to_value(status).ok(),
                    )
                    .risk(RiskLevel::High),
                )
                .await?;
        }

        info!(incident_id, old_status = ?old_status, new_status = ?status, updated_by, "breach status updated");
        Ok(snapshot)
    }

    /// Record root cause analysis and the remediation plan.
    pub async fn record_root_cause(
        &self,
        incident_id: &str,
        root_cause: &str,
        remediation_actions: Vec<String>,
    ) -> Result<BreachIncident> {
        let mut state = self.state.lock().await;
        let incident = state
            .incidents
            .get_mut(incident_id)
            .ok_or_else(|| Error::not_found(format!("Incident not found: {}", incident_id)))?;

        incident.root_cause = Some(root_cause.to_string());
        incident.remediation_actions = remediation_actions;
        Ok(incident.clone())
    }

    /// Send the DPA notification for one jurisdiction. Clears the incident's
    /// alert-dedup entries so a reopened deadline can alert afresh.
    pub async fn send_dpa_notification(
        &self,
        incident_id: &str,
        jurisdiction: Jurisdiction,
        recipient_email: &str,
    ) -> Result<NotificationRecord> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let incident = state
            .incidents
            .get(incident_id)
            .ok_or_else(|| Error::not_found(format!("Incident not found: {}", incident_id)))?
            .clone();

        let notification = NotificationRecord {
            notification_id: Uuid::new_v4().to_string(),
            incident_id: incident_id.to_string(),
            recipient_type: NotificationRecipient::SupervisoryAuthority,
            recipient_email: recipient_email.to_string(),
            jurisdiction,
            subject: format!("Data Breach Notification - {}", incident.incident_id),
            status: NotificationStatus::Sent,
            deadline: incident.dpa_notification_deadline,
            sent_at: Some(now),
            acknowledged_at: None,
        };

        state
            .notifications
            .entry(incident_id.to_string())
            .or_default()
            .push(notification.clone());
        Self::clear_alert_keys(&mut state, incident_id);
        drop(state);

        info!(incident_id, jurisdiction = %jurisdiction, "dpa notification sent");
        Ok(notification)
    }

    /// Send notifications to affected individuals.
    pub async fn send_individual_notifications(
        &self,
        incident_id: &str,
        recipients: &[(String, String)],
    ) -> Result<Vec<NotificationRecord>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if !state.incidents.contains_key(incident_id) {
            return Err(Error::not_found(format!(
                "Incident not found: {}",
                incident_id
            )));
        }

        let mut sent = Vec::new();
        for (_recipient_id, email) in recipients {
            let notification = NotificationRecord {
                notification_id: Uuid::new_v4().to_string(),
                incident_id: incident_id.to_string(),
                recipient_type: NotificationRecipient::DataSubjects,
                recipient_email: email.clone(),
                jurisdiction: Jurisdiction::Global,
                subject: "Important: Security Incident Notification".to_string(),
                status: NotificationStatus::Sent,
                deadline: None,
                sent_at: Some(now),
                acknowledged_at: None,
            };
            state
                .notifications
                .entry(incident_id.to_string())
                .or_default()
                .push(notification.clone());
            sent.push(notification);
        }

        info!(incident_id, count = sent.len(), "individual notifications sent");
        Ok(sent)
    }

    pub async fn get_incident(&self, incident_id: &str) -> Option<BreachIncident> {
        self.state.lock().await.incidents.get(incident_id).cloned()
    }

    pub async fn notifications_for(&self, incident_id: &str) -> Vec<NotificationRecord> {
        self.state
            .lock()
            .await
            .notifications
            .get(incident_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Incidents with a required-but-unsent DPA notification past deadline.
    pub async fn get_overdue_notifications(&self) -> Vec<(String, DateTime<Utc>, f64)> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let mut overdue = Vec::new();

        for (incident_id, incident) in &state.incidents {
            if incident.status.is_terminal() || !incident.dpa_notification_required {
                continue;
            }
            if Self::dpa_sent(&state, incident_id) {
                continue;
            }
            if let Some(deadline) = incident.dpa_notification_deadline {
                if now > deadline {
                    let hours_overdue = (now - deadline).num_seconds() as f64 / 3600.0;
                    overdue.push((incident_id.clone(), deadline, hours_overdue));
                }
            }
        }

        overdue
    }

    fn dpa_sent(state: &BreachState, incident_id: &str) -> bool {
        state
            .notifications
            .get(incident_id)
            .map(|list| {
                list.iter().any(|n| {
                    n.recipient_type == NotificationRecipient::SupervisoryAuthority
                        && n.status == NotificationStatus::Sent
                })
            })
            .unwrap_or(false)
    }

    fn clear_alert_keys(state: &mut BreachState, incident_id: &str) {
        let prefix = format!("{}_", incident_id);
        state.sent_alerts.retain(|key| !key.starts_with(&prefix));
    }

    /// Current alert set: one entry per (incident, jurisdiction) whose
    /// unsent, required DPA notification is within an alert window.
    pub async fn get_approaching_deadlines(&self) -> Vec<DeadlineAlert> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let mut alerts = Vec::new();

        for (incident_id, incident) in &state.incidents {
            if incident.status.is_terminal() {
                continue;
            }
            if !incident.dpa_notification_required {
                continue;
            }
            if Self::dpa_sent(&state, incident_id) {
                continue;
            }
            let Some(deadline) = incident.dpa_notification_deadline else {
                continue;
            };

            let hours_remaining = (deadline - now).num_seconds() as f64 / 3600.0;
            let Some(level) = AlertLevel::for_hours_remaining(hours_remaining) else {
                continue;
            };

            for jurisdiction in &incident.jurisdictions {
                alerts.push(DeadlineAlert {
                    incident_id: incident_id.clone(),
                    jurisdiction: *jurisdiction,
                    deadline,
                    level,
                    hours_remaining,
                });
            }
        }

        alerts
    }

    /// Scheduler tick: deliver each new alert level once per incident.
    /// Intended cadence is every 15 minutes; every tick is idempotent.
    pub async fn check_and_alert_deadlines(&self) -> Vec<DeadlineAlert> {
        let alerts = self.get_approaching_deadlines().await;
        let mut delivered = Vec::new();

        {
            let mut state = self.state.lock().await;
            for alert in alerts {
                let key = format!("{}_{}", alert.incident_id, alert.level.as_str());
                if state.sent_alerts.contains(&key) {
                    continue;
                }
                state.sent_alerts.insert(key);
                delivered.push(alert);
            }
        }

        let callback = self.alert_callback.lock().await.clone();
        for alert in &delivered {
            match alert.level {
                AlertLevel::Overdue => error!(
                    incident_id = %alert.incident_id,
                    jurisdiction = %alert.jurisdiction,
                    hours_overdue = alert.hours_remaining.abs(),
                    "breach notification deadline overdue"
                ),
                _ => warn!(
                    incident_id = %alert.incident_id,
                    jurisdiction = %alert.jurisdiction,
                    level = alert.level.as_str(),
                    hours_remaining = alert.hours_remaining,
                    "breach notification deadline approaching"
                ),
            }

            if let Some(callback) = &callback {
                callback(alert.clone()).await;
            }
        }

        delivered
    }

    /// Spawn the periodic scheduler. Returns the task handle; abort it on
    /// shutdown.
    pub fn spawn_scheduler(
        self: Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.check_and_alert_deadlines().await;
            }
        })
    }

    /// Summary of current alerts grouped by level.
    pub async fn get_alert_summary(&self) -> HashMap<&'static str, usize> {
        let alerts = self.get_approaching_deadlines().await;
        let mut summary: HashMap<&'static str, usize> = HashMap::new();
        for level in [
            AlertLevel::Warning,
            AlertLevel::Urgent,
            AlertLevel::Critical,
            AlertLevel::Imminent,
            AlertLevel::Overdue,
        ] {
            summary.insert(
                level.as_str(),
                alerts.iter().filter(|a| a.level == level).count(),
            );
        }
        summary
    }

    /// Compliance dashboard metrics.
    pub async fn get_metrics(&self) -> serde_json::Value {
        let state = self.state.lock().await;
        let incidents: Vec<&BreachIncident> = state.incidents.values().collect();

        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        for incident in &incidents {
            *by_status
                .entry(format!("{:?}", incident.status).to_lowercase())
                .or_default() += 1;
            *by_severity.entry(incident.severity.to_string()).or_default() += 1;
        }

        json!({
            "total_incidents": incidents.len(),
            "by_status": by_status,
            "by_severity": by_severity,
            "total_records_affected": incidents.iter().map(|i| i.record_count).sum::<u64>(),
            "notifications_sent": state.notifications.values().map(|n| n.len()).sum::<usize>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use forge_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service() -> (Arc<ManualClock>, Arc<BreachNotificationService>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        ));
        let service = Arc::new(BreachNotificationService::new(clock.clone()));
        (clock, service)
    }

    async fn report_eu_ssn_breach(service: &BreachNotificationService) -> BreachIncident {
        service
            .report_breach(
                "security-team",
                "automated",
                BreachType::UnauthorizedAccess,
                BreachSeverity::High,
                vec![DataClassification::PersonalData],
                vec!["ssn".to_string()],
                vec![Jurisdiction::Eu],
                1200,
                vec!["crm".to_string()],
                None,
                false,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ssn_and_scale_force_notification() {
        let (clock, service) = service();
        let incident = report_eu_ssn_breach(&service).await;

        assert!(incident.dpa_notification_required);
        assert!(incident.individual_notification_required);
        assert!(incident.likely_harm);
        assert_eq!(
            incident.dpa_notification_deadline.unwrap(),
            clock.now() + Duration::hours(72)
        );
    }

    #[tokio::test]
    async fn encryption_reduces_risk_but_does_not_waive() {
        let (_, service) = service();
        let incident = service
            .report_breach(
                "sec",
                "audit",
                BreachType::LostDevice,
                BreachSeverity::Medium,
                vec![DataClassification::Phi],
                vec![],
                vec![Jurisdiction::Eu],
                10,
                vec![],
                None,
                true,
            )
            .await
            .unwrap();

        assert!(incident.dpa_notification_required);
        assert_eq!(incident.risk_assessment, "Data was encrypted - reduced risk");
    }

    #[tokio::test]
    async fn hipaa_small_breach_gets_sixty_day_window() {
        let (clock, service) = service();
        let incident = service
            .report_breach(
                "sec",
                "report",
                BreachType::UnauthorizedDisclosure,
                BreachSeverity::Medium,
                vec![DataClassification::Phi],
                vec![],
                vec![Jurisdiction::UsColorado],
                120,
                vec![],
                None,
                false,
            )
            .await
            .unwrap();

        // Colorado has no DPA window; HIPAA's 1440h applies for <500 records.
        assert_eq!(
            incident.dpa_notification_deadline.unwrap(),
            clock.now() + Duration::hours(1440)
        );
    }

    #[tokio::test]
    async fn alert_ladder_fires_each_level_exactly_once() {
        let (clock, service) = service();
        let incident = report_eu_ssn_breach(&service).await;

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        service
            .set_alert_callback(Arc::new(move |_alert| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }))
            .await;

        // t0+48h: 24h remaining -> warning
        clock.set(incident.discovered_at + Duration::hours(48));
        let alerts = service.check_and_alert_deadlines().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);

        // Re-ticking emits nothing new.
        assert!(service.check_and_alert_deadlines().await.is_empty());

        for (hours, level) in [
            (60, AlertLevel::Urgent),
            (66, AlertLevel::Critical),
            (71, AlertLevel::Imminent),
            (73, AlertLevel::Overdue),
        ] {
            clock.set(incident.discovered_at + Duration::hours(hours));
            let alerts = service.check_and_alert_deadlines().await;
            assert_eq!(alerts.len(), 1, "at +{}h", hours);
            assert_eq!(alerts[0].level, level, "at +{}h", hours);
            assert!(service.check_and_alert_deadlines().await.is_empty());
        }

        assert_eq!(delivered.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn warning_fires_just_inside_the_window() {
        let (clock, service) = service();
        let incident = report_eu_ssn_breach(&service).await;

        // 23h59m59s before has >24h remaining: nothing yet.
        clock.set(incident.discovered_at + Duration::hours(47));
        assert!(service.check_and_alert_deadlines().await.is_empty());

        // One second past the 24h mark triggers exactly one warning.
        clock.set(incident.discovered_at + Duration::hours(48) + Duration::seconds(1));
        let alerts = service.check_and_alert_deadlines().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
    }

    #[tokio::test]
    async fn sending_dpa_notification_stops_alerts() {
        let (clock, service) = service();
        let incident = report_eu_ssn_breach(&service).await;

        clock.set(incident.discovered_at + Duration::hours(60));
        assert!(!service.check_and_alert_deadlines().await.is_empty());

        let notification = service
            .send_dpa_notification(&incident.incident_id, Jurisdiction::Eu, "dpa@edpb.europa.eu")
            .await
            .unwrap();
        assert_eq!(notification.status, NotificationStatus::Sent);
        // Deadline preserved on the record for audit.
        assert_eq!(notification.deadline, incident.dpa_notification_deadline);

        clock.set(incident.discovered_at + Duration::hours(73));
        assert!(service.check_and_alert_deadlines().await.is_empty());
        assert!(service.get_overdue_notifications().await.is_empty());
    }

    #[tokio::test]
    async fn status_walk_stamps_timestamps() {
        let (clock, service) = service();
        let incident = report_eu_ssn_breach(&service).await;
        let id = incident.incident_id.clone();

        clock.advance(Duration::hours(1));
        service
            .update_status(&id, BreachStatus::Investigating, "triage", "ir-team")
            .await
            .unwrap();
        clock.advance(Duration::hours(1));
        let contained = service
            .update_status(&id, BreachStatus::Contained, "access revoked", "ir-team")
            .await
            .unwrap();
        assert_eq!(contained.contained_at.unwrap(), clock.now());

        service
            .update_status(&id, BreachStatus::Assessed, "", "ir-team")
            .await
            .unwrap();
        service
            .update_status(&id, BreachStatus::Notifying, "", "ir-team")
            .await
            .unwrap();
        let remediated = service
            .update_status(&id, BreachStatus::Remediated, "patched", "ir-team")
            .await
            .unwrap();
        assert!(remediated.remediated_at.is_some());

        let closed = service
            .update_status(&id, BreachStatus::Closed, "", "ir-team")
            .await
            .unwrap();
        assert!(closed.closed_at.is_some());
    }

    #[tokio::test]
    async fn close_requires_remediation() {
        let (_, service) = service();
        let incident = report_eu_ssn_breach(&service).await;

        let err = service
            .update_status(&incident.incident_id, BreachStatus::Closed, "", "ir")
            .await
            .unwrap_err();
        assert_eq!(err.kind, forge_core::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn backward_transition_is_a_conflict() {
        let (_, service) = service();
        let incident = report_eu_ssn_breach(&service).await;

        service
            .update_status(&incident.incident_id, BreachStatus::Contained, "", "ir")
            .await
            .unwrap();
        let err = service
            .update_status(&incident.incident_id, BreachStatus::Detected, "", "ir")
            .await
            .unwrap_err();
        assert_eq!(err.kind, forge_core::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn repository_wiring_persists_and_audits() {
        use forge_core::MemoryGraph;

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryGraph::new());
        let repository = Arc::new(ComplianceRepository::new(store, clock.clone()));
        repository.initialize().await.unwrap();

        let service = Arc::new(
            BreachNotificationService::new(clock.clone()).with_repository(repository.clone()),
        );
        let incident = report_eu_ssn_breach(&service).await;

        let stored = repository
            .get_breach(&incident.incident_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.record_count, 1200);
        assert!(stored.dpa_notification_required);
        assert_eq!(stored.jurisdictions, vec![Jurisdiction::Eu]);

        service
            .update_status(&incident.incident_id, BreachStatus::Contained, "", "ir")
            .await
            .unwrap();
        let events = repository
            .get_audit_events_for_entity("breach", &incident.incident_id)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(repository.verify_audit_chain().await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn low_risk_breach_requires_nothing() {
        let (_, service) = service();
        let incident = service
            .report_breach(
                "sec",
                "report",
                BreachType::AccidentalDisclosure,
                BreachSeverity::Low,
                vec![DataClassification::Internal],
                vec!["email".to_string()],
                vec![Jurisdiction::Eu],
                3,
                vec![],
                None,
                false,
            )
            .await
            .unwrap();

        assert!(!incident.dpa_notification_required);
        assert!(!incident.individual_notification_required);
        assert!(service.check_and_alert_deadlines().await.is_empty());
    }
}
