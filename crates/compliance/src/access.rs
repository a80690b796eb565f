//! RBAC role graph + ABAC attribute policies.
//!
//! Decision procedure: resolve the subject's roles, try each role for a
//! grant, then (under ABAC/HYBRID) evaluate attribute policies. A matching
//! deny policy overrides any allow. No match denies with an audit flag.

use chrono::{Duration, Timelike};
use forge_core::{AccessControlModel, Clock, DataClassification};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// System permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Delete,
    Export,
    Admin,
    ManageUsers,
    ManageRoles,
    ViewAudit,
    ProcessDsar,
    ManageConsent,
    BreachResponse,
    ComplianceAdmin,
    AiReview,
    AiOverride,
    AiAdmin,
}

impl Permission {
    pub fn all() -> Vec<Permission> {
        use Permission::*;
        vec![
            Read, Write, Delete, Export, Admin, ManageUsers, ManageRoles, ViewAudit, ProcessDsar,
            ManageConsent, BreachResponse, ComplianceAdmin, AiReview, AiOverride, AiAdmin,
        ]
    }
}

/// Resource types access decisions are scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Capsule,
    User,
    Proposal,
    AuditLog,
    Consent,
    Dsar,
    Breach,
    AiSystem,
    AiDecision,
    SystemConfig,
    DiagnosisSession,
}

impl ResourceType {
    pub fn all() -> Vec<ResourceType> {
        use ResourceType::*;
        vec![
            Capsule,
            User,
            Proposal,
            AuditLog,
            Consent,
            Dsar,
            Breach,
            AiSystem,
            AiDecision,
            SystemConfig,
            DiagnosisSession,
        ]
    }
}

/// Role definition for RBAC. Privileged roles always require MFA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub role_id: String,
    pub name: String,
    pub description: String,
    pub permissions: HashSet<Permission>,
    pub resource_types: HashSet<ResourceType>,
    pub data_classifications: HashSet<DataClassification>,
    pub is_privileged: bool,
    /// Seconds; privileged roles cap lower than the default 8h.
    pub max_session_secs: i64,
    pub requires_mfa: bool,
}

impl Role {
    pub fn max_session_duration(&self) -> Duration {
        Duration::seconds(self.max_session_secs)
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn can_access_resource(&self, resource_type: ResourceType) -> bool {
        self.resource_types.contains(&resource_type)
    }

    pub fn can_access_classification(&self, classification: DataClassification) -> bool {
        self.data_classifications.contains(&classification)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

/// Attribute-based policy. Evaluation is pure over the
/// (subject, resource, environment) triple; `time_of_day = "business_hours"`
/// is the one environment key with special handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributePolicy {
    pub policy_id: String,
    pub name: String,
    pub description: String,
    pub subject_attributes: HashMap<String, Value>,
    pub resource_attributes: HashMap<String, Value>,
    pub environment_attributes: HashMap<String, Value>,
    pub effect: PolicyEffect,
    pub permissions: HashSet<Permission>,
}

impl AttributePolicy {
    fn evaluate(
        &self,
        subject: &HashMap<String, Value>,
        resource: &HashMap<String, Value>,
        environment: &HashMap<String, Value>,
        current_hour: u32,
    ) -> bool {
        for (attr, value) in &self.subject_attributes {
            if subject.get(attr) != Some(value) {
                return false;
            }
        }
        for (attr, value) in &self.resource_attributes {
            if resource.get(attr) != Some(value) {
                return false;
            }
        }
        for (attr, value) in &self.environment_attributes {
            if attr == "time_of_day" {
                if value == "business_hours" && !(9..=17).contains(&current_hour) {
                    return false;
                }
            } else if environment.get(attr) != Some(value) {
                return false;
            }
        }
        true
    }
}

/// Result of access control evaluation. Request-scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
    pub policy_id: Option<String>,
    pub role_id: Option<String>,
    pub requires_mfa: bool,
    pub requires_justification: bool,
    pub audit_required: bool,
}

impl AccessDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            policy_id: None,
            role_id: None,
            requires_mfa: false,
            requires_justification: false,
            audit_required: true,
        }
    }
}

/// Extra request context for ABAC evaluation.
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    pub subject: HashMap<String, Value>,
    pub resource: HashMap<String, Value>,
    pub environment: HashMap<String, Value>,
}

/// Access policy engine. Policies may be hot-reloaded through
/// [`upsert_policy`](Self::upsert_policy); role mutations are admin actions.
pub struct AccessControlService {
    model: AccessControlModel,
    clock: Arc<dyn Clock>,
    roles: RwLock<HashMap<String, Role>>,
    user_roles: RwLock<HashMap<String, HashSet<String>>>,
    policies: RwLock<HashMap<String, AttributePolicy>>,
}

impl AccessControlService {
    pub fn new(model: AccessControlModel, clock: Arc<dyn Clock>) -> Self {
        Self {
            model,
            clock,
            roles: RwLock::new(HashMap::new()),
            user_roles: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the default role hierarchy. Call once at startup.
    pub async fn initialize_default_roles(&self) {
        let mut roles = self.roles.write().await;
        for role in Self::default_roles() {
            roles.insert(role.role_id.clone(), role);
        }
    }

    fn default_roles() -> Vec<Role> {
        use Permission::*;
        vec![
            Role {
                role_id: "user".into(),
                name: "User".into(),
                description: "Standard user with basic access".into(),
                permissions: [Read].into_iter().collect(),
                resource_types: [ResourceType::Capsule, ResourceType::Proposal]
                    .into_iter()
                    .collect(),
                data_classifications: [DataClassification::Public, DataClassification::Internal]
                    .into_iter()
                    .collect(),
                is_privileged: false,
                max_session_secs: 8 * 3600,
                requires_mfa: false,
            },
            Role {
                role_id: "data_steward".into(),
                name: "Data Steward".into(),
                description: "Manages data quality and governance".into(),
                permissions: [Read, Write, ProcessDsar, ManageConsent].into_iter().collect(),
                resource_types: [
                    ResourceType::Capsule,
                    ResourceType::Consent,
                    ResourceType::Dsar,
                    ResourceType::User,
                ]
                .into_iter()
                .collect(),
                data_classifications: [
                    DataClassification::Public,
                    DataClassification::Internal,
                    DataClassification::Confidential,
                    DataClassification::PersonalData,
                ]
                .into_iter()
                .collect(),
                is_privileged: false,
                max_session_secs: 8 * 3600,
                requires_mfa: true,
            },
            Role {
                role_id: "compliance_officer".into(),
                name: "Compliance Officer".into(),
                description: "Full compliance management access".into(),
                permissions: [
                    Read,
                    Write,
                    Export,
                    ProcessDsar,
                    ManageConsent,
                    BreachResponse,
                    ComplianceAdmin,
                    ViewAudit,
                ]
                .into_iter()
                .collect(),
                resource_types: ResourceType::all().into_iter().collect(),
                data_classifications: DataClassification::all().into_iter().collect(),
                is_privileged: true,
                max_session_secs: 8 * 3600,
                requires_mfa: true,
            },
            Role {
                role_id: "ai_reviewer".into(),
                name: "AI Reviewer".into(),
                description: "Reviews and overrides AI decisions".into(),
                permissions: [Read, AiReview, AiOverride].into_iter().collect(),
                resource_types: [
                    ResourceType::AiSystem,
                    ResourceType::AiDecision,
                    ResourceType::Capsule,
                ]
                .into_iter()
                .collect(),
                data_classifications: [
                    DataClassification::Public,
                    DataClassification::Internal,
                    DataClassification::Confidential,
                ]
                .into_iter()
                .collect(),
                is_privileged: false,
                max_session_secs: 8 * 3600,
                requires_mfa: true,
            },
            Role {
                role_id: "admin".into(),
                name: "Administrator".into(),
                description: "Full system access".into(),
                permissions: Permission::all().into_iter().collect(),
                resource_types: ResourceType::all().into_iter().collect(),
                data_classifications: DataClassification::all().into_iter().collect(),
                is_privileged: true,
                // Privileged sessions cap at 4h.
                max_session_secs: 4 * 3600,
                requires_mfa: true,
            },
        ]
    }

    pub async fn assign_role(&self, user_id: &str, role_id: &str, assigned_by: &str) -> bool {
        let roles = self.roles.read().await;
        if !roles.contains_key(role_id) {
            warn!(role_id, "role not found");
            return false;
        }
        drop(roles);

        let mut user_roles = self.user_roles.write().await;
        user_roles
            .entry(user_id.to_string())
            .or_default()
            .insert(role_id.to_string());

        info!(user_id, role_id, assigned_by, "role assigned");
        true
    }

    pub async fn revoke_role(&self, user_id: &str, role_id: &str, revoked_by: &str) -> bool {
        let mut user_roles = self.user_roles.write().await;
        if let Some(assigned) = user_roles.get_mut(user_id) {
            assigned.remove(role_id);
            info!(user_id, role_id, revoked_by, "role revoked");
            return true;
        }
        false
    }

    pub async fn get_user_roles(&self, user_id: &str) -> Vec<Role> {
        let user_roles = self.user_roles.read().await;
        let roles = self.roles.read().await;
        user_roles
            .get(user_id)
            .map(|ids| ids.iter().filter_map(|id| roles.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn get_effective_permissions(&self, user_id: &str) -> HashSet<Permission> {
        let mut permissions = HashSet::new();
        for role in self.get_user_roles(user_id).await {
            permissions.extend(role.permissions.iter().copied());
        }
        permissions
    }

    pub async fn is_privileged_user(&self, user_id: &str) -> bool {
        self.get_user_roles(user_id)
            .await
            .iter()
            .any(|r| r.is_privileged)
    }

    /// Register or replace a role definition. Admin action.
    pub async fn upsert_role(&self, role: Role) {
        self.roles.write().await.insert(role.role_id.clone(), role);
    }

    /// Register or replace an attribute policy. Hot-reload allowed.
    pub async fn upsert_policy(&self, policy: AttributePolicy) {
        self.policies
            .write()
            .await
            .insert(policy.policy_id.clone(), policy);
    }

    /// Evaluate an access request.
    pub async fn check_access(
        &self,
        user_id: &str,
        permission: Permission,
        resource_type: ResourceType,
        data_classification: Option<DataClassification>,
        context: Option<&AccessContext>,
    ) -> AccessDecision {
        let roles = self.get_user_roles(user_id).await;
        if roles.is_empty() {
            return AccessDecision::deny("No roles assigned to user");
        }

        // RBAC first.
        for role in &roles {
            if !role.has_permission(permission) {
                continue;
            }
            if !role.can_access_resource(resource_type) {
                continue;
            }
            if let Some(classification) = data_classification {
                if !role.can_access_classification(classification) {
                    continue;
                }
            }

            return AccessDecision {
                allowed: true,
                reason: format!("Access granted by role: {}", role.name),
                policy_id: None,
                role_id: Some(role.role_id.clone()),
                requires_mfa: role.requires_mfa,
                requires_justification: self
                    .requires_justification_inner(&roles, resource_type),
                audit_required: role.is_privileged
                    || data_classification.map(|c| c.is_high_risk()).unwrap_or(false),
            };
        }

        // ABAC fallback. A matching deny overrides any allow.
        if matches!(
            self.model,
            AccessControlModel::Abac | AccessControlModel::Hybrid
        ) {
            let current_hour = self.clock.now().hour();
            let empty = AccessContext::default();
            let ctx = context.unwrap_or(&empty);

            let mut subject = ctx.subject.clone();
            subject.insert("user_id".into(), Value::String(user_id.to_string()));

            let mut resource = ctx.resource.clone();
            resource.insert(
                "type".into(),
                serde_json::to_value(resource_type).unwrap_or(Value::Null),
            );
            if let Some(classification) = data_classification {
                resource.insert(
                    "classification".into(),
                    serde_json::to_value(classification).unwrap_or(Value::Null),
                );
            }

            let policies = self.policies.read().await;
            let mut allow_match: Option<&AttributePolicy> = None;
            for policy in policies.values() {
                if !policy.permissions.contains(&permission) {
                    continue;
                }
                if !policy.evaluate(&subject, &resource, &ctx.environment, current_hour) {
                    continue;
                }
                match policy.effect {
                    PolicyEffect::Deny => {
                        return AccessDecision {
                            allowed: false,
                            reason: format!("Access denied by policy: {}", policy.name),
                            policy_id: Some(policy.policy_id.clone()),
                            role_id: None,
                            requires_mfa: false,
                            requires_justification: false,
                            audit_required: true,
                        };
                    }
                    PolicyEffect::Allow => {
                        if allow_match.is_none() {
                            allow_match = Some(policy);
                        }
                    }
                }
            }

            if let Some(policy) = allow_match {
                return AccessDecision {
                    allowed: true,
                    reason: format!("Access granted by policy: {}", policy.name),
                    policy_id: Some(policy.policy_id.clone()),
                    role_id: None,
                    requires_mfa: false,
                    requires_justification: false,
                    audit_required: true,
                };
            }
        }

        AccessDecision::deny("No role or policy grants required access")
    }

    /// Privileged access to the audit log, system config or breach records
    /// requires a recorded justification.
    pub async fn requires_justification(&self, user_id: &str, resource_type: ResourceType) -> bool {
        let roles = self.get_user_roles(user_id).await;
        self.requires_justification_inner(&roles, resource_type)
    }

    fn requires_justification_inner(&self, roles: &[Role], resource_type: ResourceType) -> bool {
        let sensitive = matches!(
            resource_type,
            ResourceType::AuditLog | ResourceType::SystemConfig | ResourceType::Breach
        );
        sensitive && roles.iter().any(|r| r.is_privileged)
    }
}
