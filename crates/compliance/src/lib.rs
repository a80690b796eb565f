//! Regulatory access and incident core.
//!
//! Mediates access to personal data under RBAC/ABAC policy, verifies bearer
//! tokens against a revocation blacklist, appends hash-chained audit events,
//! and drives the DSAR, breach-notification and consent workflows.

pub mod access;
pub mod audit;
pub mod authn;
pub mod blacklist;
pub mod breach;
pub mod consent;
pub mod dsar;
pub mod repository;
pub mod tokens;

pub use access::{
    AccessControlService, AccessDecision, AttributePolicy, Permission, PolicyEffect, ResourceType,
    Role,
};
pub use audit::{AuditEventRecord, ChainVerification, NewAuditEvent};
pub use authn::{
    AuthSession, AuthenticationService, MfaChallenge, MfaMethod, PasswordPolicy, PasswordService,
};
pub use blacklist::{BlacklistConfig, TokenBlacklist, BLACKLIST_KEY_PREFIX};
pub use breach::{
    AlertLevel, BreachIncident, BreachNotificationService, BreachStatus, BreachType, DeadlineAlert,
    NotificationRecipient, NotificationRecord, NotificationStatus,
};
pub use consent::{ConsentRecord, ConsentRegistry};
pub use dsar::{CreateDsarRequest, Dsar, DsarRequestType, DsarStatus, DsarWorkflow};
pub use repository::ComplianceRepository;
pub use tokens::{extract_token, ComplianceUser, CredentialVerifier, TokenClaims};
