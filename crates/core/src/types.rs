use serde::{Deserialize, Serialize};

/// Classification levels for protected data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    PersonalData,
    SensitivePersonal,
    Phi,
    Pci,
    Financial,
}

impl DataClassification {
    /// Classifications whose access is always audited and whose exposure in a
    /// breach forces notification.
    pub fn is_high_risk(&self) -> bool {
        matches!(
            self,
            DataClassification::SensitivePersonal
                | DataClassification::Phi
                | DataClassification::Pci
                | DataClassification::Financial
        )
    }

    pub fn all() -> Vec<DataClassification> {
        vec![
            DataClassification::Public,
            DataClassification::Internal,
            DataClassification::Confidential,
            DataClassification::PersonalData,
            DataClassification::SensitivePersonal,
            DataClassification::Phi,
            DataClassification::Pci,
            DataClassification::Financial,
        ]
    }
}

/// Jurisdictions with breach / DSAR obligations we track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jurisdiction {
    Eu,
    Uk,
    UsCalifornia,
    UsColorado,
    UsVirginia,
    UsFederal,
    Brazil,
    Australia,
    Singapore,
    India,
    China,
    Global,
}

impl std::fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Jurisdiction::Eu => "eu",
            Jurisdiction::Uk => "uk",
            Jurisdiction::UsCalifornia => "us_california",
            Jurisdiction::UsColorado => "us_colorado",
            Jurisdiction::UsVirginia => "us_virginia",
            Jurisdiction::UsFederal => "us_federal",
            Jurisdiction::Brazil => "brazil",
            Jurisdiction::Australia => "australia",
            Jurisdiction::Singapore => "singapore",
            Jurisdiction::India => "india",
            Jurisdiction::China => "china",
            Jurisdiction::Global => "global",
        };
        write!(f, "{}", name)
    }
}

/// Regulatory frameworks a request or record can fall under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceFramework {
    Gdpr,
    UkGdpr,
    Ccpa,
    Lgpd,
    Hipaa,
    PciDss,
    Soc2,
}

/// Risk levels used on audit events and incident assessments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{}", name)
    }
}

/// Which access-control model the policy engine runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessControlModel {
    Rbac,
    Abac,
    Hybrid,
}

/// Ordered breach severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreachSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for BreachSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BreachSeverity::Low => "low",
            BreachSeverity::Medium => "medium",
            BreachSeverity::High => "high",
            BreachSeverity::Critical => "critical",
        };
        write!(f, "{}", name)
    }
}

/// Categories for the hash-chained audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventCategory {
    DataAccess,
    Authentication,
    Configuration,
    BreachResponse,
    DsarProcessing,
    AiDecision,
}

impl std::fmt::Display for AuditEventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuditEventCategory::DataAccess => "data_access",
            AuditEventCategory::Authentication => "authentication",
            AuditEventCategory::Configuration => "configuration",
            AuditEventCategory::BreachResponse => "breach_response",
            AuditEventCategory::DsarProcessing => "dsar_processing",
            AuditEventCategory::AiDecision => "ai_decision",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_risk_classifications() {
        assert!(DataClassification::Phi.is_high_risk());
        assert!(DataClassification::Pci.is_high_risk());
        assert!(DataClassification::SensitivePersonal.is_high_risk());
        assert!(DataClassification::Financial.is_high_risk());
        assert!(!DataClassification::Internal.is_high_risk());
        assert!(!DataClassification::PersonalData.is_high_risk());
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }
}
