//! Data models for differential diagnosis sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of a diagnosis session. `Complete` and `Expired` are terminal;
/// `Paused` flips back to questioning or refining on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosisState {
    Intake,
    Analyzing,
    Questioning,
    Refining,
    Complete,
    Paused,
    Expired,
}

impl DiagnosisState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DiagnosisState::Complete | DiagnosisState::Expired)
    }
}

/// Kind of clinical evidence. The tagged variant replaces the freeform
/// mappings at the intake boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    Phenotype,
    Genetic,
    Laboratory,
    Imaging,
    History,
    Family,
    Medication,
    Wearable,
    Other,
}

/// Whether evidence supports or refutes a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidencePolarity {
    Supports,
    Refutes,
    Neutral,
    Unknown,
}

/// A piece of clinical evidence: phenotype, variant, history item, etc.
/// A negated item flips its polarity from supporting to refuting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub kind: EvidenceKind,
    /// The evidence value or description.
    pub value: String,
    /// Standardized code (HPO term, gene symbol).
    pub code: Option<String>,
    pub negated: bool,
    /// For variants this carries the pathogenicity string.
    pub severity: Option<String>,
    pub confidence: f64,
    /// Explicitly confirmed by the user (e.g. via an answered question).
    pub confirmed: bool,
    pub recorded_at: DateTime<Utc>,
}

impl EvidenceItem {
    pub fn new(kind: EvidenceKind, value: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            value: value.into(),
            code: None,
            negated: false,
            severity: None,
            confidence: 1.0,
            confirmed: false,
            recorded_at,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn negated(mut self, negated: bool) -> Self {
        self.negated = negated;
        self
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }
}

/// Genetic variant input at the intake boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantInput {
    pub gene_symbol: String,
    pub notation: String,
    pub pathogenicity: String,
    pub zygosity: Option<String>,
}

/// A candidate diagnosis with its evidence and scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisHypothesis {
    pub id: String,
    pub disease_id: String,
    pub disease_name: String,
    pub description: Option<String>,

    // Scores
    pub prior_probability: f64,
    pub posterior_probability: f64,
    pub phenotype_score: f64,
    pub genetic_score: f64,
    pub history_score: f64,
    pub combined_score: f64,

    // Evidence classification, recomputed every scoring pass.
    pub supporting_evidence: Vec<EvidenceItem>,
    pub refuting_evidence: Vec<EvidenceItem>,
    pub neutral_evidence: Vec<EvidenceItem>,

    // Phenotype details
    pub matched_phenotypes: Vec<String>,
    pub expected_phenotypes: Vec<String>,
    pub missing_phenotypes: Vec<String>,

    // Genetic details
    pub associated_genes: Vec<String>,

    pub rank: usize,
}

impl DiagnosisHypothesis {
    pub fn new(disease_id: impl Into<String>, disease_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            disease_id: disease_id.into(),
            disease_name: disease_name.into(),
            description: None,
            prior_probability: 0.001,
            posterior_probability: 0.0,
            phenotype_score: 0.0,
            genetic_score: 0.0,
            history_score: 0.0,
            combined_score: 0.0,
            supporting_evidence: Vec::new(),
            refuting_evidence: Vec::new(),
            neutral_evidence: Vec::new(),
            matched_phenotypes: Vec::new(),
            expected_phenotypes: Vec::new(),
            missing_phenotypes: Vec::new(),
            associated_genes: Vec::new(),
            rank: 0,
        }
    }

    /// Bucketed evidence strength for summaries.
    pub fn evidence_strength(&self) -> &'static str {
        if self.combined_score >= 0.8 {
            "strong"
        } else if self.combined_score >= 0.5 {
            "moderate"
        } else if self.combined_score >= 0.2 {
            "weak"
        } else {
            "minimal"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Binary,
    MultipleChoice,
    FreeText,
    Numeric,
}

/// A follow-up question generated to discriminate between top hypotheses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpQuestion {
    pub id: String,
    pub question_text: String,
    pub kind: QuestionKind,
    /// HPO id when asking about a phenotype.
    pub target_phenotype: Option<String>,
    /// Evidence class targeted otherwise ("genetic").
    pub target_evidence: Option<String>,
    pub options: Vec<(String, String)>,
    pub hypotheses_affected: Vec<String>,
    pub information_gain: f64,
    pub priority: u8,
    pub answer: Option<String>,
    pub answered_at: Option<DateTime<Utc>>,
}

/// Patient demographics, history and collected evidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientProfile {
    pub id: String,
    pub age: Option<u32>,
    pub age_of_onset: Option<u32>,
    pub sex: Option<String>,

    pub phenotypes: Vec<EvidenceItem>,
    pub genetic_variants: Vec<EvidenceItem>,
    pub medical_history: Vec<EvidenceItem>,
    pub family_history: Vec<EvidenceItem>,
    pub wearable_data: Vec<EvidenceItem>,

    pub existing_diagnoses: Vec<String>,
    pub medications: Vec<String>,
}

impl PatientProfile {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    pub fn all_evidence(&self) -> Vec<&EvidenceItem> {
        self.phenotypes
            .iter()
            .chain(self.genetic_variants.iter())
            .chain(self.medical_history.iter())
            .chain(self.family_history.iter())
            .chain(self.wearable_data.iter())
            .collect()
    }

    /// Present (non-negated) HPO codes.
    pub fn phenotype_codes(&self) -> Vec<String> {
        self.phenotypes
            .iter()
            .filter(|e| !e.negated)
            .filter_map(|e| e.code.clone())
            .collect()
    }

    /// Explicitly absent HPO codes.
    pub fn negated_phenotype_codes(&self) -> Vec<String> {
        self.phenotypes
            .iter()
            .filter(|e| e.negated)
            .filter_map(|e| e.code.clone())
            .collect()
    }

    /// Gene symbols carried by the patient's variants.
    pub fn variant_genes(&self) -> Vec<String> {
        self.genetic_variants
            .iter()
            .filter_map(|e| e.code.clone())
            .collect()
    }
}

/// An autonomous diagnosis session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisSession {
    pub id: String,
    pub state: DiagnosisState,
    pub patient: PatientProfile,

    /// All hypotheses, ordered by score after each pass.
    pub hypotheses: Vec<DiagnosisHypothesis>,
    /// Scored subset above the elimination threshold.
    pub top_hypotheses: Vec<DiagnosisHypothesis>,

    pub pending_questions: Vec<FollowUpQuestion>,
    pub answered_questions: Vec<FollowUpQuestion>,

    pub iterations: u32,
    pub max_iterations: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,

    pub auto_advance: bool,
    pub confidence_threshold: f64,
}

impl DiagnosisSession {
    pub fn new(patient: PatientProfile, auto_advance: bool, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: DiagnosisState::Intake,
            patient,
            hypotheses: Vec::new(),
            top_hypotheses: Vec::new(),
            pending_questions: Vec::new(),
            answered_questions: Vec::new(),
            iterations: 0,
            max_iterations: 10,
            created_at: now,
            updated_at: now,
            expires_at: None,
            auto_advance,
            confidence_threshold: 0.7,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn top_diagnosis(&self) -> Option<&DiagnosisHypothesis> {
        self.top_hypotheses.first()
    }

    pub fn is_confident(&self) -> bool {
        self.top_diagnosis()
            .map(|h| h.combined_score >= self.confidence_threshold)
            .unwrap_or(false)
    }
}

/// Final diagnosis package produced when a session completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub session_id: String,
    pub patient_id: String,
    pub primary_diagnosis: Option<DiagnosisHypothesis>,
    pub confidence: f64,
    pub differential: Vec<DiagnosisHypothesis>,
    pub key_findings: Vec<String>,
    pub recommended_tests: Vec<String>,
    pub supporting_evidence_summary: String,
    pub iterations: u32,
    pub questions_asked: usize,
    pub evidence_count: usize,
    pub completed_at: DateTime<Utc>,
}
