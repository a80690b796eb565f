//! Diagnostic agent kernel.
//!
//! Agents exchange typed messages: requests dispatch onto the agent
//! contract (analyze / hypothesize / evaluate) and every dispatch-level
//! failure becomes a first-class `Error` message reply - agents never throw
//! across the bus. Reply chains thread back to the first request.

pub mod coordinator;
pub mod differential;
pub mod genetic;
pub mod phenotype;

pub use coordinator::{CoordinationResult, CoordinatorConfig, DiagnosticCoordinator};
pub use differential::{DifferentialAgent, DifferentialAgentConfig};
pub use genetic::{GeneticAgent, GeneticAgentConfig};
pub use phenotype::{PhenotypeAgent, PhenotypeAgentConfig};

use crate::models::{DiagnosisHypothesis, EvidenceItem, PatientProfile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    PhenotypeExpert,
    GeneticExpert,
    DifferentialExpert,
    Coordinator,
}

/// Dispatch-level agent failure. Crossing the bus it is carried as an
/// `Error` payload, never a panic or a Result error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("agent timed out")]
    Timeout,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Other agents' analyses, made available to downstream agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub phenotype_analysis: Option<PhenotypeAnalysis>,
    pub genetic_analysis: Option<GeneticAnalysis>,
}

/// A phenotype normalized against the ontology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedPhenotype {
    pub hpo_id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiseaseAssociation {
    pub disease_id: String,
    pub disease_name: String,
    pub phenotype_matches: usize,
}

/// Phenotype agent output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhenotypeAnalysis {
    pub normalized_phenotypes: Vec<NormalizedPhenotype>,
    pub negated_phenotypes: Vec<NormalizedPhenotype>,
    pub expanded_phenotypes: Vec<String>,
    pub systems_affected: Vec<String>,
    pub phenotypes_by_system: HashMap<String, Vec<String>>,
    pub disease_associations: Vec<DiseaseAssociation>,
    pub patterns: Vec<String>,
    pub phenotype_count: usize,
    pub negated_count: usize,
    pub age_onset_notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathogenicityClass {
    Pathogenic,
    LikelyPathogenic,
    Vus,
    LikelyBenign,
    Benign,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedVariant {
    pub gene_symbol: String,
    pub notation: String,
    pub class: PathogenicityClass,
    pub likelihood_ratio: f64,
    pub zygosity: Option<String>,
}

impl ClassifiedVariant {
    pub fn is_pathogenic(&self) -> bool {
        matches!(
            self.class,
            PathogenicityClass::Pathogenic | PathogenicityClass::LikelyPathogenic
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundHetFinding {
    pub gene_symbol: String,
    pub variant_count: usize,
    pub variants: Vec<String>,
    pub potential_diseases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateGene {
    pub gene_symbol: String,
    pub variant: String,
    pub pathogenicity: PathogenicityClass,
    pub disease_associations: usize,
    pub top_diseases: Vec<String>,
}

/// Genetic agent output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneticAnalysis {
    pub has_genetic_data: bool,
    pub variants_analyzed: usize,
    pub variants: Vec<ClassifiedVariant>,
    pub pathogenic_count: usize,
    pub vus_count: usize,
    pub genes_affected: Vec<String>,
    pub compound_heterozygosity: Vec<CompoundHetFinding>,
    pub inheritance_notes: Vec<String>,
    pub candidate_genes: Vec<CandidateGene>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Moderate,
    Low,
    Uncertain,
    InsufficientData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceAssessment {
    pub level: ConfidenceLevel,
    pub primary_confidence: f64,
    pub top_diagnoses_gap: f64,
    pub message: String,
}

/// Differential agent output: the final ranked differential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferentialAnalysis {
    pub differential: Vec<DiagnosisHypothesis>,
    pub primary_diagnosis: Option<DiagnosisHypothesis>,
    pub confidence_assessment: ConfidenceAssessment,
    pub explanations: HashMap<String, String>,
    pub hypotheses_considered: usize,
}

/// A specialist's per-specialty analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnalysisPayload {
    Phenotype(PhenotypeAnalysis),
    Genetic(GeneticAnalysis),
    Differential(DifferentialAnalysis),
}

/// Evaluation of one hypothesis from a single agent's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisEvaluation {
    pub score: f64,
    pub reasoning: String,
    pub matched_phenotypes: Vec<String>,
    pub missing_phenotypes: Vec<String>,
    pub contradicted_phenotypes: Vec<String>,
}

impl HypothesisEvaluation {
    pub fn neutral(reasoning: impl Into<String>) -> Self {
        Self {
            score: 0.5,
            reasoning: reasoning.into(),
            matched_phenotypes: Vec::new(),
            missing_phenotypes: Vec::new(),
            contradicted_phenotypes: Vec::new(),
        }
    }
}

/// Typed message body. The variants are the message types on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessagePayload {
    AnalyzeRequest {
        patient: PatientProfile,
        context: AnalysisContext,
    },
    HypothesizeRequest {
        evidence: Vec<EvidenceItem>,
        existing: Vec<DiagnosisHypothesis>,
    },
    EvaluateRequest {
        hypothesis: DiagnosisHypothesis,
        evidence: Vec<EvidenceItem>,
    },
    Analysis(AnalysisPayload),
    Hypotheses(Vec<DiagnosisHypothesis>),
    Evaluation(HypothesisEvaluation),
    Question {
        text: String,
    },
    Answer {
        answer: String,
        confidence: f64,
    },
    Consensus {
        reached: bool,
        average_score: f64,
    },
    Error {
        message: String,
    },
}

/// Message passed between diagnostic agents. The reply chain forms a tree
/// rooted at the first request via `thread_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub sender: AgentRole,
    /// `None` broadcasts to every other agent.
    pub recipient: Option<AgentRole>,
    pub payload: MessagePayload,
    pub session_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub thread_id: Option<String>,
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn request(
        sender: AgentRole,
        recipient: AgentRole,
        payload: MessagePayload,
        session_id: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            recipient: Some(recipient),
            payload,
            session_id,
            in_reply_to: None,
            thread_id: None,
            priority: 1,
            timestamp,
        }
    }

    pub fn reply_to(&self, sender: AgentRole, payload: MessagePayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            recipient: Some(self.sender),
            payload,
            session_id: self.session_id.clone(),
            in_reply_to: Some(self.id.clone()),
            thread_id: Some(self.thread_id.clone().unwrap_or_else(|| self.id.clone())),
            priority: self.priority,
            timestamp: self.timestamp,
        }
    }

    pub fn error_reply(&self, sender: AgentRole, error: &AgentError) -> Self {
        self.reply_to(
            sender,
            MessagePayload::Error {
                message: error.to_string(),
            },
        )
    }
}

/// The agent contract. `receive_message` dispatches on the payload type and
/// converts failures into error replies.
#[async_trait]
pub trait DiagnosticAgent: Send + Sync {
    fn role(&self) -> AgentRole;

    /// Domain-specific analysis of the patient.
    async fn analyze(
        &self,
        patient: &PatientProfile,
        context: &AnalysisContext,
    ) -> Result<AnalysisPayload, AgentError>;

    /// Extend or merge hypotheses from this agent's evidence domain.
    async fn generate_hypotheses(
        &self,
        evidence: &[EvidenceItem],
        existing: Vec<DiagnosisHypothesis>,
    ) -> Result<Vec<DiagnosisHypothesis>, AgentError>;

    /// Evaluate a hypothesis against evidence from this agent's perspective.
    async fn evaluate_hypothesis(
        &self,
        hypothesis: &DiagnosisHypothesis,
        evidence: &[EvidenceItem],
    ) -> Result<HypothesisEvaluation, AgentError>;

    /// Ingest a peer's broadcast analysis. Default: ignore.
    async fn observe_analysis(&self, _analysis: &AnalysisPayload) {}

    /// Dispatch an incoming message. Returns the reply, or `None` for
    /// messages that need no answer.
    async fn receive_message(&self, message: AgentMessage) -> Option<AgentMessage> {
        match &message.payload {
            MessagePayload::AnalyzeRequest { patient, context } => {
                match self.analyze(patient, context).await {
                    Ok(analysis) => {
                        Some(message.reply_to(self.role(), MessagePayload::Analysis(analysis)))
                    }
                    Err(e) => Some(message.error_reply(self.role(), &e)),
                }
            }
            MessagePayload::HypothesizeRequest { evidence, existing } => {
                match self.generate_hypotheses(evidence, existing.clone()).await {
                    Ok(hypotheses) => {
                        Some(message.reply_to(self.role(), MessagePayload::Hypotheses(hypotheses)))
                    }
                    Err(e) => Some(message.error_reply(self.role(), &e)),
                }
            }
            MessagePayload::EvaluateRequest {
                hypothesis,
                evidence,
            } => match self.evaluate_hypothesis(hypothesis, evidence).await {
                Ok(evaluation) => {
                    Some(message.reply_to(self.role(), MessagePayload::Evaluation(evaluation)))
                }
                Err(e) => Some(message.error_reply(self.role(), &e)),
            },
            MessagePayload::Analysis(analysis) => {
                self.observe_analysis(analysis).await;
                None
            }
            MessagePayload::Question { .. } => Some(message.reply_to(
                self.role(),
                MessagePayload::Answer {
                    answer: "unknown".to_string(),
                    confidence: 0.0,
                },
            )),
            _ => None,
        }
    }
}
