//! Autonomous diagnostic session core.
//!
//! A cooperative multi-agent differential-diagnosis engine: specialist
//! agents exchange typed messages under a coordinator, a Bayesian scorer
//! ranks hypotheses, and a session controller drives the state machine
//! through intake, analysis, scoring, questioning and refinement with
//! event streaming, pause/resume and a background janitor.

pub mod agents;
pub mod engine;
pub mod hpo;
pub mod knowledge;
pub mod models;
pub mod scoring;
pub mod session;
pub mod validation;

pub use engine::{Demographics, DiagnosisEngine, EngineConfig};
pub use knowledge::{
    DiseaseCandidate, DiseaseRecord, GeneAssociation, KnowledgeGraph, StaticKnowledgeGraph,
};
pub use models::{
    DiagnosisHypothesis, DiagnosisResult, DiagnosisSession, DiagnosisState, EvidenceItem,
    EvidenceKind, EvidencePolarity, FollowUpQuestion, PatientProfile, QuestionKind, VariantInput,
};
pub use scoring::{BayesianScorer, ScoringConfig};
pub use session::{
    SessionConfig, SessionController, SessionEvent, SessionEventData, SessionStats,
};
pub use validation::InputValidator;
