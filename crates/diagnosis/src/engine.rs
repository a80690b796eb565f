//! Differential diagnosis engine.
//!
//! Session workflow: intake normalization, candidate generation from the
//! knowledge graph, Bayesian scoring, discriminating-question generation,
//! answer absorption and finalization.

use crate::hpo::HpoOntologyService;
use crate::knowledge::KnowledgeGraph;
use crate::models::{
    DiagnosisHypothesis, DiagnosisResult, DiagnosisSession, DiagnosisState, EvidenceItem,
    EvidenceKind, FollowUpQuestion, PatientProfile, QuestionKind, VariantInput,
};
use crate::scoring::{BayesianScorer, ScoringConfig};
use crate::validation;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use forge_core::{Clock, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_hypotheses: usize,
    /// Phenotype candidates need at least this fraction of the patient's
    /// codes to match.
    pub min_phenotype_overlap: f64,
    pub confidence_threshold: f64,
    /// Hypotheses below this combined score fall out of the top set.
    pub elimination_threshold: f64,
    pub max_questions_per_iteration: usize,
    pub min_information_gain: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_hypotheses: 50,
            min_phenotype_overlap: 0.2,
            confidence_threshold: 0.7,
            elimination_threshold: 0.05,
            max_questions_per_iteration: 3,
            min_information_gain: 0.1,
        }
    }
}

/// Core engine for differential diagnosis generation.
pub struct DiagnosisEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    graph: Arc<dyn KnowledgeGraph>,
    ontology: Arc<RwLock<HpoOntologyService>>,
    scorer: BayesianScorer,
    /// Ids of sessions this engine has minted. Lock-free; the controller
    /// owns the session values themselves.
    sessions: DashSet<String>,
}

impl DiagnosisEngine {
    pub fn new(
        config: EngineConfig,
        scoring_config: ScoringConfig,
        graph: Arc<dyn KnowledgeGraph>,
        ontology: Arc<RwLock<HpoOntologyService>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scorer = BayesianScorer::new(scoring_config, graph.clone());
        Self {
            config,
            clock,
            graph,
            ontology,
            scorer,
            sessions: DashSet::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn min_information_gain(&self) -> f64 {
        self.config.min_information_gain
    }

    pub async fn create_session(
        &self,
        patient: Option<PatientProfile>,
        auto_advance: bool,
    ) -> DiagnosisSession {
        let session = DiagnosisSession::new(
            patient.unwrap_or_else(PatientProfile::new),
            auto_advance,
            self.clock.now(),
        );
        self.sessions.insert(session.id.clone());
        info!(session_id = %session.id, "diagnosis session created");
        session
    }

    pub async fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Normalize and absorb intake data. `NOT:` or `-` prefixes mark
    /// negated phenotypes; free text resolves against the ontology.
    pub async fn process_intake(
        &self,
        session: &mut DiagnosisSession,
        phenotypes: &[String],
        genetic_variants: &[VariantInput],
        medical_history: &[String],
        family_history: &[String],
        demographics: Option<&Demographics>,
    ) -> Result<()> {
        session.state = DiagnosisState::Intake;
        let now = self.clock.now();

        if let Some(demographics) = demographics {
            session.patient.age = demographics.age;
            session.patient.age_of_onset = demographics.age_of_onset;
            session.patient.sex = demographics.sex.clone();
        }

        for raw in phenotypes {
            let (negated, cleaned) = strip_negation(raw);
            let evidence = self.normalize_phenotype(&cleaned, negated, now).await;
            session.patient.phenotypes.push(evidence);
        }

        for variant in validation::validate_genetic_input(genetic_variants) {
            let evidence = EvidenceItem::new(EvidenceKind::Genetic, variant.notation.clone(), now)
                .with_code(variant.gene_symbol.clone())
                .with_severity(variant.pathogenicity.clone());
            session.patient.genetic_variants.push(evidence);
        }

        for item in medical_history {
            let (negated, cleaned) = strip_negation(item);
            session.patient.medical_history.push(
                EvidenceItem::new(EvidenceKind::History, cleaned, now).negated(negated),
            );
        }
        for item in family_history {
            session
                .patient
                .family_history
                .push(EvidenceItem::new(EvidenceKind::Family, item.clone(), now));
        }

        session.updated_at = now;
        debug!(
            session_id = %session.id,
            phenotype_count = session.patient.phenotypes.len(),
            variant_count = session.patient.genetic_variants.len(),
            "intake processed"
        );

        if session.auto_advance {
            self.generate_hypotheses(session).await?;
        }
        Ok(())
    }

    async fn normalize_phenotype(
        &self,
        cleaned: &str,
        negated: bool,
        now: DateTime<Utc>,
    ) -> EvidenceItem {
        if validation::is_valid_hpo_code(cleaned) {
            let code = cleaned.to_uppercase();
            return EvidenceItem::new(EvidenceKind::Phenotype, code.clone(), now)
                .with_code(code)
                .negated(negated);
        }

        // Free text: best-match resolution against the ontology.
        let resolved = self.ontology.read().await.resolve_text(cleaned);
        let mut evidence = EvidenceItem::new(EvidenceKind::Phenotype, cleaned, now).negated(negated);
        if let Some(code) = resolved {
            evidence = evidence.with_code(code);
        } else {
            debug!(text = %truncate(cleaned, 50), "phenotype text did not resolve");
        }
        evidence
    }

    /// Union candidates from the phenotype-derived query (requiring
    /// `min_phenotype_overlap * |codes|` matches) and the gene-derived
    /// query, merged on disease id.
    pub async fn generate_hypotheses(&self, session: &mut DiagnosisSession) -> Result<()> {
        session.state = DiagnosisState::Analyzing;

        let mut hypotheses: Vec<DiagnosisHypothesis> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let codes = session.patient.phenotype_codes();
        if !codes.is_empty() {
            let min_matches =
                ((codes.len() as f64 * self.config.min_phenotype_overlap).floor() as usize).max(1);
            let candidates = self
                .graph
                .diseases_by_phenotypes(&codes, min_matches, self.config.max_hypotheses)
                .await?;

            for candidate in candidates {
                if !seen.insert(candidate.disease_id.clone()) {
                    continue;
                }
                let mut hypothesis = DiagnosisHypothesis::new(
                    candidate.disease_id.clone(),
                    candidate.disease_name,
                );
                hypothesis.description = candidate.description;
                hypothesis.matched_phenotypes = candidate.matched_phenotypes;
                hypothesis.associated_genes = candidate.associated_genes;
                hypothesis.prior_probability = parse_prevalence(candidate.prevalence.as_deref());
                hypothesis.expected_phenotypes =
                    self.graph.expected_phenotypes(&hypothesis.disease_id, 20).await?;
                hypothesis.missing_phenotypes = hypothesis
                    .expected_phenotypes
                    .iter()
                    .filter(|p| !hypothesis.matched_phenotypes.contains(p))
                    .cloned()
                    .collect();
                hypotheses.push(hypothesis);
            }
        }

        let genes = session.patient.variant_genes();
        if !genes.is_empty() {
            let candidates = self
                .graph
                .diseases_by_genes(&genes, self.config.max_hypotheses)
                .await?;
            for candidate in candidates {
                if !seen.insert(candidate.disease_id.clone()) {
                    continue;
                }
                let mut hypothesis = DiagnosisHypothesis::new(
                    candidate.disease_id.clone(),
                    candidate.disease_name,
                );
                hypothesis.description = candidate.description;
                hypothesis.associated_genes = candidate.associated_genes;
                hypothesis.prior_probability = parse_prevalence(candidate.prevalence.as_deref());
                hypothesis.expected_phenotypes =
                    self.graph.expected_phenotypes(&hypothesis.disease_id, 20).await?;
                hypothesis.missing_phenotypes = hypothesis.expected_phenotypes.clone();
                hypotheses.push(hypothesis);
            }
        }

        hypotheses.truncate(self.config.max_hypotheses);
        info!(
            session_id = %session.id,
            count = hypotheses.len(),
            "hypotheses generated"
        );
        session.hypotheses = hypotheses;
        session.updated_at = self.clock.now();

        if session.auto_advance {
            self.score_hypotheses(session).await?;
        }
        Ok(())
    }

    /// Score, re-sort, refresh the top set and complete the session if the
    /// leader clears the confidence threshold.
    pub async fn score_hypotheses(&self, session: &mut DiagnosisSession) -> Result<()> {
        if session.hypotheses.is_empty() {
            return Ok(());
        }

        self.scorer
            .score_all(&mut session.hypotheses, &session.patient)
            .await?;

        session.top_hypotheses = session
            .hypotheses
            .iter()
            .take(10)
            .filter(|h| h.combined_score >= self.config.elimination_threshold)
            .cloned()
            .collect();
        session.updated_at = self.clock.now();

        if session.is_confident() {
            session.state = DiagnosisState::Complete;
            return Ok(());
        }

        if session.auto_advance {
            self.generate_questions(session).await?;
        } else {
            session.state = DiagnosisState::Questioning;
        }
        Ok(())
    }

    /// Pick the expected-but-unknown phenotypes with the highest information
    /// gain, plus a genetic-testing question when no variants are known but
    /// candidate genes exist.
    pub async fn generate_questions(&self, session: &mut DiagnosisSession) -> Result<()> {
        session.state = DiagnosisState::Questioning;

        if session.top_hypotheses.len() <= 1 {
            session.state = DiagnosisState::Complete;
            return Ok(());
        }

        let mut candidate_phenotypes: HashSet<String> = HashSet::new();
        for hypothesis in &session.top_hypotheses {
            candidate_phenotypes.extend(hypothesis.expected_phenotypes.iter().cloned());
            candidate_phenotypes.extend(hypothesis.missing_phenotypes.iter().cloned());
        }
        let known: HashSet<String> = session
            .patient
            .phenotype_codes()
            .into_iter()
            .chain(session.patient.negated_phenotype_codes())
            .collect();

        let mut scored_phenotypes: Vec<(String, f64)> = candidate_phenotypes
            .difference(&known)
            .map(|hpo_id| {
                let gain = self
                    .scorer
                    .calculate_information_gain(&session.top_hypotheses, hpo_id);
                (hpo_id.clone(), gain)
            })
            .filter(|(_, gain)| *gain >= self.config.min_information_gain)
            .collect();
        scored_phenotypes
            .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut questions = Vec::new();
        for (hpo_id, gain) in scored_phenotypes
            .into_iter()
            .take(self.config.max_questions_per_iteration)
        {
            questions.push(self.phenotype_question(session, &hpo_id, gain).await);
        }

        if let Some(question) = self.genetic_question(session) {
            questions.push(question);
        }

        session.pending_questions = questions;
        session.iterations += 1;
        session.updated_at = self.clock.now();
        Ok(())
    }

    async fn phenotype_question(
        &self,
        session: &DiagnosisSession,
        hpo_id: &str,
        information_gain: f64,
    ) -> FollowUpQuestion {
        let name = self
            .ontology
            .read()
            .await
            .get_term(hpo_id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| hpo_id.to_string());

        let affected: Vec<String> = session
            .top_hypotheses
            .iter()
            .filter(|h| {
                h.expected_phenotypes.iter().any(|p| p == hpo_id)
                    || h.missing_phenotypes.iter().any(|p| p == hpo_id)
            })
            .map(|h| h.id.clone())
            .collect();

        FollowUpQuestion {
            id: Uuid::new_v4().to_string(),
            question_text: format!("Does the patient have {}?", name),
            kind: QuestionKind::Binary,
            target_phenotype: Some(hpo_id.to_string()),
            target_evidence: None,
            options: vec![
                ("yes".to_string(), "Yes".to_string()),
                ("no".to_string(), "No".to_string()),
                ("unknown".to_string(), "Unknown/Not assessed".to_string()),
            ],
            hypotheses_affected: affected,
            information_gain,
            priority: if information_gain > 0.3 { 1 } else { 2 },
            answer: None,
            answered_at: None,
        }
    }

    fn genetic_question(&self, session: &DiagnosisSession) -> Option<FollowUpQuestion> {
        if !session.patient.genetic_variants.is_empty() {
            return None;
        }

        let genes: HashSet<String> = session
            .top_hypotheses
            .iter()
            .flat_map(|h| h.associated_genes.iter().cloned())
            .collect();
        if genes.is_empty() {
            return None;
        }

        let mut gene_list: Vec<String> = genes.into_iter().collect();
        gene_list.sort();
        gene_list.truncate(5);

        Some(FollowUpQuestion {
            id: Uuid::new_v4().to_string(),
            question_text: format!(
                "Has genetic testing been performed, particularly for genes: {}?",
                gene_list.join(", ")
            ),
            kind: QuestionKind::MultipleChoice,
            target_phenotype: None,
            target_evidence: Some("genetic".to_string()),
            options: vec![
                ("not_done".to_string(), "No genetic testing done".to_string()),
                (
                    "negative".to_string(),
                    "Testing done - no pathogenic variants".to_string(),
                ),
                (
                    "positive".to_string(),
                    "Testing done - pathogenic variant(s) found".to_string(),
                ),
                ("vus".to_string(), "Testing done - VUS found".to_string()),
            ],
            hypotheses_affected: session.top_hypotheses.iter().map(|h| h.id.clone()).collect(),
            information_gain: 0.5,
            priority: 2,
            answer: None,
            answered_at: None,
        })
    }

    /// Record an answer, convert it into evidence (negated for "no"), move
    /// to refining and re-score.
    pub async fn answer_question(
        &self,
        session: &mut DiagnosisSession,
        question_id: &str,
        answer: &str,
        reported_variants: &[VariantInput],
    ) -> Result<()> {
        let now = self.clock.now();
        let Some(position) = session
            .pending_questions
            .iter()
            .position(|q| q.id == question_id)
        else {
            warn!(question_id, "question not found");
            return Ok(());
        };

        let mut question = session.pending_questions.remove(position);
        question.answer = Some(answer.to_string());
        question.answered_at = Some(now);

        if let Some(hpo_id) = question.target_phenotype.clone() {
            if answer != "unknown" {
                let evidence =
                    EvidenceItem::new(EvidenceKind::Phenotype, question.question_text.clone(), now)
                        .with_code(hpo_id)
                        .negated(answer == "no")
                        .confirmed();
                session.patient.phenotypes.push(evidence);
            }
        } else if question.target_evidence.as_deref() == Some("genetic") && answer != "not_done" {
            let severity = if answer == "vus" {
                "uncertain_significance"
            } else {
                "pathogenic"
            };
            for variant in validation::validate_genetic_input(reported_variants) {
                let evidence =
                    EvidenceItem::new(EvidenceKind::Genetic, variant.notation.clone(), now)
                        .with_code(variant.gene_symbol.clone())
                        .with_severity(severity)
                        .confirmed();
                session.patient.genetic_variants.push(evidence);
            }
        }

        session.answered_questions.push(question);
        session.state = DiagnosisState::Refining;
        session.updated_at = now;

        self.score_hypotheses(session).await
    }

    /// Package the primary diagnosis, top-10 differential, key findings,
    /// recommended tests and evidence summary.
    pub async fn finalize_session(&self, session: &mut DiagnosisSession) -> DiagnosisResult {
        session.state = DiagnosisState::Complete;

        let primary = session.top_diagnosis().cloned();
        let confidence = primary.as_ref().map(|h| h.combined_score).unwrap_or(0.0);

        DiagnosisResult {
            session_id: session.id.clone(),
            patient_id: session.patient.id.clone(),
            key_findings: Self::key_findings(session),
            recommended_tests: Self::recommended_tests(session),
            supporting_evidence_summary: Self::evidence_summary(session),
            differential: session.top_hypotheses.iter().take(10).cloned().collect(),
            primary_diagnosis: primary,
            confidence,
            iterations: session.iterations,
            questions_asked: session.answered_questions.len(),
            evidence_count: session.patient.all_evidence().len(),
            completed_at: self.clock.now(),
        }
    }

    fn key_findings(session: &DiagnosisSession) -> Vec<String> {
        let mut findings = Vec::new();
        if let Some(top) = session.top_diagnosis() {
            findings.push(format!(
                "Top diagnosis: {} (confidence: {:.1}%)",
                top.disease_name,
                top.combined_score * 100.0
            ));
            if !top.matched_phenotypes.is_empty() {
                findings.push(format!(
                    "Matched {} expected phenotypes",
                    top.matched_phenotypes.len()
                ));
            }
            if !top.supporting_evidence.is_empty() {
                findings.push(format!(
                    "{} pieces of supporting evidence",
                    top.supporting_evidence.len()
                ));
            }
            if !top.refuting_evidence.is_empty() {
                findings.push(format!(
                    "Note: {} potentially refuting findings",
                    top.refuting_evidence.len()
                ));
            }
        }
        findings
    }

    fn recommended_tests(session: &DiagnosisSession) -> Vec<String> {
        let mut recommendations = Vec::new();
        let Some(top) = session.top_diagnosis() else {
            return recommendations;
        };

        if !top.associated_genes.is_empty() && session.patient.genetic_variants.is_empty() {
            let genes: Vec<String> = top.associated_genes.iter().take(3).cloned().collect();
            recommendations.push(format!("Consider genetic testing for: {}", genes.join(", ")));
        }
        if !top.missing_phenotypes.is_empty() {
            recommendations.push(format!(
                "Evaluate for {} additional phenotypes",
                top.missing_phenotypes.len()
            ));
        }
        recommendations
    }

    fn evidence_summary(session: &DiagnosisSession) -> String {
        let Some(top) = session.top_diagnosis() else {
            return "Insufficient evidence for diagnosis".to_string();
        };

        let mut parts = vec![format!("Evidence strength: {}", top.evidence_strength())];
        if top.phenotype_score > 0.5 {
            parts.push("Strong phenotypic match".to_string());
        }
        if top.genetic_score > 0.5 {
            parts.push("Supporting genetic evidence".to_string());
        }
        if top.history_score > 0.5 {
            parts.push("Consistent with medical/family history".to_string());
        }
        parts.join(". ")
    }
}

/// Patient demographics at intake.
#[derive(Debug, Clone, Default)]
pub struct Demographics {
    pub age: Option<u32>,
    pub age_of_onset: Option<u32>,
    pub sex: Option<String>,
}

fn strip_negation(raw: &str) -> (bool, String) {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("NOT:") {
        (true, rest.trim().to_string())
    } else if let Some(rest) = trimmed.strip_prefix('-') {
        (true, rest.trim().to_string())
    } else {
        (false, trimmed.to_string())
    }
}

fn parse_prevalence(prevalence: Option<&str>) -> f64 {
    let Some(prevalence) = prevalence else {
        return 0.001;
    };
    if let Some((numerator, denominator)) = prevalence.split_once('/') {
        let numerator: f64 = numerator.trim().parse().unwrap_or(0.0);
        let denominator: f64 = denominator.trim().parse().unwrap_or(0.0);
        if denominator > 0.0 && numerator > 0.0 {
            return numerator / denominator;
        }
        return 0.001;
    }
    prevalence.trim().parse().unwrap_or(0.001)
}

fn truncate(text: &str, max: usize) -> &str {
    let mut end = max.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpo::ontology::TEST_OBO;
    use crate::knowledge::fixture_graph;
    use chrono::TimeZone;
    use forge_core::ManualClock;

    fn engine() -> DiagnosisEngine {
        engine_with(EngineConfig::default())
    }

    /// The fixture diseases overlap heavily, so their discriminating
    /// phenotypes carry modest gains; question-path tests lower the floor.
    fn question_engine() -> DiagnosisEngine {
        engine_with(EngineConfig {
            min_information_gain: 0.005,
            ..Default::default()
        })
    }

    fn engine_with(config: EngineConfig) -> DiagnosisEngine {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        let mut ontology = HpoOntologyService::new();
        ontology.load_from_obo(TEST_OBO).unwrap();
        DiagnosisEngine::new(
            config,
            ScoringConfig::default(),
            Arc::new(fixture_graph()),
            Arc::new(RwLock::new(ontology)),
            clock,
        )
    }

    async fn intake_seizure_session(
        engine: &DiagnosisEngine,
        auto_advance: bool,
    ) -> DiagnosisSession {
        let mut session = engine.create_session(None, auto_advance).await;
        engine
            .process_intake(
                &mut session,
                &["HP:0001250".to_string(), "HP:0001249".to_string()],
                &[],
                &[],
                &[],
                None,
            )
            .await
            .unwrap();
        session
    }

    #[test]
    fn negation_prefixes() {
        assert_eq!(strip_negation("NOT: HP:0001250"), (true, "HP:0001250".into()));
        assert_eq!(strip_negation("-HP:0001250"), (true, "HP:0001250".into()));
        assert_eq!(strip_negation("HP:0001250"), (false, "HP:0001250".into()));
    }

    #[test]
    fn prevalence_parsing() {
        assert!((parse_prevalence(Some("1/100000")) - 1e-5).abs() < 1e-12);
        assert!((parse_prevalence(Some("0.00001")) - 1e-5).abs() < 1e-12);
        assert_eq!(parse_prevalence(Some("1/0")), 0.001);
        assert_eq!(parse_prevalence(Some("garbage")), 0.001);
        assert_eq!(parse_prevalence(None), 0.001);
    }

    #[tokio::test]
    async fn intake_normalizes_codes_text_and_negation() {
        let engine = engine();
        let mut session = engine.create_session(None, false).await;
        engine
            .process_intake(
                &mut session,
                &[
                    "HP:0001250".to_string(),
                    "mental retardation".to_string(),
                    "NOT: seizures".to_string(),
                ],
                &[VariantInput {
                    gene_symbol: "scn1a".to_string(),
                    notation: "c.2447G>A".to_string(),
                    pathogenicity: "pathogenic".to_string(),
                    zygosity: None,
                }],
                &["no family history of huntington disease".to_string()],
                &["cousin with Dravet syndrome".to_string()],
                Some(&Demographics {
                    age: Some(4),
                    age_of_onset: Some(1),
                    sex: Some("female".to_string()),
                }),
            )
            .await
            .unwrap();

        assert_eq!(session.patient.phenotypes.len(), 3);
        assert_eq!(session.patient.phenotypes[0].code.as_deref(), Some("HP:0001250"));
        // Free text resolved via the synonym index.
        assert_eq!(session.patient.phenotypes[1].code.as_deref(), Some("HP:0001249"));
        assert!(session.patient.phenotypes[2].negated);
        assert_eq!(session.patient.genetic_variants[0].code.as_deref(), Some("SCN1A"));
        assert_eq!(session.patient.age, Some(4));
    }

    #[tokio::test]
    async fn happy_path_generates_scores_and_questions() {
        let engine = engine();
        let mut session = intake_seizure_session(&engine, false).await;

        engine.generate_hypotheses(&mut session).await.unwrap();
        assert!(!session.hypotheses.is_empty());
        let with_both = session
            .hypotheses
            .iter()
            .find(|h| h.disease_id == "MONDO:0100135")
            .unwrap();
        assert!(with_both
            .matched_phenotypes
            .contains(&"HP:0001250".to_string()));
        assert!(with_both
            .matched_phenotypes
            .contains(&"HP:0001249".to_string()));

        engine.score_hypotheses(&mut session).await.unwrap();
        assert!(session.top_diagnosis().unwrap().combined_score >= 0.5);
        for pair in session.hypotheses.windows(2) {
            assert!(pair[0].combined_score >= pair[1].combined_score);
        }

        if session.state != DiagnosisState::Complete {
            engine.generate_questions(&mut session).await.unwrap();
            assert!(session.pending_questions.len() <= 4);
            for question in &session.pending_questions {
                if question.target_phenotype.is_some() {
                    assert!(question.information_gain >= engine.min_information_gain());
                }
            }
        }
    }

    #[tokio::test]
    async fn yes_answer_does_not_lower_the_top_score() {
        let engine = question_engine();
        let mut session = intake_seizure_session(&engine, false).await;
        engine.generate_hypotheses(&mut session).await.unwrap();
        engine.score_hypotheses(&mut session).await.unwrap();
        let before = session.top_diagnosis().unwrap().combined_score;

        if session.state == DiagnosisState::Complete {
            return;
        }
        engine.generate_questions(&mut session).await.unwrap();
        let Some(question) = session
            .pending_questions
            .iter()
            .find(|q| q.target_phenotype.is_some())
            .cloned()
        else {
            return;
        };

        engine
            .answer_question(&mut session, &question.id, "yes", &[])
            .await
            .unwrap();

        let after = session.top_diagnosis().unwrap().combined_score;
        assert!(after >= before);
        assert_eq!(session.answered_questions.len(), 1);
        assert!(session.patient.phenotypes.iter().any(|p| p.confirmed));
    }

    #[tokio::test]
    async fn genetic_question_appears_without_variants() {
        let engine = engine();
        let mut session = intake_seizure_session(&engine, false).await;
        engine.generate_hypotheses(&mut session).await.unwrap();
        engine.score_hypotheses(&mut session).await.unwrap();
        if session.state == DiagnosisState::Complete {
            return;
        }
        engine.generate_questions(&mut session).await.unwrap();

        let genetic = session
            .pending_questions
            .iter()
            .find(|q| q.target_evidence.as_deref() == Some("genetic"));
        assert!(genetic.is_some());
        assert!(genetic.unwrap().question_text.contains("SCN1A"));
    }

    #[tokio::test]
    async fn positive_genetic_answer_adds_variants() {
        let engine = engine();
        let mut session = intake_seizure_session(&engine, false).await;
        engine.generate_hypotheses(&mut session).await.unwrap();
        engine.score_hypotheses(&mut session).await.unwrap();
        if session.state == DiagnosisState::Complete {
            return;
        }
        engine.generate_questions(&mut session).await.unwrap();

        let Some(question) = session
            .pending_questions
            .iter()
            .find(|q| q.target_evidence.as_deref() == Some("genetic"))
            .cloned()
        else {
            return;
        };

        engine
            .answer_question(
                &mut session,
                &question.id,
                "positive",
                &[VariantInput {
                    gene_symbol: "SCN1A".to_string(),
                    notation: "c.2447G>A".to_string(),
                    pathogenicity: "pathogenic".to_string(),
                    zygosity: None,
                }],
            )
            .await
            .unwrap();

        assert_eq!(session.patient.genetic_variants.len(), 1);
        assert!(session.top_diagnosis().unwrap().genetic_score > 0.5);
    }

    #[tokio::test]
    async fn finalize_packages_the_result() {
        let engine = engine();
        let mut session = intake_seizure_session(&engine, false).await;
        engine.generate_hypotheses(&mut session).await.unwrap();
        engine.score_hypotheses(&mut session).await.unwrap();

        let result = engine.finalize_session(&mut session).await;
        assert_eq!(session.state, DiagnosisState::Complete);
        assert!(result.primary_diagnosis.is_some());
        assert!(result.confidence > 0.0);
        assert!(result.differential.len() <= 10);
        assert!(!result.key_findings.is_empty());
        assert!(result
            .recommended_tests
            .iter()
            .any(|t| t.contains("genetic testing")));
        assert!(result.supporting_evidence_summary.contains("Evidence strength"));
    }

    #[tokio::test]
    async fn unknown_answer_adds_no_evidence() {
        let engine = question_engine();
        let mut session = intake_seizure_session(&engine, false).await;
        engine.generate_hypotheses(&mut session).await.unwrap();
        engine.score_hypotheses(&mut session).await.unwrap();
        if session.state == DiagnosisState::Complete {
            return;
        }
        engine.generate_questions(&mut session).await.unwrap();
        let Some(question) = session
            .pending_questions
            .iter()
            .find(|q| q.target_phenotype.is_some())
            .cloned()
        else {
            return;
        };

        let evidence_before = session.patient.phenotypes.len();
        engine
            .answer_question(&mut session, &question.id, "unknown", &[])
            .await
            .unwrap();
        assert_eq!(session.patient.phenotypes.len(), evidence_before);
    }
}
