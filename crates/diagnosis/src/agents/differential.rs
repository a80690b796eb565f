//! Differential diagnosis agent.
//!
//! Synthesizes phenotype, genetic, history and wearable sub-scores into the
//! final ranked differential, assesses confidence from the top score and
//! its gap to second place, and produces short textual explanations for the
//! leading diagnoses.

use crate::agents::{
    AgentError, AgentRole, AnalysisContext, AnalysisPayload, ConfidenceAssessment,
    ConfidenceLevel, DiagnosticAgent, DifferentialAnalysis, HypothesisEvaluation,
};
use crate::knowledge::KnowledgeGraph;
use crate::models::{DiagnosisHypothesis, EvidenceItem, EvidenceKind, PatientProfile};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DifferentialAgentConfig {
    pub phenotype_weight: f64,
    pub genetic_weight: f64,
    pub history_weight: f64,
    pub wearable_weight: f64,
    pub max_differential: usize,
    pub min_score_threshold: f64,
    pub confidence_required_for_primary: f64,
    /// Minimum gap between the top two diagnoses for high confidence.
    pub uncertainty_threshold: f64,
}

impl Default for DifferentialAgentConfig {
    fn default() -> Self {
        Self {
            phenotype_weight: 0.40,
            genetic_weight: 0.35,
            history_weight: 0.15,
            wearable_weight: 0.10,
            max_differential: 15,
            min_score_threshold: 0.1,
            confidence_required_for_primary: 0.7,
            uncertainty_threshold: 0.15,
        }
    }
}

pub struct DifferentialAgent {
    config: DifferentialAgentConfig,
    graph: Arc<dyn KnowledgeGraph>,
}

impl DifferentialAgent {
    pub fn new(config: DifferentialAgentConfig, graph: Arc<dyn KnowledgeGraph>) -> Self {
        Self { config, graph }
    }

    async fn generate_candidates(
        &self,
        patient: &PatientProfile,
        context: &AnalysisContext,
    ) -> Result<Vec<DiagnosisHypothesis>, AgentError> {
        let mut candidates: Vec<DiagnosisHypothesis> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        // From the phenotype agent's associations.
        if let Some(analysis) = &context.phenotype_analysis {
            for association in &analysis.disease_associations {
                if seen.insert(association.disease_id.clone()) {
                    let mut hypothesis = DiagnosisHypothesis::new(
                        association.disease_id.clone(),
                        association.disease_name.clone(),
                    );
                    hypothesis.phenotype_score =
                        (association.phenotype_matches as f64 / 10.0).min(1.0);
                    candidates.push(hypothesis);
                }
            }
        }

        // From the genetic agent's candidate genes.
        if let Some(analysis) = &context.genetic_analysis {
            for candidate_gene in &analysis.candidate_genes {
                let associations = self
                    .graph
                    .gene_associations(&candidate_gene.gene_symbol)
                    .await
                    .map_err(|e| AgentError::Provider(e.to_string()))?;
                for association in associations {
                    if seen.insert(association.disease_id.clone()) {
                        let mut hypothesis = DiagnosisHypothesis::new(
                            association.disease_id,
                            association.disease_name,
                        );
                        hypothesis
                            .associated_genes
                            .push(candidate_gene.gene_symbol.clone());
                        candidates.push(hypothesis);
                    }
                }
            }
        }

        // Direct phenotype query.
        let codes = patient.phenotype_codes();
        if !codes.is_empty() {
            let min_matches = (codes.len() / 4).max(1);
            let direct = self
                .graph
                .diseases_by_phenotypes(&codes, min_matches, self.config.max_differential * 2)
                .await
                .map_err(|e| AgentError::Provider(e.to_string()))?;
            for candidate in direct {
                if seen.insert(candidate.disease_id.clone()) {
                    let mut hypothesis = DiagnosisHypothesis::new(
                        candidate.disease_id,
                        candidate.disease_name,
                    );
                    hypothesis.matched_phenotypes = candidate.matched_phenotypes;
                    hypothesis.associated_genes = candidate.associated_genes;
                    candidates.push(hypothesis);
                }
            }
        }

        Ok(candidates)
    }

    async fn score_phenotype_match(
        &self,
        hypothesis: &DiagnosisHypothesis,
        patient_hpo: &[String],
    ) -> f64 {
        if patient_hpo.is_empty() {
            return 0.5;
        }
        let Ok(expected) = self.graph.expected_phenotypes(&hypothesis.disease_id, 100).await
        else {
            return 0.5;
        };
        if expected.is_empty() {
            return 0.5;
        }

        let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();
        let matched = patient_hpo
            .iter()
            .filter(|p| expected_set.contains(p.as_str()))
            .count();
        let recall = matched as f64 / patient_hpo.len() as f64;
        let precision = matched as f64 / expected.len() as f64;
        (recall + precision) / 2.0
    }

    async fn score_genetic_match(
        &self,
        hypothesis: &DiagnosisHypothesis,
        variants: &[&EvidenceItem],
    ) -> f64 {
        if variants.is_empty() {
            return 0.5;
        }

        let disease_genes = if hypothesis.associated_genes.is_empty() {
            self.graph
                .disease_genes(&hypothesis.disease_id)
                .await
                .unwrap_or_default()
        } else {
            hypothesis.associated_genes.clone()
        };
        if disease_genes.is_empty() {
            return 0.5;
        }

        let mut score: f64 = 0.3;
        for variant in variants {
            let Some(gene) = variant.code.as_deref() else {
                continue;
            };
            if !disease_genes.iter().any(|g| g == gene) {
                continue;
            }
            let severity = variant.severity.as_deref().unwrap_or("").to_lowercase();
            if severity.contains("pathogenic") && !severity.contains("likely") {
                score = score.max(0.95);
            } else if severity.contains("likely_pathogenic") || severity.contains("likely pathogenic")
            {
                score = score.max(0.85);
            } else if severity.contains("vus") || severity.contains("uncertain") {
                score = score.max(0.6);
            } else {
                score = score.max(0.5);
            }
        }
        score
    }

    fn score_history_match(
        hypothesis: &DiagnosisHypothesis,
        history: &[&EvidenceItem],
        family_history: &[&EvidenceItem],
    ) -> f64 {
        if history.is_empty() && family_history.is_empty() {
            return 0.5;
        }

        let disease_name = hypothesis.disease_name.to_lowercase();
        let mut score: f64 = 0.5;

        for item in family_history {
            let value = item.value.to_lowercase();
            if !disease_name.is_empty() && value.contains(&disease_name) {
                score = score.max(0.8);
            }
            for gene in &hypothesis.associated_genes {
                if value.contains(&gene.to_lowercase()) {
                    score = score.max(0.7);
                }
            }
        }

        for item in history {
            if item.negated && item.value.to_lowercase().contains(&disease_name) {
                score = score.min(0.2);
            }
        }

        score
    }

    fn score_wearable_match(wearable: &[&EvidenceItem]) -> f64 {
        // Wearable integration carries a neutral score until disease-specific
        // signal models land.
        let _ = wearable;
        0.5
    }

    fn rank_differential(&self, mut scored: Vec<DiagnosisHypothesis>) -> Vec<DiagnosisHypothesis> {
        scored.retain(|h| h.combined_score >= self.config.min_score_threshold);
        scored.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(self.config.max_differential);
        for (i, hypothesis) in scored.iter_mut().enumerate() {
            hypothesis.rank = i + 1;
        }
        scored
    }

    fn assess_confidence(&self, differential: &[DiagnosisHypothesis]) -> ConfidenceAssessment {
        let Some(top) = differential.first() else {
            return ConfidenceAssessment {
                level: ConfidenceLevel::InsufficientData,
                primary_confidence: 0.0,
                top_diagnoses_gap: 0.0,
                message: "Insufficient evidence to generate differential".to_string(),
            };
        };

        let top_score = top.combined_score;
        let second_score = differential.get(1).map(|h| h.combined_score).unwrap_or(0.0);
        let gap = top_score - second_score;

        let (level, message) = if top_score >= self.config.confidence_required_for_primary
            && gap >= self.config.uncertainty_threshold
        {
            (
                ConfidenceLevel::High,
                "Strong evidence supporting primary diagnosis",
            )
        } else if top_score >= 0.5 && gap >= 0.1 {
            (
                ConfidenceLevel::Moderate,
                "Moderate confidence, consider additional testing",
            )
        } else if top_score >= 0.3 {
            (
                ConfidenceLevel::Low,
                "Low confidence, multiple diagnoses equally likely",
            )
        } else {
            (
                ConfidenceLevel::Uncertain,
                "Highly uncertain, more evidence needed",
            )
        };

        ConfidenceAssessment {
            level,
            primary_confidence: top_score,
            top_diagnoses_gap: gap,
            message: message.to_string(),
        }
    }

    fn generate_explanations(differential: &[DiagnosisHypothesis]) -> HashMap<String, String> {
        let mut explanations = HashMap::new();

        for hypothesis in differential.iter().take(5) {
            let mut parts = Vec::new();

            if hypothesis.phenotype_score >= 0.7 {
                parts.push("Strong phenotypic match");
            } else if hypothesis.phenotype_score >= 0.5 {
                parts.push("Moderate phenotypic overlap");
            } else if hypothesis.phenotype_score < 0.3 {
                parts.push("Limited phenotypic evidence");
            }

            if hypothesis.genetic_score >= 0.8 {
                parts.push("pathogenic variant in disease gene");
            } else if hypothesis.genetic_score >= 0.6 {
                parts.push("variant of uncertain significance in disease gene");
            } else if hypothesis.genetic_score < 0.5 && !hypothesis.associated_genes.is_empty() {
                parts.push("no variants found in associated genes");
            }

            if hypothesis.history_score >= 0.7 {
                parts.push("consistent with family history");
            } else if hypothesis.history_score < 0.3 {
                parts.push("potentially conflicting history");
            }

            let text = if parts.is_empty() {
                "Based on combined evidence".to_string()
            } else {
                parts.join("; ")
            };
            explanations.insert(hypothesis.disease_name.clone(), text);
        }

        explanations
    }
}

#[async_trait]
impl DiagnosticAgent for DifferentialAgent {
    fn role(&self) -> AgentRole {
        AgentRole::DifferentialExpert
    }

    async fn analyze(
        &self,
        patient: &PatientProfile,
        context: &AnalysisContext,
    ) -> Result<AnalysisPayload, AgentError> {
        let candidates = self.generate_candidates(patient, context).await?;
        let considered = candidates.len();

        let patient_hpo = patient.phenotype_codes();
        let variants: Vec<&EvidenceItem> = patient.genetic_variants.iter().collect();
        let history: Vec<&EvidenceItem> = patient.medical_history.iter().collect();
        let family: Vec<&EvidenceItem> = patient.family_history.iter().collect();
        let wearable: Vec<&EvidenceItem> = patient.wearable_data.iter().collect();

        let mut scored = Vec::with_capacity(candidates.len());
        for mut hypothesis in candidates {
            hypothesis.phenotype_score =
                self.score_phenotype_match(&hypothesis, &patient_hpo).await;
            hypothesis.genetic_score = self.score_genetic_match(&hypothesis, &variants).await;
            hypothesis.history_score = Self::score_history_match(&hypothesis, &history, &family);
            let wearable_score = Self::score_wearable_match(&wearable);

            hypothesis.combined_score = hypothesis.phenotype_score * self.config.phenotype_weight
                + hypothesis.genetic_score * self.config.genetic_weight
                + hypothesis.history_score * self.config.history_weight
                + wearable_score * self.config.wearable_weight;
            scored.push(hypothesis);
        }

        let differential = self.rank_differential(scored);
        let confidence_assessment = self.assess_confidence(&differential);
        let explanations = Self::generate_explanations(&differential);

        info!(
            hypotheses = differential.len(),
            top_confidence = differential.first().map(|h| h.combined_score).unwrap_or(0.0),
            "differential analysis complete"
        );

        Ok(AnalysisPayload::Differential(DifferentialAnalysis {
            primary_diagnosis: differential.first().cloned(),
            differential,
            confidence_assessment,
            explanations,
            hypotheses_considered: considered,
        }))
    }

    async fn generate_hypotheses(
        &self,
        evidence: &[EvidenceItem],
        existing: Vec<DiagnosisHypothesis>,
    ) -> Result<Vec<DiagnosisHypothesis>, AgentError> {
        // Rebuild a patient view from the evidence stream and refine.
        let mut patient = PatientProfile::new();
        for item in evidence {
            match item.kind {
                EvidenceKind::Phenotype => patient.phenotypes.push(item.clone()),
                EvidenceKind::Genetic => patient.genetic_variants.push(item.clone()),
                EvidenceKind::History => patient.medical_history.push(item.clone()),
                EvidenceKind::Family => patient.family_history.push(item.clone()),
                EvidenceKind::Wearable => patient.wearable_data.push(item.clone()),
                _ => {}
            }
        }

        let mut candidates = self
            .generate_candidates(&patient, &AnalysisContext::default())
            .await?;

        let seen: HashSet<String> = candidates.iter().map(|h| h.disease_id.clone()).collect();
        for hypothesis in existing {
            if !seen.contains(&hypothesis.disease_id) {
                candidates.push(hypothesis);
            }
        }

        Ok(candidates)
    }

    async fn evaluate_hypothesis(
        &self,
        hypothesis: &DiagnosisHypothesis,
        evidence: &[EvidenceItem],
    ) -> Result<HypothesisEvaluation, AgentError> {
        let phenotypes: Vec<String> = evidence
            .iter()
            .filter(|e| e.kind == EvidenceKind::Phenotype && !e.negated)
            .filter_map(|e| e.code.clone())
            .collect();
        let variants: Vec<&EvidenceItem> = evidence
            .iter()
            .filter(|e| e.kind == EvidenceKind::Genetic)
            .collect();
        let history: Vec<&EvidenceItem> = evidence
            .iter()
            .filter(|e| e.kind == EvidenceKind::History)
            .collect();
        let family: Vec<&EvidenceItem> = evidence
            .iter()
            .filter(|e| e.kind == EvidenceKind::Family)
            .collect();

        let phenotype_score = self.score_phenotype_match(hypothesis, &phenotypes).await;
        let genetic_score = self.score_genetic_match(hypothesis, &variants).await;
        let history_score = Self::score_history_match(hypothesis, &history, &family);

        let combined = phenotype_score * self.config.phenotype_weight
            + genetic_score * self.config.genetic_weight
            + history_score * self.config.history_weight;

        Ok(HypothesisEvaluation {
            score: combined,
            reasoning: format!(
                "phenotype {:.2}, genetic {:.2}, history {:.2}",
                phenotype_score, genetic_score, history_score
            ),
            matched_phenotypes: Vec::new(),
            missing_phenotypes: Vec::new(),
            contradicted_phenotypes: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::fixture_graph;
    use chrono::{TimeZone, Utc};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn agent() -> DifferentialAgent {
        DifferentialAgent::new(DifferentialAgentConfig::default(), Arc::new(fixture_graph()))
    }

    fn dravet_patient() -> PatientProfile {
        let mut patient = PatientProfile::new();
        patient.phenotypes.push(
            EvidenceItem::new(EvidenceKind::Phenotype, "Seizure", now()).with_code("HP:0001250"),
        );
        patient.phenotypes.push(
            EvidenceItem::new(EvidenceKind::Phenotype, "ID", now()).with_code("HP:0001249"),
        );
        patient.genetic_variants.push(
            EvidenceItem::new(EvidenceKind::Genetic, "c.2447G>A", now())
                .with_code("SCN1A")
                .with_severity("pathogenic"),
        );
        patient
    }

    #[tokio::test]
    async fn analysis_ranks_and_explains() {
        let agent = agent();
        let AnalysisPayload::Differential(analysis) = agent
            .analyze(&dravet_patient(), &AnalysisContext::default())
            .await
            .unwrap()
        else {
            panic!("wrong payload type");
        };

        assert!(!analysis.differential.is_empty());
        let primary = analysis.primary_diagnosis.as_ref().unwrap();
        assert_eq!(primary.disease_name, "Dravet syndrome");
        assert_eq!(primary.rank, 1);
        // Pathogenic SCN1A variant drives the genetic component.
        assert!(primary.genetic_score >= 0.95);
        assert!(analysis.explanations.contains_key("Dravet syndrome"));
        assert!(analysis.explanations["Dravet syndrome"].contains("pathogenic variant"));

        for pair in analysis.differential.windows(2) {
            assert!(pair[0].combined_score >= pair[1].combined_score);
        }
    }

    #[tokio::test]
    async fn empty_differential_reports_insufficient_data() {
        let agent = agent();
        let assessment = agent.assess_confidence(&[]);
        assert_eq!(assessment.level, ConfidenceLevel::InsufficientData);
    }

    #[tokio::test]
    async fn confidence_bands() {
        let agent = agent();
        let mut top = DiagnosisHypothesis::new("MONDO:1", "a");
        let mut second = DiagnosisHypothesis::new("MONDO:2", "b");

        top.combined_score = 0.85;
        second.combined_score = 0.4;
        let high = agent.assess_confidence(&[top.clone(), second.clone()]);
        assert_eq!(high.level, ConfidenceLevel::High);

        top.combined_score = 0.55;
        second.combined_score = 0.42;
        let moderate = agent.assess_confidence(&[top.clone(), second.clone()]);
        assert_eq!(moderate.level, ConfidenceLevel::Moderate);

        top.combined_score = 0.35;
        second.combined_score = 0.34;
        let low = agent.assess_confidence(&[top.clone(), second.clone()]);
        assert_eq!(low.level, ConfidenceLevel::Low);

        top.combined_score = 0.2;
        second.combined_score = 0.19;
        let uncertain = agent.assess_confidence(&[top, second]);
        assert_eq!(uncertain.level, ConfidenceLevel::Uncertain);
    }

    #[tokio::test]
    async fn low_scores_fall_out_of_the_differential() {
        let agent = agent();
        let mut keep = DiagnosisHypothesis::new("MONDO:1", "keep");
        keep.combined_score = 0.5;
        let mut drop = DiagnosisHypothesis::new("MONDO:2", "drop");
        drop.combined_score = 0.05;

        let ranked = agent.rank_differential(vec![drop, keep]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].disease_name, "keep");
    }
}
