//! Phenotype analysis agent.
//!
//! Normalizes patient phenotypes to HPO terms, expands them through the
//! hierarchy, categorises by top-level branch, queries the knowledge graph
//! for phenotype-matched diseases and suggests discriminating phenotypes
//! for the current differential.

use crate::agents::{
    AgentError, AgentRole, AnalysisContext, AnalysisPayload, DiagnosticAgent, DiseaseAssociation,
    HypothesisEvaluation, NormalizedPhenotype, PhenotypeAnalysis,
};
use crate::hpo::HpoOntologyService;
use crate::knowledge::KnowledgeGraph;
use crate::models::{DiagnosisHypothesis, EvidenceItem, EvidenceKind, PatientProfile};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

#[derive(Debug, Clone)]
pub struct PhenotypeAgentConfig {
    pub max_hypotheses: usize,
    /// Ancestor expansion stops this many hops up.
    pub max_hierarchy_depth: usize,
    pub include_parent_terms: bool,
    /// Candidate discriminators must beat this score.
    pub min_discrimination_score: f64,
}

impl Default for PhenotypeAgentConfig {
    fn default() -> Self {
        Self {
            max_hypotheses: 20,
            max_hierarchy_depth: 5,
            include_parent_terms: true,
            min_discrimination_score: 0.3,
        }
    }
}

/// Top-level HPO branches used for system categorization.
const SYSTEM_BRANCHES: &[(&str, &str)] = &[
    ("HP:0000152", "Head and neck"),
    ("HP:0000478", "Eye"),
    ("HP:0000598", "Ear"),
    ("HP:0001626", "Cardiovascular"),
    ("HP:0002086", "Respiratory"),
    ("HP:0001871", "Hematologic"),
    ("HP:0000119", "Genitourinary"),
    ("HP:0001939", "Metabolic"),
    ("HP:0003011", "Musculoskeletal"),
    ("HP:0000707", "Nervous system"),
    ("HP:0001574", "Integument"),
    ("HP:0025031", "Digestive"),
    ("HP:0000818", "Endocrine"),
    ("HP:0001197", "Prenatal/Birth"),
    ("HP:0040064", "Limbs"),
];

pub struct PhenotypeAgent {
    config: PhenotypeAgentConfig,
    ontology: Arc<RwLock<HpoOntologyService>>,
    graph: Arc<dyn KnowledgeGraph>,
    disease_phenotype_cache: Mutex<HashMap<String, Vec<String>>>,
}

impl PhenotypeAgent {
    pub fn new(
        config: PhenotypeAgentConfig,
        ontology: Arc<RwLock<HpoOntologyService>>,
        graph: Arc<dyn KnowledgeGraph>,
    ) -> Self {
        Self {
            config,
            ontology,
            graph,
            disease_phenotype_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn normalize(&self, items: &[EvidenceItem]) -> Vec<NormalizedPhenotype> {
        let ontology = self.ontology.read().await;
        items
            .iter()
            .map(|item| {
                if let Some(code) = &item.code {
                    let name = ontology
                        .get_term(code)
                        .map(|t| t.name.clone())
                        .unwrap_or_else(|| item.value.clone());
                    NormalizedPhenotype {
                        hpo_id: Some(code.clone()),
                        name,
                    }
                } else {
                    // Free text: direct name, synonym, then best-effort search.
                    let hpo_id = ontology.resolve_text(&item.value);
                    NormalizedPhenotype {
                        hpo_id,
                        name: item.value.clone(),
                    }
                }
            })
            .collect()
    }

    async fn expand(&self, normalized: &[NormalizedPhenotype]) -> Vec<String> {
        let ontology = self.ontology.read().await;
        let mut expanded: HashSet<String> = HashSet::new();
        for phenotype in normalized {
            if let Some(hpo_id) = &phenotype.hpo_id {
                expanded.insert(hpo_id.clone());
                if self.config.include_parent_terms {
                    expanded.extend(
                        ontology.ancestors_within(hpo_id, self.config.max_hierarchy_depth),
                    );
                }
            }
        }
        let mut result: Vec<String> = expanded.into_iter().collect();
        result.sort();
        result
    }

    async fn categorize_by_system(
        &self,
        normalized: &[NormalizedPhenotype],
    ) -> HashMap<String, Vec<String>> {
        let ontology = self.ontology.read().await;
        let mut by_system: HashMap<String, Vec<String>> = HashMap::new();

        for phenotype in normalized {
            let Some(hpo_id) = &phenotype.hpo_id else {
                continue;
            };
            let ancestors = ontology.ancestors(hpo_id, true);
            let system = SYSTEM_BRANCHES
                .iter()
                .find(|(branch, _)| ancestors.contains(*branch))
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| "Other".to_string());
            by_system.entry(system).or_default().push(hpo_id.clone());
        }

        by_system
    }

    fn identify_patterns(
        normalized: &[NormalizedPhenotype],
        negated: &[NormalizedPhenotype],
        systems: usize,
    ) -> Vec<String> {
        let mut patterns = Vec::new();
        let hpo_ids: HashSet<&str> = normalized
            .iter()
            .filter_map(|p| p.hpo_id.as_deref())
            .collect();

        if hpo_ids.len() > 5 || systems > 2 {
            patterns.push("Multi-system involvement".to_string());
        }
        if hpo_ids.contains("HP:0001250") {
            patterns.push("Epilepsy phenotype".to_string());
        }
        if hpo_ids.contains("HP:0001249") {
            patterns.push("Neurodevelopmental phenotype".to_string());
        }
        if !negated.is_empty() {
            patterns.push(format!("Explicitly negated: {} phenotypes", negated.len()));
        }
        patterns
    }

    fn age_onset_notes(age_of_onset: u32) -> Vec<String> {
        vec![if age_of_onset < 1 {
            "Neonatal/infantile onset - consider congenital conditions".to_string()
        } else if age_of_onset < 5 {
            "Early childhood onset - consider developmental disorders".to_string()
        } else if age_of_onset < 18 {
            "Pediatric onset".to_string()
        } else {
            "Adult onset - may indicate later-onset genetic conditions".to_string()
        }]
    }

    async fn disease_phenotypes(&self, disease_id: &str) -> Result<Vec<String>, AgentError> {
        {
            let cache = self.disease_phenotype_cache.lock().await;
            if let Some(phenotypes) = cache.get(disease_id) {
                return Ok(phenotypes.clone());
            }
        }
        let phenotypes = self
            .graph
            .expected_phenotypes(disease_id, 100)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;
        self.disease_phenotype_cache
            .lock()
            .await
            .insert(disease_id.to_string(), phenotypes.clone());
        Ok(phenotypes)
    }

    /// For the top-5 hypotheses, a candidate phenotype absent from the
    /// patient set scores `1 - |present_fraction - 0.5| * 2`; the best
    /// discriminators sit near the 50% split.
    pub async fn suggest_discriminating_phenotypes(
        &self,
        hypotheses: &[DiagnosisHypothesis],
        known_phenotypes: &[String],
    ) -> Result<Vec<(String, String, f64)>, AgentError> {
        if hypotheses.len() < 2 {
            return Ok(Vec::new());
        }

        let top: Vec<&DiagnosisHypothesis> = hypotheses.iter().take(5).collect();
        let known: HashSet<&str> = known_phenotypes.iter().map(String::as_str).collect();

        let mut per_hypothesis: HashMap<&str, HashSet<String>> = HashMap::new();
        for hypothesis in &top {
            let phenotypes = self.disease_phenotypes(&hypothesis.disease_id).await?;
            per_hypothesis.insert(&hypothesis.disease_id, phenotypes.into_iter().collect());
        }

        let mut all_phenotypes: HashSet<String> = HashSet::new();
        for phenotypes in per_hypothesis.values() {
            all_phenotypes.extend(phenotypes.iter().cloned());
        }

        let ontology = self.ontology.read().await;
        let mut suggestions: Vec<(String, String, f64)> = Vec::new();
        for hpo_id in all_phenotypes {
            if known.contains(hpo_id.as_str()) {
                continue;
            }
            let present_count = per_hypothesis
                .values()
                .filter(|phenotypes| phenotypes.contains(&hpo_id))
                .count();
            let present_fraction = present_count as f64 / top.len() as f64;
            let score = 1.0 - (present_fraction - 0.5).abs() * 2.0;

            if score > self.config.min_discrimination_score {
                let name = ontology
                    .get_term(&hpo_id)
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| hpo_id.clone());
                suggestions.push((hpo_id, name, score));
            }
        }

        suggestions.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        suggestions.truncate(10);
        Ok(suggestions)
    }
}

#[async_trait]
impl DiagnosticAgent for PhenotypeAgent {
    fn role(&self) -> AgentRole {
        AgentRole::PhenotypeExpert
    }

    async fn analyze(
        &self,
        patient: &PatientProfile,
        _context: &AnalysisContext,
    ) -> Result<AnalysisPayload, AgentError> {
        let present: Vec<EvidenceItem> = patient
            .phenotypes
            .iter()
            .filter(|e| !e.negated)
            .cloned()
            .collect();
        let negated_items: Vec<EvidenceItem> = patient
            .phenotypes
            .iter()
            .filter(|e| e.negated)
            .cloned()
            .collect();

        let normalized = self.normalize(&present).await;
        let normalized_negated = self.normalize(&negated_items).await;
        let expanded = self.expand(&normalized).await;
        let by_system = self.categorize_by_system(&normalized).await;

        let codes: Vec<String> = normalized
            .iter()
            .filter_map(|p| p.hpo_id.clone())
            .collect();
        let associations = if codes.is_empty() {
            Vec::new()
        } else {
            self.graph
                .diseases_by_phenotypes(&codes, 1, 30)
                .await
                .map_err(|e| AgentError::Provider(e.to_string()))?
                .into_iter()
                .map(|c| DiseaseAssociation {
                    disease_id: c.disease_id,
                    disease_name: c.disease_name,
                    phenotype_matches: c.match_count,
                })
                .collect()
        };

        let patterns = Self::identify_patterns(&normalized, &normalized_negated, by_system.len());
        let age_onset_notes = patient
            .age_of_onset
            .map(Self::age_onset_notes)
            .unwrap_or_default();

        let analysis = PhenotypeAnalysis {
            phenotype_count: normalized.len(),
            negated_count: normalized_negated.len(),
            normalized_phenotypes: normalized,
            negated_phenotypes: normalized_negated,
            expanded_phenotypes: expanded,
            systems_affected: by_system.keys().cloned().collect(),
            phenotypes_by_system: by_system,
            disease_associations: associations,
            patterns,
            age_onset_notes,
        };

        info!(
            phenotype_count = analysis.phenotype_count,
            systems = analysis.systems_affected.len(),
            "phenotype analysis complete"
        );

        Ok(AnalysisPayload::Phenotype(analysis))
    }

    async fn generate_hypotheses(
        &self,
        evidence: &[EvidenceItem],
        existing: Vec<DiagnosisHypothesis>,
    ) -> Result<Vec<DiagnosisHypothesis>, AgentError> {
        let hpo_codes: Vec<String> = evidence
            .iter()
            .filter(|e| e.kind == EvidenceKind::Phenotype && !e.negated)
            .filter_map(|e| e.code.clone())
            .collect();

        if hpo_codes.is_empty() {
            return Ok(existing);
        }

        let min_matches = (hpo_codes.len() / 3).max(1);
        let candidates = self
            .graph
            .diseases_by_phenotypes(&hpo_codes, min_matches, self.config.max_hypotheses)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let mut hypotheses: Vec<DiagnosisHypothesis> = Vec::new();
        for candidate in candidates {
            let mut hypothesis =
                DiagnosisHypothesis::new(candidate.disease_id.clone(), candidate.disease_name);
            // recall over the patient's codes, precision over the disease's.
            let recall = candidate.match_count as f64 / hpo_codes.len().max(1) as f64;
            let precision =
                candidate.match_count as f64 / candidate.total_phenotypes.max(1) as f64;
            hypothesis.phenotype_score = (recall + precision) / 2.0;
            hypothesis.matched_phenotypes = candidate.matched_phenotypes;
            hypothesis.associated_genes = candidate.associated_genes;
            hypothesis.description = candidate.description;
            hypotheses.push(hypothesis);
        }

        // Merge with existing, first writer wins on disease id.
        let seen: HashSet<String> = hypotheses.iter().map(|h| h.disease_id.clone()).collect();
        for hypothesis in existing {
            if !seen.contains(&hypothesis.disease_id) {
                hypotheses.push(hypothesis);
            }
        }

        Ok(hypotheses)
    }

    async fn evaluate_hypothesis(
        &self,
        hypothesis: &DiagnosisHypothesis,
        evidence: &[EvidenceItem],
    ) -> Result<HypothesisEvaluation, AgentError> {
        if hypothesis.disease_id.is_empty() {
            return Ok(HypothesisEvaluation {
                score: 0.0,
                reasoning: "No disease ID".to_string(),
                matched_phenotypes: Vec::new(),
                missing_phenotypes: Vec::new(),
                contradicted_phenotypes: Vec::new(),
            });
        }

        let mut patient_hpo = Vec::new();
        let mut patient_negated = Vec::new();
        for item in evidence {
            if item.kind != EvidenceKind::Phenotype {
                continue;
            }
            if let Some(code) = &item.code {
                if item.negated {
                    patient_negated.push(code.clone());
                } else {
                    patient_hpo.push(code.clone());
                }
            }
        }

        let expected = self.disease_phenotypes(&hypothesis.disease_id).await?;
        if expected.is_empty() {
            return Ok(HypothesisEvaluation::neutral(
                "No expected phenotypes found for disease",
            ));
        }

        let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();
        let matched: Vec<String> = patient_hpo
            .iter()
            .filter(|p| expected_set.contains(p.as_str()))
            .cloned()
            .collect();
        let missing: Vec<String> = expected
            .iter()
            .filter(|p| !patient_hpo.contains(p))
            .take(10)
            .cloned()
            .collect();
        let contradicted: Vec<String> = patient_negated
            .iter()
            .filter(|p| expected_set.contains(p.as_str()))
            .cloned()
            .collect();

        let recall = if patient_hpo.is_empty() {
            0.0
        } else {
            matched.len() as f64 / patient_hpo.len() as f64
        };
        let precision = matched.len() as f64 / expected.len() as f64;
        let contradiction_penalty = contradicted.len() as f64 * 0.1;
        let score = (recall * 0.6 + precision * 0.4 - contradiction_penalty).clamp(0.0, 1.0);

        let mut reasoning_parts = Vec::new();
        if !matched.is_empty() {
            reasoning_parts.push(format!(
                "Matched {}/{} patient phenotypes",
                matched.len(),
                patient_hpo.len()
            ));
        }
        if !missing.is_empty() {
            reasoning_parts.push(format!("Missing {} expected phenotypes", missing.len()));
        }
        if !contradicted.is_empty() {
            reasoning_parts.push(format!(
                "Warning: {} negated phenotypes are expected for this disease",
                contradicted.len()
            ));
        }

        Ok(HypothesisEvaluation {
            score,
            reasoning: if reasoning_parts.is_empty() {
                "No specific matches".to_string()
            } else {
                reasoning_parts.join(". ")
            },
            matched_phenotypes: matched,
            missing_phenotypes: missing,
            contradicted_phenotypes: contradicted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpo::ontology::TEST_OBO;
    use crate::knowledge::fixture_graph;
    use chrono::{TimeZone, Utc};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    async fn agent() -> PhenotypeAgent {
        let mut ontology = HpoOntologyService::new();
        ontology.load_from_obo(TEST_OBO).unwrap();
        PhenotypeAgent::new(
            PhenotypeAgentConfig::default(),
            Arc::new(RwLock::new(ontology)),
            Arc::new(fixture_graph()),
        )
    }

    fn seizure_patient() -> PatientProfile {
        let mut patient = PatientProfile::new();
        patient.phenotypes.push(
            EvidenceItem::new(EvidenceKind::Phenotype, "Seizure", now()).with_code("HP:0001250"),
        );
        patient
            .phenotypes
            .push(EvidenceItem::new(EvidenceKind::Phenotype, "mental retardation", now()));
        patient
    }

    #[tokio::test]
    async fn analysis_normalizes_free_text_and_finds_associations() {
        let agent = agent().await;
        let patient = seizure_patient();

        let AnalysisPayload::Phenotype(analysis) = agent
            .analyze(&patient, &AnalysisContext::default())
            .await
            .unwrap()
        else {
            panic!("wrong payload type");
        };

        assert_eq!(analysis.phenotype_count, 2);
        // Free text resolved through the synonym index.
        assert_eq!(
            analysis.normalized_phenotypes[1].hpo_id.as_deref(),
            Some("HP:0001249")
        );
        assert!(analysis
            .patterns
            .iter()
            .any(|p| p == "Epilepsy phenotype"));
        assert!(!analysis.disease_associations.is_empty());
        assert!(analysis
            .systems_affected
            .contains(&"Nervous system".to_string()));
    }

    #[tokio::test]
    async fn hypotheses_carry_recall_precision_scores() {
        let agent = agent().await;
        let evidence = vec![
            EvidenceItem::new(EvidenceKind::Phenotype, "Seizure", now()).with_code("HP:0001250"),
            EvidenceItem::new(EvidenceKind::Phenotype, "ID", now()).with_code("HP:0001249"),
        ];

        let hypotheses = agent.generate_hypotheses(&evidence, Vec::new()).await.unwrap();
        assert!(!hypotheses.is_empty());

        let dravet = hypotheses
            .iter()
            .find(|h| h.disease_id == "MONDO:0100135")
            .unwrap();
        assert_eq!(dravet.matched_phenotypes.len(), 2);
        // recall 2/2, precision 2/4
        assert!((dravet.phenotype_score - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn evaluation_penalizes_contradictions() {
        let agent = agent().await;
        let hypothesis = {
            let mut h = DiagnosisHypothesis::new("MONDO:0100135", "Dravet syndrome");
            h.associated_genes = vec!["SCN1A".to_string()];
            h
        };

        let evidence = vec![
            EvidenceItem::new(EvidenceKind::Phenotype, "Seizure", now()).with_code("HP:0001250"),
            EvidenceItem::new(EvidenceKind::Phenotype, "Status epilepticus", now())
                .with_code("HP:0002069")
                .negated(true),
        ];

        let evaluation = agent.evaluate_hypothesis(&hypothesis, &evidence).await.unwrap();
        assert_eq!(evaluation.matched_phenotypes, vec!["HP:0001250"]);
        assert_eq!(evaluation.contradicted_phenotypes, vec!["HP:0002069"]);
        assert!(evaluation.reasoning.contains("negated"));
    }

    #[tokio::test]
    async fn discriminators_prefer_the_even_split() {
        let agent = agent().await;
        let hypotheses = vec![
            DiagnosisHypothesis::new("MONDO:0100135", "Dravet syndrome"),
            DiagnosisHypothesis::new("MONDO:0010726", "Rett syndrome"),
        ];

        let suggestions = agent
            .suggest_discriminating_phenotypes(&hypotheses, &["HP:0001250".to_string()])
            .await
            .unwrap();

        assert!(!suggestions.is_empty());
        // Known phenotypes are excluded.
        assert!(suggestions.iter().all(|(hpo, _, _)| hpo != "HP:0001250"));
        // Phenotypes present in exactly one of two hypotheses score 1.0.
        let (top_hpo, _, top_score) = &suggestions[0];
        assert!((*top_score - 1.0).abs() < 1e-9, "top: {}", top_hpo);
    }

    #[tokio::test]
    async fn single_hypothesis_has_no_discriminators() {
        let agent = agent().await;
        let hypotheses = vec![DiagnosisHypothesis::new("MONDO:0100135", "Dravet syndrome")];
        let suggestions = agent
            .suggest_discriminating_phenotypes(&hypotheses, &[])
            .await
            .unwrap();
        assert!(suggestions.is_empty());
    }
}
