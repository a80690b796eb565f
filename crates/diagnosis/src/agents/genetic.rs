//! Genetic analysis agent.
//!
//! Classifies variants by pathogenicity, looks up gene-disease
//! associations, flags potential compound heterozygosity and scores genetic
//! evidence through a capped product of likelihood ratios.

use crate::agents::{
    AgentError, AgentRole, AnalysisContext, AnalysisPayload, CandidateGene, ClassifiedVariant,
    CompoundHetFinding, DiagnosticAgent, GeneticAnalysis, HypothesisEvaluation,
    PathogenicityClass,
};
use crate::knowledge::{GeneAssociation, KnowledgeGraph};
use crate::models::{DiagnosisHypothesis, EvidenceItem, EvidenceKind, PatientProfile};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone)]
pub struct GeneticAgentConfig {
    pub max_hypotheses: usize,
    pub pathogenic_lr: f64,
    pub likely_pathogenic_lr: f64,
    pub vus_lr: f64,
    pub likely_benign_lr: f64,
    pub benign_lr: f64,
}

impl Default for GeneticAgentConfig {
    fn default() -> Self {
        Self {
            max_hypotheses: 20,
            pathogenic_lr: 50.0,
            likely_pathogenic_lr: 10.0,
            vus_lr: 2.0,
            likely_benign_lr: 0.2,
            benign_lr: 0.1,
        }
    }
}

pub struct GeneticAgent {
    config: GeneticAgentConfig,
    graph: Arc<dyn KnowledgeGraph>,
    gene_cache: Mutex<HashMap<String, Vec<GeneAssociation>>>,
    disease_gene_cache: Mutex<HashMap<String, Vec<String>>>,
}

impl GeneticAgent {
    pub fn new(config: GeneticAgentConfig, graph: Arc<dyn KnowledgeGraph>) -> Self {
        Self {
            config,
            graph,
            gene_cache: Mutex::new(HashMap::new()),
            disease_gene_cache: Mutex::new(HashMap::new()),
        }
    }

    fn classify(&self, pathogenicity: &str) -> (PathogenicityClass, f64) {
        let p = pathogenicity.to_lowercase();
        if (p.contains("likely_pathogenic") || p.contains("likely pathogenic"))
            || (p.contains("pathogenic") && p.contains("likely"))
        {
            (
                PathogenicityClass::LikelyPathogenic,
                self.config.likely_pathogenic_lr,
            )
        } else if p.contains("pathogenic") {
            (PathogenicityClass::Pathogenic, self.config.pathogenic_lr)
        } else if p.contains("likely_benign") || p.contains("likely benign") {
            (PathogenicityClass::LikelyBenign, self.config.likely_benign_lr)
        } else if p.contains("benign") {
            (PathogenicityClass::Benign, self.config.benign_lr)
        } else {
            (PathogenicityClass::Vus, self.config.vus_lr)
        }
    }

    fn classify_variants(&self, variants: &[EvidenceItem]) -> Vec<ClassifiedVariant> {
        variants
            .iter()
            .filter_map(|v| {
                let gene = v.code.clone()?;
                let (class, lr) = self.classify(v.severity.as_deref().unwrap_or(""));
                Some(ClassifiedVariant {
                    gene_symbol: gene,
                    notation: v.value.clone(),
                    class,
                    likelihood_ratio: lr,
                    zygosity: None,
                })
            })
            .collect()
    }

    async fn gene_associations(&self, gene: &str) -> Result<Vec<GeneAssociation>, AgentError> {
        {
            let cache = self.gene_cache.lock().await;
            if let Some(associations) = cache.get(gene) {
                return Ok(associations.clone());
            }
        }
        let associations = self
            .graph
            .gene_associations(gene)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;
        self.gene_cache
            .lock()
            .await
            .insert(gene.to_string(), associations.clone());
        Ok(associations)
    }

    async fn disease_genes(&self, disease_id: &str) -> Result<Vec<String>, AgentError> {
        {
            let cache = self.disease_gene_cache.lock().await;
            if let Some(genes) = cache.get(disease_id) {
                return Ok(genes.clone());
            }
        }
        let genes = self
            .graph
            .disease_genes(disease_id)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;
        self.disease_gene_cache
            .lock()
            .await
            .insert(disease_id.to_string(), genes.clone());
        Ok(genes)
    }

    /// Two or more variants in a gene tied to any recessive disease raise a
    /// compound-heterozygosity flag.
    fn check_compound_heterozygosity(
        variants: &[ClassifiedVariant],
        associations: &HashMap<String, Vec<GeneAssociation>>,
    ) -> Vec<CompoundHetFinding> {
        let mut by_gene: HashMap<&str, Vec<&ClassifiedVariant>> = HashMap::new();
        for variant in variants {
            by_gene.entry(&variant.gene_symbol).or_default().push(variant);
        }

        let mut findings = Vec::new();
        for (gene, gene_variants) in by_gene {
            if gene_variants.len() < 2 {
                continue;
            }
            let recessive: Vec<&GeneAssociation> = associations
                .get(gene)
                .into_iter()
                .flatten()
                .filter(|a| {
                    a.inheritance
                        .as_deref()
                        .map(|i| i.to_lowercase().contains("recessive"))
                        .unwrap_or(false)
                })
                .collect();
            if recessive.is_empty() {
                continue;
            }
            findings.push(CompoundHetFinding {
                gene_symbol: gene.to_string(),
                variant_count: gene_variants.len(),
                variants: gene_variants.iter().map(|v| v.notation.clone()).collect(),
                potential_diseases: recessive
                    .iter()
                    .take(3)
                    .map(|a| a.disease_name.clone())
                    .collect(),
            });
        }
        findings
    }

    fn inheritance_notes(
        classified: &[ClassifiedVariant],
        family_history: &[EvidenceItem],
    ) -> Vec<String> {
        let mut notes = Vec::new();

        if !family_history.is_empty() {
            notes.push("Family history present - inheritance pattern analysis may help".to_string());
        }
        if classified.iter().any(ClassifiedVariant::is_pathogenic) && family_history.is_empty() {
            notes.push("Consider de novo variants if parents unaffected".to_string());
        }
        notes
    }

    /// Combined genetic score: logistic transform of log(product of LRs) / 3,
    /// bounded to [0.01, 0.99].
    fn genetic_score(variants: &[&ClassifiedVariant]) -> f64 {
        if variants.is_empty() {
            return 0.5;
        }
        let combined_lr: f64 = variants.iter().map(|v| v.likelihood_ratio).product();
        if combined_lr <= 0.0 {
            return 0.0;
        }
        let score = 1.0 / (1.0 + (-combined_lr.ln() / 3.0).exp());
        score.clamp(0.01, 0.99)
    }
}

#[async_trait]
impl DiagnosticAgent for GeneticAgent {
    fn role(&self) -> AgentRole {
        AgentRole::GeneticExpert
    }

    async fn analyze(
        &self,
        patient: &PatientProfile,
        _context: &AnalysisContext,
    ) -> Result<AnalysisPayload, AgentError> {
        if patient.genetic_variants.is_empty() {
            return Ok(AnalysisPayload::Genetic(GeneticAnalysis {
                has_genetic_data: false,
                ..Default::default()
            }));
        }

        let classified = self.classify_variants(&patient.genetic_variants);
        let genes: Vec<String> = classified
            .iter()
            .map(|v| v.gene_symbol.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let mut associations: HashMap<String, Vec<GeneAssociation>> = HashMap::new();
        for gene in &genes {
            let gene_associations = self.gene_associations(gene).await?;
            if !gene_associations.is_empty() {
                associations.insert(gene.clone(), gene_associations);
            }
        }

        let compound_het = Self::check_compound_heterozygosity(&classified, &associations);
        let inheritance_notes = Self::inheritance_notes(&classified, &patient.family_history);

        let mut candidate_genes: Vec<CandidateGene> = classified
            .iter()
            .filter(|v| {
                associations.contains_key(&v.gene_symbol)
                    && !matches!(
                        v.class,
                        PathogenicityClass::Benign | PathogenicityClass::LikelyBenign
                    )
            })
            .map(|v| {
                let gene_associations = &associations[&v.gene_symbol];
                CandidateGene {
                    gene_symbol: v.gene_symbol.clone(),
                    variant: v.notation.clone(),
                    pathogenicity: v.class,
                    disease_associations: gene_associations.len(),
                    top_diseases: gene_associations
                        .iter()
                        .take(3)
                        .map(|a| a.disease_name.clone())
                        .collect(),
                }
            })
            .collect();
        candidate_genes.sort_by(|a, b| {
            let a_key = (
                matches!(
                    a.pathogenicity,
                    PathogenicityClass::Pathogenic | PathogenicityClass::LikelyPathogenic
                ),
                a.disease_associations,
            );
            let b_key = (
                matches!(
                    b.pathogenicity,
                    PathogenicityClass::Pathogenic | PathogenicityClass::LikelyPathogenic
                ),
                b.disease_associations,
            );
            b_key.cmp(&a_key)
        });
        candidate_genes.truncate(10);

        let analysis = GeneticAnalysis {
            has_genetic_data: true,
            variants_analyzed: patient.genetic_variants.len(),
            pathogenic_count: classified
                .iter()
                .filter(|v| ClassifiedVariant::is_pathogenic(v))
                .count(),
            vus_count: classified
                .iter()
                .filter(|v| v.class == PathogenicityClass::Vus)
                .count(),
            variants: classified,
            genes_affected: genes,
            compound_heterozygosity: compound_het,
            inheritance_notes,
            candidate_genes,
        };

        info!(
            variants = analysis.variants_analyzed,
            pathogenic = analysis.pathogenic_count,
            genes = analysis.genes_affected.len(),
            "genetic analysis complete"
        );

        Ok(AnalysisPayload::Genetic(analysis))
    }

    async fn generate_hypotheses(
        &self,
        evidence: &[EvidenceItem],
        existing: Vec<DiagnosisHypothesis>,
    ) -> Result<Vec<DiagnosisHypothesis>, AgentError> {
        let significant: Vec<&EvidenceItem> = evidence
            .iter()
            .filter(|e| e.kind == EvidenceKind::Genetic)
            .filter(|e| {
                e.severity
                    .as_deref()
                    .map(|s| s.to_lowercase().contains("pathogenic"))
                    .unwrap_or(false)
            })
            .collect();

        let genes: Vec<String> = significant
            .iter()
            .filter_map(|e| e.code.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        if genes.is_empty() {
            return Ok(existing);
        }

        let candidates = self
            .graph
            .diseases_by_genes(&genes, self.config.max_hypotheses)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let mut hypotheses = Vec::new();
        for candidate in candidates {
            let matching_variants: Vec<&&EvidenceItem> = significant
                .iter()
                .filter(|e| {
                    e.code
                        .as_deref()
                        .map(|g| candidate.associated_genes.iter().any(|cg| cg == g))
                        .unwrap_or(false)
                })
                .collect();
            let classified: Vec<ClassifiedVariant> = matching_variants
                .iter()
                .map(|e| {
                    let (class, lr) = self.classify(e.severity.as_deref().unwrap_or(""));
                    ClassifiedVariant {
                        gene_symbol: e.code.clone().unwrap_or_default(),
                        notation: e.value.clone(),
                        class,
                        likelihood_ratio: lr,
                        zygosity: None,
                    }
                })
                .collect();

            let mut hypothesis =
                DiagnosisHypothesis::new(candidate.disease_id, candidate.disease_name);
            hypothesis.associated_genes = candidate.associated_genes;
            hypothesis.expected_phenotypes = self
                .graph
                .expected_phenotypes(&hypothesis.disease_id, 20)
                .await
                .map_err(|e| AgentError::Provider(e.to_string()))?;
            hypothesis.genetic_score = Self::genetic_score(&classified.iter().collect::<Vec<_>>());
            hypotheses.push(hypothesis);
        }

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
        let variants: Vec<&EvidenceItem> = evidence
            .iter()
            .filter(|e| e.kind == EvidenceKind::Genetic)
            .collect();

        if variants.is_empty() {
            return Ok(HypothesisEvaluation::neutral("No genetic evidence available"));
        }

        let disease_genes = if hypothesis.associated_genes.is_empty() {
            self.disease_genes(&hypothesis.disease_id).await?
        } else {
            hypothesis.associated_genes.clone()
        };

        if disease_genes.is_empty() {
            return Ok(HypothesisEvaluation::neutral("No known genes for this disease"));
        }

        let matching: Vec<ClassifiedVariant> = variants
            .iter()
            .filter(|e| {
                e.code
                    .as_deref()
                    .map(|g| disease_genes.iter().any(|dg| dg == g))
                    .unwrap_or(false)
            })
            .map(|e| {
                let (class, lr) = self.classify(e.severity.as_deref().unwrap_or(""));
                ClassifiedVariant {
                    gene_symbol: e.code.clone().unwrap_or_default(),
                    notation: e.value.clone(),
                    class,
                    likelihood_ratio: lr,
                    zygosity: None,
                }
            })
            .collect();

        if matching.is_empty() {
            return Ok(HypothesisEvaluation {
                score: 0.3,
                reasoning: format!(
                    "No variants found in disease-associated genes ({})",
                    disease_genes
                        .iter()
                        .take(5)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                matched_phenotypes: Vec::new(),
                missing_phenotypes: Vec::new(),
                contradicted_phenotypes: Vec::new(),
            });
        }

        let score = Self::genetic_score(&matching.iter().collect::<Vec<_>>());
        let pathogenic_count = matching
            .iter()
            .filter(|v| ClassifiedVariant::is_pathogenic(v))
            .count();

        let reasoning = if pathogenic_count > 0 {
            format!(
                "Found {} pathogenic variant(s) in disease-associated genes",
                pathogenic_count
            )
        } else {
            format!(
                "Found {} variant(s) of uncertain significance in disease genes",
                matching.len()
            )
        };

        Ok(HypothesisEvaluation {
            score,
            reasoning,
            matched_phenotypes: Vec::new(),
            missing_phenotypes: Vec::new(),
            contradicted_phenotypes: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{fixture_graph, DiseaseRecord, StaticKnowledgeGraph};
    use chrono::{TimeZone, Utc};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn agent() -> GeneticAgent {
        GeneticAgent::new(GeneticAgentConfig::default(), Arc::new(fixture_graph()))
    }

    fn variant(gene: &str, notation: &str, pathogenicity: &str) -> EvidenceItem {
        EvidenceItem::new(EvidenceKind::Genetic, notation, now())
            .with_code(gene)
            .with_severity(pathogenicity)
    }

    #[tokio::test]
    async fn no_variants_yields_empty_analysis() {
        let agent = agent();
        let AnalysisPayload::Genetic(analysis) = agent
            .analyze(&PatientProfile::new(), &AnalysisContext::default())
            .await
            .unwrap()
        else {
            panic!("wrong payload type");
        };
        assert!(!analysis.has_genetic_data);
        assert_eq!(analysis.variants_analyzed, 0);
    }

    #[tokio::test]
    async fn classification_maps_pathogenicity_strings() {
        let agent = agent();
        for (input, expected) in [
            ("pathogenic", PathogenicityClass::Pathogenic),
            ("likely_pathogenic", PathogenicityClass::LikelyPathogenic),
            ("Likely pathogenic", PathogenicityClass::LikelyPathogenic),
            ("benign", PathogenicityClass::Benign),
            ("likely_benign", PathogenicityClass::LikelyBenign),
            ("uncertain_significance", PathogenicityClass::Vus),
            ("", PathogenicityClass::Vus),
        ] {
            let (class, _) = agent.classify(input);
            assert_eq!(class, expected, "input: {}", input);
        }
    }

    #[tokio::test]
    async fn pathogenic_variant_analysis_finds_candidates() {
        let agent = agent();
        let mut patient = PatientProfile::new();
        patient
            .genetic_variants
            .push(variant("SCN1A", "c.2447G>A", "pathogenic"));

        let AnalysisPayload::Genetic(analysis) = agent
            .analyze(&patient, &AnalysisContext::default())
            .await
            .unwrap()
        else {
            panic!("wrong payload type");
        };

        assert!(analysis.has_genetic_data);
        assert_eq!(analysis.pathogenic_count, 1);
        assert_eq!(analysis.candidate_genes.len(), 1);
        assert_eq!(analysis.candidate_genes[0].gene_symbol, "SCN1A");
        assert!(analysis.candidate_genes[0]
            .top_diseases
            .contains(&"Dravet syndrome".to_string()));
    }

    #[tokio::test]
    async fn compound_het_requires_recessive_association() {
        // CFTR is recessive in this graph; SCN1A is dominant.
        let graph = StaticKnowledgeGraph::new(vec![
            DiseaseRecord {
                disease_id: "MONDO:0009061".to_string(),
                disease_name: "Cystic fibrosis".to_string(),
                description: None,
                phenotypes: vec![("HP:0006528".to_string(), 0.9)],
                genes: vec!["CFTR".to_string()],
                prevalence: None,
                inheritance: Some("autosomal recessive".to_string()),
            },
            DiseaseRecord {
                disease_id: "MONDO:0100135".to_string(),
                disease_name: "Dravet syndrome".to_string(),
                description: None,
                phenotypes: vec![("HP:0001250".to_string(), 0.95)],
                genes: vec!["SCN1A".to_string()],
                prevalence: None,
                inheritance: Some("autosomal dominant".to_string()),
            },
        ]);
        let agent = GeneticAgent::new(GeneticAgentConfig::default(), Arc::new(graph));

        let mut patient = PatientProfile::new();
        patient
            .genetic_variants
            .push(variant("CFTR", "c.1521_1523del", "pathogenic"));
        patient
            .genetic_variants
            .push(variant("CFTR", "c.350G>A", "likely_pathogenic"));
        patient
            .genetic_variants
            .push(variant("SCN1A", "c.2447G>A", "pathogenic"));

        let AnalysisPayload::Genetic(analysis) = agent
            .analyze(&patient, &AnalysisContext::default())
            .await
            .unwrap()
        else {
            panic!("wrong payload type");
        };

        assert_eq!(analysis.compound_heterozygosity.len(), 1);
        let finding = &analysis.compound_heterozygosity[0];
        assert_eq!(finding.gene_symbol, "CFTR");
        assert_eq!(finding.variant_count, 2);
        assert!(finding
            .potential_diseases
            .contains(&"Cystic fibrosis".to_string()));
    }

    #[tokio::test]
    async fn gene_hypotheses_come_from_associations() {
        let agent = agent();
        let evidence = vec![variant("SCN1A", "c.2447G>A", "pathogenic")];

        let hypotheses = agent.generate_hypotheses(&evidence, Vec::new()).await.unwrap();
        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].disease_name, "Dravet syndrome");
        assert!(hypotheses[0].genetic_score > 0.7);
        assert!(!hypotheses[0].expected_phenotypes.is_empty());
    }

    #[tokio::test]
    async fn evaluation_scores_matching_variants() {
        let agent = agent();
        let mut hypothesis = DiagnosisHypothesis::new("MONDO:0100135", "Dravet syndrome");
        hypothesis.associated_genes = vec!["SCN1A".to_string()];

        let supporting = agent
            .evaluate_hypothesis(&hypothesis, &[variant("SCN1A", "c.1G>A", "pathogenic")])
            .await
            .unwrap();
        assert!(supporting.score > 0.7);
        assert!(supporting.reasoning.contains("pathogenic"));

        let unrelated = agent
            .evaluate_hypothesis(&hypothesis, &[variant("BRCA1", "c.68_69del", "pathogenic")])
            .await
            .unwrap();
        assert!((unrelated.score - 0.3).abs() < 1e-9);

        let no_data = agent.evaluate_hypothesis(&hypothesis, &[]).await.unwrap();
        assert_eq!(no_data.score, 0.5);
    }
}
