//! Knowledge-graph interface for disease queries.
//!
//! The engine and agents only need a handful of capabilities from whatever
//! biomedical graph backs them: candidate diseases by phenotype overlap or
//! gene, expected phenotypes with frequencies, and gene-disease
//! associations. [`StaticKnowledgeGraph`] serves fixtures and deployments
//! with a pre-loaded in-memory graph.

use async_trait::async_trait;
use forge_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A disease candidate returned from a phenotype or gene query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiseaseCandidate {
    pub disease_id: String,
    pub disease_name: String,
    pub description: Option<String>,
    pub matched_phenotypes: Vec<String>,
    /// Number of the patient's phenotypes matched.
    pub match_count: usize,
    /// Total phenotypes annotated to the disease.
    pub total_phenotypes: usize,
    pub associated_genes: Vec<String>,
    pub prevalence: Option<String>,
    pub inheritance: Option<String>,
}

/// A gene-disease association row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneAssociation {
    pub disease_id: String,
    pub disease_name: String,
    pub score: f64,
    pub inheritance: Option<String>,
}

/// Read capabilities the diagnosis side needs from the graph.
#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    /// Diseases whose phenotype set intersects the given codes with at least
    /// `min_matches` overlap, ordered by match count descending.
    async fn diseases_by_phenotypes(
        &self,
        phenotypes: &[String],
        min_matches: usize,
        limit: usize,
    ) -> Result<Vec<DiseaseCandidate>>;

    /// Diseases associated with any of the given genes.
    async fn diseases_by_genes(&self, genes: &[String], limit: usize)
        -> Result<Vec<DiseaseCandidate>>;

    /// Expected phenotypes for a disease, most frequent first.
    async fn expected_phenotypes(&self, disease_id: &str, limit: usize) -> Result<Vec<String>>;

    /// Phenotype frequency map for a disease (HPO id -> frequency in
    /// [0.01, 1.0]).
    async fn phenotype_frequencies(&self, disease_id: &str) -> Result<HashMap<String, f64>>;

    /// Genes associated with a disease.
    async fn disease_genes(&self, disease_id: &str) -> Result<Vec<String>>;

    /// Disease associations for a gene, best score first.
    async fn gene_associations(&self, gene_symbol: &str) -> Result<Vec<GeneAssociation>>;
}

/// One disease entry in the static graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiseaseRecord {
    pub disease_id: String,
    pub disease_name: String,
    pub description: Option<String>,
    /// (HPO id, frequency in patients with this disease).
    pub phenotypes: Vec<(String, f64)>,
    pub genes: Vec<String>,
    pub prevalence: Option<String>,
    pub inheritance: Option<String>,
}

/// In-memory knowledge graph built from disease records.
#[derive(Default)]
pub struct StaticKnowledgeGraph {
    diseases: Vec<DiseaseRecord>,
    by_gene: HashMap<String, Vec<usize>>,
}

impl StaticKnowledgeGraph {
    pub fn new(diseases: Vec<DiseaseRecord>) -> Self {
        let mut by_gene: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, disease) in diseases.iter().enumerate() {
            for gene in &disease.genes {
                by_gene.entry(gene.clone()).or_default().push(index);
            }
        }
        Self { diseases, by_gene }
    }

    fn candidate_for(&self, record: &DiseaseRecord, matched: Vec<String>) -> DiseaseCandidate {
        DiseaseCandidate {
            disease_id: record.disease_id.clone(),
            disease_name: record.disease_name.clone(),
            description: record.description.clone(),
            match_count: matched.len(),
            matched_phenotypes: matched,
            total_phenotypes: record.phenotypes.len(),
            associated_genes: record.genes.clone(),
            prevalence: record.prevalence.clone(),
            inheritance: record.inheritance.clone(),
        }
    }
}

#[async_trait]
impl KnowledgeGraph for StaticKnowledgeGraph {
    async fn diseases_by_phenotypes(
        &self,
        phenotypes: &[String],
        min_matches: usize,
        limit: usize,
    ) -> Result<Vec<DiseaseCandidate>> {
        let mut candidates: Vec<DiseaseCandidate> = self
            .diseases
            .iter()
            .filter_map(|record| {
                let matched: Vec<String> = record
                    .phenotypes
                    .iter()
                    .filter(|(hpo, _)| phenotypes.contains(hpo))
                    .map(|(hpo, _)| hpo.clone())
                    .collect();
                if matched.len() >= min_matches.max(1) {
                    Some(self.candidate_for(record, matched))
                } else {
                    None
                }
            })
            .collect();

        candidates.sort_by(|a, b| b.match_count.cmp(&a.match_count));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn diseases_by_genes(
        &self,
        genes: &[String],
        limit: usize,
    ) -> Result<Vec<DiseaseCandidate>> {
        let mut seen = Vec::new();
        let mut candidates = Vec::new();

        for gene in genes {
            for &index in self.by_gene.get(gene).map(|v| v.as_slice()).unwrap_or(&[]) {
                if seen.contains(&index) {
                    continue;
                }
                seen.push(index);
                let record = &self.diseases[index];
                candidates.push(self.candidate_for(record, Vec::new()));
            }
        }

        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn expected_phenotypes(&self, disease_id: &str, limit: usize) -> Result<Vec<String>> {
        let Some(record) = self.diseases.iter().find(|d| d.disease_id == disease_id) else {
            return Ok(Vec::new());
        };
        let mut phenotypes = record.phenotypes.clone();
        phenotypes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(phenotypes
            .into_iter()
            .take(limit)
            .map(|(hpo, _)| hpo)
            .collect())
    }

    async fn phenotype_frequencies(&self, disease_id: &str) -> Result<HashMap<String, f64>> {
        Ok(self
            .diseases
            .iter()
            .find(|d| d.disease_id == disease_id)
            .map(|record| {
                record
                    .phenotypes
                    .iter()
                    .map(|(hpo, freq)| (hpo.clone(), freq.clamp(0.01, 1.0)))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn disease_genes(&self, disease_id: &str) -> Result<Vec<String>> {
        Ok(self
            .diseases
            .iter()
            .find(|d| d.disease_id == disease_id)
            .map(|record| record.genes.clone())
            .unwrap_or_default())
    }

    async fn gene_associations(&self, gene_symbol: &str) -> Result<Vec<GeneAssociation>> {
        Ok(self
            .by_gene
            .get(gene_symbol)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| {
                        let record = &self.diseases[i];
                        GeneAssociation {
                            disease_id: record.disease_id.clone(),
                            disease_name: record.disease_name.clone(),
                            score: 0.5,
                            inheritance: record.inheritance.clone(),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// A small fixture graph shared by tests: two overlapping epilepsy
/// syndromes and one unrelated disease.
pub fn fixture_graph() -> StaticKnowledgeGraph {
    StaticKnowledgeGraph::new(vec![
        DiseaseRecord {
            disease_id: "MONDO:0100135".to_string(),
            disease_name: "Dravet syndrome".to_string(),
            description: Some("Severe infantile-onset epileptic encephalopathy".to_string()),
            phenotypes: vec![
                ("HP:0001250".to_string(), 0.95),
                ("HP:0001249".to_string(), 0.85),
                ("HP:0002069".to_string(), 0.6),
                ("HP:0001251".to_string(), 0.5),
            ],
            genes: vec!["SCN1A".to_string()],
            prevalence: Some("1/15700".to_string()),
            inheritance: Some("autosomal dominant".to_string()),
        },
        DiseaseRecord {
            disease_id: "MONDO:0010726".to_string(),
            disease_name: "Rett syndrome".to_string(),
            description: None,
            phenotypes: vec![
                ("HP:0001249".to_string(), 0.98),
                ("HP:0001250".to_string(), 0.7),
                ("HP:0012171".to_string(), 0.8),
            ],
            genes: vec!["MECP2".to_string()],
            prevalence: Some("1/10000".to_string()),
            inheritance: Some("x-linked dominant".to_string()),
        },
        DiseaseRecord {
            disease_id: "MONDO:0007739".to_string(),
            disease_name: "Huntington disease".to_string(),
            description: None,
            phenotypes: vec![
                ("HP:0002072".to_string(), 0.9),
                ("HP:0000726".to_string(), 0.8),
            ],
            genes: vec!["HTT".to_string()],
            prevalence: Some("1/20000".to_string()),
            inheritance: Some("autosomal dominant".to_string()),
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn phenotype_query_orders_by_overlap() {
        let graph = fixture_graph();
        let candidates = graph
            .diseases_by_phenotypes(
                &["HP:0001250".to_string(), "HP:0001249".to_string()],
                1,
                10,
            )
            .await
            .unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].match_count, 2);
        assert!(candidates
            .iter()
            .all(|c| c.disease_id != "MONDO:0007739"));
    }

    #[tokio::test]
    async fn min_matches_filters() {
        let graph = fixture_graph();
        let candidates = graph
            .diseases_by_phenotypes(&["HP:0002069".to_string()], 2, 10)
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn gene_query_finds_diseases() {
        let graph = fixture_graph();
        let candidates = graph
            .diseases_by_genes(&["SCN1A".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].disease_name, "Dravet syndrome");
    }

    #[tokio::test]
    async fn frequencies_are_clamped() {
        let graph = fixture_graph();
        let freqs = graph.phenotype_frequencies("MONDO:0100135").await.unwrap();
        assert!(freqs.values().all(|f| (0.01..=1.0).contains(f)));
        assert_eq!(freqs["HP:0001250"], 0.95);
    }
}
