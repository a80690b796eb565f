//! Bayesian hypothesis scoring.
//!
//! Combines phenotype, genetic and history likelihood ratios through a
//! weighted geometric mean, updates posteriors by odds, and computes the
//! expected information gain of candidate questions via entropy reduction.

use crate::knowledge::KnowledgeGraph;
use crate::models::{
    DiagnosisHypothesis, EvidenceItem, EvidenceKind, EvidencePolarity, PatientProfile,
};
use forge_core::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    // Evidence weights
    pub phenotype_weight: f64,
    pub genetic_weight: f64,
    pub history_weight: f64,

    // Likelihood ratios per evidence class
    pub phenotype_absent_lr: f64,
    pub pathogenic_variant_lr: f64,
    pub likely_pathogenic_variant_lr: f64,
    pub vus_variant_lr: f64,
    pub family_history_lr: f64,

    // Priors
    pub default_prevalence: f64,
    /// Assumed population rate of a phenotype with unknown prevalence. A
    /// rough constant; recalibrate against production data.
    pub background_rate: f64,
    pub max_posterior: f64,
    pub min_posterior: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            phenotype_weight: 0.4,
            genetic_weight: 0.35,
            history_weight: 0.15,
            phenotype_absent_lr: 0.3,
            pathogenic_variant_lr: 50.0,
            likely_pathogenic_variant_lr: 25.0,
            vus_variant_lr: 2.0,
            family_history_lr: 3.0,
            default_prevalence: 1e-5,
            background_rate: 0.01,
            max_posterior: 0.99,
            min_posterior: 0.001,
        }
    }
}

/// Scores hypotheses against patient evidence.
pub struct BayesianScorer {
    config: ScoringConfig,
    graph: Arc<dyn KnowledgeGraph>,
    frequency_cache: Mutex<HashMap<String, HashMap<String, f64>>>,
}

impl BayesianScorer {
    pub fn new(config: ScoringConfig, graph: Arc<dyn KnowledgeGraph>) -> Self {
        Self {
            config,
            graph,
            frequency_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one hypothesis in place.
    pub async fn score_hypothesis(
        &self,
        hypothesis: &mut DiagnosisHypothesis,
        patient: &PatientProfile,
    ) -> Result<()> {
        let mut prior = hypothesis.prior_probability;
        if prior <= 0.0 {
            prior = self.config.default_prevalence;
        }
        prior = prior.clamp(self.config.min_posterior, self.config.max_posterior);

        let phenotype_lr = self
            .phenotype_likelihood(
                &hypothesis.disease_id,
                &patient.phenotype_codes(),
                &patient.negated_phenotype_codes(),
            )
            .await?;
        hypothesis.phenotype_score = lr_to_score(phenotype_lr);

        let genetic_lr =
            self.genetic_likelihood(&hypothesis.associated_genes, &patient.genetic_variants);
        hypothesis.genetic_score = lr_to_score(genetic_lr);

        let history_lr = self.history_likelihood(
            hypothesis,
            &patient.medical_history,
            &patient.family_history,
        );
        hypothesis.history_score = lr_to_score(history_lr);

        // Weighted geometric mean of the component ratios.
        let combined_lr = phenotype_lr.powf(self.config.phenotype_weight)
            * genetic_lr.powf(self.config.genetic_weight)
            * history_lr.powf(self.config.history_weight);

        let posterior_odds = (prior / (1.0 - prior)) * combined_lr;
        hypothesis.posterior_probability = (posterior_odds / (1.0 + posterior_odds))
            .clamp(self.config.min_posterior, self.config.max_posterior);

        hypothesis.combined_score = hypothesis.phenotype_score * self.config.phenotype_weight
            + hypothesis.genetic_score * self.config.genetic_weight
            + hypothesis.history_score * self.config.history_weight;

        self.classify_evidence(hypothesis, patient);
        Ok(())
    }

    /// Score all hypotheses, sort by combined score and assign ranks.
    pub async fn score_all(
        &self,
        hypotheses: &mut Vec<DiagnosisHypothesis>,
        patient: &PatientProfile,
    ) -> Result<()> {
        for hypothesis in hypotheses.iter_mut() {
            self.score_hypothesis(hypothesis, patient).await?;
        }

        hypotheses.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (i, hypothesis) in hypotheses.iter_mut().enumerate() {
            hypothesis.rank = i + 1;
        }
        Ok(())
    }

    /// Multiply per-phenotype ratios: `freq / background`, clamped to
    /// [0.1, 100]. A negated core phenotype (freq > 0.5) multiplies by the
    /// absent-phenotype ratio; a negated common one (freq > 0.2) by 0.6.
    async fn phenotype_likelihood(
        &self,
        disease_id: &str,
        present: &[String],
        absent: &[String],
    ) -> Result<f64> {
        if present.is_empty() && absent.is_empty() {
            return Ok(1.0);
        }

        let frequencies = self.phenotype_frequencies(disease_id).await?;
        let mut lr = 1.0;

        for hpo_id in present {
            let freq = frequencies.get(hpo_id).copied().unwrap_or(0.1);
            let phenotype_lr = (freq / self.config.background_rate).clamp(0.1, 100.0);
            lr *= phenotype_lr;
        }

        for hpo_id in absent {
            let freq = frequencies.get(hpo_id).copied().unwrap_or(0.1);
            if freq > 0.5 {
                lr *= self.config.phenotype_absent_lr;
            } else if freq > 0.2 {
                lr *= 0.6;
            }
        }

        Ok(lr)
    }

    async fn phenotype_frequencies(&self, disease_id: &str) -> Result<HashMap<String, f64>> {
        {
            let cache = self.frequency_cache.lock().await;
            if let Some(frequencies) = cache.get(disease_id) {
                return Ok(frequencies.clone());
            }
        }

        let frequencies = self.graph.phenotype_frequencies(disease_id).await?;
        debug!(disease_id, count = frequencies.len(), "phenotype frequencies loaded");
        self.frequency_cache
            .lock()
            .await
            .insert(disease_id.to_string(), frequencies.clone());
        Ok(frequencies)
    }

    /// Variants in a disease gene multiply in the ratio for their
    /// pathogenicity class.
    fn genetic_likelihood(&self, disease_genes: &[String], variants: &[EvidenceItem]) -> f64 {
        if disease_genes.is_empty() || variants.is_empty() {
            return 1.0;
        }

        let mut lr = 1.0;
        for variant in variants {
            let Some(gene) = variant.code.as_deref() else {
                continue;
            };
            if !disease_genes.iter().any(|g| g == gene) {
                continue;
            }

            let severity = variant
                .severity
                .as_deref()
                .unwrap_or("")
                .to_lowercase();
            lr *= if severity.contains("likely_pathogenic") || severity.contains("likely pathogenic")
            {
                self.config.likely_pathogenic_variant_lr
            } else if severity.contains("pathogenic") {
                self.config.pathogenic_variant_lr
            } else if severity.contains("vus") || severity.contains("uncertain") {
                self.config.vus_variant_lr
            } else {
                1.5
            };
        }
        lr
    }

    /// Family history naming the disease multiplies by the family-history
    /// ratio (0.7x of it for a gene mention); a negated personal history of
    /// the disease multiplies by 0.1.
    fn history_likelihood(
        &self,
        hypothesis: &DiagnosisHypothesis,
        medical_history: &[EvidenceItem],
        family_history: &[EvidenceItem],
    ) -> f64 {
        let disease_name = hypothesis.disease_name.to_lowercase();
        let mut lr = 1.0;

        for item in family_history {
            let value = item.value.to_lowercase();
            if !disease_name.is_empty() && value.contains(&disease_name) {
                lr *= self.config.family_history_lr;
            } else if hypothesis
                .associated_genes
                .iter()
                .any(|gene| item.value.contains(gene))
            {
                lr *= self.config.family_history_lr * 0.7;
            }
        }

        for item in medical_history {
            if item.negated && item.value.to_lowercase().contains(&disease_name) {
                lr *= 0.1;
            }
        }

        lr
    }

    /// Classify each patient evidence item for this hypothesis.
    fn classify_evidence(&self, hypothesis: &mut DiagnosisHypothesis, patient: &PatientProfile) {
        hypothesis.supporting_evidence.clear();
        hypothesis.refuting_evidence.clear();
        hypothesis.neutral_evidence.clear();

        let all: Vec<EvidenceItem> = patient.all_evidence().into_iter().cloned().collect();
        for evidence in all {
            match Self::evidence_polarity(hypothesis, &evidence) {
                EvidencePolarity::Supports => hypothesis.supporting_evidence.push(evidence),
                EvidencePolarity::Refutes => hypothesis.refuting_evidence.push(evidence),
                _ => hypothesis.neutral_evidence.push(evidence),
            }
        }
    }

    fn evidence_polarity(
        hypothesis: &DiagnosisHypothesis,
        evidence: &EvidenceItem,
    ) -> EvidencePolarity {
        match evidence.kind {
            EvidenceKind::Phenotype => {
                if let Some(code) = evidence.code.as_deref() {
                    let known = hypothesis.matched_phenotypes.iter().any(|p| p == code)
                        || hypothesis.expected_phenotypes.iter().any(|p| p == code);
                    if known {
                        return if evidence.negated {
                            EvidencePolarity::Refutes
                        } else {
                            EvidencePolarity::Supports
                        };
                    }
                }
                EvidencePolarity::Neutral
            }
            EvidenceKind::Genetic => {
                if let Some(gene) = evidence.code.as_deref() {
                    if hypothesis.associated_genes.iter().any(|g| g == gene) {
                        let severity = evidence
                            .severity
                            .as_deref()
                            .unwrap_or("")
                            .to_lowercase();
                        if severity.contains("pathogenic") && !severity.contains("benign") {
                            return EvidencePolarity::Supports;
                        }
                        if severity.contains("benign") {
                            return EvidencePolarity::Refutes;
                        }
                    }
                }
                EvidencePolarity::Neutral
            }
            EvidenceKind::Family => {
                if evidence
                    .value
                    .to_lowercase()
                    .contains(&hypothesis.disease_name.to_lowercase())
                {
                    EvidencePolarity::Supports
                } else {
                    EvidencePolarity::Neutral
                }
            }
            _ => EvidencePolarity::Neutral,
        }
    }

    /// Expected reduction in entropy of the hypothesis distribution from
    /// asking about a phenotype. Presence probability is estimated at 0.7
    /// when the phenotype is expected, 0.3 when it is missing, 0.5 otherwise.
    pub fn calculate_information_gain(
        &self,
        hypotheses: &[DiagnosisHypothesis],
        phenotype_hpo_id: &str,
    ) -> f64 {
        if hypotheses.len() <= 1 {
            return 0.0;
        }

        let scores: Vec<f64> = hypotheses.iter().map(|h| h.combined_score).collect();
        let total: f64 = scores.iter().sum();
        if total == 0.0 {
            return 0.0;
        }

        let entropy = |weights: &[f64]| -> f64 {
            let sum: f64 = weights.iter().sum();
            if sum <= 0.0 {
                return 0.0;
            }
            -weights
                .iter()
                .map(|w| {
                    let p = w / sum;
                    p * (p + 1e-10).ln()
                })
                .sum::<f64>()
        };

        let current_entropy = entropy(&scores);

        let presence_freq = |h: &DiagnosisHypothesis| -> f64 {
            if h.expected_phenotypes.iter().any(|p| p == phenotype_hpo_id) {
                0.7
            } else if h.missing_phenotypes.iter().any(|p| p == phenotype_hpo_id) {
                0.3
            } else {
                0.5
            }
        };

        let present_weights: Vec<f64> = hypotheses
            .iter()
            .map(|h| h.combined_score * presence_freq(h))
            .collect();
        let absent_weights: Vec<f64> = hypotheses
            .iter()
            .map(|h| h.combined_score * (1.0 - presence_freq(h)))
            .collect();

        let present_sum: f64 = present_weights.iter().sum();
        let absent_sum: f64 = absent_weights.iter().sum();
        let p_present = present_sum / (present_sum + absent_sum + 1e-10);
        let p_absent = 1.0 - p_present;

        let entropy_present = if present_sum > 0.0 {
            entropy(&present_weights)
        } else {
            current_entropy
        };
        let entropy_absent = if absent_sum > 0.0 {
            entropy(&absent_weights)
        } else {
            current_entropy
        };

        let expected = p_present * entropy_present + p_absent * entropy_absent;
        (current_entropy - expected).max(0.0)
    }
}

/// Logistic transform of the log likelihood ratio onto [0, 1].
fn lr_to_score(lr: f64) -> f64 {
    if lr <= 0.0 {
        return 0.0;
    }
    let log_lr = lr.ln();
    1.0 / (1.0 + (-log_lr / 2.0).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::fixture_graph;
    use crate::models::EvidenceKind;
    use chrono::{TimeZone, Utc};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn scorer() -> BayesianScorer {
        BayesianScorer::new(ScoringConfig::default(), Arc::new(fixture_graph()))
    }

    fn dravet_hypothesis() -> DiagnosisHypothesis {
        let mut h = DiagnosisHypothesis::new("MONDO:0100135", "Dravet syndrome");
        h.prior_probability = 1.0 / 15700.0;
        h.associated_genes = vec!["SCN1A".to_string()];
        h.expected_phenotypes = vec![
            "HP:0001250".to_string(),
            "HP:0001249".to_string(),
            "HP:0002069".to_string(),
            "HP:0001251".to_string(),
        ];
        h.matched_phenotypes = vec!["HP:0001250".to_string(), "HP:0001249".to_string()];
        h.missing_phenotypes = vec!["HP:0002069".to_string(), "HP:0001251".to_string()];
        h
    }

    fn seizure_patient() -> PatientProfile {
        let mut patient = PatientProfile::new();
        patient.phenotypes.push(
            EvidenceItem::new(EvidenceKind::Phenotype, "Seizure", now()).with_code("HP:0001250"),
        );
        patient.phenotypes.push(
            EvidenceItem::new(EvidenceKind::Phenotype, "Intellectual disability", now())
                .with_code("HP:0001249"),
        );
        patient
    }

    #[tokio::test]
    async fn matching_phenotypes_raise_the_posterior() {
        let scorer = scorer();
        let mut hypothesis = dravet_hypothesis();
        let patient = seizure_patient();

        scorer
            .score_hypothesis(&mut hypothesis, &patient)
            .await
            .unwrap();

        assert!(hypothesis.phenotype_score > 0.9);
        assert!(hypothesis.posterior_probability > hypothesis.prior_probability);
        assert!(hypothesis.combined_score >= 0.5);
        assert!(hypothesis.posterior_probability <= 0.99);
    }

    #[tokio::test]
    async fn negated_core_phenotype_penalizes() {
        let scorer = scorer();
        let mut with_negation = dravet_hypothesis();
        let mut without_negation = dravet_hypothesis();

        let patient_plain = seizure_patient();
        let mut patient_negated = seizure_patient();
        patient_negated.phenotypes.push(
            EvidenceItem::new(EvidenceKind::Phenotype, "Ataxia", now())
                .with_code("HP:0001251")
                .negated(true),
        );

        scorer
            .score_hypothesis(&mut without_negation, &patient_plain)
            .await
            .unwrap();
        scorer
            .score_hypothesis(&mut with_negation, &patient_negated)
            .await
            .unwrap();

        // HP:0001251 at freq 0.5 is not core (>0.5 strictly) so no penalty;
        // flip to a true core phenotype instead.
        let mut patient_core_negated = seizure_patient();
        patient_core_negated.phenotypes.push(
            EvidenceItem::new(EvidenceKind::Phenotype, "Status epilepticus", now())
                .with_code("HP:0002069")
                .negated(true),
        );
        let mut with_core_negation = dravet_hypothesis();
        scorer
            .score_hypothesis(&mut with_core_negation, &patient_core_negated)
            .await
            .unwrap();

        assert!(
            with_core_negation.phenotype_score < without_negation.phenotype_score,
            "negating a core phenotype must lower the phenotype score"
        );
    }

    #[test]
    fn genetic_lr_tiers_by_pathogenicity_class() {
        let scorer = scorer();
        let genes = vec!["SCN1A".to_string()];
        let variant = |severity: &str| {
            vec![EvidenceItem::new(EvidenceKind::Genetic, "c.1G>A", now())
                .with_code("SCN1A")
                .with_severity(severity)]
        };

        // Each class lands on its own configured ratio; likely-pathogenic
        // takes its dedicated tier, not the plain-pathogenic one.
        assert_eq!(scorer.genetic_likelihood(&genes, &variant("pathogenic")), 50.0);
        assert_eq!(
            scorer.genetic_likelihood(&genes, &variant("likely_pathogenic")),
            25.0
        );
        assert_eq!(
            scorer.genetic_likelihood(&genes, &variant("Likely pathogenic")),
            25.0
        );
        assert_eq!(scorer.genetic_likelihood(&genes, &variant("vus")), 2.0);
        assert_eq!(
            scorer.genetic_likelihood(&genes, &variant("uncertain_significance")),
            2.0
        );
        assert_eq!(scorer.genetic_likelihood(&genes, &variant("conflicting")), 1.5);
    }

    #[test]
    fn likely_pathogenic_scores_below_pathogenic() {
        let scorer = scorer();
        let genes = vec!["SCN1A".to_string()];
        let pathogenic = vec![EvidenceItem::new(EvidenceKind::Genetic, "c.1G>A", now())
            .with_code("SCN1A")
            .with_severity("pathogenic")];
        let likely = vec![EvidenceItem::new(EvidenceKind::Genetic, "c.1G>A", now())
            .with_code("SCN1A")
            .with_severity("likely_pathogenic")];

        assert!(
            scorer.genetic_likelihood(&genes, &likely)
                < scorer.genetic_likelihood(&genes, &pathogenic)
        );
    }

    #[tokio::test]
    async fn pathogenic_variant_raises_genetic_score() {
        let scorer = scorer();
        let mut hypothesis = dravet_hypothesis();
        let mut patient = seizure_patient();
        patient.genetic_variants.push(
            EvidenceItem::new(EvidenceKind::Genetic, "c.2447G>A", now())
                .with_code("SCN1A")
                .with_severity("pathogenic"),
        );

        scorer
            .score_hypothesis(&mut hypothesis, &patient)
            .await
            .unwrap();
        assert!(hypothesis.genetic_score > 0.8);
        assert!(!hypothesis.supporting_evidence.is_empty());
    }

    #[tokio::test]
    async fn family_history_of_the_disease_helps() {
        let scorer = scorer();
        let mut with_history = dravet_hypothesis();
        let mut without_history = dravet_hypothesis();

        let plain = seizure_patient();
        let mut with_fh = seizure_patient();
        with_fh.family_history.push(EvidenceItem::new(
            EvidenceKind::Family,
            "maternal cousin with Dravet syndrome",
            now(),
        ));

        scorer
            .score_hypothesis(&mut without_history, &plain)
            .await
            .unwrap();
        scorer
            .score_hypothesis(&mut with_history, &with_fh)
            .await
            .unwrap();

        assert!(with_history.history_score > without_history.history_score);
    }

    #[tokio::test]
    async fn ranking_is_monotone_in_score() {
        let scorer = scorer();
        let patient = seizure_patient();
        let mut hypotheses = vec![
            {
                let mut h = DiagnosisHypothesis::new("MONDO:0007739", "Huntington disease");
                h.expected_phenotypes = vec!["HP:0002072".to_string()];
                h
            },
            dravet_hypothesis(),
        ];

        scorer.score_all(&mut hypotheses, &patient).await.unwrap();

        assert_eq!(hypotheses[0].disease_id, "MONDO:0100135");
        for (i, h) in hypotheses.iter().enumerate() {
            assert_eq!(h.rank, i + 1);
        }
        for pair in hypotheses.windows(2) {
            assert!(pair[0].combined_score >= pair[1].combined_score);
        }
    }

    #[test]
    fn information_gain_zero_when_no_discrimination() {
        let scorer = scorer();
        let mut a = DiagnosisHypothesis::new("MONDO:1", "a");
        let mut b = DiagnosisHypothesis::new("MONDO:2", "b");
        a.combined_score = 0.5;
        b.combined_score = 0.5;
        // Neither expects nor misses the phenotype: identical 0.5 estimates.
        let gain = scorer.calculate_information_gain(&[a, b], "HP:0009999");
        assert!(gain.abs() < 1e-9);
    }

    #[test]
    fn information_gain_positive_for_discriminators() {
        let scorer = scorer();
        let mut a = DiagnosisHypothesis::new("MONDO:1", "a");
        let mut b = DiagnosisHypothesis::new("MONDO:2", "b");
        a.combined_score = 0.5;
        b.combined_score = 0.5;
        a.expected_phenotypes = vec!["HP:0001234".to_string()];
        b.missing_phenotypes = vec!["HP:0001234".to_string()];

        let gain = scorer.calculate_information_gain(&[a, b], "HP:0001234");
        assert!(gain > 0.0);
    }

    #[test]
    fn single_hypothesis_has_no_gain() {
        let scorer = scorer();
        let mut a = DiagnosisHypothesis::new("MONDO:1", "a");
        a.combined_score = 0.9;
        assert_eq!(scorer.calculate_information_gain(&[a], "HP:0001234"), 0.0);
    }

    #[test]
    fn lr_score_transform_bounds() {
        assert_eq!(lr_to_score(0.0), 0.0);
        assert!((lr_to_score(1.0) - 0.5).abs() < 1e-9);
        assert!(lr_to_score(100.0) > 0.9);
        assert!(lr_to_score(0.01) < 0.1);
    }
}
