//! Structural validation of external codes.
//!
//! Clinical inputs arrive from untrusted callers; everything that reaches a
//! graph query is first checked against these patterns.

use crate::models::VariantInput;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

static HPO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)HP:[0-9]{7}$").expect("valid regex"));
static MONDO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)MONDO:[0-9]{7}$").expect("valid regex"));
static OMIM_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{6}$").expect("valid regex"));
static GENE_SYMBOL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9\-]{1,15}$").expect("valid regex"));

/// `HP:` followed by exactly seven digits.
pub fn is_valid_hpo_code(code: &str) -> bool {
    HPO_PATTERN.is_match(code.trim())
}

/// MONDO:NNNNNNN or a six-digit OMIM number.
pub fn is_valid_disease_id(disease_id: &str) -> bool {
    let trimmed = disease_id.trim();
    MONDO_PATTERN.is_match(trimmed) || OMIM_PATTERN.is_match(trimmed)
}

/// 2-16 alphanumeric characters starting with a letter, hyphens allowed.
pub fn is_valid_gene_symbol(symbol: &str) -> bool {
    GENE_SYMBOL_PATTERN.is_match(symbol.trim())
}

/// Keep only valid HPO codes, normalized to upper case.
pub fn sanitize_hpo_codes(codes: &[String]) -> Vec<String> {
    codes
        .iter()
        .filter(|c| is_valid_hpo_code(c))
        .map(|c| c.trim().to_uppercase())
        .collect()
}

/// Keep only valid gene symbols, normalized to upper case.
pub fn sanitize_gene_symbols(symbols: &[String]) -> Vec<String> {
    symbols
        .iter()
        .filter(|s| is_valid_gene_symbol(s))
        .map(|s| s.trim().to_uppercase())
        .collect()
}

/// Split mixed phenotype input into valid HPO codes and free-text
/// descriptions worth resolving against the ontology.
pub fn validate_phenotype_input(phenotypes: &[String]) -> (Vec<String>, Vec<String>) {
    let mut hpo_codes = Vec::new();
    let mut text_descriptions = Vec::new();

    for phenotype in phenotypes {
        let trimmed = phenotype.trim();
        if is_valid_hpo_code(trimmed) {
            hpo_codes.push(trimmed.to_uppercase());
        } else if trimmed.len() > 2 {
            text_descriptions.push(trimmed.to_string());
        }
    }

    (hpo_codes, text_descriptions)
}

/// Drop variants without a valid gene symbol; normalize the rest.
pub fn validate_genetic_input(variants: &[VariantInput]) -> Vec<VariantInput> {
    variants
        .iter()
        .filter(|v| {
            let valid = is_valid_gene_symbol(&v.gene_symbol);
            if !valid {
                warn!(input = %v.gene_symbol, "invalid gene symbol");
            }
            valid
        })
        .map(|v| VariantInput {
            gene_symbol: v.gene_symbol.trim().to_uppercase(),
            notation: v.notation.clone(),
            pathogenicity: if v.pathogenicity.is_empty() {
                "unknown".to_string()
            } else {
                v.pathogenicity.clone()
            },
            zygosity: v.zygosity.clone(),
        })
        .collect()
}

/// Stateful validator with acceptance counters.
#[derive(Default)]
pub struct InputValidator {
    stats: HashMap<&'static str, u64>,
}

impl InputValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate_hpo_code(&mut self, code: &str) -> bool {
        let valid = is_valid_hpo_code(code);
        *self
            .stats
            .entry(if valid { "hpo_valid" } else { "hpo_invalid" })
            .or_default() += 1;
        valid
    }

    pub fn validate_gene_symbol(&mut self, symbol: &str) -> bool {
        let valid = is_valid_gene_symbol(symbol);
        *self
            .stats
            .entry(if valid { "gene_valid" } else { "gene_invalid" })
            .or_default() += 1;
        valid
    }

    pub fn stats(&self) -> &HashMap<&'static str, u64> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hpo_codes() {
        assert!(is_valid_hpo_code("HP:0001250"));
        assert!(is_valid_hpo_code("hp:0001250"));
        assert!(!is_valid_hpo_code("HP:123"));
        assert!(!is_valid_hpo_code("HP:00012500"));
        assert!(!is_valid_hpo_code("MONDO:0001250"));
        assert!(!is_valid_hpo_code(""));
    }

    #[test]
    fn disease_ids() {
        assert!(is_valid_disease_id("MONDO:0005737"));
        assert!(is_valid_disease_id("154700"));
        assert!(!is_valid_disease_id("OMIM:154700"));
        assert!(!is_valid_disease_id("12345"));
    }

    #[test]
    fn gene_symbols() {
        assert!(is_valid_gene_symbol("BRCA1"));
        assert!(is_valid_gene_symbol("HLA-DRB1"));
        assert!(is_valid_gene_symbol("TP53"));
        assert!(!is_valid_gene_symbol("1ABC"));
        assert!(!is_valid_gene_symbol("A"));
        assert!(!is_valid_gene_symbol("GENE WITH SPACES"));
    }

    #[test]
    fn phenotype_input_splits_codes_and_text() {
        let input = vec![
            "HP:0001250".to_string(),
            "intellectual disability".to_string(),
            "xx".to_string(),
            "hp:0001249".to_string(),
        ];
        let (codes, text) = validate_phenotype_input(&input);
        assert_eq!(codes, vec!["HP:0001250", "HP:0001249"]);
        assert_eq!(text, vec!["intellectual disability"]);
    }

    #[test]
    fn genetic_input_requires_valid_gene() {
        let variants = vec![
            VariantInput {
                gene_symbol: "scn1a".to_string(),
                notation: "c.2447G>A".to_string(),
                pathogenicity: "pathogenic".to_string(),
                zygosity: None,
            },
            VariantInput {
                gene_symbol: "not a gene!!".to_string(),
                notation: "n/a".to_string(),
                pathogenicity: String::new(),
                zygosity: None,
            },
        ];
        let valid = validate_genetic_input(&variants);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].gene_symbol, "SCN1A");
    }

    #[test]
    fn validator_counts() {
        let mut validator = InputValidator::new();
        validator.validate_hpo_code("HP:0001250");
        validator.validate_hpo_code("bogus");
        validator.validate_gene_symbol("MECP2");

        assert_eq!(validator.stats()["hpo_valid"], 1);
        assert_eq!(validator.stats()["hpo_invalid"], 1);
        assert_eq!(validator.stats()["gene_valid"], 1);
    }
}
