//! HPO ontology service.
//!
//! Parses the ontology from OBO format, builds lookup indices and the
//! traversal hierarchy, and answers term lookup, search, ancestor /
//! descendant and semantic-similarity queries.

use crate::hpo::models::{HpoHierarchy, HpoTerm};
use forge_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

/// The root of the phenotypic-abnormality branch.
const PHENOTYPIC_ABNORMALITY_ROOT: &str = "HP:0000001";

pub struct HpoOntologyService {
    hierarchy: Option<HpoHierarchy>,
    name_index: HashMap<String, String>,
    synonym_index: HashMap<String, String>,
}

impl HpoOntologyService {
    pub fn new() -> Self {
        Self {
            hierarchy: None,
            name_index: HashMap::new(),
            synonym_index: HashMap::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.hierarchy.is_some()
    }

    pub fn term_count(&self) -> usize {
        self.hierarchy.as_ref().map(|h| h.terms.len()).unwrap_or(0)
    }

    pub fn load_from_obo_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::validation(format!("cannot read OBO file: {}", e)))?;
        self.load_from_obo(&content)
    }

    /// Parse OBO stanzas into terms and build the hierarchy and indices.
    pub fn load_from_obo(&mut self, content: &str) -> Result<usize> {
        let mut terms: HashMap<String, HpoTerm> = HashMap::new();
        let mut current: Option<HpoTerm> = None;
        let mut in_term_stanza = false;

        for line in content.lines() {
            let line = line.trim();

            if line == "[Term]" {
                if let Some(term) = current.take() {
                    terms.insert(term.hpo_id.clone(), term);
                }
                in_term_stanza = true;
                current = None;
                continue;
            }
            if line.starts_with('[') {
                // [Typedef] or other stanza
                if let Some(term) = current.take() {
                    terms.insert(term.hpo_id.clone(), term);
                }
                in_term_stanza = false;
                continue;
            }
            if !in_term_stanza || line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "id" => {
                    if value.starts_with("HP:") {
                        current = Some(HpoTerm::new(value, "Unknown"));
                    } else {
                        current = None;
                        in_term_stanza = false;
                    }
                }
                "name" => {
                    if let Some(term) = current.as_mut() {
                        term.name = value.to_string();
                    }
                }
                "def" => {
                    if let Some(term) = current.as_mut() {
                        term.definition = Some(unquote(value));
                    }
                }
                "synonym" => {
                    if let Some(term) = current.as_mut() {
                        let synonym = unquote(value);
                        if !synonym.is_empty() {
                            term.synonyms.push(synonym);
                        }
                    }
                }
                "is_a" => {
                    if let Some(term) = current.as_mut() {
                        let parent = value.split('!').next().unwrap_or("").trim();
                        if parent.starts_with("HP:") {
                            term.parents.push(parent.to_string());
                        }
                    }
                }
                "is_obsolete" => {
                    if let Some(term) = current.as_mut() {
                        term.is_obsolete = value.eq_ignore_ascii_case("true");
                    }
                }
                "replaced_by" => {
                    if let Some(term) = current.as_mut() {
                        term.replaced_by = Some(value.to_string());
                    }
                }
                "xref" => {
                    if let Some(term) = current.as_mut() {
                        term.xrefs.push(value.to_string());
                    }
                }
                _ => {}
            }
        }
        if let Some(term) = current.take() {
            terms.insert(term.hpo_id.clone(), term);
        }

        // Derive child edges from parent edges.
        let parent_edges: Vec<(String, String)> = terms
            .values()
            .flat_map(|t| {
                t.parents
                    .iter()
                    .map(|p| (p.clone(), t.hpo_id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (parent, child) in parent_edges {
            if let Some(parent_term) = terms.get_mut(&parent) {
                parent_term.children.push(child);
            }
        }

        self.build_indices(&terms);
        let count = terms.len();
        self.hierarchy = Some(HpoHierarchy::build(terms));

        info!(term_count = count, "hpo ontology loaded");
        Ok(count)
    }

    fn build_indices(&mut self, terms: &HashMap<String, HpoTerm>) {
        self.name_index.clear();
        self.synonym_index.clear();
        for term in terms.values() {
            self.name_index
                .insert(term.name.to_lowercase(), term.hpo_id.clone());
            for synonym in &term.synonyms {
                self.synonym_index
                    .entry(synonym.to_lowercase())
                    .or_insert_with(|| term.hpo_id.clone());
            }
        }
    }

    pub fn get_term(&self, hpo_id: &str) -> Option<&HpoTerm> {
        self.hierarchy.as_ref()?.terms.get(hpo_id)
    }

    pub fn get_term_by_name(&self, name: &str) -> Option<&HpoTerm> {
        let hpo_id = self.name_index.get(&name.to_lowercase())?;
        self.get_term(hpo_id)
    }

    /// Search by name or synonym: exact name, exact synonym, then substring
    /// matches scored by how much of the term the query covers.
    pub fn search_terms(&self, query: &str, limit: usize) -> Vec<&HpoTerm> {
        let Some(hierarchy) = self.hierarchy.as_ref() else {
            return Vec::new();
        };
        let query_lower = query.to_lowercase();
        let mut results: Vec<(&HpoTerm, f64)> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        if let Some(id) = self.name_index.get(&query_lower) {
            if let Some(term) = hierarchy.terms.get(id) {
                if !term.is_obsolete {
                    results.push((term, 1.0));
                    seen.insert(&term.hpo_id);
                }
            }
        }
        if let Some(id) = self.synonym_index.get(&query_lower) {
            if let Some(term) = hierarchy.terms.get(id) {
                if !term.is_obsolete && seen.insert(&term.hpo_id) {
                    results.push((term, 0.95));
                }
            }
        }

        for term in hierarchy.terms.values() {
            if term.is_obsolete || seen.contains(term.hpo_id.as_str()) {
                continue;
            }
            if term.name.to_lowercase().contains(&query_lower) {
                let score = query_lower.len() as f64 / term.name.len().max(1) as f64;
                results.push((term, score * 0.9));
                continue;
            }
            for synonym in &term.synonyms {
                if synonym.to_lowercase().contains(&query_lower) {
                    let score = query_lower.len() as f64 / synonym.len().max(1) as f64;
                    results.push((term, score * 0.85));
                    break;
                }
            }
        }

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.into_iter().take(limit).map(|(term, _)| term).collect()
    }

    /// Best-effort resolution of free text to an HPO id.
    pub fn resolve_text(&self, text: &str) -> Option<String> {
        self.search_terms(text, 1)
            .first()
            .map(|term| term.hpo_id.clone())
    }

    pub fn ancestors(&self, hpo_id: &str, include_self: bool) -> HashSet<String> {
        self.hierarchy
            .as_ref()
            .map(|h| h.ancestors(hpo_id, include_self))
            .unwrap_or_default()
    }

    /// Ancestors no further than `max_depth` parent hops away.
    pub fn ancestors_within(&self, hpo_id: &str, max_depth: usize) -> HashSet<String> {
        let Some(hierarchy) = self.hierarchy.as_ref() else {
            return HashSet::new();
        };

        let mut result = HashSet::new();
        let mut frontier = vec![hpo_id.to_string()];
        for _ in 0..max_depth {
            let mut next = Vec::new();
            for id in frontier {
                if let Some(term) = hierarchy.terms.get(&id) {
                    for parent in &term.parents {
                        if result.insert(parent.clone()) {
                            next.push(parent.clone());
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        result
    }

    pub fn descendants(&self, hpo_id: &str, include_self: bool) -> HashSet<String> {
        self.hierarchy
            .as_ref()
            .map(|h| h.descendants(hpo_id, include_self))
            .unwrap_or_default()
    }

    pub fn semantic_similarity(&self, term1: &str, term2: &str) -> f64 {
        self.hierarchy
            .as_ref()
            .map(|h| h.semantic_similarity(term1, term2))
            .unwrap_or(0.0)
    }

    /// The top-level category of a term: its ancestor directly below the
    /// phenotypic-abnormality root.
    pub fn get_category(&self, hpo_id: &str) -> Option<String> {
        let hierarchy = self.hierarchy.as_ref()?;
        let ancestors = hierarchy.ancestors(hpo_id, true);

        ancestors
            .iter()
            .filter_map(|id| hierarchy.terms.get(id))
            .find(|term| {
                term.parents
                    .iter()
                    .any(|p| p == PHENOTYPIC_ABNORMALITY_ROOT)
            })
            .map(|term| term.name.clone())
    }
}

impl Default for HpoOntologyService {
    fn default() -> Self {
        Self::new()
    }
}

fn unquote(value: &str) -> String {
    if let Some(start) = value.find('"') {
        if let Some(end) = value[start + 1..].find('"') {
            return value[start + 1..start + 1 + end].to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
pub(crate) const TEST_OBO: &str = r#"format-version: 1.2

[Term]
id: HP:0000001
name: All

[Term]
id: HP:0000118
name: Phenotypic abnormality
is_a: HP:0000001 ! All

[Term]
id: HP:0000707
name: Abnormality of the nervous system
is_a: HP:0000001 ! All

[Term]
id: HP:0012638
name: Abnormal nervous system physiology
is_a: HP:0000707 ! Abnormality of the nervous system

[Term]
id: HP:0001250
name: Seizure
def: "An intermittent abnormality of nervous system physiology." [HPO:probinson]
synonym: "Seizures" EXACT []
synonym: "Epileptic seizure" EXACT []
is_a: HP:0012638 ! Abnormal nervous system physiology

[Term]
id: HP:0001249
name: Intellectual disability
synonym: "Mental retardation" EXACT []
is_a: HP:0012638 ! Abnormal nervous system physiology

[Term]
id: HP:0099999
name: Obsolete thing
is_obsolete: true
replaced_by: HP:0001250

[Typedef]
id: part_of
name: part of
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded() -> HpoOntologyService {
        let mut service = HpoOntologyService::new();
        service.load_from_obo(TEST_OBO).unwrap();
        service
    }

    #[test]
    fn parses_terms_and_hierarchy() {
        let service = loaded();
        assert_eq!(service.term_count(), 7);

        let seizure = service.get_term("HP:0001250").unwrap();
        assert_eq!(seizure.name, "Seizure");
        assert_eq!(seizure.parents, vec!["HP:0012638"]);
        assert!(seizure.definition.as_deref().unwrap().starts_with("An intermittent"));
        assert_eq!(seizure.synonyms.len(), 2);

        let parent = service.get_term("HP:0012638").unwrap();
        assert!(parent.children.contains(&"HP:0001250".to_string()));
    }

    #[test]
    fn search_prefers_exact_name_then_synonym() {
        let service = loaded();
        let by_name = service.search_terms("Seizure", 5);
        assert_eq!(by_name[0].hpo_id, "HP:0001250");

        let by_synonym = service.search_terms("mental retardation", 5);
        assert_eq!(by_synonym[0].hpo_id, "HP:0001249");

        let partial = service.search_terms("nervous system", 5);
        assert!(!partial.is_empty());
    }

    #[test]
    fn obsolete_terms_are_hidden_from_search() {
        let service = loaded();
        assert!(service.search_terms("Obsolete thing", 5).is_empty());
    }

    #[test]
    fn ancestor_traversal() {
        let service = loaded();
        let ancestors = service.ancestors("HP:0001250", false);
        assert!(ancestors.contains("HP:0012638"));
        assert!(ancestors.contains("HP:0000707"));
        assert!(ancestors.contains("HP:0000001"));

        let bounded = service.ancestors_within("HP:0001250", 1);
        assert_eq!(bounded.len(), 1);
        assert!(bounded.contains("HP:0012638"));
    }

    #[test]
    fn category_is_the_branch_below_the_root() {
        let service = loaded();
        assert_eq!(
            service.get_category("HP:0001250").as_deref(),
            Some("Abnormality of the nervous system")
        );
    }

    #[test]
    fn text_resolution() {
        let service = loaded();
        assert_eq!(
            service.resolve_text("seizures").as_deref(),
            Some("HP:0001250")
        );
        assert!(service.resolve_text("zzz-nothing").is_none());
    }

    #[test]
    fn similarity_of_siblings_under_same_parent() {
        let service = loaded();
        let sim = service.semantic_similarity("HP:0001250", "HP:0001249");
        assert!(sim > 0.0);
        assert!(sim < 1.0);
        assert_eq!(service.semantic_similarity("HP:0001250", "HP:0001250"), 1.0);
    }
}
