//! Human Phenotype Ontology terms and hierarchy.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// An HPO term. Each has an id like `HP:0001250` and a name like `Seizure`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HpoTerm {
    pub hpo_id: String,
    pub name: String,
    pub definition: Option<String>,
    pub synonyms: Vec<String>,
    pub parents: Vec<String>,
    pub children: Vec<String>,
    pub is_obsolete: bool,
    pub replaced_by: Option<String>,
    pub xrefs: Vec<String>,
}

impl HpoTerm {
    pub fn new(hpo_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            hpo_id: hpo_id.into(),
            name: name.into(),
            definition: None,
            synonyms: Vec::new(),
            parents: Vec::new(),
            children: Vec::new(),
            is_obsolete: false,
            replaced_by: None,
            xrefs: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Cached hierarchy for efficient traversal. Ancestor/descendant sets are
/// memoized under a lock on first computation.
pub struct HpoHierarchy {
    pub terms: HashMap<String, HpoTerm>,
    parent_map: HashMap<String, HashSet<String>>,
    child_map: HashMap<String, HashSet<String>>,
    ancestor_cache: Mutex<HashMap<String, HashSet<String>>>,
    descendant_cache: Mutex<HashMap<String, HashSet<String>>>,
}

impl HpoHierarchy {
    pub fn build(terms: HashMap<String, HpoTerm>) -> Self {
        let mut parent_map: HashMap<String, HashSet<String>> = HashMap::new();
        let mut child_map: HashMap<String, HashSet<String>> = HashMap::new();

        for term in terms.values() {
            parent_map
                .entry(term.hpo_id.clone())
                .or_default()
                .extend(term.parents.iter().cloned());
            child_map
                .entry(term.hpo_id.clone())
                .or_default()
                .extend(term.children.iter().cloned());
        }

        Self {
            terms,
            parent_map,
            child_map,
            ancestor_cache: Mutex::new(HashMap::new()),
            descendant_cache: Mutex::new(HashMap::new()),
        }
    }

    fn traverse(
        start: &str,
        edges: &HashMap<String, HashSet<String>>,
    ) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut to_process = vec![start.to_string()];
        while let Some(current) = to_process.pop() {
            for next in edges.get(&current).into_iter().flatten() {
                if result.insert(next.clone()) {
                    to_process.push(next.clone());
                }
            }
        }
        result
    }

    pub fn ancestors(&self, hpo_id: &str, include_self: bool) -> HashSet<String> {
        let mut cache = self.ancestor_cache.lock().expect("ancestor cache poisoned");
        let mut result = cache
            .entry(hpo_id.to_string())
            .or_insert_with(|| Self::traverse(hpo_id, &self.parent_map))
            .clone();
        if include_self {
            result.insert(hpo_id.to_string());
        }
        result
    }

    pub fn descendants(&self, hpo_id: &str, include_self: bool) -> HashSet<String> {
        let mut cache = self
            .descendant_cache
            .lock()
            .expect("descendant cache poisoned");
        let mut result = cache
            .entry(hpo_id.to_string())
            .or_insert_with(|| Self::traverse(hpo_id, &self.child_map))
            .clone();
        if include_self {
            result.insert(hpo_id.to_string());
        }
        result
    }

    /// Lowest common ancestor: the shared ancestor with the deepest ancestry
    /// of its own.
    pub fn lowest_common_ancestor(&self, term1: &str, term2: &str) -> Option<String> {
        let ancestors1 = self.ancestors(term1, true);
        let ancestors2 = self.ancestors(term2, true);
        let common: Vec<&String> = ancestors1.intersection(&ancestors2).collect();

        common
            .into_iter()
            .max_by_key(|ancestor| self.ancestors(ancestor, false).len())
            .cloned()
    }

    /// Resnik-style similarity: IC of the LCA over the max IC of the two
    /// terms, where IC = -ln(descendants / total).
    pub fn semantic_similarity(&self, term1: &str, term2: &str) -> f64 {
        if term1 == term2 {
            return 1.0;
        }
        let Some(lca) = self.lowest_common_ancestor(term1, term2) else {
            return 0.0;
        };

        let total = self.terms.len() as f64;
        if total == 0.0 {
            return 0.0;
        }

        let ic = |term: &str| -> Option<f64> {
            let descendants = self.descendants(term, true).len() as f64;
            if descendants == 0.0 {
                return None;
            }
            Some(-(descendants / total).ln())
        };

        let (Some(ic_lca), Some(ic1), Some(ic2)) = (ic(&lca), ic(term1), ic(term2)) else {
            return 0.0;
        };

        let max_ic = ic1.max(ic2);
        if max_ic == 0.0 {
            return 0.0;
        }
        (ic_lca / max_ic).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root -> a -> b -> c, root -> d
    fn toy_hierarchy() -> HpoHierarchy {
        let mut terms = HashMap::new();
        let mut add = |id: &str, parents: Vec<&str>, children: Vec<&str>| {
            let mut term = HpoTerm::new(id, id);
            term.parents = parents.into_iter().map(String::from).collect();
            term.children = children.into_iter().map(String::from).collect();
            terms.insert(id.to_string(), term);
        };
        add("HP:0000001", vec![], vec!["HP:0000002", "HP:0000005"]);
        add("HP:0000002", vec!["HP:0000001"], vec!["HP:0000003"]);
        add("HP:0000003", vec!["HP:0000002"], vec!["HP:0000004"]);
        add("HP:0000004", vec!["HP:0000003"], vec![]);
        add("HP:0000005", vec!["HP:0000001"], vec![]);
        HpoHierarchy::build(terms)
    }

    #[test]
    fn ancestors_and_descendants() {
        let h = toy_hierarchy();
        let ancestors = h.ancestors("HP:0000004", false);
        assert_eq!(ancestors.len(), 3);
        assert!(ancestors.contains("HP:0000001"));

        let descendants = h.descendants("HP:0000002", false);
        assert_eq!(descendants.len(), 2);
        assert!(descendants.contains("HP:0000004"));
    }

    #[test]
    fn lca_of_siblings_is_the_root() {
        let h = toy_hierarchy();
        assert_eq!(
            h.lowest_common_ancestor("HP:0000004", "HP:0000005"),
            Some("HP:0000001".to_string())
        );
    }

    #[test]
    fn similarity_bounds() {
        let h = toy_hierarchy();
        assert_eq!(h.semantic_similarity("HP:0000004", "HP:0000004"), 1.0);

        let sibling = h.semantic_similarity("HP:0000004", "HP:0000005");
        let nested = h.semantic_similarity("HP:0000003", "HP:0000004");
        assert!((0.0..=1.0).contains(&sibling));
        assert!(nested > sibling);
    }
}
