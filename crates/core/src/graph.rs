//! Dialect-agnostic graph persistence interface.
//!
//! The repository layer needs three capabilities from whatever graph store
//! backs it: uniqueness constraints and indexes on named node labels,
//! parameterised read/write access, and MERGE-style batch upserts. This
//! module defines that contract plus an in-memory backend used by tests and
//! by deployments that run without an external graph database. Schema
//! evolution is additive only.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Property map for a single node.
pub type NodeProps = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Declarative filter for node queries.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub equals: Vec<(String, Value)>,
    pub not_equals: Vec<(String, Value)>,
    pub value_in: Vec<(String, Vec<Value>)>,
    pub is_null: Vec<String>,
    pub order_by: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.equals.push((property.to_string(), value.into()));
        self
    }

    pub fn not_equals(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.not_equals.push((property.to_string(), value.into()));
        self
    }

    pub fn value_in(mut self, property: &str, values: Vec<Value>) -> Self {
        self.value_in.push((property.to_string(), values));
        self
    }

    pub fn is_null(mut self, property: &str) -> Self {
        self.is_null.push(property.to_string());
        self
    }

    pub fn order_by(mut self, property: &str, order: SortOrder) -> Self {
        self.order_by = Some((property.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Persistence contract for the compliance repository.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create a uniqueness constraint on `(label, property)`. Idempotent.
    async fn ensure_constraint(&self, label: &str, property: &str) -> Result<()>;

    /// Create an index on `(label, properties)`. Idempotent.
    async fn ensure_index(&self, label: &str, properties: &[&str]) -> Result<()>;

    /// Create a node. Violating a uniqueness constraint is a `Conflict`.
    async fn create_node(&self, label: &str, props: NodeProps) -> Result<NodeProps>;

    /// MERGE-style upsert keyed on `key_property`.
    async fn merge_node(&self, label: &str, key_property: &str, props: NodeProps)
        -> Result<NodeProps>;

    /// Batch upsert; returns the number of rows written.
    async fn merge_batch(
        &self,
        label: &str,
        key_property: &str,
        rows: Vec<NodeProps>,
    ) -> Result<usize>;

    /// Patch a node identified by its `id` property. Returns the updated
    /// node, or `None` when the id is unknown.
    async fn update_node(
        &self,
        label: &str,
        id: &str,
        updates: NodeProps,
    ) -> Result<Option<NodeProps>>;

    async fn get_node(&self, label: &str, id: &str) -> Result<Option<NodeProps>>;

    async fn query(&self, label: &str, filter: NodeFilter) -> Result<Vec<NodeProps>>;

    async fn ping(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// In-memory `GraphStore`. Enforces uniqueness constraints; indexes are
/// accepted and ignored.
#[derive(Default)]
pub struct MemoryGraph {
    nodes: RwLock<HashMap<String, Vec<NodeProps>>>,
    constraints: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(props: &NodeProps, filter: &NodeFilter) -> bool {
        for (key, value) in &filter.equals {
            if props.get(key) != Some(value) {
                return false;
            }
        }
        for (key, value) in &filter.not_equals {
            if props.get(key) == Some(value) {
                return false;
            }
        }
        for (key, values) in &filter.value_in {
            match props.get(key) {
                Some(v) if values.contains(v) => {}
                _ => return false,
            }
        }
        for key in &filter.is_null {
            match props.get(key) {
                None | Some(Value::Null) => {}
                _ => return false,
            }
        }
        true
    }

    fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ => Ordering::Equal,
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn ensure_constraint(&self, label: &str, property: &str) -> Result<()> {
        let mut constraints = self.constraints.write().await;
        constraints
            .entry(label.to_string())
            .or_default()
            .insert(property.to_string());
        Ok(())
    }

    async fn ensure_index(&self, _label: &str, _properties: &[&str]) -> Result<()> {
        Ok(())
    }

    async fn create_node(&self, label: &str, props: NodeProps) -> Result<NodeProps> {
        let constraints = self.constraints.read().await;
        let unique_props = constraints.get(label).cloned().unwrap_or_default();
        drop(constraints);

        let mut nodes = self.nodes.write().await;
        let list = nodes.entry(label.to_string()).or_default();

        for unique in &unique_props {
            if let Some(value) = props.get(unique) {
                if list.iter().any(|n| n.get(unique) == Some(value)) {
                    return Err(Error::conflict(format!(
                        "{} with {}={} already exists",
                        label, unique, value
                    )));
                }
            }
        }

        list.push(props.clone());
        Ok(props)
    }

    async fn merge_node(
        &self,
        label: &str,
        key_property: &str,
        props: NodeProps,
    ) -> Result<NodeProps> {
        let key_value = props
            .get(key_property)
            .cloned()
            .ok_or_else(|| Error::validation(format!("merge key {} missing", key_property)))?;

        let mut nodes = self.nodes.write().await;
        let list = nodes.entry(label.to_string()).or_default();

        if let Some(existing) = list
            .iter_mut()
            .find(|n| n.get(key_property) == Some(&key_value))
        {
            for (key, value) in props.clone() {
                existing.insert(key, value);
            }
            return Ok(existing.clone());
        }

        list.push(props.clone());
        Ok(props)
    }

    async fn merge_batch(
        &self,
        label: &str,
        key_property: &str,
        rows: Vec<NodeProps>,
    ) -> Result<usize> {
        let count = rows.len();
        for row in rows {
            self.merge_node(label, key_property, row).await?;
        }
        Ok(count)
    }

    async fn update_node(
        &self,
        label: &str,
        id: &str,
        updates: NodeProps,
    ) -> Result<Option<NodeProps>> {
        let mut nodes = self.nodes.write().await;
        let Some(list) = nodes.get_mut(label) else {
            return Ok(None);
        };

        let id_value = Value::String(id.to_string());
        if let Some(node) = list.iter_mut().find(|n| n.get("id") == Some(&id_value)) {
            for (key, value) in updates {
                node.insert(key, value);
            }
            return Ok(Some(node.clone()));
        }
        Ok(None)
    }

    async fn get_node(&self, label: &str, id: &str) -> Result<Option<NodeProps>> {
        let nodes = self.nodes.read().await;
        let id_value = Value::String(id.to_string());
        Ok(nodes
            .get(label)
            .and_then(|list| list.iter().find(|n| n.get("id") == Some(&id_value)))
            .cloned())
    }

    async fn query(&self, label: &str, filter: NodeFilter) -> Result<Vec<NodeProps>> {
        let nodes = self.nodes.read().await;
        let mut matched: Vec<NodeProps> = nodes
            .get(label)
            .map(|list| {
                list.iter()
                    .filter(|n| Self::matches(n, &filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((property, order)) = &filter.order_by {
            matched.sort_by(|a, b| {
                let ordering = Self::compare(
                    a.get(property).unwrap_or(&Value::Null),
                    b.get(property).unwrap_or(&Value::Null),
                );
                match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, Value)]) -> NodeProps {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn unique_constraint_rejects_duplicates() {
        let graph = MemoryGraph::new();
        graph.ensure_constraint("Dsar", "id").await.unwrap();

        graph
            .create_node("Dsar", props(&[("id", json!("d1"))]))
            .await
            .unwrap();
        let err = graph
            .create_node("Dsar", props(&[("id", json!("d1"))]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn merge_updates_in_place() {
        let graph = MemoryGraph::new();
        graph
            .merge_node("Disease", "id", props(&[("id", json!("m1")), ("name", json!("a"))]))
            .await
            .unwrap();
        graph
            .merge_node("Disease", "id", props(&[("id", json!("m1")), ("name", json!("b"))]))
            .await
            .unwrap();

        let all = graph.query("Disease", NodeFilter::new()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["name"], json!("b"));
    }

    #[tokio::test]
    async fn filter_order_and_limit() {
        let graph = MemoryGraph::new();
        for (id, status, ts) in [("a", "open", 3), ("b", "open", 1), ("c", "closed", 2)] {
            graph
                .create_node(
                    "Breach",
                    props(&[
                        ("id", json!(id)),
                        ("status", json!(status)),
                        ("created_at", json!(ts)),
                    ]),
                )
                .await
                .unwrap();
        }

        let rows = graph
            .query(
                "Breach",
                NodeFilter::new()
                    .equals("status", "open")
                    .order_by("created_at", SortOrder::Ascending)
                    .limit(5),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!("b"));
    }
}
