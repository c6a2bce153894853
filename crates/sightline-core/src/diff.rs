//! # Graph Diff
//!
//! Structural delta between two graphs, used for correction logs and
//! idempotence checks. Edges are compared by `(src, dst)` pair only.

use crate::graph::GraphStructure;
use crate::{Edge, Node, Shape};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Immutable delta from an old graph to a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDiff {
    /// Nodes only in the new graph, in its declaration order.
    pub added_nodes: Vec<Node>,
    /// Nodes only in the old graph, in its declaration order.
    pub removed_nodes: Vec<Node>,
    /// id -> (old label, new label)
    pub changed_labels: BTreeMap<String, (String, String)>,
    /// id -> (old shape, new shape)
    pub changed_shapes: BTreeMap<String, (Shape, Shape)>,
    /// Edges whose pair exists only in the new graph.
    pub added_edges: Vec<Edge>,
    /// Edges whose pair exists only in the old graph.
    pub removed_edges: Vec<Edge>,
}

impl GraphDiff {
    /// Compute the delta from `old` to `new`.
    #[must_use]
    pub fn between(old: &GraphStructure, new: &GraphStructure) -> Self {
        let mut diff = Self {
            added_nodes: new
                .nodes()
                .iter()
                .filter(|n| !old.contains_node(&n.id))
                .cloned()
                .collect(),
            removed_nodes: old
                .nodes()
                .iter()
                .filter(|n| !new.contains_node(&n.id))
                .cloned()
                .collect(),
            ..Self::default()
        };

        for before in old.nodes() {
            let Some(after) = new.node(&before.id) else {
                continue;
            };
            if before.label != after.label {
                diff.changed_labels.insert(
                    before.id.clone(),
                    (before.label.clone(), after.label.clone()),
                );
            }
            if before.shape != after.shape {
                diff.changed_shapes
                    .insert(before.id.clone(), (before.shape, after.shape));
            }
        }

        let old_pairs = edge_pairs(old);
        let new_pairs = edge_pairs(new);
        diff.added_edges = new
            .edges()
            .iter()
            .filter(|e| !old_pairs.contains(&e.key()))
            .cloned()
            .collect();
        diff.removed_edges = old
            .edges()
            .iter()
            .filter(|e| !new_pairs.contains(&e.key()))
            .cloned()
            .collect();

        diff
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.changed_labels.is_empty()
            && self.changed_shapes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
    }

    /// Total number of individual changes.
    #[must_use]
    pub fn change_count(&self) -> usize {
        [
            self.added_nodes.len(),
            self.removed_nodes.len(),
            self.changed_labels.len(),
            self.changed_shapes.len(),
            self.added_edges.len(),
            self.removed_edges.len(),
        ]
        .into_iter()
        .fold(0usize, usize::saturating_add)
    }

    /// One line per change, or `(no changes)`.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for n in &self.added_nodes {
            parts.push(format!("ADD node {}[{}]", n.id, n.label));
        }
        for n in &self.removed_nodes {
            parts.push(format!("REMOVE node {}[{}]", n.id, n.label));
        }
        for (id, (old, new)) in &self.changed_labels {
            parts.push(format!("RELABEL {}: '{}' -> '{}'", id, old, new));
        }
        for (id, (old, new)) in &self.changed_shapes {
            parts.push(format!("RESHAPE {}: {} -> {}", id, old, new));
        }
        for e in &self.added_edges {
            parts.push(format!("ADD edge {} -> {}", e.src, e.dst));
        }
        for e in &self.removed_edges {
            parts.push(format!("REMOVE edge {} -> {}", e.src, e.dst));
        }

        if parts.is_empty() {
            "(no changes)".to_string()
        } else {
            parts.join("\n")
        }
    }
}

impl fmt::Display for GraphDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

fn edge_pairs(graph: &GraphStructure) -> BTreeSet<(&str, &str)> {
    graph.edges().iter().map(Edge::key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> GraphStructure {
        let mut g = GraphStructure::new();
        g.add_node(Node::new("A", "Start", Shape::Round));
        g.add_node(Node::new("B", "End", Shape::Round));
        g.add_edge(Edge::new("A", "B"));
        g
    }

    #[test]
    fn self_diff_is_empty() {
        let g = chain();
        let d = g.diff(&g);
        assert!(d.is_empty());
        assert_eq!(d.summary(), "(no changes)");
    }

    #[test]
    fn single_added_node_reported_alone() {
        let old = chain();
        let mut new = old.clone();
        new.add_node(Node::placeholder("C"));

        let d = old.diff(&new);
        assert_eq!(d.added_nodes.len(), 1);
        assert_eq!(d.change_count(), 1);
        assert_eq!(d.summary(), "ADD node C[C]");
    }

    #[test]
    fn label_and_shape_changes_keyed_by_id() {
        let old = chain();
        let mut new = GraphStructure::new();
        new.add_node(Node::new("A", "Begin", Shape::Stadium));
        new.add_node(Node::new("B", "End", Shape::Round));
        new.add_edge(Edge::new("A", "B").with_label("go"));

        let d = old.diff(&new);
        assert_eq!(
            d.changed_labels.get("A"),
            Some(&("Start".to_string(), "Begin".to_string()))
        );
        assert_eq!(d.changed_shapes.get("A"), Some(&(Shape::Round, Shape::Stadium)));
        // Edge label differences are invisible to pair identity.
        assert!(d.added_edges.is_empty());
        assert!(d.removed_edges.is_empty());
    }

    #[test]
    fn edge_pair_difference() {
        let old = chain();
        let mut new = old.clone();
        new.add_node(Node::placeholder("C"));
        new.add_edge(Edge::new("B", "C"));

        let d = new.diff(&old);
        assert_eq!(d.removed_nodes.len(), 1);
        assert_eq!(d.removed_edges.len(), 1);
        assert!(d.summary().contains("REMOVE edge B -> C"));
    }
}
