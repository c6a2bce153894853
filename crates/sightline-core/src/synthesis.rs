//! # Mechanical Synthesis
//!
//! Builds a graph directly from the step history, without asking the
//! oracle. Serves as the fallback when the oracle's own diagram text is
//! unusable, and as a baseline for diffing against it.

use crate::graph::GraphStructure;
use crate::primitives::{OBSERVATION_DISCOVERED, is_engine_tag};
use crate::{Edge, Node, Shape, StepInterpretation};

/// One node per step, one edge per distinct `(src, dst)` pair.
///
/// A node's label is the first observation recorded for its id, or the
/// id itself. Edge targets that were never visited are declared from the
/// edge description, unless that description is an engine tag.
#[must_use]
pub fn graph_from_history(history: &[StepInterpretation]) -> GraphStructure {
    let mut graph = GraphStructure::new();

    for step in history {
        let Some(id) = step.source_id.as_deref().filter(|id| !id.trim().is_empty()) else {
            continue;
        };
        let label = step
            .visual_observation
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty() && *o != OBSERVATION_DISCOVERED)
            .unwrap_or(id);
        graph.add_node(Node::new(id, label, Shape::Rect));
    }

    for step in history {
        let Some(src) = step.source_id.as_deref().filter(|id| !id.trim().is_empty()) else {
            continue;
        };
        for edge in &step.outgoing_edges {
            let dst = edge.target_id.as_str();
            if dst.trim().is_empty() {
                continue;
            }
            if !graph.contains_node(dst) {
                let description = edge.description.trim();
                let label = if description.is_empty() || is_engine_tag(description) {
                    dst
                } else {
                    description
                };
                graph.add_node(Node::new(dst, label, Shape::Rect));
            }
            let label = edge.edge_label.as_deref().map(str::trim).unwrap_or_default();
            graph.add_edge(Edge::new(src, dst).with_label(label));
        }
    }

    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConnectedNode;
    use crate::primitives::TAG_REVERSE_PATCHED;

    #[test]
    fn builds_nodes_and_deduped_edges() {
        let history = vec![
            StepInterpretation {
                source_id: Some("Start".into()),
                visual_observation: Some("Begin".into()),
                outgoing_edges: vec![
                    ConnectedNode {
                        target_id: "Check".into(),
                        description: "Is it valid?".into(),
                        edge_label: Some("go".into()),
                        ..ConnectedNode::default()
                    },
                    ConnectedNode::engine_added("Check", TAG_REVERSE_PATCHED),
                    ConnectedNode::engine_added("Ghost", TAG_REVERSE_PATCHED),
                ],
                ..StepInterpretation::default()
            },
            StepInterpretation {
                source_id: Some("Hidden".into()),
                visual_observation: Some(OBSERVATION_DISCOVERED.into()),
                ..StepInterpretation::default()
            },
        ];

        let graph = graph_from_history(&history);
        let labels: Vec<(&str, &str)> = graph
            .nodes()
            .iter()
            .map(|n| (n.id.as_str(), n.label.as_str()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("Start", "Begin"),
                ("Hidden", "Hidden"),
                ("Check", "Is it valid?"),
                ("Ghost", "Ghost"),
            ]
        );
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.edges()[0].label, "go");
        assert!(graph.dangling_edges().is_empty());
    }
}
