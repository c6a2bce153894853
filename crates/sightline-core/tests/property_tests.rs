//! # Property-Based Tests
//!
//! Determinism and correctness invariants checked with proptest.

use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use sightline_core::{
    BBox, ConnectedNode, Diagnostic, Edge, EdgeStyle, EngineConfig, Focus, GraphOperation,
    GraphStructure, ImageRef, Interpreter, MermaidParser, Node, NodeRegistry, ScriptedOracle,
    Shape, StepInterpretation, Transcript,
};
use std::collections::BTreeSet;

// =============================================================================
// STRATEGIES
// =============================================================================

fn any_shape() -> impl Strategy<Value = Shape> {
    prop_oneof![
        Just(Shape::Rect),
        Just(Shape::Diamond),
        Just(Shape::Round),
        Just(Shape::Stadium),
        Just(Shape::Hex),
        Just(Shape::Circle),
    ]
}

fn any_style() -> impl Strategy<Value = EdgeStyle> {
    prop_oneof![
        Just(EdgeStyle::Arrow),
        Just(EdgeStyle::Line),
        Just(EdgeStyle::Dotted),
        Just(EdgeStyle::Thick),
        Just(EdgeStyle::ThickLine),
    ]
}

/// Labels that need no escaping: alphanumeric words separated by single spaces.
fn safe_label() -> impl Strategy<Value = String> {
    "[A-Za-z0-9]{1,6}( [A-Za-z0-9]{1,6}){0,2}"
}

/// Labels built from delimiter, pipe and quote characters, sometimes with
/// an arrow in the middle.
fn special_label() -> impl Strategy<Value = String> {
    (
        r#"[A-Za-z0-9\[\](){}|"]{1,6}"#,
        proptest::option::of(r#"[A-Za-z0-9\[\](){}|"]{1,6}"#),
    )
        .prop_map(|(head, tail)| match tail {
            Some(tail) => format!("{} --> {}", head, tail),
            None => head,
        })
}

/// Free-text ids, labels that need quoting and piped edge labels.
fn free_text_graph() -> impl Strategy<Value = GraphStructure> {
    proptest::collection::btree_set("[A-Za-z0-9 ]{1,8}", 1..7)
        .prop_flat_map(|ids| {
            let ids: Vec<String> = ids.into_iter().filter(|id| !id.trim().is_empty()).collect();
            let n = ids.len().max(1);
            (
                Just(ids),
                vec((special_label(), any_shape()), n),
                vec((0..n, 0..n, any_style(), "[a-z|]{0,4}"), 0..10),
            )
        })
        .prop_map(|(ids, labels, edges)| {
            let mut graph = GraphStructure::new();
            for (id, (label, shape)) in ids.iter().zip(labels) {
                graph.add_node(Node::new(id.as_str(), label, shape));
            }
            for (src, dst, style, label) in edges {
                let (Some(src), Some(dst)) = (ids.get(src), ids.get(dst)) else {
                    continue;
                };
                if src != dst {
                    graph.add_edge(Edge::new(src.as_str(), dst.as_str()).with_style(style).with_label(label));
                }
            }
            graph
        })
}

/// A graph with unique ids `n0..nK`, escape-safe labels and no self loops.
fn any_graph() -> impl Strategy<Value = GraphStructure> {
    (1usize..8)
        .prop_flat_map(|n| {
            (
                vec((safe_label(), any_shape()), n),
                vec((0..n, 0..n, any_style(), proptest::option::of("[a-z]{1,5}")), 0..12),
            )
        })
        .prop_map(|(nodes, edges)| {
            let mut graph = GraphStructure::new();
            for (i, (label, shape)) in nodes.into_iter().enumerate() {
                graph.add_node(Node::new(format!("n{}", i), label, shape));
            }
            for (src, dst, style, label) in edges {
                if src == dst {
                    continue;
                }
                let edge = Edge::new(format!("n{}", src), format!("n{}", dst))
                    .with_style(style)
                    .with_label(label.unwrap_or_default());
                graph.add_edge(edge);
            }
            graph
        })
}

fn bbox_at(y: i64, x: i64) -> BBox {
    BBox::new(y, x, y + 20, x + 20)
}

// =============================================================================
// REGISTRY
// =============================================================================

proptest! {
    /// Resolving an identical focus twice yields the same id.
    #[test]
    fn identical_focus_resolves_to_same_id(
        hint in "[A-Za-z][A-Za-z0-9_]{0,8}",
        y in 0i64..900,
        x in 0i64..900,
        with_bbox in any::<bool>(),
    ) {
        let mut focus = Focus::new("box", hint);
        if with_bbox {
            focus = focus.with_bbox(bbox_at(y, x));
        }
        let mut registry = NodeRegistry::default();
        let first = registry.resolve_id(&focus);
        let second = registry.resolve_id(&focus);
        prop_assert_eq!(first, second);
    }

    /// Grid overlap alone is enough, whatever the boxes say.
    #[test]
    fn grid_overlap_alone_matches(y in 0i64..100, x in 0i64..100) {
        let mut registry = NodeRegistry::new(50);
        let a = Focus::new("a", "Check")
            .with_bbox(bbox_at(y, x))
            .with_grid_refs(["C3", "C4"]);
        let b = Focus::new("b", "Check")
            .with_bbox(bbox_at(y + 800, x + 800))
            .with_grid_refs(["c4"]);
        prop_assert_eq!(registry.resolve_id(&a), registry.resolve_id(&b));
    }

    /// Centroid proximity alone is enough, whatever the grids say.
    #[test]
    fn proximity_alone_matches(y in 0i64..800, x in 0i64..800, dy in 0i64..30) {
        let mut registry = NodeRegistry::new(50);
        let a = Focus::new("a", "Check").with_bbox(bbox_at(y, x)).with_grid_refs(["A1"]);
        let b = Focus::new("b", "Check").with_bbox(bbox_at(y + dy, x)).with_grid_refs(["H8"]);
        prop_assert_eq!(registry.resolve_id(&a), registry.resolve_id(&b));
    }

    /// Disjoint grids and far centroids give distinct suffixed ids in order.
    #[test]
    fn disjoint_and_far_get_distinct_ids(count in 2usize..6) {
        let mut registry = NodeRegistry::new(50);
        let ids: Vec<String> = (0..count)
            .map(|i| {
                let y = (i as i64) * 150;
                registry.resolve_id(
                    &Focus::new("err", "Error")
                        .with_bbox(bbox_at(y, 0))
                        .with_grid_refs([format!("A{}", i + 1)]),
                )
            })
            .collect();

        prop_assert_eq!(ids[0].as_str(), "Error");
        for (i, id) in ids.iter().enumerate().skip(1) {
            prop_assert_eq!(id.clone(), format!("Error_{}", i + 1));
        }
        prop_assert_eq!(registry.cluster_count("Error"), count);
    }

    /// Same call sequence, same ids.
    #[test]
    fn registry_is_deterministic(points in vec((0i64..900, 0i64..900), 1..20)) {
        let foci: Vec<Focus> = points
            .iter()
            .map(|&(y, x)| Focus::new("n", "Node").with_bbox(bbox_at(y, x)))
            .collect();
        let mut first = NodeRegistry::default();
        let mut second = NodeRegistry::default();
        let a: Vec<String> = foci.iter().map(|f| first.resolve_id(f)).collect();
        let b: Vec<String> = foci.iter().map(|f| second.resolve_id(f)).collect();
        prop_assert_eq!(a, b);
    }
}

// =============================================================================
// TEXT AND DIFF
// =============================================================================

proptest! {
    /// Rendering then parsing keeps ids, labels, shapes and edge pairs.
    #[test]
    fn render_parse_round_trip(graph in any_graph()) {
        let parsed = MermaidParser::parse(&graph.to_text());
        prop_assert!(parsed.warnings.is_empty());

        let nodes = |g: &GraphStructure| -> Vec<(String, String, Shape)> {
            g.nodes().iter().map(|n| (n.id.clone(), n.label.clone(), n.shape)).collect()
        };
        let pairs = |g: &GraphStructure| -> BTreeSet<(String, String)> {
            g.edges().iter().map(|e| (e.src.clone(), e.dst.clone())).collect()
        };
        prop_assert_eq!(nodes(&parsed.graph), nodes(&graph));
        prop_assert_eq!(pairs(&parsed.graph), pairs(&graph));
    }

    /// Free-text ids and special labels survive rendering once the ids are
    /// sanitized in place.
    #[test]
    fn sanitized_graph_round_trips(graph in free_text_graph()) {
        let mut graph = graph;
        graph.sanitize_ids();
        let parsed = MermaidParser::parse(&graph.to_text());
        prop_assert!(parsed.warnings.is_empty());

        let nodes = |g: &GraphStructure| -> Vec<(String, String, Shape)> {
            g.nodes().iter().map(|n| (n.id.clone(), n.label.clone(), n.shape)).collect()
        };
        let edges = |g: &GraphStructure| -> Vec<(String, String, String)> {
            g.edges().iter().map(|e| (e.src.clone(), e.dst.clone(), e.label.clone())).collect()
        };
        prop_assert_eq!(nodes(&parsed.graph), nodes(&graph));
        prop_assert_eq!(edges(&parsed.graph), edges(&graph));
    }

    /// A graph never differs from itself.
    #[test]
    fn self_diff_is_empty(graph in any_graph()) {
        prop_assert!(graph.diff(&graph).is_empty());
        prop_assert!(graph.diff(&graph.clone()).is_empty());
    }

    /// Adding one new node is reported as exactly that change.
    #[test]
    fn single_added_node_is_the_only_change(graph in any_graph(), label in safe_label()) {
        let mut grown = graph.clone();
        grown.add_node(Node::new("extra", label, Shape::Rect));
        let diff = graph.diff(&grown);
        prop_assert_eq!(diff.change_count(), 1);
        prop_assert_eq!(diff.added_nodes.len(), 1);
        prop_assert_eq!(diff.added_nodes[0].id.as_str(), "extra");
    }

    /// Applying the same operation twice equals applying it once.
    #[test]
    fn operations_are_idempotent(graph in any_graph(), src in 0usize..8, dst in 0usize..8) {
        let ops = [
            GraphOperation::AddEdge {
                src: format!("n{}", src),
                dst: format!("n{}", dst),
                label: String::new(),
                style: EdgeStyle::Arrow,
            },
            GraphOperation::RemoveNode { node_id: format!("n{}", dst) },
        ];
        for op in &ops {
            let mut once = graph.clone();
            once.apply_operation(op);
            let mut twice = once.clone();
            twice.apply_operation(op);
            prop_assert_eq!(once, twice);
        }
    }
}

// =============================================================================
// ENGINE
// =============================================================================

fn any_transcript() -> impl Strategy<Value = Transcript> {
    let ids = || prop::sample::select(vec!["A", "B", "C", "D", "E"]);
    let targets = move || vec(ids().prop_map(str::to_string), 0..4);
    let step = move || {
        (targets(), 0usize..3).prop_map(|(out, arrows)| StepInterpretation {
            outgoing_edges: out
                .into_iter()
                .map(|t| ConnectedNode {
                    description: t.clone(),
                    target_id: t,
                    ..ConnectedNode::default()
                })
                .collect(),
            incoming_edges: vec![Default::default(); arrows],
            ..StepInterpretation::default()
        })
    };
    let audit = move || {
        (
            proptest::option::of(targets()),
            proptest::option::of(targets()),
        )
            .prop_map(|(incoming, outgoing)| StepInterpretation {
                audit_confirmed_incoming: incoming,
                audit_confirmed_outgoing: outgoing,
                ..StepInterpretation::default()
            })
    };

    (
        btree_map(ids().prop_map(str::to_string), step(), 1..5),
        btree_map(ids().prop_map(str::to_string), vec(audit(), 1..4), 0..5),
    )
        .prop_map(|(steps, audits)| Transcript {
            initial: vec![Focus::new("entry", "A")],
            steps,
            audits,
            ..Transcript::default()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any oracle behaviour ends within the bounds with a closed graph.
    #[test]
    fn any_oracle_terminates_with_closed_graph(
        transcript in any_transcript(),
        max_iterations in 0usize..6,
        detect_cycles in any::<bool>(),
    ) {
        let config = EngineConfig {
            max_iterations,
            detect_cycles,
            ..EngineConfig::default()
        };
        let oracle = ScriptedOracle::new(transcript);
        let result = Interpreter::new(config)
            .process(&oracle, &ImageRef::new("random.png"))
            .expect("lenient oracle never fails");

        prop_assert!(result.graph.dangling_edges().is_empty());
        // Only five distinct ids exist, crawled or discovered.
        prop_assert!(result.steps.len() <= 5);
        let cycles = result
            .diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::CycleDetected { .. }))
            .count();
        prop_assert!(cycles <= 1);
    }
}
