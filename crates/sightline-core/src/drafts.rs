//! # Multi-Draft Mode
//!
//! Alternative to the crawl: ask the oracle for several whole-diagram
//! drafts, each from a different perspective, then merge them.
//!
//! 1. **Draft**: one task per source on a bounded worker pool. A failing
//!    draft is logged and contributes an empty graph.
//! 2. **Normalize**: non-anchor drafts are renamed onto the anchor's ids
//!    (the anchor is the first source).
//! 3. **Merge**: union. Anything present in any draft is kept; on conflict
//!    the first-listed source wins.
//!
//! Drafts share no mutable state; the merge is single-threaded.

use crate::context::Diagnostic;
use crate::graph::GraphStructure;
use crate::oracle::ImageRef;
use crate::parser::MermaidParser;
use crate::{Node, OracleError, SightlineError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// SOURCES
// =============================================================================

/// A named drafting perspective. Order in a source list is merge priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSource {
    pub name: String,
    /// Instruction given to the oracle for this perspective.
    pub persona: String,
}

impl DraftSource {
    #[must_use]
    pub fn new(name: impl Into<String>, persona: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona: persona.into(),
        }
    }

    /// Structuralist, Optimist, Pessimist, in that priority.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "Structuralist",
                "Focus on semantic ids and the logical flow.",
            ),
            Self::new("Optimist", "High recall. Include everything, even faint lines."),
            Self::new("Pessimist", "High precision. Only clear text and lines."),
        ]
    }
}

/// Oracle side of multi-draft mode. Called from worker threads.
pub trait DraftOracle: Send + Sync {
    /// Whole-diagram text from one perspective.
    fn draft(&self, image: &ImageRef, source: &DraftSource) -> Result<String, OracleError>;

    /// Map ids of `draft` onto ids of `anchor` that denote the same node.
    /// Ids left out of the mapping are kept.
    fn map_ids(
        &self,
        _anchor: &GraphStructure,
        _draft: &GraphStructure,
    ) -> Result<BTreeMap<String, String>, OracleError> {
        Ok(BTreeMap::new())
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// One source's parsed draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub source: String,
    pub graph: GraphStructure,
    pub warnings: Vec<Diagnostic>,
    /// Set when the oracle call failed and the graph is empty.
    pub error: Option<String>,
}

/// Output of the full draft -> normalize -> merge pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiDraftResult {
    pub graph: GraphStructure,
    pub text: String,
    pub drafts: Vec<Draft>,
}

/// Produce one draft per source on a pool of `workers` threads.
/// Results keep source order.
pub fn run_drafts<O: DraftOracle + ?Sized>(
    oracle: &O,
    image: &ImageRef,
    sources: &[DraftSource],
    workers: usize,
) -> Result<Vec<Draft>, SightlineError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("sightline-draft-{}", i))
        .build()
        .map_err(|e| SightlineError::WorkerPool(e.to_string()))?;

    tracing::info!(sources = sources.len(), workers, "generating drafts");
    let drafts: Vec<Draft> = pool.install(|| {
        sources
            .par_iter()
            .map(|source| draft_one(oracle, image, source))
            .collect()
    });
    Ok(drafts)
}

fn draft_one<O: DraftOracle + ?Sized>(oracle: &O, image: &ImageRef, source: &DraftSource) -> Draft {
    match oracle.draft(image, source) {
        Ok(text) => {
            let parsed = MermaidParser::parse(&text);
            tracing::debug!(
                source = %source.name,
                nodes = parsed.graph.node_count(),
                edges = parsed.graph.edge_count(),
                "draft parsed"
            );
            Draft {
                source: source.name.clone(),
                graph: parsed.graph,
                warnings: parsed.warnings,
                error: None,
            }
        }
        Err(e) => {
            tracing::error!(source = %source.name, error = %e, "draft failed");
            Draft {
                source: source.name.clone(),
                graph: GraphStructure::new(),
                warnings: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

/// Rename every non-anchor draft onto the anchor's ids.
///
/// The anchor is the first draft. Nothing happens when it is empty. A
/// failed mapping call leaves that draft unchanged.
pub fn normalize_ids<O: DraftOracle + ?Sized>(oracle: &O, drafts: &mut [Draft]) {
    let Some((anchor, rest)) = drafts.split_first_mut() else {
        return;
    };
    if anchor.graph.node_count() == 0 {
        tracing::warn!(anchor = %anchor.source, "anchor draft is empty, skipping id normalization");
        return;
    }

    for draft in rest.iter_mut().filter(|d| d.graph.node_count() > 0) {
        match oracle.map_ids(&anchor.graph, &draft.graph) {
            Ok(mapping) => {
                tracing::debug!(source = %draft.source, mapped = mapping.len(), "normalizing ids");
                draft.graph.remap_ids(&mapping);
            }
            Err(e) => {
                tracing::warn!(source = %draft.source, error = %e, "id mapping failed, keeping draft ids");
            }
        }
    }
}

/// Union merge in source order.
///
/// Node existence and edge existence are additive. Label, shape, edge
/// label, edge style and direction come from the first draft that has them.
/// An edge whose endpoint no draft declares gets a placeholder node.
#[must_use]
pub fn merge_union(drafts: &[Draft]) -> GraphStructure {
    let mut merged = GraphStructure::new();
    let non_empty = || drafts.iter().filter(|d| !d.graph.is_empty());

    if let Some(first) = non_empty().next() {
        merged.set_direction(first.graph.direction());
    }

    for draft in non_empty() {
        for node in draft.graph.nodes() {
            merged.add_node(node.clone());
        }
    }

    for draft in non_empty() {
        for edge in draft.graph.edges() {
            if merged.contains_edge(&edge.src, &edge.dst) {
                continue;
            }
            for id in [&edge.src, &edge.dst] {
                merged.add_node(Node::placeholder(id.clone()));
            }
            merged.add_edge(edge.clone());
        }
    }

    merged
}

/// Draft, normalize and merge.
pub fn process_drafts<O: DraftOracle + ?Sized>(
    oracle: &O,
    image: &ImageRef,
    sources: &[DraftSource],
    workers: usize,
) -> Result<MultiDraftResult, SightlineError> {
    let mut drafts = run_drafts(oracle, image, sources, workers)?;
    normalize_ids(oracle, &mut drafts);
    let mut graph = merge_union(&drafts);
    graph.sanitize_ids();
    tracing::info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "drafts merged"
    );
    Ok(MultiDraftResult {
        text: graph.to_text(),
        graph,
        drafts,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EdgeStyle, Shape};

    struct FixedDrafts {
        texts: BTreeMap<String, String>,
        mapping: BTreeMap<String, String>,
    }

    impl DraftOracle for FixedDrafts {
        fn draft(&self, _image: &ImageRef, source: &DraftSource) -> Result<String, OracleError> {
            self.texts
                .get(&source.name)
                .cloned()
                .ok_or_else(|| OracleError::Transport(format!("{} offline", source.name)))
        }

        fn map_ids(
            &self,
            _anchor: &GraphStructure,
            draft: &GraphStructure,
        ) -> Result<BTreeMap<String, String>, OracleError> {
            Ok(self
                .mapping
                .iter()
                .filter(|(from, _)| draft.contains_node(from))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }
    }

    fn oracle() -> FixedDrafts {
        FixedDrafts {
            texts: BTreeMap::from([
                (
                    "Structuralist".to_string(),
                    "graph LR\n    Req[Request]\n    Ok{Approved?}\n    Req --> Ok".to_string(),
                ),
                (
                    "Optimist".to_string(),
                    "graph TD\n    R[Request form]\n    Ok(Approved)\n    R -.-> Ok\n    Ok -->|Yes| Done".to_string(),
                ),
            ]),
            mapping: BTreeMap::from([("R".to_string(), "Req".to_string())]),
        }
    }

    #[test]
    fn drafts_keep_source_order_and_failures_are_empty() {
        let drafts = run_drafts(&oracle(), &ImageRef::new("x.png"), &DraftSource::defaults(), 3)
            .expect("pool");
        let names: Vec<&str> = drafts.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(names, vec!["Structuralist", "Optimist", "Pessimist"]);
        assert!(drafts[2].graph.is_empty());
        assert!(drafts[2].error.is_some());
    }

    #[test]
    fn union_merge_first_source_wins() {
        let result = process_drafts(&oracle(), &ImageRef::new("x.png"), &DraftSource::defaults(), 2)
            .expect("drafts");
        let g = &result.graph;

        assert_eq!(g.direction(), crate::Direction::LR);
        let ok = g.node("Ok").expect("Ok");
        assert_eq!((ok.label.as_str(), ok.shape), ("Approved?", Shape::Diamond));
        assert_eq!(g.node("Req").map(|n| n.label.as_str()), Some("Request"));
        assert!(!g.contains_node("R"));

        // Req -> Ok exists in both; the anchor's style wins.
        let first = &g.edges()[0];
        assert_eq!((first.key(), first.style), (("Req", "Ok"), EdgeStyle::Arrow));
        // Only the optimist saw Ok -> Done.
        assert!(g.contains_edge("Ok", "Done"));
        assert!(g.dangling_edges().is_empty());
    }

    #[test]
    fn edge_endpoints_missing_from_every_draft_become_placeholders() {
        let mut graph = GraphStructure::new();
        graph.add_edge(crate::Edge::new("X", "Y"));
        let drafts = vec![Draft {
            source: "only".into(),
            graph,
            warnings: Vec::new(),
            error: None,
        }];
        let merged = merge_union(&drafts);
        assert_eq!(merged.node_count(), 2);
        assert_eq!(merged.node("Y").map(|n| n.label.as_str()), Some("Y"));
    }

    #[test]
    fn no_sources_yields_no_drafts() {
        let result = run_drafts(&oracle(), &ImageRef::new("x.png"), &[], 1).expect("pool");
        assert!(result.is_empty());
    }
}
