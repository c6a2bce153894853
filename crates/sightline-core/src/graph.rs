//! # Graph Structure
//!
//! The canonical diagram model: a direction hint, an insertion-ordered node
//! map, and an ordered edge list.
//!
//! Nodes keep the order they were first declared in, so `to_text()` output
//! is stable for a given construction sequence. Lookup by id goes through a
//! `BTreeMap` index into the node vector.
//!
//! Structural corrections arrive as [`GraphOperation`] batches from an
//! unreliable source. Every operation is idempotent, and an operation whose
//! target is missing is skipped with a reason instead of aborting the batch.

use crate::context::Diagnostic;
use crate::diff::GraphDiff;
use crate::parser::{is_bare_id, synthetic_id};
use crate::{Direction, Edge, EdgeStyle, Node, Shape};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Ids the parser reads as keywords or directives when they start a line.
const RESERVED_IDS: [&str; 7] = [
    "graph",
    "flowchart",
    "subgraph",
    "style",
    "class",
    "classDef",
    "linkStyle",
];

/// Entity for `"` inside a quoted node label.
pub(crate) const QUOTE_ENTITY: &str = "#quot;";

/// Entity for `|` inside an edge label.
pub(crate) const PIPE_ENTITY: &str = "#124;";

/// Characters that would end or confuse a node label if left unquoted.
const LABEL_SPECIALS: [char; 8] = ['[', ']', '(', ')', '{', '}', '|', '"'];

/// Node label as written between the shape delimiters.
fn node_label_text(label: &str) -> Cow<'_, str> {
    let needs_quotes = label.trim().is_empty()
        || label.contains(LABEL_SPECIALS)
        || ["--", "==", "-."].iter().any(|a| label.contains(a));
    if needs_quotes {
        Cow::Owned(format!("\"{}\"", label.replace('"', QUOTE_ENTITY)))
    } else {
        Cow::Borrowed(label)
    }
}

// =============================================================================
// GRAPH STRUCTURE
// =============================================================================

/// Direction + ordered nodes + ordered edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SerializedGraph", into = "SerializedGraph")]
pub struct GraphStructure {
    direction: Direction,
    /// Nodes in declaration order.
    nodes: Vec<Node>,
    /// id -> position in `nodes`.
    index: BTreeMap<String, usize>,
    edges: Vec<Edge>,
}

impl GraphStructure {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph with the given direction.
    #[must_use]
    pub fn with_direction(direction: Direction) -> Self {
        Self {
            direction,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Edges in insertion order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).and_then(|&i| self.nodes.get(i))
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        let i = *self.index.get(id)?;
        self.nodes.get_mut(i)
    }

    #[must_use]
    pub fn contains_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn contains_edge(&self, src: &str, dst: &str) -> bool {
        self.edges.iter().any(|e| e.key() == (src, dst))
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Insert a node. The first declaration of an id wins; returns `false`
    /// when the id already exists.
    pub fn add_node(&mut self, node: Node) -> bool {
        if self.index.contains_key(&node.id) {
            return false;
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        true
    }

    /// Append an edge unless one with the same endpoints already exists.
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        if self.contains_edge(&edge.src, &edge.dst) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    /// Remove a node and every edge touching it.
    fn remove_node(&mut self, id: &str) -> bool {
        if self.index.remove(id).is_none() {
            return false;
        }
        self.nodes.retain(|n| n.id != id);
        self.edges.retain(|e| e.src != id && e.dst != id);
        self.reindex();
        true
    }

    fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
    }

    // =========================================================================
    // SERIALIZATION
    // =========================================================================

    /// Render diagram text.
    ///
    /// Every node is declared exactly once, in map order, before any edge.
    /// Edges then refer to nodes by id only, so no node is ever redeclared
    /// or referenced ahead of its declaration.
    ///
    /// Ids that the parser would not read back verbatim are written under
    /// the names from [`Self::text_safe_ids`]. Labels holding delimiter or
    /// arrow characters are quoted, and edge label pipes become `#124;`.
    #[must_use]
    pub fn to_text(&self) -> String {
        let renamed = self.text_safe_ids();
        let id = |raw: &str| -> String {
            renamed.get(raw).cloned().unwrap_or_else(|| raw.to_string())
        };
        let mut lines = vec![format!("graph {}", self.direction)];

        for node in &self.nodes {
            let (open, close) = node.shape.delimiters();
            lines.push(format!(
                "    {}{}{}{}",
                id(&node.id),
                open,
                node_label_text(&node.label),
                close
            ));
        }

        for edge in &self.edges {
            let (src, dst) = (id(&edge.src), id(&edge.dst));
            if edge.label.is_empty() {
                lines.push(format!("    {} {} {}", src, edge.style, dst));
            } else {
                lines.push(format!(
                    "    {} {}|{}| {}",
                    src,
                    edge.style,
                    edge.label.replace('|', PIPE_ENTITY),
                    dst
                ));
            }
        }

        lines.join("\n")
    }

    /// Renames that make every id, including dangling edge endpoints,
    /// readable by the parser as itself.
    ///
    /// Ids that are not plain identifiers, or that collide with a diagram
    /// keyword, get a sanitized name unique within the graph. Plain ids are
    /// left out of the map.
    #[must_use]
    pub fn text_safe_ids(&self) -> BTreeMap<String, String> {
        let referenced = self
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .chain(self.edges.iter().flat_map(|e| [e.src.as_str(), e.dst.as_str()]));

        let needs_rename = |id: &str| !is_bare_id(id) || RESERVED_IDS.contains(&id);
        let mut taken: BTreeSet<String> = referenced
            .clone()
            .filter(|id| !needs_rename(*id))
            .map(str::to_string)
            .collect();
        taken.extend(RESERVED_IDS.iter().map(|r| r.to_string()));

        let mut renamed = BTreeMap::new();
        for raw in referenced {
            if !needs_rename(raw) || renamed.contains_key(raw) {
                continue;
            }
            let base = synthetic_id(raw);
            let mut candidate = base.clone();
            let mut n = 2usize;
            while taken.contains(&candidate) {
                candidate = format!("{}_{}", base, n);
                n = n.saturating_add(1);
            }
            taken.insert(candidate.clone());
            renamed.insert(raw.to_string(), candidate);
        }
        renamed
    }

    /// Apply [`Self::text_safe_ids`] to the graph itself, so that node ids
    /// match the ids in `to_text()`. Returns the renames made.
    pub fn sanitize_ids(&mut self) -> BTreeMap<String, String> {
        let renamed = self.text_safe_ids();
        for (from, to) in &renamed {
            tracing::debug!(from = %from, to = %to, "renamed node id for diagram text");
        }
        self.remap_ids(&renamed);
        renamed
    }

    /// Structural delta from `self` to `other`.
    #[must_use]
    pub fn diff(&self, other: &GraphStructure) -> GraphDiff {
        GraphDiff::between(self, other)
    }

    // =========================================================================
    // INTEGRITY
    // =========================================================================

    /// Edges with at least one endpoint that is not a declared node.
    #[must_use]
    pub fn dangling_edges(&self) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| !self.contains_node(&e.src) || !self.contains_node(&e.dst))
            .collect()
    }

    /// Heal dangling references.
    ///
    /// A missing endpoint with a usable id becomes a placeholder node labelled
    /// with its id. An edge whose missing endpoint id is blank cannot be
    /// healed and is dropped. Both outcomes are returned as diagnostics.
    pub fn close_dangling(&mut self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        let mut kept = Vec::with_capacity(self.edges.len());
        for edge in std::mem::take(&mut self.edges) {
            if edge.src.trim().is_empty() || edge.dst.trim().is_empty() {
                tracing::warn!(src = %edge.src, dst = %edge.dst, "dropping edge with blank endpoint");
                diagnostics.push(Diagnostic::EdgeDropped {
                    src: edge.src,
                    dst: edge.dst,
                    reason: "blank endpoint id".to_string(),
                });
                continue;
            }
            kept.push(edge);
        }
        self.edges = kept;

        let missing: Vec<(String, String)> = self
            .edges
            .iter()
            .flat_map(|e| [(e.src.clone(), e.dst.clone()), (e.dst.clone(), e.src.clone())])
            .filter(|(id, _)| !self.contains_node(id))
            .collect();

        for (id, target) in missing {
            if self.add_node(Node::placeholder(id.clone())) {
                tracing::debug!(node = %id, "declared placeholder for dangling reference");
                diagnostics.push(Diagnostic::PlaceholderCreated { id, target });
            }
        }

        diagnostics
    }

    /// Rename node ids and edge endpoints.
    ///
    /// Ids absent from `mapping` are kept. If two nodes land on the same id
    /// the first one wins, and edges that collapse onto an existing pair are
    /// merged into it.
    pub fn remap_ids(&mut self, mapping: &BTreeMap<String, String>) {
        if mapping.is_empty() {
            return;
        }
        let rename = |id: &str| mapping.get(id).cloned().unwrap_or_else(|| id.to_string());

        let nodes = std::mem::take(&mut self.nodes);
        let edges = std::mem::take(&mut self.edges);
        self.index.clear();

        for mut node in nodes {
            node.id = rename(&node.id);
            self.add_node(node);
        }
        for mut edge in edges {
            edge.src = rename(&edge.src);
            edge.dst = rename(&edge.dst);
            self.add_edge(edge);
        }
    }

    // =========================================================================
    // STRUCTURAL CORRECTIONS
    // =========================================================================

    /// Apply one structural correction.
    pub fn apply_operation(&mut self, op: &GraphOperation) -> OpOutcome {
        let outcome = match op {
            GraphOperation::Relabel { node_id, new_label } => match self.node_mut(node_id) {
                Some(node) => {
                    node.label.clone_from(new_label);
                    OpOutcome::Applied
                }
                None => OpOutcome::skipped(format!("node '{}' not found", node_id)),
            },
            GraphOperation::Reshape { node_id, new_shape } => match self.node_mut(node_id) {
                Some(node) => {
                    node.shape = *new_shape;
                    OpOutcome::Applied
                }
                None => OpOutcome::skipped(format!("node '{}' not found", node_id)),
            },
            GraphOperation::AddEdge {
                src,
                dst,
                label,
                style,
            } => {
                if let Some(missing) = [src, dst].into_iter().find(|id| !self.contains_node(id)) {
                    OpOutcome::skipped(format!("node '{}' not found", missing))
                } else if self.add_edge(Edge::new(src, dst).with_label(label).with_style(*style)) {
                    OpOutcome::Applied
                } else {
                    OpOutcome::skipped(format!("edge {} -> {} already exists", src, dst))
                }
            }
            GraphOperation::RemoveEdge { src, dst } => {
                let before = self.edges.len();
                self.edges.retain(|e| e.key() != (src.as_str(), dst.as_str()));
                if self.edges.len() < before {
                    OpOutcome::Applied
                } else {
                    OpOutcome::skipped(format!("edge {} -> {} not found", src, dst))
                }
            }
            GraphOperation::AddNode {
                node_id,
                label,
                shape,
            } => {
                let label = label.clone().unwrap_or_else(|| node_id.clone());
                if self.add_node(Node::new(node_id, label, *shape)) {
                    OpOutcome::Applied
                } else {
                    OpOutcome::skipped(format!("node '{}' already exists", node_id))
                }
            }
            GraphOperation::RemoveNode { node_id } => {
                if self.remove_node(node_id) {
                    OpOutcome::Applied
                } else {
                    OpOutcome::skipped(format!("node '{}' not found", node_id))
                }
            }
            GraphOperation::RelabelEdge { src, dst, new_label } => {
                match self
                    .edges
                    .iter_mut()
                    .find(|e| e.key() == (src.as_str(), dst.as_str()))
                {
                    Some(edge) => {
                        edge.label.clone_from(new_label);
                        OpOutcome::Applied
                    }
                    None => OpOutcome::skipped(format!("edge {} -> {} not found", src, dst)),
                }
            }
        };

        match &outcome {
            OpOutcome::Applied => tracing::info!(op = %op, "applied graph operation"),
            OpOutcome::Skipped(reason) => {
                tracing::warn!(op = %op, reason = %reason, "skipped graph operation");
            }
        }
        outcome
    }

    /// Apply a batch of corrections in order. Never aborts.
    pub fn apply_operations(&mut self, ops: &[GraphOperation]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for op in ops {
            let outcome = self.apply_operation(op);
            report.record(op.to_string(), outcome);
        }
        tracing::info!(
            applied = report.applied,
            total = ops.len(),
            "structural corrections applied"
        );
        report
    }

    /// Apply a batch of raw JSON corrections in order. Never aborts.
    ///
    /// Each element is decoded on its own. An unknown `op` or a missing field
    /// skips that element with the decode error as the reason, and the rest
    /// of the batch still applies.
    pub fn apply_json_operations(&mut self, raw: &[serde_json::Value]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for value in raw {
            match GraphOperation::deserialize(value) {
                Ok(op) => {
                    let outcome = self.apply_operation(&op);
                    report.record(op.to_string(), outcome);
                }
                Err(e) => {
                    tracing::warn!(op = %value, error = %e, "skipped malformed graph operation");
                    report.record(value.to_string(), OpOutcome::skipped(e.to_string()));
                }
            }
        }
        tracing::info!(
            applied = report.applied,
            total = raw.len(),
            "structural corrections applied"
        );
        report
    }
}

impl fmt::Display for GraphStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Wire form of a graph: the index is rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SerializedGraph {
    #[serde(default)]
    direction: Direction,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl From<SerializedGraph> for GraphStructure {
    fn from(s: SerializedGraph) -> Self {
        let mut graph = Self::with_direction(s.direction);
        for node in s.nodes {
            graph.add_node(node);
        }
        graph.edges = s.edges;
        graph
    }
}

impl From<GraphStructure> for SerializedGraph {
    fn from(g: GraphStructure) -> Self {
        Self {
            direction: g.direction,
            nodes: g.nodes,
            edges: g.edges,
        }
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Closed vocabulary of structural corrections.
///
/// Wire format is tagged by `op`, e.g.
/// `{"op":"add_edge","src":"A","dst":"B","label":"Yes"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphOperation {
    Relabel {
        node_id: String,
        new_label: String,
    },
    Reshape {
        node_id: String,
        new_shape: Shape,
    },
    AddEdge {
        src: String,
        dst: String,
        #[serde(default)]
        label: String,
        #[serde(default)]
        style: EdgeStyle,
    },
    RemoveEdge {
        src: String,
        dst: String,
    },
    AddNode {
        node_id: String,
        /// Defaults to the id.
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        shape: Shape,
    },
    RemoveNode {
        node_id: String,
    },
    RelabelEdge {
        src: String,
        dst: String,
        #[serde(default)]
        new_label: String,
    },
}

impl fmt::Display for GraphOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relabel { node_id, new_label } => write!(f, "relabel {} '{}'", node_id, new_label),
            Self::Reshape { node_id, new_shape } => write!(f, "reshape {} {}", node_id, new_shape),
            Self::AddEdge { src, dst, .. } => write!(f, "add_edge {} -> {}", src, dst),
            Self::RemoveEdge { src, dst } => write!(f, "remove_edge {} -> {}", src, dst),
            Self::AddNode { node_id, .. } => write!(f, "add_node {}", node_id),
            Self::RemoveNode { node_id } => write!(f, "remove_node {}", node_id),
            Self::RelabelEdge { src, dst, new_label } => {
                write!(f, "relabel_edge {} -> {} '{}'", src, dst, new_label)
            }
        }
    }
}

/// Result of applying one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OpOutcome {
    Applied,
    Skipped(String),
}

impl OpOutcome {
    fn skipped(reason: String) -> Self {
        Self::Skipped(reason)
    }

    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Summary of a batch of operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: usize,
    pub skipped: usize,
    /// One `OperationSkipped` per skipped operation, in batch order.
    pub diagnostics: Vec<Diagnostic>,
}

impl ApplyReport {
    fn record(&mut self, operation: String, outcome: OpOutcome) {
        match outcome {
            OpOutcome::Applied => self.applied = self.applied.saturating_add(1),
            OpOutcome::Skipped(reason) => {
                self.skipped = self.skipped.saturating_add(1);
                self.diagnostics
                    .push(Diagnostic::OperationSkipped { operation, reason });
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
