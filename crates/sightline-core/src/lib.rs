//! # sightline-core
//!
//! The graph construction engine for Sightline - THE LOGIC.
//!
//! Turns a flowchart image into a consistent directed graph by querying an
//! unreliable visual oracle one node at a time, then repairing the
//! contradictions between what individual nodes reported.
//!
//! ## Pipeline
//!
//! - `crawler`: frontier-driven exploration, one oracle call per node
//! - `registry`: hybrid identity (name + location) for every mention
//! - `reconcile`: initial audit and bounded consistency loop
//! - `synthesis` / `engine`: final diagram, oracle text or mechanical fallback
//! - `parser` / `graph` / `diff`: Mermaid text, canonical graph, structural diff
//! - `drafts`: multi-perspective drafting with union merge
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies; the oracle is a trait
//! - Deterministic: ordered collections only, integer geometry
//! - Every loop is bounded, whatever the oracle returns
//! - Per-run state lives in an explicit `RunContext`

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod context;
pub mod crawler;
pub mod diff;
pub mod drafts;
pub mod engine;
pub mod graph;
pub mod oracle;
pub mod parser;
pub mod primitives;
pub mod reconcile;
pub mod registry;
pub mod synthesis;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    BBox, ConnectedNode, Direction, Edge, EdgeStyle, Focus, IncomingArrow, Node, OracleError,
    Shape, SightlineError, StepInterpretation, TokenUsage,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use config::{EngineConfig, TraversalMode};
pub use context::{Diagnostic, RunContext};
pub use crawler::Crawler;
pub use engine::{Interpretation, Interpreter};
pub use reconcile::{
    AuditTask, ConsistencyReconciler, ReconcileOutcome, ReconcileReport, find_inconsistencies,
};
pub use registry::NodeRegistry;
pub use synthesis::graph_from_history;

// =============================================================================
// RE-EXPORTS: Graph, Text and Drafts
// =============================================================================

pub use diff::GraphDiff;
pub use drafts::{
    Draft, DraftOracle, DraftSource, MultiDraftResult, merge_union, normalize_ids,
    process_drafts, run_drafts,
};
pub use graph::{ApplyReport, GraphOperation, GraphStructure, OpOutcome};
pub use oracle::{GridDimensions, ImageRef, Oracle, ScriptedOracle, Transcript};
pub use parser::{MermaidParser, ParseOutput};
