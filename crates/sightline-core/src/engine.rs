//! # Interpreter
//!
//! Top-level orchestration of one interpretation run:
//!
//! ```text
//! crawl -> initial audit -> consistency loop -> synthesis -> close dangling -> sanitize ids
//! ```
//!
//! Every run gets a fresh `RunContext`. Oracle failures abort the run;
//! graph-quality problems only add diagnostics to the result.

use crate::config::EngineConfig;
use crate::context::{Diagnostic, RunContext};
use crate::crawler::Crawler;
use crate::drafts::{DraftOracle, DraftSource, MultiDraftResult, process_drafts};
use crate::graph::GraphStructure;
use crate::oracle::{ImageRef, Oracle};
use crate::parser::MermaidParser;
use crate::reconcile::{ConsistencyReconciler, ReconcileOutcome};
use crate::synthesis::graph_from_history;
use crate::{SightlineError, StepInterpretation, TokenUsage};
use serde::{Deserialize, Serialize};

/// Result of a full run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpretation {
    /// Final diagram, free of dangling edges.
    pub graph: GraphStructure,
    /// `graph` rendered as Mermaid text.
    pub text: String,
    /// The oracle's own synthesized text, as returned.
    pub raw_text: String,
    pub outcome: ReconcileOutcome,
    /// Reconciled step history.
    pub steps: Vec<StepInterpretation>,
    /// Oracle usage across every stage.
    pub usage: TokenUsage,
    pub diagnostics: Vec<Diagnostic>,
}

impl Interpretation {
    /// Whether the caller should treat the diagram as lower confidence.
    #[must_use]
    pub fn needs_review(&self) -> bool {
        !self.outcome.is_confident()
    }
}

/// Runs interpretations with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    config: EngineConfig,
}

impl Interpreter {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Interpret one image.
    pub fn process<O: Oracle + ?Sized>(
        &self,
        oracle: &O,
        image: &ImageRef,
    ) -> Result<Interpretation, SightlineError> {
        self.config.validate()?;
        let mut ctx = RunContext::new(self.config.clone());
        tracing::info!(image = %image, traversal = ?self.config.traversal, "starting interpretation");

        let (mut history, mut usage) = Crawler::crawl(oracle, image, &mut ctx)?;

        let reconciler = ConsistencyReconciler::new(oracle, image);
        usage += reconciler.initial_audit(&mut history, &ctx)?;
        let report = reconciler.run(&mut history, &mut ctx)?;
        usage += report.usage;

        let mechanical = graph_from_history(&history);
        let (raw_text, spent) = oracle.synthesize(image, &history)?;
        usage += spent;

        let mut graph = Self::choose_graph(&raw_text, mechanical, &mut ctx);
        let healed = graph.close_dangling();
        ctx.report_all(healed);
        graph.sanitize_ids();

        tracing::info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            outcome = ?report.outcome,
            tokens = usage.total(),
            "interpretation complete"
        );

        Ok(Interpretation {
            text: graph.to_text(),
            graph,
            raw_text,
            outcome: report.outcome,
            steps: history,
            usage,
            diagnostics: ctx.into_diagnostics(),
        })
    }

    /// Multi-draft alternative to `process`, using `draft_workers` threads.
    pub fn process_drafts<O: DraftOracle + ?Sized>(
        &self,
        oracle: &O,
        image: &ImageRef,
        sources: &[DraftSource],
    ) -> Result<MultiDraftResult, SightlineError> {
        self.config.validate()?;
        process_drafts(oracle, image, sources, self.config.draft_workers)
    }

    /// Oracle text wins when it parses into a non-empty graph.
    fn choose_graph(
        raw_text: &str,
        mechanical: GraphStructure,
        ctx: &mut RunContext,
    ) -> GraphStructure {
        if raw_text.trim().is_empty() {
            tracing::warn!("oracle returned no diagram text, using mechanical graph");
            ctx.report(Diagnostic::SynthesisFallback {
                reason: "empty synthesis text".to_string(),
            });
            return mechanical;
        }

        let parsed = MermaidParser::parse(raw_text);
        if parsed.graph.is_empty() {
            tracing::warn!("synthesized text has no nodes, using mechanical graph");
            ctx.report(Diagnostic::SynthesisFallback {
                reason: "synthesized text produced an empty graph".to_string(),
            });
            return mechanical;
        }

        ctx.report_all(parsed.warnings);
        parsed.graph
    }
}
