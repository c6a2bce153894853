//! # Run Context
//!
//! Per-run state threaded explicitly through every engine call.
//!
//! A `RunContext` owns the identity registry, the configuration for the run,
//! and the diagnostics collected along the way. It is constructed for one
//! image, never shared between runs, and dropped after serialization.

use crate::config::EngineConfig;
use crate::registry::NodeRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// A non-fatal graph-quality event the caller should surface as a warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Text that could not be parsed as written was recovered heuristically.
    ParseFallback { line: String, resolved_id: String },
    /// An edge was dropped rather than emitted dangling.
    EdgeDropped { src: String, dst: String, reason: String },
    /// A node the crawl never visited was created from audit evidence.
    PlaceholderCreated { id: String, target: String },
    /// An incoming source id was matched to a node by substring.
    FuzzyMatch { requested: String, matched: String },
    /// The crawl stopped at its step ceiling with nodes still queued.
    StepCeilingReached { max_steps: usize, pending: usize },
    /// The consistency loop stopped with inconsistencies remaining.
    ReconciliationExhausted { iterations: usize, remaining: usize },
    /// The consistency loop revisited an earlier edge state.
    CycleDetected { iteration: usize },
    /// The oracle's synthesized text was unusable; the mechanical graph was kept.
    SynthesisFallback { reason: String },
    /// A structural correction could not be applied.
    OperationSkipped { operation: String, reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseFallback { line, resolved_id } => {
                write!(f, "fallback parse of '{}' as '{}'", line, resolved_id)
            }
            Self::EdgeDropped { src, dst, reason } => {
                write!(f, "dropped edge {} -> {}: {}", src, dst, reason)
            }
            Self::PlaceholderCreated { id, target } => {
                write!(f, "created unvisited node '{}' feeding '{}'", id, target)
            }
            Self::FuzzyMatch { requested, matched } => {
                write!(f, "matched '{}' to '{}' by substring", requested, matched)
            }
            Self::StepCeilingReached { max_steps, pending } => write!(
                f,
                "crawl stopped at {} steps with {} nodes pending",
                max_steps, pending
            ),
            Self::ReconciliationExhausted {
                iterations,
                remaining,
            } => write!(
                f,
                "reconciliation exhausted after {} iterations, {} nodes inconsistent",
                iterations, remaining
            ),
            Self::CycleDetected { iteration } => {
                write!(f, "reconciliation oscillated at iteration {}", iteration)
            }
            Self::SynthesisFallback { reason } => write!(f, "synthesis fallback: {}", reason),
            Self::OperationSkipped { operation, reason } => {
                write!(f, "skipped {}: {}", operation, reason)
            }
        }
    }
}

// =============================================================================
// RUN CONTEXT
// =============================================================================

/// State for a single interpretation run.
#[derive(Debug, Default)]
pub struct RunContext {
    config: EngineConfig,
    registry: NodeRegistry,
    diagnostics: Vec<Diagnostic>,
}

impl RunContext {
    /// Create a context whose registry uses the configured spatial threshold.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: NodeRegistry::new(config.spatial_threshold),
            config,
            diagnostics: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    /// Record a diagnostic.
    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Record several diagnostics.
    pub fn report_all(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Consume the context, keeping only what the caller needs to see.
    #[must_use]
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Focus;

    #[test]
    fn contexts_do_not_share_registry_state() {
        let mut first = RunContext::new(EngineConfig::default());
        let mut second = RunContext::new(EngineConfig::default());

        first.registry_mut().resolve_id(&Focus::new("a", "A"));
        assert_eq!(first.registry().len(), 1);
        assert_eq!(second.registry().len(), 0);

        second.registry_mut().resolve_id(&Focus::new("b", "B"));
        assert_eq!(first.registry().len(), 1);
    }

    #[test]
    fn diagnostics_serialize_with_kind_tag() {
        let d = Diagnostic::CycleDetected { iteration: 3 };
        let json = serde_json::to_string(&d).expect("serialize");
        assert!(json.contains("\"kind\":\"cycle_detected\""));
        assert_eq!(d.to_string(), "reconciliation oscillated at iteration 3");
    }
}
