//! # Consistency Reconciler
//!
//! Repairs contradictions between independently-reported edges.
//!
//! The crawl asks each node only about its own outgoing arrows, so two
//! steps can disagree: B's audit may confirm an arrow from A that A never
//! reported, or A may claim an arrow to C that C's audit does not see.
//!
//! ```text
//! INITIAL_AUDIT -> CONSISTENCY_ITERATION* -> CONVERGED | EXHAUSTED | CYCLE_DETECTED
//! ```
//!
//! - **Initial audit**: every node's outgoing list is checked once.
//! - **Iteration**: derive the logical adjacency from the current edge
//!   lists, queue an `AuditTask` for every node whose view disagrees with
//!   it, re-audit those nodes, then patch forward (the node's own edges)
//!   and in reverse (edges of the nodes it says feed into it).
//!
//! Convergence is best-effort. The loop is bounded by `max_iterations`,
//! stops early when an iteration changes nothing, and optionally stops when
//! the edge state revisits an earlier one.

use crate::context::{Diagnostic, RunContext};
use crate::crawler::recent;
use crate::oracle::{ImageRef, Oracle};
use crate::primitives::{
    OBSERVATION_DISCOVERED, TAG_AUDIT_ADDED, TAG_FIX_ADDED, TAG_REVERSE_PATCHED,
};
use crate::{ConnectedNode, Focus, SightlineError, StepInterpretation, TokenUsage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Description used when an audited step has no observation of its own.
const AUDIT_FOCUS_DESCRIPTION: &str = "Audit target";

// =============================================================================
// TYPES
// =============================================================================

/// One node queued for re-audit, derived fresh each iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTask {
    /// Position of the node's step in the history.
    pub index: usize,
    pub node_id: String,
    /// Human-readable mismatch descriptions.
    pub reasons: Vec<String>,
    /// Logical incoming sources, sorted.
    pub proposed_in: Vec<String>,
    /// Logical outgoing targets, sorted.
    pub proposed_out: Vec<String>,
}

/// How the consistency loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// No inconsistencies remain.
    Converged,
    /// Stopped at the iteration bound, or an iteration changed nothing.
    Exhausted,
    /// The edge state returned to one already seen.
    CycleDetected,
}

impl ReconcileOutcome {
    /// `Exhausted` and `CycleDetected` are lower-confidence results.
    #[must_use]
    pub fn is_confident(self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Result of the consistency loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub outcome: ReconcileOutcome,
    /// Fix batches executed. Zero when the crawl was already consistent.
    pub iterations: usize,
    /// Inconsistent nodes left when the loop stopped.
    pub remaining_tasks: usize,
    pub usage: TokenUsage,
}

/// How a reverse-patch source id was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    Exact,
    Normalized,
    Substring,
}

// =============================================================================
// RECONCILER
// =============================================================================

/// Audit and repair driver for one image.
pub struct ConsistencyReconciler<'a, O: Oracle + ?Sized> {
    oracle: &'a O,
    image: &'a ImageRef,
}

impl<'a, O: Oracle + ?Sized> ConsistencyReconciler<'a, O> {
    #[must_use]
    pub fn new(oracle: &'a O, image: &'a ImageRef) -> Self {
        Self { oracle, image }
    }

    /// Check every crawled node's outgoing edges once.
    ///
    /// A confirmed outgoing list replaces the node's edges: confirmed
    /// existing edges are kept in order, unconfirmed ones are dropped, and
    /// newly confirmed targets are appended as `(Audit Added)` edges.
    pub fn initial_audit(
        &self,
        history: &mut [StepInterpretation],
        ctx: &RunContext,
    ) -> Result<TokenUsage, SightlineError> {
        let window = ctx.config().history_window;
        let mut usage = TokenUsage::default();

        for index in 0..history.len() {
            let Some(step) = history.get(index) else {
                continue;
            };
            let focus = Focus::from_step(step, AUDIT_FOCUS_DESCRIPTION);
            let proposed_out: Vec<String> = step.outgoing_targets().map(str::to_string).collect();

            let context = recent(history, window);
            let (audit, spent) =
                self.oracle
                    .audit_node(self.image, &focus, context, &[], &proposed_out)?;
            usage += spent;

            let Some(step) = history.get_mut(index) else {
                continue;
            };
            if let Some(confirmed) = audit.audit_confirmed_outgoing {
                let node = step.source_id.clone().unwrap_or_default();
                let (removed, added) = rewrite_outgoing(step, &confirmed, TAG_AUDIT_ADDED);
                if removed > 0 || added > 0 {
                    tracing::info!(node = %node, removed, added, "initial audit corrected outgoing edges");
                }
                step.audit_confirmed_outgoing = Some(confirmed);
                step.audit_notes = audit.audit_notes;
            }
        }

        Ok(usage)
    }

    /// Iterate detect -> re-audit -> patch until consistent or bounded.
    ///
    /// `history` may grow: nodes the crawl never visited are appended when
    /// an audit proves they exist.
    pub fn run(
        &self,
        history: &mut Vec<StepInterpretation>,
        ctx: &mut RunContext,
    ) -> Result<ReconcileReport, SightlineError> {
        let max_iterations = ctx.config().max_iterations;
        let detect_cycles = ctx.config().detect_cycles;
        let mut usage = TokenUsage::default();
        let mut seen = BTreeSet::new();
        if detect_cycles {
            seen.insert(fingerprint(history));
        }

        for iteration in 1..=max_iterations {
            let tasks = find_inconsistencies(history);
            if tasks.is_empty() {
                tracing::info!(iterations = iteration.saturating_sub(1), "graph converged");
                return Ok(ReconcileReport {
                    outcome: ReconcileOutcome::Converged,
                    iterations: iteration.saturating_sub(1),
                    remaining_tasks: 0,
                    usage,
                });
            }

            tracing::info!(iteration, tasks = tasks.len(), "fixing inconsistencies");
            let (changed, spent) = self.fix_batch(history, &tasks, ctx)?;
            usage += spent;

            if !changed {
                let remaining = find_inconsistencies(history).len();
                tracing::warn!(iteration, remaining, "iteration made no structural change");
                ctx.report(Diagnostic::ReconciliationExhausted {
                    iterations: iteration,
                    remaining,
                });
                return Ok(ReconcileReport {
                    outcome: ReconcileOutcome::Exhausted,
                    iterations: iteration,
                    remaining_tasks: remaining,
                    usage,
                });
            }

            if detect_cycles && !seen.insert(fingerprint(history)) {
                let remaining = find_inconsistencies(history).len();
                tracing::warn!(iteration, remaining, "edge state repeated, stopping");
                ctx.report(Diagnostic::CycleDetected { iteration });
                return Ok(ReconcileReport {
                    outcome: ReconcileOutcome::CycleDetected,
                    iterations: iteration,
                    remaining_tasks: remaining,
                    usage,
                });
            }
        }

        let remaining = find_inconsistencies(history).len();
        let outcome = if remaining == 0 {
            ReconcileOutcome::Converged
        } else {
            tracing::warn!(max_iterations, remaining, "iteration bound reached");
            ctx.report(Diagnostic::ReconciliationExhausted {
                iterations: max_iterations,
                remaining,
            });
            ReconcileOutcome::Exhausted
        };
        Ok(ReconcileReport {
            outcome,
            iterations: max_iterations,
            remaining_tasks: remaining,
            usage,
        })
    }

    /// Re-audit each task's node and apply forward and reverse patches.
    /// Returns whether anything changed.
    fn fix_batch(
        &self,
        history: &mut Vec<StepInterpretation>,
        tasks: &[AuditTask],
        ctx: &mut RunContext,
    ) -> Result<(bool, TokenUsage), SightlineError> {
        let window = ctx.config().history_window;
        let min_fuzzy_len = ctx.config().min_fuzzy_len;
        let mut usage = TokenUsage::default();
        let mut changed = false;

        for task in tasks {
            let Some(step) = history.get(task.index) else {
                continue;
            };
            let focus = Focus::from_step(step, AUDIT_FOCUS_DESCRIPTION);
            let node_id = task.node_id.clone();

            tracing::info!(node = %node_id, reasons = ?task.reasons, "re-auditing");
            let context = recent(history, window);
            let (audit, spent) = self.oracle.audit_node(
                self.image,
                &focus,
                context,
                &task.proposed_in,
                &task.proposed_out,
            )?;
            usage += spent;

            let Some(step) = history.get_mut(task.index) else {
                continue;
            };

            // Confirmation metadata, compared as sets.
            if as_set(&step.audit_confirmed_incoming) != as_set(&audit.audit_confirmed_incoming) {
                tracing::debug!(node = %node_id, "incoming confirmation updated");
                changed = true;
            }
            if as_set(&step.audit_confirmed_outgoing) != as_set(&audit.audit_confirmed_outgoing) {
                changed = true;
            }
            step.audit_confirmed_incoming
                .clone_from(&audit.audit_confirmed_incoming);
            step.audit_confirmed_outgoing
                .clone_from(&audit.audit_confirmed_outgoing);
            step.audit_notes.clone_from(&audit.audit_notes);

            // Forward patch: own outgoing edges follow the confirmation.
            if let Some(confirmed) = &audit.audit_confirmed_outgoing {
                let (removed, added) = rewrite_outgoing(step, confirmed, TAG_FIX_ADDED);
                if removed > 0 || added > 0 {
                    tracing::info!(node = %node_id, removed, added, "forward patch");
                    changed = true;
                }
            }

            // Reverse patch: each confirmed source must point here.
            if let Some(sources) = &audit.audit_confirmed_incoming {
                for raw in sources {
                    if self.reverse_patch(history, raw, &node_id, min_fuzzy_len, ctx) {
                        changed = true;
                    }
                }
            }
        }

        Ok((changed, usage))
    }

    /// Ensure the step identified by `raw` has an edge to `target`, creating
    /// the step if the crawl never visited it. Returns whether anything
    /// changed.
    fn reverse_patch(
        &self,
        history: &mut Vec<StepInterpretation>,
        raw: &str,
        target: &str,
        min_fuzzy_len: usize,
        ctx: &mut RunContext,
    ) -> bool {
        let raw = raw.trim();
        if raw.is_empty() {
            tracing::warn!(node = %target, "ignoring blank incoming source from audit");
            return false;
        }

        let Some((index, kind)) = find_matching_step(raw, history, min_fuzzy_len) else {
            tracing::info!(src = %raw, dst = %target, "creating node discovered during audit");
            history.push(StepInterpretation {
                visual_observation: Some(OBSERVATION_DISCOVERED.to_string()),
                outgoing_edges: vec![ConnectedNode::engine_added(target, TAG_REVERSE_PATCHED)],
                source_id: Some(raw.to_string()),
                ..StepInterpretation::default()
            });
            ctx.report(Diagnostic::PlaceholderCreated {
                id: raw.to_string(),
                target: target.to_string(),
            });
            return true;
        };

        let Some(source) = history.get_mut(index) else {
            return false;
        };
        let source_id = source.source_id.clone().unwrap_or_default();
        if kind == MatchKind::Substring {
            tracing::warn!(requested = %raw, matched = %source_id, "fuzzy substring match");
            ctx.report(Diagnostic::FuzzyMatch {
                requested: raw.to_string(),
                matched: source_id.clone(),
            });
        }

        if source.has_edge_to(target) {
            return false;
        }

        tracing::info!(src = %source_id, dst = %target, "reverse patch");
        source
            .outgoing_edges
            .push(ConnectedNode::engine_added(target, TAG_REVERSE_PATCHED));
        if let Some(confirmed) = source.audit_confirmed_outgoing.as_mut() {
            if !confirmed.iter().any(|t| t == target) {
                confirmed.push(target.to_string());
            }
        }
        true
    }
}

// =============================================================================
// DETECTION
// =============================================================================

/// Compare every node's own view with the adjacency implied by all edge
/// lists, and queue a task for each node that disagrees.
#[must_use]
pub fn find_inconsistencies(history: &[StepInterpretation]) -> Vec<AuditTask> {
    let mut incoming: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut outgoing: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for step in history {
        let Some(src) = step.source_id.as_deref() else {
            continue;
        };
        let out = outgoing.entry(src).or_default();
        for dst in step.outgoing_targets() {
            out.insert(dst);
            incoming.entry(dst).or_default().insert(src);
        }
    }

    let empty = BTreeSet::new();
    let mut tasks = Vec::new();

    for (index, step) in history.iter().enumerate() {
        let Some(node) = step.source_id.as_deref() else {
            continue;
        };
        let logic_in = incoming.get(node).unwrap_or(&empty);
        let logic_out = outgoing.get(node).unwrap_or(&empty);
        let mut reasons = Vec::new();

        match &step.audit_confirmed_incoming {
            Some(confirmed) => {
                let confirmed: BTreeSet<&str> = confirmed.iter().map(String::as_str).collect();
                if *logic_in != confirmed {
                    reasons.push(format!(
                        "incoming logic ({}) != confirmed ({})",
                        logic_in.len(),
                        confirmed.len()
                    ));
                }
            }
            None => {
                let observed = step.incoming_edges.len();
                if logic_in.len() != observed {
                    reasons.push(format!(
                        "incoming logic ({}) != observed arrows ({})",
                        logic_in.len(),
                        observed
                    ));
                }
            }
        }

        let recorded: BTreeSet<&str> = step.outgoing_targets().collect();
        if *logic_out != recorded {
            reasons.push("outgoing out of sync".to_string());
        }

        if !reasons.is_empty() {
            tasks.push(AuditTask {
                index,
                node_id: node.to_string(),
                reasons,
                proposed_in: logic_in.iter().map(|s| (*s).to_string()).collect(),
                proposed_out: logic_out.iter().map(|s| (*s).to_string()).collect(),
            });
        }
    }

    tasks
}

// =============================================================================
// HELPERS
// =============================================================================

/// Rewrite a step's outgoing edges to exactly the confirmed targets.
/// Returns `(removed, added)`.
fn rewrite_outgoing(step: &mut StepInterpretation, confirmed: &[String], tag: &str) -> (usize, usize) {
    let mut wanted: Vec<&str> = Vec::new();
    for target in confirmed {
        if !wanted.contains(&target.as_str()) {
            wanted.push(target);
        }
    }

    let before = step.outgoing_edges.len();
    let mut kept: Vec<ConnectedNode> = Vec::with_capacity(wanted.len());
    for edge in std::mem::take(&mut step.outgoing_edges) {
        if let Some(pos) = wanted.iter().position(|t| *t == edge.target_id) {
            wanted.remove(pos);
            kept.push(edge);
        }
    }
    let removed = before.saturating_sub(kept.len());

    let added = wanted.len();
    kept.extend(wanted.into_iter().map(|t| ConnectedNode::engine_added(t, tag)));
    step.outgoing_edges = kept;
    (removed, added)
}

fn as_set(list: &Option<Vec<String>>) -> BTreeSet<&str> {
    list.iter().flatten().map(String::as_str).collect()
}

/// Lowercase, drop `node_` markers, underscores to spaces, trim.
fn normalize_id(id: &str) -> String {
    id.to_lowercase()
        .replace("node_", "")
        .replace('_', " ")
        .trim()
        .to_string()
}

/// Locate the step an oracle-supplied id refers to, tolerating spelling
/// drift: exact id, then normalized id, then (for ids of at least
/// `min_len` normalized characters on both sides) substring either way.
fn find_matching_step(
    raw: &str,
    history: &[StepInterpretation],
    min_len: usize,
) -> Option<(usize, MatchKind)> {
    if let Some(i) = history
        .iter()
        .position(|s| s.source_id.as_deref() == Some(raw))
    {
        return Some((i, MatchKind::Exact));
    }

    let wanted = normalize_id(raw);
    let normalized: Vec<Option<String>> = history
        .iter()
        .map(|s| s.source_id.as_deref().map(normalize_id))
        .collect();

    if let Some(i) = normalized
        .iter()
        .position(|n| n.as_deref() == Some(wanted.as_str()))
    {
        return Some((i, MatchKind::Normalized));
    }

    if wanted.chars().count() < min_len {
        return None;
    }
    normalized
        .iter()
        .position(|n| {
            n.as_deref().is_some_and(|n| {
                n.chars().count() >= min_len && (n.contains(wanted.as_str()) || wanted.contains(n))
            })
        })
        .map(|i| (i, MatchKind::Substring))
}

/// Canonical edge state: per node, sorted targets and confirmations.
type Fingerprint = Vec<(String, Vec<String>, Vec<String>, Vec<String>)>;

fn fingerprint(history: &[StepInterpretation]) -> Fingerprint {
    let mut state: Fingerprint = history
        .iter()
        .map(|s| {
            let mut out: Vec<String> = s.outgoing_targets().map(str::to_string).collect();
            out.sort();
            let confirmed_in = as_set(&s.audit_confirmed_incoming)
                .into_iter()
                .map(str::to_string)
                .collect();
            let confirmed_out = as_set(&s.audit_confirmed_outgoing)
                .into_iter()
                .map(str::to_string)
                .collect();
            (
                s.source_id.clone().unwrap_or_default(),
                out,
                confirmed_in,
                confirmed_out,
            )
        })
        .collect();
    state.sort();
    state
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::oracle::{ScriptedOracle, Transcript};

    fn step(id: &str, targets: &[&str]) -> StepInterpretation {
        StepInterpretation {
            source_id: Some(id.to_string()),
            outgoing_edges: targets
                .iter()
                .map(|t| ConnectedNode {
                    target_id: (*t).to_string(),
                    ..ConnectedNode::default()
                })
                .collect(),
            ..StepInterpretation::default()
        }
    }

    fn confirmed_in(ids: &[&str]) -> StepInterpretation {
        StepInterpretation {
            audit_confirmed_incoming: Some(ids.iter().map(|s| (*s).to_string()).collect()),
            ..StepInterpretation::default()
        }
    }

    fn confirmed_out(ids: &[&str]) -> StepInterpretation {
        StepInterpretation {
            audit_confirmed_outgoing: Some(ids.iter().map(|s| (*s).to_string()).collect()),
            ..StepInterpretation::default()
        }
    }

    fn oracle(audits: Vec<(&str, Vec<StepInterpretation>)>) -> ScriptedOracle {
        ScriptedOracle::new(Transcript {
            audits: audits
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            ..Transcript::default()
        })
    }

    #[test]
    fn incoming_count_mismatch_is_detected() {
        // B saw no incoming arrow but A points at it.
        let history = vec![step("A", &["B"]), step("B", &[])];
        let tasks = find_inconsistencies(&history);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].node_id, "B");
        assert_eq!(tasks[0].proposed_in, vec!["A".to_string()]);
    }

    #[test]
    fn confirmed_incoming_compared_as_set() {
        let mut b = step("B", &[]);
        b.audit_confirmed_incoming = Some(vec!["A".into(), "A".into()]);
        let history = vec![step("A", &["B"]), b];
        assert!(find_inconsistencies(&history).is_empty());
    }

    #[test]
    fn initial_audit_rewrites_outgoing() {
        let mut history = vec![step("A", &["B", "C"])];
        let oracle = oracle(vec![("A", vec![confirmed_out(&["C", "D"])])]);
        let image = ImageRef::new("x.png");
        let ctx = RunContext::new(EngineConfig::default());

        ConsistencyReconciler::new(&oracle, &image)
            .initial_audit(&mut history, &ctx)
            .expect("audit");

        let edges = &history[0].outgoing_edges;
        let targets: Vec<&str> = edges.iter().map(|e| e.target_id.as_str()).collect();
        assert_eq!(targets, vec!["C", "D"]);
        assert_eq!(edges[1].description, TAG_AUDIT_ADDED);
    }

    #[test]
    fn reverse_patch_adds_missing_edge() {
        let mut a = step("A", &[]);
        a.audit_confirmed_outgoing = Some(Vec::new());
        let mut b = step("B", &[]);
        b.incoming_edges = vec![crate::IncomingArrow::default()];
        let mut history = vec![a, b];

        let oracle = oracle(vec![
            ("B", vec![confirmed_in(&["A"])]),
            ("A", vec![confirmed_out(&["B"])]),
        ]);
        let image = ImageRef::new("x.png");
        let mut ctx = RunContext::new(EngineConfig::default());
        let report = ConsistencyReconciler::new(&oracle, &image)
            .run(&mut history, &mut ctx)
            .expect("run");

        assert_eq!(report.outcome, ReconcileOutcome::Converged);
        assert!(history[0].has_edge_to("B"));
        assert_eq!(history[0].audit_confirmed_outgoing, Some(vec!["B".to_string()]));
    }

    #[test]
    fn unmatched_source_creates_placeholder_step() {
        let mut history = vec![step("B", &[])];
        let oracle = oracle(vec![("B", vec![confirmed_in(&["node_Hidden"])])]);
        let image = ImageRef::new("x.png");
        let mut ctx = RunContext::new(EngineConfig {
            max_iterations: 1,
            ..EngineConfig::default()
        });
        history[0].incoming_edges = vec![crate::IncomingArrow::default()];

        ConsistencyReconciler::new(&oracle, &image)
            .run(&mut history, &mut ctx)
            .expect("run");

        assert_eq!(history.len(), 2);
        assert_eq!(history[1].source_id.as_deref(), Some("node_Hidden"));
        assert_eq!(history[1].visual_observation.as_deref(), Some(OBSERVATION_DISCOVERED));
        assert!(history[1].has_edge_to("B"));
    }

    #[test]
    fn blank_source_is_skipped() {
        let mut history = vec![step("B", &[])];
        history[0].incoming_edges = vec![crate::IncomingArrow::default()];
        let oracle = oracle(vec![("B", vec![confirmed_in(&["  "])])]);
        let image = ImageRef::new("x.png");
        let mut ctx = RunContext::new(EngineConfig::default());

        ConsistencyReconciler::new(&oracle, &image)
            .run(&mut history, &mut ctx)
            .expect("run");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn fuzzy_match_order() {
        let history = vec![
            step("node_Is_there_an_opportunity", &[]),
            step("node_Review", &[]),
        ];
        assert_eq!(
            find_matching_step("node_Review", &history, 4),
            Some((1, MatchKind::Exact))
        );
        assert_eq!(
            find_matching_step("REVIEW", &history, 4),
            Some((1, MatchKind::Normalized))
        );
        assert_eq!(
            find_matching_step("there an opportunity", &history, 4),
            Some((0, MatchKind::Substring))
        );
        // Too short to trust a substring.
        assert_eq!(find_matching_step("rev", &history, 4), None);
    }

    #[test]
    fn rewrite_reports_removed_and_added() {
        let mut s = step("A", &["B", "C", "B"]);
        let (removed, added) = rewrite_outgoing(&mut s, &["B".into(), "D".into()], TAG_FIX_ADDED);
        assert_eq!((removed, added), (2, 1));
        let targets: Vec<&str> = s.outgoing_targets().collect();
        assert_eq!(targets, vec!["B", "D"]);
    }

    #[test]
    fn fingerprint_ignores_edge_order() {
        let a = vec![step("A", &["B", "C"])];
        let b = vec![step("A", &["C", "B"])];
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
