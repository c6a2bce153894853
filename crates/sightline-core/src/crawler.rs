//! # Crawler
//!
//! Frontier-driven exploration of the diagram, one oracle call per node.
//!
//! Every id the oracle mentions goes through the run's `NodeRegistry`
//! before it is stored or queued, so two mentions of the same box collapse
//! to one id and two boxes sharing a name get distinct ids.

use crate::config::TraversalMode;
use crate::context::{Diagnostic, RunContext};
use crate::oracle::{GridDimensions, ImageRef, Oracle};
use crate::{Focus, SightlineError, StepInterpretation, TokenUsage};
use std::collections::{BTreeSet, VecDeque};

/// Stateless crawl driver.
pub struct Crawler;

impl Crawler {
    /// Explore the diagram from the oracle's entry points.
    ///
    /// Returns the interpreted steps in visit order and the oracle usage
    /// spent. Every returned step has a registry-resolved `source_id`, and
    /// every outgoing `target_id` is registry-resolved too.
    ///
    /// An oracle error aborts the crawl immediately.
    pub fn crawl<O: Oracle + ?Sized>(
        oracle: &O,
        image: &ImageRef,
        ctx: &mut RunContext,
    ) -> Result<(Vec<StepInterpretation>, TokenUsage), SightlineError> {
        let traversal = ctx.config().traversal;
        let max_steps = ctx.config().max_steps;
        let window = ctx.config().history_window;

        let mut history: Vec<StepInterpretation> = Vec::new();
        let mut frontier: VecDeque<Focus> = VecDeque::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();

        let (seeds, mut usage) = oracle.find_initial_focus(image)?;
        for mut focus in seeds {
            clip_grid_refs(&mut focus, image.grid);
            let id = ctx.registry_mut().resolve_id(&focus);
            tracing::debug!(node = %id, "seeded frontier");
            focus.suggested_id = Some(id);
            frontier.push_back(focus);
        }

        while history.len() < max_steps {
            let next = match traversal {
                TraversalMode::Dfs => frontier.pop_back(),
                TraversalMode::Bfs => frontier.pop_front(),
            };
            let Some(current) = next else {
                break;
            };
            let id = current.suggested_id.clone().unwrap_or_default();
            if !visited.insert(id.clone()) {
                continue;
            }

            tracing::info!(node = %id, step = history.len(), "exploring");
            let context = recent(&history, window);
            let (mut step, spent) = oracle.interpret_step(image, &current, context)?;
            usage += spent;

            step.source_id = Some(id);
            step.source_bbox = current.bbox;
            step.source_grid_refs = current.grid_refs;

            for edge in &mut step.outgoing_edges {
                let mut target = edge.to_focus();
                clip_grid_refs(&mut target, image.grid);
                let resolved = ctx.registry_mut().resolve_id(&target);
                edge.target_id.clone_from(&resolved);
                if !visited.contains(&resolved) {
                    target.suggested_id = Some(resolved);
                    frontier.push_back(target);
                }
            }

            history.push(step);
        }

        let pending: BTreeSet<&str> = frontier
            .iter()
            .filter_map(|f| f.suggested_id.as_deref())
            .filter(|id| !visited.contains(*id))
            .collect();
        if !pending.is_empty() {
            tracing::warn!(
                max_steps,
                pending = pending.len(),
                "crawl stopped at step ceiling with unexplored nodes"
            );
            ctx.report(Diagnostic::StepCeilingReached {
                max_steps,
                pending: pending.len(),
            });
        }

        tracing::info!(nodes = history.len(), "crawl complete");
        Ok((history, usage))
    }
}

/// The last `window` steps.
pub(crate) fn recent(history: &[StepInterpretation], window: usize) -> &[StepInterpretation] {
    history
        .get(history.len().saturating_sub(window)..)
        .unwrap_or_default()
}

/// Drop grid refs that fall outside the image grid; an empty result means
/// no grid information.
fn clip_grid_refs(focus: &mut Focus, grid: Option<GridDimensions>) {
    let (Some(grid), Some(refs)) = (grid, focus.grid_refs.as_mut()) else {
        return;
    };
    refs.retain(|cell| grid.contains(cell));
    if refs.is_empty() {
        focus.grid_refs = None;
    }
}
