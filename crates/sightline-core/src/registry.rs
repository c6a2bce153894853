//! # Node Registry
//!
//! Identity resolution for noisy node mentions.
//!
//! The oracle names nodes by free-form id hints, and the same hint is often
//! reused for visually distinct nodes (two boxes both labelled "Error").
//! The registry keeps, per hint, an ordered list of location clusters and
//! maps every mention to a stable id:
//!
//! - first cluster for a hint → the bare hint (`node_Error`)
//! - later distinct clusters  → ordinal suffix (`node_Error_2`, `node_Error_3`, …)
//!
//! Resolution is deterministic given call order and never fails.

use crate::Focus;
use crate::primitives::{DEFAULT_SPATIAL_THRESHOLD, PLACEHOLDER_ID};
use std::collections::BTreeMap;

/// Per-run identity registry.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    /// Hint -> location clusters in registration order.
    clusters: BTreeMap<String, Vec<Focus>>,
    /// Centroid distance under which two foci are the same node.
    threshold: u32,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SPATIAL_THRESHOLD)
    }
}

impl NodeRegistry {
    /// Create an empty registry with the given spatial threshold.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            clusters: BTreeMap::new(),
            threshold,
        }
    }

    /// Resolve a focus to a stable id, registering it if it is new.
    ///
    /// The first cluster (in registration order) that passes the Hybrid
    /// Identity Check wins. In addition to that check, an exact repeat of a
    /// registered focus always matches, even when it carries no location,
    /// so resolving the same focus twice yields the same id. If nothing
    /// matches, the focus opens a new cluster.
    pub fn resolve_id(&mut self, focus: &Focus) -> String {
        let base_id = focus
            .suggested_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(PLACEHOLDER_ID)
            .to_string();

        let Some(candidates) = self.clusters.get_mut(&base_id) else {
            self.clusters.insert(base_id.clone(), vec![focus.clone()]);
            return base_id;
        };

        if let Some(index) = candidates
            .iter()
            .position(|candidate| candidate == focus || focus.is_same_location(candidate, self.threshold))
        {
            return suffixed(&base_id, index);
        }

        candidates.push(focus.clone());
        let resolved = suffixed(&base_id, candidates.len().saturating_sub(1));
        tracing::debug!(hint = %base_id, resolved = %resolved, "registered distinct node for reused id");
        resolved
    }

    /// Number of distinct id hints seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Number of distinct nodes registered under one hint.
    #[must_use]
    pub fn cluster_count(&self, hint: &str) -> usize {
        self.clusters.get(hint).map_or(0, Vec::len)
    }

    /// The configured spatial threshold.
    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

/// Cluster 0 keeps the bare id; cluster `i` becomes `id_{i+1}`.
fn suffixed(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{}_{}", base, index.saturating_add(1))
    }
}

// =============================================================================
// TESTS
// =============================================================================
