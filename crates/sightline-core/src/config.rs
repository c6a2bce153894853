//! # Engine Configuration
//!
//! Explicit, per-run configuration passed to the engine at construction.
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! traversal = "bfs"
//! max_steps = 20
//! spatial_threshold = 120
//! ```

use crate::SightlineError;
use crate::primitives::{
    DEFAULT_DRAFT_WORKERS, DEFAULT_SPATIAL_THRESHOLD, HISTORY_WINDOW, MAX_CONSISTENCY_ITERATIONS,
    MAX_CRAWL_STEPS, MAX_DRAFT_WORKERS, MAX_SPATIAL_THRESHOLD, MIN_FUZZY_MATCH_LEN,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Frontier policy for the crawl. Either order reaches the same nodes; the
/// choice only changes which ones are spent first under the step ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraversalMode {
    /// Frontier is a stack.
    #[default]
    Dfs,
    /// Frontier is a queue.
    Bfs,
}

impl TraversalMode {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dfs" => Some(Self::Dfs),
            "bfs" => Some(Self::Bfs),
            _ => None,
        }
    }
}

/// Configuration for one interpretation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frontier policy for the crawl.
    pub traversal: TraversalMode,
    /// Hard ceiling on interpreted nodes.
    pub max_steps: usize,
    /// Hard ceiling on consistency iterations.
    pub max_iterations: usize,
    /// Centroid distance under which two foci denote the same node.
    pub spatial_threshold: u32,
    /// Minimum normalized id length for substring matching in reverse patches.
    pub min_fuzzy_len: usize,
    /// Number of recent steps passed to the oracle as context.
    pub history_window: usize,
    /// Worker count for multi-draft mode.
    pub draft_workers: usize,
    /// Stop the consistency loop when an earlier edge state recurs.
    pub detect_cycles: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            traversal: TraversalMode::Dfs,
            max_steps: MAX_CRAWL_STEPS,
            max_iterations: MAX_CONSISTENCY_ITERATIONS,
            spatial_threshold: DEFAULT_SPATIAL_THRESHOLD,
            min_fuzzy_len: MIN_FUZZY_MATCH_LEN,
            history_window: HISTORY_WINDOW,
            draft_workers: DEFAULT_DRAFT_WORKERS,
            detect_cycles: true,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, SightlineError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| SightlineError::InvalidConfig(format!("Malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SightlineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SightlineError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Check that every bound is usable.
    pub fn validate(&self) -> Result<(), SightlineError> {
        if self.max_steps == 0 {
            return Err(SightlineError::InvalidConfig(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if self.spatial_threshold > MAX_SPATIAL_THRESHOLD {
            return Err(SightlineError::InvalidConfig(format!(
                "spatial_threshold {} exceeds {}",
                self.spatial_threshold, MAX_SPATIAL_THRESHOLD
            )));
        }
        if self.draft_workers == 0 || self.draft_workers > MAX_DRAFT_WORKERS {
            return Err(SightlineError::InvalidConfig(format!(
                "draft_workers must be within 1..={}",
                MAX_DRAFT_WORKERS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("traversal = \"bfs\"\nmax_steps = 5\n")
            .expect("parse");
        assert_eq!(config.traversal, TraversalMode::Bfs);
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.max_iterations, MAX_CONSISTENCY_ITERATIONS);
        assert!(config.detect_cycles);
    }

    #[test]
    fn zero_steps_rejected() {
        let result = EngineConfig::from_toml_str("max_steps = 0");
        assert!(matches!(result, Err(SightlineError::InvalidConfig(_))));
    }

    #[test]
    fn oversized_worker_pool_rejected() {
        let config = EngineConfig {
            draft_workers: MAX_DRAFT_WORKERS + 1,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn traversal_mode_parse() {
        assert_eq!(TraversalMode::parse("BFS"), Some(TraversalMode::Bfs));
        assert_eq!(TraversalMode::parse("random"), None);
    }
}
