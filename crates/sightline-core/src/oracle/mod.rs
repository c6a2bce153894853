//! # Oracle Interface
//!
//! The engine never looks at pixels. Every visual judgement is delegated to
//! an `Oracle`: a synchronous, possibly slow, possibly wrong service that
//! answers four kinds of question about an image.
//!
//! Implementations are free to call a remote model, replay a transcript, or
//! anything else. Partial payloads (missing bboxes, missing grid refs) are
//! expected and tolerated by the engine.

pub mod scripted;

use crate::{Focus, OracleError, StepInterpretation, TokenUsage};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use scripted::{ScriptedOracle, Transcript};

/// Coarse grid overlaid on the image: columns are letters, rows numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDimensions {
    pub rows: u32,
    pub cols: u32,
}

impl GridDimensions {
    /// Whether a cell label such as `"C3"` lies inside the grid.
    #[must_use]
    pub fn contains(&self, cell: &str) -> bool {
        let cell = cell.trim();
        let mut chars = cell.chars();
        let Some(col) = chars.next().filter(char::is_ascii_alphabetic) else {
            return false;
        };
        let Ok(row) = chars.as_str().parse::<u32>() else {
            return false;
        };
        let col_index = u32::from(col.to_ascii_uppercase()).saturating_sub(u32::from('A'));
        col_index < self.cols && row >= 1 && row <= self.rows
    }
}

/// Opaque handle to the image under interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Path or URI understood by the oracle.
    pub location: String,
    /// Grid addressing, fixed for the whole run.
    #[serde(default)]
    pub grid: Option<GridDimensions>,
}

impl ImageRef {
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            grid: None,
        }
    }

    #[must_use]
    pub fn with_grid(mut self, rows: u32, cols: u32) -> Self {
        self.grid = Some(GridDimensions { rows, cols });
        self
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

/// A visual question-answering service.
///
/// Calls are blocking. Errors are never retried by the engine.
pub trait Oracle {
    /// Entry points of the diagram (usually start nodes).
    fn find_initial_focus(&self, image: &ImageRef) -> Result<(Vec<Focus>, TokenUsage), OracleError>;

    /// What connects out of (and into) the node at `focus`.
    ///
    /// `history` is a window of the most recent steps, for context only.
    fn interpret_step(
        &self,
        image: &ImageRef,
        focus: &Focus,
        history: &[StepInterpretation],
    ) -> Result<(StepInterpretation, TokenUsage), OracleError>;

    /// Confirm or refute the proposed adjacency of one node.
    ///
    /// The result's `audit_confirmed_incoming` / `audit_confirmed_outgoing`
    /// lists, when present, are authoritative.
    fn audit_node(
        &self,
        image: &ImageRef,
        focus: &Focus,
        history: &[StepInterpretation],
        proposed_in: &[String],
        proposed_out: &[String],
    ) -> Result<(StepInterpretation, TokenUsage), OracleError>;

    /// Final diagram text for the whole run.
    fn synthesize(
        &self,
        image: &ImageRef,
        history: &[StepInterpretation],
    ) -> Result<(String, TokenUsage), OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_cell_bounds() {
        let grid = GridDimensions { rows: 4, cols: 3 };
        assert!(grid.contains("A1"));
        assert!(grid.contains("c4"));
        assert!(!grid.contains("D1"));
        assert!(!grid.contains("A0"));
        assert!(!grid.contains("A5"));
        assert!(!grid.contains("11"));
    }

    #[test]
    fn image_ref_deserializes_without_grid() {
        let image: ImageRef = serde_json::from_str(r#"{"location":"flow.png"}"#).expect("parse");
        assert_eq!(image, ImageRef::new("flow.png"));
        assert_eq!(image.with_grid(8, 8).grid, Some(GridDimensions { rows: 8, cols: 8 }));
    }
}
