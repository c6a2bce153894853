//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.

use sightline_core::{
    Diagnostic, GraphDiff, GraphStructure, GridDimensions, ImageRef,
    Interpretation, SightlineError, Transcript,
    primitives::{MAX_DIAGRAM_TEXT_LENGTH, MAX_OPERATIONS_PER_REQUEST},
};
use serde::{Deserialize, Serialize};

/// Reject diagram text that is empty or over the size limit.
fn validate_text(field: &str, text: &str) -> Result<(), SightlineError> {
    if text.trim().is_empty() {
        return Err(SightlineError::InvalidInput(format!(
            "{} must not be empty",
            field
        )));
    }
    if text.len() > MAX_DIAGRAM_TEXT_LENGTH {
        return Err(SightlineError::InvalidInput(format!(
            "{} length {} exceeds maximum {} bytes",
            field,
            text.len(),
            MAX_DIAGRAM_TEXT_LENGTH
        )));
    }
    Ok(())
}

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// PARSE REQUEST/RESPONSE
// =============================================================================

/// Diagram text to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseRequest {
    pub text: String,
}

impl ParseRequest {
    pub fn validate(&self) -> Result<(), SightlineError> {
        validate_text("text", &self.text)
    }
}

/// Parsed graph, its canonical rendering and any fallback warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResponse {
    pub success: bool,
    pub graph: Option<GraphStructure>,
    /// Canonical rendering of `graph`.
    pub text: Option<String>,
    #[serde(default)]
    pub warnings: Vec<Diagnostic>,
    pub error: Option<String>,
}

impl ParseResponse {
    pub fn success(graph: GraphStructure, warnings: Vec<Diagnostic>) -> Self {
        Self {
            success: true,
            text: Some(graph.to_text()),
            graph: Some(graph),
            warnings,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            graph: None,
            text: None,
            warnings: Vec::new(),
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// RENDER REQUEST/RESPONSE
// =============================================================================

/// Graph to render as diagram text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub graph: GraphStructure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderResponse {
    pub success: bool,
    pub text: String,
}

// =============================================================================
// DIFF REQUEST/RESPONSE
// =============================================================================

/// Two diagram texts to compare, `old` first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffRequest {
    pub old: String,
    pub new: String,
}

impl DiffRequest {
    pub fn validate(&self) -> Result<(), SightlineError> {
        validate_text("old", &self.old)?;
        validate_text("new", &self.new)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffResponse {
    pub success: bool,
    pub diff: Option<GraphDiff>,
    pub change_count: usize,
    /// Human-readable change list.
    pub summary: String,
    pub error: Option<String>,
}

impl DiffResponse {
    pub fn success(diff: GraphDiff) -> Self {
        Self {
            success: true,
            change_count: diff.change_count(),
            summary: diff.summary(),
            diff: Some(diff),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            diff: None,
            change_count: 0,
            summary: String::new(),
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// APPLY REQUEST/RESPONSE
// =============================================================================

/// Structural corrections to apply to a diagram.
///
/// Operations stay raw JSON here so that one malformed entry is skipped
/// by the engine instead of rejecting the whole request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub text: String,
    pub operations: Vec<serde_json::Value>,
}

impl ApplyRequest {
    pub fn validate(&self) -> Result<(), SightlineError> {
        validate_text("text", &self.text)?;
        if self.operations.len() > MAX_OPERATIONS_PER_REQUEST {
            return Err(SightlineError::InvalidInput(format!(
                "Operation count {} exceeds maximum {}",
                self.operations.len(),
                MAX_OPERATIONS_PER_REQUEST
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub success: bool,
    pub text: Option<String>,
    pub applied: usize,
    pub skipped: usize,
    /// Parse warnings followed by one entry per skipped operation.
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    pub error: Option<String>,
}

impl ApplyResponse {
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            text: None,
            applied: 0,
            skipped: 0,
            diagnostics: Vec::new(),
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// RECONCILE REQUEST/RESPONSE
// =============================================================================

/// Full interpretation run against a recorded oracle transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileRequest {
    /// Image location as recorded in the transcript.
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default)]
    pub grid: Option<GridDimensions>,
    pub transcript: Transcript,
}

fn default_image() -> String {
    "transcript".to_string()
}

impl ReconcileRequest {
    pub fn image_ref(&self) -> ImageRef {
        ImageRef {
            location: self.image.clone(),
            grid: self.grid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub success: bool,
    pub interpretation: Option<Interpretation>,
    pub error: Option<String>,
}

impl ReconcileResponse {
    pub fn success(interpretation: Interpretation) -> Self {
        Self {
            success: true,
            interpretation: Some(interpretation),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            interpretation: None,
            error: Some(msg.into()),
        }
    }
}
