//! # Core Type Definitions
//!
//! This module contains the plain data types shared by every stage of an
//! interpretation run:
//! - Spatial hypotheses (`BBox`, `Focus`)
//! - Canonical diagram vocabulary (`Node`, `Edge`, `Shape`, `EdgeStyle`, `Direction`)
//! - Oracle reports (`StepInterpretation`, `ConnectedNode`, `IncomingArrow`)
//! - Cost accounting (`TokenUsage`)
//! - Error types (`SightlineError`, `OracleError`)
//!
//! ## Determinism Guarantees
//!
//! All geometry in this module uses integer arithmetic only. Bounding boxes
//! live on a normalized 0–1000 axis, so doubled centroids and their squared
//! distances fit comfortably in `i64`.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

// =============================================================================
// BOUNDING BOX
// =============================================================================

/// Axis-aligned box `(ymin, xmin, ymax, xmax)` on the normalized 0–1000 axis.
///
/// Serialized as a four-element array, which is the shape oracles emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i64; 4]", into = "[i64; 4]")]
pub struct BBox {
    pub ymin: i64,
    pub xmin: i64,
    pub ymax: i64,
    pub xmax: i64,
}

impl BBox {
    /// Create a new bounding box.
    #[must_use]
    pub const fn new(ymin: i64, xmin: i64, ymax: i64, xmax: i64) -> Self {
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
        }
    }

    /// Centroid scaled by two, `(ymin + ymax, xmin + xmax)`.
    ///
    /// Keeping the factor of two avoids fractional coordinates. Returns
    /// `None` for the all-zero box, which oracles emit as a "don't know".
    #[must_use]
    pub fn doubled_centroid(&self) -> Option<(i64, i64)> {
        let c = (
            self.ymin.saturating_add(self.ymax),
            self.xmin.saturating_add(self.xmax),
        );
        if c == (0, 0) { None } else { Some(c) }
    }

    /// True when the centroids of `self` and `other` are strictly closer
    /// than `threshold` units.
    #[must_use]
    pub fn centroid_within(&self, other: &BBox, threshold: u32) -> bool {
        let (Some((y1, x1)), Some((y2, x2))) = (self.doubled_centroid(), other.doubled_centroid())
        else {
            return false;
        };
        let dy = y1.saturating_sub(y2);
        let dx = x1.saturating_sub(x2);
        let dist_sq = dy.saturating_mul(dy).saturating_add(dx.saturating_mul(dx));
        // Both sides are doubled, so the threshold is doubled too.
        let limit = i64::from(threshold).saturating_mul(2);
        dist_sq < limit.saturating_mul(limit)
    }
}

impl From<[i64; 4]> for BBox {
    fn from(v: [i64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [i64; 4] {
    fn from(b: BBox) -> Self {
        [b.ymin, b.xmin, b.ymax, b.xmax]
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.ymin, self.xmin, self.ymax, self.xmax)
    }
}

/// Accept any integer list for a bbox; anything but exactly four values is
/// treated as absent rather than rejected.
fn lenient_bbox<'de, D>(deserializer: D) -> Result<Option<BBox>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<i64>> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|v| <[i64; 4]>::try_from(v).ok().map(BBox::from)))
}

// =============================================================================
// FOCUS
// =============================================================================

/// A region-of-interest hypothesis submitted to (or returned by) the oracle.
///
/// Transient: created during crawl or audit, resolved to an id through the
/// `NodeRegistry`, then discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Focus {
    /// Visual description of the node.
    #[serde(default)]
    pub description: String,
    /// Suggested identifier. May collide across distinct nodes.
    #[serde(default)]
    pub suggested_id: Option<String>,
    /// Bounding box on the 0–1000 axis.
    #[serde(default, deserialize_with = "lenient_bbox")]
    pub bbox: Option<BBox>,
    /// Coarse grid cells the node overlaps, e.g. `["C3", "C4"]`.
    #[serde(default)]
    pub grid_refs: Option<Vec<String>>,
}

impl Focus {
    /// Create a focus with only a description and an id hint.
    #[must_use]
    pub fn new(description: impl Into<String>, suggested_id: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            suggested_id: Some(suggested_id.into()),
            bbox: None,
            grid_refs: None,
        }
    }

    /// Attach a bounding box.
    #[must_use]
    pub fn with_bbox(mut self, bbox: BBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    /// Attach grid cell references.
    #[must_use]
    pub fn with_grid_refs<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grid_refs = Some(refs.into_iter().map(Into::into).collect());
        self
    }

    /// Rebuild the focus the crawler used for an already-interpreted step.
    #[must_use]
    pub fn from_step(step: &StepInterpretation, fallback_description: &str) -> Self {
        Self {
            description: step
                .visual_observation
                .clone()
                .unwrap_or_else(|| fallback_description.to_string()),
            suggested_id: step.source_id.clone(),
            bbox: step.source_bbox,
            grid_refs: step.source_grid_refs.clone(),
        }
    }

    /// Hybrid Identity Check.
    ///
    /// Two foci denote the same node if their grid cells intersect OR their
    /// centroids are closer than `threshold`. Either condition suffices.
    #[must_use]
    pub fn is_same_location(&self, other: &Focus, threshold: u32) -> bool {
        let grid_match = match (&self.grid_refs, &other.grid_refs) {
            (Some(a), Some(b)) => {
                let mine: BTreeSet<String> = a.iter().map(|r| normalize_grid_ref(r)).collect();
                b.iter().any(|r| mine.contains(&normalize_grid_ref(r)))
            }
            _ => false,
        };
        if grid_match {
            return true;
        }

        match (&self.bbox, &other.bbox) {
            (Some(a), Some(b)) => a.centroid_within(b, threshold),
            _ => false,
        }
    }
}

fn normalize_grid_ref(r: &str) -> String {
    r.trim().to_ascii_uppercase()
}

// =============================================================================
// DIAGRAM VOCABULARY
// =============================================================================

/// Node shape. Unknown names fall back to `Rect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Shape {
    #[default]
    Rect,
    Diamond,
    Round,
    Stadium,
    Hex,
    Circle,
}

impl Shape {
    /// All shapes, longest opening delimiter first (the order parsers must
    /// try them in).
    pub const BY_DELIMITER_LENGTH: [Shape; 6] = [
        Shape::Stadium,
        Shape::Circle,
        Shape::Hex,
        Shape::Diamond,
        Shape::Rect,
        Shape::Round,
    ];

    /// Lookup by name; anything unrecognised is a rectangle.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "diamond" => Self::Diamond,
            "round" => Self::Round,
            "stadium" => Self::Stadium,
            "hex" => Self::Hex,
            "circle" => Self::Circle,
            _ => Self::Rect,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rect => "rect",
            Self::Diamond => "diamond",
            Self::Round => "round",
            Self::Stadium => "stadium",
            Self::Hex => "hex",
            Self::Circle => "circle",
        }
    }

    /// Opening and closing delimiters in diagram text.
    #[must_use]
    pub const fn delimiters(self) -> (&'static str, &'static str) {
        match self {
            Self::Rect => ("[", "]"),
            Self::Round => ("(", ")"),
            Self::Diamond => ("{", "}"),
            Self::Stadium => ("([", "])"),
            Self::Hex => ("{{", "}}"),
            Self::Circle => ("((", "))"),
        }
    }
}

impl From<String> for Shape {
    fn from(s: String) -> Self {
        Self::from_name(&s)
    }
}

impl From<Shape> for String {
    fn from(s: Shape) -> Self {
        s.name().to_string()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Line style of an edge, serialized as its arrow token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeStyle {
    /// `-->`
    #[default]
    Arrow,
    /// `---`
    Line,
    /// `-.->`
    Dotted,
    /// `==>`
    Thick,
    /// `===`
    ThickLine,
}

impl EdgeStyle {
    /// Arrow tokens in the order a parser must try them (longest and most
    /// specific first).
    pub const MATCH_ORDER: [EdgeStyle; 5] = [
        EdgeStyle::Dotted,
        EdgeStyle::ThickLine,
        EdgeStyle::Thick,
        EdgeStyle::Arrow,
        EdgeStyle::Line,
    ];

    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Arrow => "-->",
            Self::Line => "---",
            Self::Dotted => "-.->",
            Self::Thick => "==>",
            Self::ThickLine => "===",
        }
    }

    /// Lookup by token; anything unrecognised is a plain arrow.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token.trim() {
            "---" => Self::Line,
            "-.->" => Self::Dotted,
            "==>" => Self::Thick,
            "===" => Self::ThickLine,
            _ => Self::Arrow,
        }
    }
}

impl From<String> for EdgeStyle {
    fn from(s: String) -> Self {
        Self::from_token(&s)
    }
}

impl From<EdgeStyle> for String {
    fn from(s: EdgeStyle) -> Self {
        s.token().to_string()
    }
}

impl fmt::Display for EdgeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Layout direction hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    TD,
    TB,
    LR,
    RL,
    BT,
}

impl Direction {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "TD" => Some(Self::TD),
            "TB" => Some(Self::TB),
            "LR" => Some(Self::LR),
            "RL" => Some(Self::RL),
            "BT" => Some(Self::BT),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TD => "TD",
            Self::TB => "TB",
            Self::LR => "LR",
            Self::RL => "RL",
            Self::BT => "BT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// NODE & EDGE
// =============================================================================

/// A diagram node.
///
/// `label` is the literal text inside the shape, never the id itself unless
/// nothing better is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub shape: Shape,
}

impl Node {
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, shape: Shape) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            shape,
        }
    }

    /// A rectangle labelled with its own id; used when only the id is known.
    #[must_use]
    pub fn placeholder(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            shape: Shape::Rect,
        }
    }
}

/// A directed edge.
///
/// Identity for diffing is the `(src, dst)` pair; two parallel edges with
/// different labels are indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub src: String,
    pub dst: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub style: EdgeStyle,
}

impl Edge {
    #[must_use]
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            label: String::new(),
            style: EdgeStyle::Arrow,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_style(mut self, style: EdgeStyle) -> Self {
        self.style = style;
        self
    }

    /// The `(src, dst)` identity pair.
    #[must_use]
    pub fn key(&self) -> (&str, &str) {
        (&self.src, &self.dst)
    }
}

// =============================================================================
// ORACLE REPORTS
// =============================================================================

/// One outgoing connection reported by the oracle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedNode {
    /// Suggested (later: registry-resolved) id of the target node.
    pub target_id: String,
    /// Brief visual description of the target.
    #[serde(default)]
    pub description: String,
    /// Label on the arrow, e.g. "Yes".
    #[serde(default)]
    pub edge_label: Option<String>,
    #[serde(default, deserialize_with = "lenient_bbox")]
    pub bbox: Option<BBox>,
    #[serde(default)]
    pub grid_refs: Option<Vec<String>>,
}

impl ConnectedNode {
    /// An edge the engine added itself; `tag` records why.
    #[must_use]
    pub fn engine_added(target_id: impl Into<String>, tag: &str) -> Self {
        Self {
            target_id: target_id.into(),
            description: tag.to_string(),
            ..Self::default()
        }
    }

    /// The focus the crawler should explore for this target.
    #[must_use]
    pub fn to_focus(&self) -> Focus {
        Focus {
            description: self.description.clone(),
            suggested_id: Some(self.target_id.clone()),
            bbox: self.bbox,
            grid_refs: self.grid_refs.clone(),
        }
    }
}

/// Visual observation of an arrow pointing into a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingArrow {
    /// Side of the node the arrow arrives at (Top, Bottom, Left, Right).
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default, deserialize_with = "lenient_bbox")]
    pub bbox: Option<BBox>,
}

/// One node's report from the oracle, plus engine-injected metadata.
///
/// `audit_confirmed_incoming` / `audit_confirmed_outgoing` are authoritative
/// once present and override the provisional crawl data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInterpretation {
    #[serde(default)]
    pub visual_observation: Option<String>,
    #[serde(default)]
    pub outgoing_edges: Vec<ConnectedNode>,
    #[serde(default)]
    pub incoming_edges: Vec<IncomingArrow>,

    #[serde(default)]
    pub audit_confirmed_incoming: Option<Vec<String>>,
    #[serde(default)]
    pub audit_confirmed_outgoing: Option<Vec<String>>,
    #[serde(default)]
    pub audit_notes: Option<String>,

    // Engine-injected context
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_bbox")]
    pub source_bbox: Option<BBox>,
    #[serde(default)]
    pub source_grid_refs: Option<Vec<String>>,
}

impl StepInterpretation {
    /// Ids of the current outgoing targets, in report order.
    pub fn outgoing_targets(&self) -> impl Iterator<Item = &str> {
        self.outgoing_edges.iter().map(|e| e.target_id.as_str())
    }

    /// Whether this step already has an edge to `target`.
    #[must_use]
    pub fn has_edge_to(&self, target: &str) -> bool {
        self.outgoing_edges.iter().any(|e| e.target_id == target)
    }
}

// =============================================================================
// TOKEN USAGE
// =============================================================================

/// Oracle cost accounting. Counters saturate instead of overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

impl std::ops::Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens.saturating_add(rhs.input_tokens),
            output_tokens: self.output_tokens.saturating_add(rhs.output_tokens),
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Failure of a single oracle call.
///
/// Never retried inside the engine; retry is the caller's decision.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The call did not complete in time.
    #[error("Oracle call timed out: {0}")]
    Timeout(String),

    /// The call could not be delivered or the service errored.
    #[error("Oracle transport failure: {0}")]
    Transport(String),

    /// The response did not satisfy the expected schema.
    #[error("Oracle response failed validation: {0}")]
    InvalidResponse(String),

    /// A scripted oracle has no response for this request.
    #[error("No scripted oracle response for {0}")]
    MissingScript(String),
}

impl OracleError {
    /// Whether the caller may reasonably retry the whole run.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

/// Errors that can occur in the engine.
///
/// Graph-quality problems (dangling edges, fallback parses, exhaustion) are
/// NOT errors; they are reported as diagnostics on a successful result.
#[derive(Debug, Error)]
pub enum SightlineError {
    /// An oracle call failed.
    #[error("Oracle failure: {0}")]
    Oracle(#[from] OracleError),

    /// The engine configuration is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Well-formed input that breaks a request limit or precondition.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// The draft worker pool could not be built.
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_distance_uses_threshold_strictly() {
        let a = BBox::new(0, 0, 100, 100); // centroid (50, 50)
        let b = BBox::new(0, 100, 100, 200); // centroid (50, 150)
        assert!(!a.centroid_within(&b, 100));
        assert!(a.centroid_within(&b, 101));
    }

    #[test]
    fn zero_bbox_has_no_centroid() {
        let zero = BBox::new(0, 0, 0, 0);
        assert!(zero.doubled_centroid().is_none());
        assert!(!zero.centroid_within(&zero, 1000));
    }

    #[test]
    fn hybrid_check_grid_only() {
        let a = Focus::new("a", "X").with_grid_refs(["c3", "C4"]);
        let b = Focus::new("b", "X").with_grid_refs(["C3"]);
        assert!(a.is_same_location(&b, 100));
    }

    #[test]
    fn hybrid_check_without_location_is_distinct() {
        let a = Focus::new("a", "X");
        let b = Focus::new("b", "X");
        assert!(!a.is_same_location(&b, 1000));
    }

    #[test]
    fn malformed_bbox_is_treated_as_absent() {
        let focus: Focus = serde_json::from_str(
            r#"{"description":"d","suggested_id":"A","bbox":[1,2,3]}"#,
        )
        .expect("parse");
        assert!(focus.bbox.is_none());

        let focus: Focus = serde_json::from_str(
            r#"{"description":"d","suggested_id":"A","bbox":[1,2,3,4]}"#,
        )
        .expect("parse");
        assert_eq!(focus.bbox, Some(BBox::new(1, 2, 3, 4)));
    }

    #[test]
    fn partial_step_payload_deserializes() {
        let step: StepInterpretation =
            serde_json::from_str(r#"{"outgoing_edges":[{"target_id":"B"}]}"#).expect("parse");
        assert_eq!(step.outgoing_edges.len(), 1);
        assert!(step.audit_confirmed_incoming.is_none());
        assert!(step.has_edge_to("B"));
    }

    #[test]
    fn unknown_shape_and_style_fall_back() {
        assert_eq!(Shape::from_name("trapezoid"), Shape::Rect);
        assert_eq!(EdgeStyle::from_token("~~>"), EdgeStyle::Arrow);
        let shape: Shape = serde_json::from_str("\"hex\"").expect("parse");
        assert_eq!(shape, Shape::Hex);
    }

    #[test]
    fn token_usage_saturates() {
        let mut usage = TokenUsage::new(u64::MAX, 1);
        usage += TokenUsage::new(5, 2);
        assert_eq!(usage.input_tokens, u64::MAX);
        assert_eq!(usage.output_tokens, 3);
    }

    #[test]
    fn oracle_error_retryability() {
        assert!(OracleError::Timeout("t".into()).is_retryable());
        assert!(!OracleError::InvalidResponse("bad".into()).is_retryable());
    }
}
