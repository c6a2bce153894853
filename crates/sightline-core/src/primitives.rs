//! # Engine Primitives
//!
//! Hardcoded defaults and ceilings for an interpretation run.
//!
//! Every loop in the engine is bounded by one of these values, so a run
//! terminates no matter how the oracle behaves. `EngineConfig` may tighten
//! or loosen the defaults, but never removes a bound.

/// Maximum number of nodes the crawler will interpret in one run.
///
/// Bounds oracle cost and guarantees termination under pathological branching.
pub const MAX_CRAWL_STEPS: usize = 30;

/// Maximum number of consistency iterations after the initial audit.
pub const MAX_CONSISTENCY_ITERATIONS: usize = 10;

/// Default centroid distance (0–1000 axis) under which two foci are the same node.
pub const DEFAULT_SPATIAL_THRESHOLD: u32 = 150;

/// Upper bound for a configured spatial threshold: the diagonal of the unit square.
pub const MAX_SPATIAL_THRESHOLD: u32 = 1415;

/// Minimum normalized id length before a substring match is trusted during
/// reverse patching. Short ids ("A", "Yes") collide too easily.
pub const MIN_FUZZY_MATCH_LEN: usize = 4;

/// Number of most recent steps handed to the oracle as context.
pub const HISTORY_WINDOW: usize = 15;

/// Default number of concurrent draft workers in multi-draft mode.
pub const DEFAULT_DRAFT_WORKERS: usize = 3;

/// Maximum number of draft workers; each one is an oracle call in flight.
pub const MAX_DRAFT_WORKERS: usize = 16;

/// Id used when the oracle gives no id hint at all.
pub const PLACEHOLDER_ID: &str = "node_Unknown";

/// Maximum length of an id synthesized from unparseable text.
pub const MAX_SYNTHETIC_ID_LENGTH: usize = 20;

// =============================================================================
// INPUT LIMITS
// =============================================================================

/// Maximum length in bytes of diagram text accepted at an API boundary.
pub const MAX_DIAGRAM_TEXT_LENGTH: usize = 256 * 1024;

/// Maximum number of operations accepted in one apply request.
pub const MAX_OPERATIONS_PER_REQUEST: usize = 1000;

// =============================================================================
// ENGINE TAGS
// =============================================================================

/// Description given to edges added by the initial audit.
pub const TAG_AUDIT_ADDED: &str = "(Audit Added)";

/// Description given to edges added by forward patching.
pub const TAG_FIX_ADDED: &str = "(Fix Added)";

/// Description given to edges added by reverse patching.
pub const TAG_REVERSE_PATCHED: &str = "(Reverse Patched)";

/// Observation recorded on nodes discovered during an audit.
pub const OBSERVATION_DISCOVERED: &str = "Discovered during audit";

/// Whether a connection description is one of the engine's own tags rather
/// than text the oracle read from the image.
#[must_use]
pub fn is_engine_tag(description: &str) -> bool {
    matches!(
        description,
        TAG_AUDIT_ADDED | TAG_FIX_ADDED | TAG_REVERSE_PATCHED
    )
}
