//! # Diagram Text Parser
//!
//! Converts loosely-formed flowchart text into a [`GraphStructure`].
//!
//! Input usually comes from a language model, so the parser accepts the
//! common deviations it produces:
//! - label-before-arrow pipes (`A --|x| --> B`, `A --|x| B`)
//! - inline labels (`A -- x --> B`)
//! - chains (`A --> B --> C`)
//! - brackets left unclosed when a label wraps mid-line
//!
//! Parsing never fails. Every heuristic recovery is returned as a
//! [`Diagnostic::ParseFallback`] so that silent misparses stay observable.

use crate::context::Diagnostic;
use crate::graph::{GraphStructure, PIPE_ENTITY, QUOTE_ENTITY};
use crate::primitives::MAX_SYNTHETIC_ID_LENGTH;
use crate::{Direction, Edge, EdgeStyle, Node, Shape};
use regex::Regex;
use std::sync::LazyLock;

// =============================================================================
// PATTERNS
// =============================================================================

static DIRECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:graph|flowchart)(?:\s+(TD|TB|LR|RL|BT))?\b").expect("static regex")
});

static BARE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)$").expect("static regex"));

static LABEL_RESIDUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*--").expect("static regex"));

static PARTIAL_SHAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*)\s*(\(\[|\(\(|\{\{|\{|\[|\()\s*(.+)$").expect("static regex")
});

static ANY_ARROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(-\.->|===|==>|-->|---)\s*").expect("static regex"));

/// `ID<open>label<close>`, longest opener first.
static SHAPE_RES: LazyLock<Vec<(Shape, Regex)>> = LazyLock::new(|| {
    Shape::BY_DELIMITER_LENGTH
        .iter()
        .map(|&shape| {
            let (open, close) = shape.delimiters();
            let pattern = format!(
                r"^([A-Za-z_]\w*)\s*{}(.+?){}$",
                regex::escape(open),
                regex::escape(close)
            );
            (shape, Regex::new(&pattern).expect("static regex"))
        })
        .collect()
});

/// `ID<open>"label"<close>` as a whole line. A quoted label may hold
/// arrows and brackets, so these lines are read before any edge syntax.
static QUOTED_SHAPE_RES: LazyLock<Vec<(Shape, Regex)>> = LazyLock::new(|| {
    Shape::BY_DELIMITER_LENGTH
        .iter()
        .map(|&shape| {
            let (open, close) = shape.delimiters();
            let pattern = format!(
                r#"^([A-Za-z_]\w*)\s*{}\s*"([^"]*)"\s*{}$"#,
                regex::escape(open),
                regex::escape(close)
            );
            (shape, Regex::new(&pattern).expect("static regex"))
        })
        .collect()
});

/// `A -- label --> B` and its line, dotted and thick variants.
static INLINE_LABEL_RES: LazyLock<Vec<(EdgeStyle, Regex)>> = LazyLock::new(|| {
    [
        (EdgeStyle::Arrow, r"-->"),
        (EdgeStyle::Line, r"---"),
        (EdgeStyle::Dotted, r"-\.->+"),
        (EdgeStyle::Thick, r"==>"),
    ]
    .into_iter()
    .map(|(style, arrow)| {
        let pattern = format!(r"^(.+?)\s+--\s+(.+?)\s+{}\s+(.+)$", arrow);
        (style, Regex::new(&pattern).expect("static regex"))
    })
    .collect()
});

/// Per arrow: `A -->|label| B` and `A --> B`.
static ARROW_RES: LazyLock<Vec<(EdgeStyle, Regex, Regex)>> = LazyLock::new(|| {
    EdgeStyle::MATCH_ORDER
        .iter()
        .map(|&style| {
            let arrow = regex::escape(style.token());
            let piped = format!(r"^(.+?)\s*{}\s*\|(.+?)\|\s*(.+)$", arrow);
            let bare = format!(r"^(.+?)\s*{}\s*(.+)$", arrow);
            (
                style,
                Regex::new(&piped).expect("static regex"),
                Regex::new(&bare).expect("static regex"),
            )
        })
        .collect()
});

/// Line prefixes that carry no structure.
const IGNORED_PREFIXES: [&str; 5] = ["style ", "classDef ", "class ", "linkStyle ", "subgraph "];

/// Arrows that may follow a label-before-arrow pipe.
const PIPE_FOLLOWERS: [&str; 4] = ["-->", "---", "-.->", "==>"];

// =============================================================================
// PARSER
// =============================================================================

/// Parsed graph plus every heuristic recovery made along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutput {
    pub graph: GraphStructure,
    pub warnings: Vec<Diagnostic>,
}

/// Stateless diagram text parser.
pub struct MermaidParser;

impl MermaidParser {
    /// Parse diagram text. Never fails.
    #[must_use]
    pub fn parse(text: &str) -> ParseOutput {
        let mut builder = Builder::default();
        for raw in text.lines() {
            builder.line(raw.trim());
        }
        ParseOutput {
            graph: builder.graph,
            warnings: builder.warnings,
        }
    }
}

#[derive(Default)]
struct Builder {
    graph: GraphStructure,
    warnings: Vec<Diagnostic>,
}

impl Builder {
    fn line(&mut self, line: &str) {
        if line.is_empty() || line.starts_with("%%") {
            return;
        }

        if let Some(caps) = DIRECTION_RE.captures(line) {
            if let Some(direction) = caps.get(1).and_then(|m| Direction::parse(m.as_str())) {
                self.graph.set_direction(direction);
            }
            return;
        }

        if line == "end" || line == "subgraph" || IGNORED_PREFIXES.iter().any(|p| line.starts_with(p)) {
            return;
        }

        if let Some(node) = quoted_node(line) {
            self.graph.add_node(node);
            return;
        }

        let line = normalize_pipe_labels(line);
        if self.edge_line(&line) {
            return;
        }
        self.standalone_node(&line);
    }

    /// Try each edge syntax in priority order. Returns whether the line was
    /// consumed as one or more edges.
    fn edge_line(&mut self, line: &str) -> bool {
        // Inline labels first, or "A -- x" would be read as a node.
        for (style, re) in INLINE_LABEL_RES.iter() {
            if let Some(caps) = re.captures(line) {
                self.labelled_edge(&caps, *style);
                return true;
            }
        }

        for (style, piped, _) in ARROW_RES.iter() {
            if let Some(caps) = piped.captures(line) {
                self.labelled_edge(&caps, *style);
                return true;
            }
        }

        for (style, _, bare) in ARROW_RES.iter() {
            let Some(caps) = bare.captures(line) else {
                continue;
            };
            let src_text = caps.get(1).map_or("", |m| m.as_str().trim());
            let dst_text = caps.get(2).map_or("", |m| m.as_str().trim());
            if ANY_ARROW_RE.is_match(src_text) || ANY_ARROW_RE.is_match(dst_text) {
                return self.chain(line);
            }
            let src = self.node_ref(src_text);
            let dst = self.node_ref(dst_text);
            self.graph.add_edge(Edge::new(src, dst).with_style(*style));
            return true;
        }

        false
    }

    fn labelled_edge(&mut self, caps: &regex::Captures<'_>, style: EdgeStyle) {
        let src_text = caps.get(1).map_or("", |m| m.as_str().trim());
        let label = caps
            .get(2)
            .map_or("", |m| m.as_str().trim())
            .replace(PIPE_ENTITY, "|");
        let dst_text = caps.get(3).map_or("", |m| m.as_str().trim());
        let src = self.node_ref(src_text);
        let dst = self.node_ref(dst_text);
        self.graph
            .add_edge(Edge::new(src, dst).with_label(label).with_style(style));
    }

    /// Explode `A --> B -.-> C` into pairwise edges with per-hop styles.
    fn chain(&mut self, line: &str) -> bool {
        let mut parts = Vec::new();
        let mut styles = Vec::new();
        let mut cursor = 0;
        for caps in ANY_ARROW_RE.captures_iter(line) {
            let (Some(whole), Some(token)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let part = line.get(cursor..whole.start()).unwrap_or("").trim();
            if !part.is_empty() {
                parts.push(part);
                styles.push(EdgeStyle::from_token(token.as_str()));
            }
            cursor = whole.end();
        }
        let tail = line.get(cursor..).unwrap_or("").trim();
        if !tail.is_empty() {
            parts.push(tail);
        }

        if parts.len() < 2 {
            return false;
        }

        let ids: Vec<String> = parts.iter().map(|p| self.node_ref(p)).collect();
        for (i, pair) in ids.windows(2).enumerate() {
            let style = styles.get(i).copied().unwrap_or_default();
            self.graph
                .add_edge(Edge::new(&pair[0], &pair[1]).with_style(style));
        }
        true
    }

    fn standalone_node(&mut self, line: &str) {
        if let Some(node) = shaped_node(line) {
            self.graph.add_node(node);
        } else if BARE_ID_RE.is_match(line) {
            self.graph.add_node(Node::placeholder(line));
        } else {
            tracing::debug!(line = %line, "ignoring unrecognised line");
        }
    }

    /// Resolve a node reference, registering the node on first sight.
    /// Returns the id.
    fn node_ref(&mut self, text: &str) -> String {
        if let Some(node) = shaped_node(text) {
            let id = node.id.clone();
            self.graph.add_node(node);
            return id;
        }

        if BARE_ID_RE.is_match(text) {
            self.graph.add_node(Node::placeholder(text));
            return text.to_string();
        }

        // "E -- pending" or "D --|x|": keep the leading id.
        if let Some(id) = LABEL_RESIDUE_RE.captures(text).and_then(|c| c.get(1)) {
            let id = id.as_str().to_string();
            self.graph.add_node(Node::placeholder(id.clone()));
            self.fallback(text, &id);
            return id;
        }

        // "B{Is it valid" with the closer lost to a line wrap.
        if let Some(caps) = PARTIAL_SHAPE_RE.captures(text) {
            let id = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let shape = caps.get(2).map_or(Shape::Rect, |m| shape_for_opener(m.as_str()));
            let label = strip_quotes(caps.get(3).map_or("", |m| m.as_str()));
            self.graph.add_node(Node::new(id.clone(), label, shape));
            self.fallback(text, &id);
            return id;
        }

        let id = synthetic_id(text);
        self.graph.add_node(Node::new(id.clone(), text, Shape::Rect));
        self.fallback(text, &id);
        id
    }

    fn fallback(&mut self, text: &str, resolved_id: &str) {
        tracing::warn!(text = %text, node = %resolved_id, "fallback parse of node reference");
        self.warnings.push(Diagnostic::ParseFallback {
            line: text.to_string(),
            resolved_id: resolved_id.to_string(),
        });
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn shaped_node(text: &str) -> Option<Node> {
    SHAPE_RES.iter().find_map(|(shape, re)| {
        let caps = re.captures(text)?;
        let id = caps.get(1)?.as_str();
        let label = strip_quotes(caps.get(2)?.as_str());
        Some(Node::new(id, label, *shape))
    })
}

fn quoted_node(line: &str) -> Option<Node> {
    QUOTED_SHAPE_RES.iter().find_map(|(shape, re)| {
        let caps = re.captures(line)?;
        let id = caps.get(1)?.as_str();
        let label = caps.get(2)?.as_str().trim().replace(QUOTE_ENTITY, "\"");
        Some(Node::new(id, label, *shape))
    })
}

/// Whether the parser reads `text` back as exactly this node id.
pub(crate) fn is_bare_id(text: &str) -> bool {
    BARE_ID_RE.is_match(text)
}

fn shape_for_opener(open: &str) -> Shape {
    Shape::BY_DELIMITER_LENGTH
        .iter()
        .copied()
        .find(|s| s.delimiters().0 == open)
        .unwrap_or_default()
}

/// Trim, then drop one pair of surrounding double quotes.
fn strip_quotes(label: &str) -> String {
    let label = label.trim();
    label
        .strip_prefix('"')
        .and_then(|l| l.strip_suffix('"'))
        .map_or(label, str::trim)
        .to_string()
}

/// Sanitize arbitrary text into an id: non-word characters become `_`,
/// length is capped, and an `N_` prefix keeps the id from starting with a
/// digit.
pub(crate) fn synthetic_id(text: &str) -> String {
    let safe: String = text
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(MAX_SYNTHETIC_ID_LENGTH)
        .collect();
    match safe.chars().next() {
        Some(c) if !c.is_ascii_digit() => safe,
        _ => format!("N_{}", safe),
    }
}

/// Rewrite label-before-arrow pipes into trailing-pipe form.
///
/// `A --|x| --> B` becomes `A -->|x| B` (same for `---`, `-.->`, `==>`) and
/// `A --|x| B` becomes `A ---|x| B`. A `--|` that ends a longer arrow such
/// as `---|` is left alone.
fn normalize_pipe_labels(line: &str) -> String {
    let mut out = String::with_capacity(line.len().saturating_add(8));
    let mut rest = line;

    while let Some(pos) = bare_pipe_opener(rest) {
        let head = rest.get(..pos).unwrap_or("");
        let after = rest.get(pos.saturating_add(3)..).unwrap_or("");
        let Some(close) = after.find('|').filter(|&c| c > 0) else {
            break;
        };
        let label = after.get(..close).unwrap_or("");
        let tail = after.get(close.saturating_add(1)..).unwrap_or("");
        let next = tail.trim_start();

        if let Some(arrow) = PIPE_FOLLOWERS.iter().find(|a| next.starts_with(**a)) {
            out.push_str(head.trim_end());
            out.push(' ');
            out.push_str(arrow);
            out.push('|');
            out.push_str(label);
            out.push('|');
            rest = next.get(arrow.len()..).unwrap_or("");
        } else if next.len() < tail.len() && !next.is_empty() && !next.starts_with("===") {
            out.push_str(head.trim_end());
            out.push_str(" ---|");
            out.push_str(label);
            out.push_str("| ");
            rest = next;
        } else {
            let consumed = pos.saturating_add(3);
            out.push_str(rest.get(..consumed).unwrap_or(""));
            rest = rest.get(consumed..).unwrap_or("");
        }
    }

    out.push_str(rest);
    out
}

/// Byte offset of the first `--|` that is not the tail of a longer arrow.
fn bare_pipe_opener(s: &str) -> Option<usize> {
    s.match_indices("--|").map(|(i, _)| i).find(|&i| {
        !matches!(
            s.get(..i).and_then(|h| h.chars().next_back()),
            Some('-' | '=' | '.')
        )
    })
}

// =============================================================================
// TESTS
// =============================================================================
