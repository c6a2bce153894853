//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::api;
use sightline_core::{
    DraftSource, EngineConfig, GraphStructure, ImageRef, Interpretation,
    Interpreter, MermaidParser, MultiDraftResult, ScriptedOracle, SightlineError, TraversalMode,
    primitives::MAX_OPERATIONS_PER_REQUEST,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a diagram or graph input file (4 MB).
const MAX_DIAGRAM_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// Maximum size of a transcript file (64 MB).
///
/// Transcripts carry every recorded oracle answer, so they run larger.
const MAX_TRANSCRIPT_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), SightlineError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| SightlineError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(SightlineError::InvalidInput(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path to an existing regular file.
///
/// Canonicalization resolves `..` and symlinks before anything is read.
pub fn validate_file_path(path: &Path) -> Result<PathBuf, SightlineError> {
    let canonical = path.canonicalize().map_err(|e| {
        SightlineError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(SightlineError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path whose parent directory must already exist.
pub fn validate_output_path(path: &Path) -> Result<PathBuf, SightlineError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        SightlineError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(SightlineError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| SightlineError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Validate and read a text input file.
fn read_input(path: &Path, max_size: u64) -> Result<String, SightlineError> {
    let canonical = validate_file_path(path)?;
    validate_file_size(&canonical, max_size)?;
    std::fs::read_to_string(&canonical)
        .map_err(|e| SightlineError::IoError(format!("Cannot read '{}': {}", path.display(), e)))
}

/// Write `text` to `output`, or print it when no output is given.
fn emit(text: &str, output: Option<&Path>) -> Result<(), SightlineError> {
    match output {
        Some(path) => {
            let target = validate_output_path(path)?;
            std::fs::write(&target, text).map_err(|e| {
                SightlineError::IoError(format!("Cannot write '{}': {}", target.display(), e))
            })?;
            tracing::info!("Wrote {}", target.display());
            Ok(())
        }
        None => {
            println!("{}", text);
            Ok(())
        }
    }
}

fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, SightlineError> {
    serde_json::to_value(value).map_err(|e| SightlineError::SerializationError(e.to_string()))
}

/// Parse a `ROWSxCOLS` grid spec such as `6x8`.
pub fn parse_grid(spec: &str) -> Result<(u32, u32), SightlineError> {
    let invalid = || {
        SightlineError::InvalidConfig(format!(
            "Invalid grid '{}': expected ROWSxCOLS, e.g. 6x8",
            spec
        ))
    };
    let (rows, cols) = spec
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(invalid)?;
    let rows: u32 = rows.trim().parse().map_err(|_| invalid())?;
    let cols: u32 = cols.trim().parse().map_err(|_| invalid())?;
    if rows == 0 || cols == 0 {
        return Err(invalid());
    }
    Ok((rows, cols))
}

/// Build the draft source list from a comma-separated name list.
///
/// Names matching a built-in source keep its persona.
pub fn resolve_sources(names: Option<&str>) -> Vec<DraftSource> {
    let defaults = DraftSource::defaults();
    let Some(names) = names else {
        return defaults;
    };
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            defaults
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(name))
                .cloned()
                .unwrap_or_else(|| {
                    DraftSource::new(name, "Describe the whole diagram as written.")
                })
        })
        .collect()
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: EngineConfig, host: &str, port: u16) -> Result<(), SightlineError> {
    println!("Sightline Interpretation Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:       {}", host);
    println!("  Port:       {}", port);
    println!("  Traversal:  {:?}", config.traversal);
    println!("  Max steps:  {}", config.max_steps);
    println!();
    println!("Endpoints:");
    println!("  POST /parse     - Parse diagram text");
    println!("  POST /render    - Render a graph");
    println!("  POST /diff      - Diff two diagrams");
    println!("  POST /apply     - Apply structural corrections");
    println!("  POST /reconcile - Interpret a recorded transcript");
    println!("  GET  /health    - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, config).await
}

// =============================================================================
// PARSE COMMAND
// =============================================================================

/// Parse diagram text and print its canonical rendering.
pub fn cmd_parse(json_mode: bool, file: &Path) -> Result<(), SightlineError> {
    let text = read_input(file, MAX_DIAGRAM_FILE_SIZE)?;
    let parsed = MermaidParser::parse(&text);
    let rendered = parsed.graph.to_text();

    if json_mode {
        print_json(&serde_json::json!({
            "node_count": parsed.graph.node_count(),
            "edge_count": parsed.graph.edge_count(),
            "graph": to_json(&parsed.graph)?,
            "text": rendered,
            "warnings": to_json(&parsed.warnings)?,
        }));
        return Ok(());
    }

    for warning in &parsed.warnings {
        eprintln!("warning: {}", warning);
    }
    println!("{}", rendered);
    Ok(())
}

// =============================================================================
// RENDER COMMAND
// =============================================================================

/// Render a graph JSON file as diagram text.
pub fn cmd_render(json_mode: bool, file: &Path) -> Result<(), SightlineError> {
    let json = read_input(file, MAX_DIAGRAM_FILE_SIZE)?;
    let graph: GraphStructure = serde_json::from_str(&json)
        .map_err(|e| SightlineError::SerializationError(format!("Invalid graph JSON: {}", e)))?;
    let text = graph.to_text();

    if json_mode {
        print_json(&serde_json::json!({ "text": text }));
    } else {
        println!("{}", text);
    }
    Ok(())
}

// =============================================================================
// DIFF COMMAND
// =============================================================================

/// Structural diff of two diagram files.
pub fn cmd_diff(json_mode: bool, old: &Path, new: &Path) -> Result<(), SightlineError> {
    let old_graph = MermaidParser::parse(&read_input(old, MAX_DIAGRAM_FILE_SIZE)?).graph;
    let new_graph = MermaidParser::parse(&read_input(new, MAX_DIAGRAM_FILE_SIZE)?).graph;
    let diff = old_graph.diff(&new_graph);

    if json_mode {
        print_json(&serde_json::json!({
            "change_count": diff.change_count(),
            "diff": to_json(&diff)?,
        }));
        return Ok(());
    }

    if diff.is_empty() {
        println!("No structural changes.");
    } else {
        println!("{} change(s):", diff.change_count());
        println!("{}", diff.summary());
    }
    Ok(())
}

// =============================================================================
// APPLY COMMAND
// =============================================================================

/// Apply a JSON array of graph operations to a diagram file.
pub fn cmd_apply(
    json_mode: bool,
    file: &Path,
    ops: &Path,
    output: Option<&Path>,
) -> Result<(), SightlineError> {
    let text = read_input(file, MAX_DIAGRAM_FILE_SIZE)?;
    let ops_json = read_input(ops, MAX_DIAGRAM_FILE_SIZE)?;
    let operations: Vec<serde_json::Value> = serde_json::from_str(&ops_json).map_err(|e| {
        SightlineError::SerializationError(format!("Invalid operations JSON: {}", e))
    })?;
    if operations.len() > MAX_OPERATIONS_PER_REQUEST {
        return Err(SightlineError::InvalidInput(format!(
            "Operation count {} exceeds maximum {}",
            operations.len(),
            MAX_OPERATIONS_PER_REQUEST
        )));
    }

    let mut graph = MermaidParser::parse(&text).graph;
    let report = graph.apply_json_operations(&operations);
    let corrected = graph.to_text();

    if json_mode && output.is_none() {
        print_json(&serde_json::json!({
            "applied": report.applied,
            "skipped": report.skipped,
            "diagnostics": to_json(&report.diagnostics)?,
            "text": corrected,
        }));
        return Ok(());
    }

    for diagnostic in &report.diagnostics {
        eprintln!("warning: {}", diagnostic);
    }
    eprintln!(
        "Applied {} operation(s), skipped {}",
        report.applied, report.skipped
    );
    emit(&corrected, output)
}

// =============================================================================
// REPLAY COMMAND
// =============================================================================

/// Run a full interpretation against a recorded transcript.
pub fn cmd_replay(
    mut config: EngineConfig,
    json_mode: bool,
    transcript: &Path,
    image: &str,
    grid: Option<&str>,
    traversal: Option<&str>,
    output: Option<&Path>,
) -> Result<(), SightlineError> {
    if let Some(mode) = traversal {
        config.traversal = TraversalMode::parse(mode).ok_or_else(|| {
            SightlineError::InvalidConfig(format!(
                "Unknown traversal '{}' (expected dfs or bfs)",
                mode
            ))
        })?;
    }

    let mut image_ref = ImageRef::new(image);
    if let Some(spec) = grid {
        let (rows, cols) = parse_grid(spec)?;
        image_ref = image_ref.with_grid(rows, cols);
    }

    let oracle = ScriptedOracle::from_json(&read_input(transcript, MAX_TRANSCRIPT_FILE_SIZE)?)?;
    let interpretation = Interpreter::new(config).process(&oracle, &image_ref)?;

    if json_mode && output.is_none() {
        print_json(&to_json(&interpretation)?);
        return Ok(());
    }

    print_interpretation_summary(&interpretation);
    emit(&interpretation.text, output)
}

fn print_interpretation_summary(interpretation: &Interpretation) {
    eprintln!(
        "Outcome: {:?} ({} nodes, {} edges, {} steps)",
        interpretation.outcome,
        interpretation.graph.node_count(),
        interpretation.graph.edge_count(),
        interpretation.steps.len()
    );
    eprintln!(
        "Tokens:  {} in / {} out",
        interpretation.usage.input_tokens, interpretation.usage.output_tokens
    );
    for diagnostic in &interpretation.diagnostics {
        eprintln!("warning: {}", diagnostic);
    }
    if interpretation.needs_review() {
        eprintln!("Result did not converge; review before use.");
    }
}

// =============================================================================
// MERGE COMMAND
// =============================================================================

/// Run multi-draft mode against a recorded transcript.
pub fn cmd_merge(
    config: EngineConfig,
    json_mode: bool,
    transcript: &Path,
    sources: Option<&str>,
    output: Option<&Path>,
) -> Result<(), SightlineError> {
    let sources = resolve_sources(sources);
    if sources.is_empty() {
        return Err(SightlineError::InvalidConfig(
            "At least one draft source is required".to_string(),
        ));
    }

    let oracle = ScriptedOracle::from_json(&read_input(transcript, MAX_TRANSCRIPT_FILE_SIZE)?)?;
    let result = Interpreter::new(config).process_drafts(
        &oracle,
        &ImageRef::new("transcript"),
        &sources,
    )?;

    if json_mode && output.is_none() {
        print_json(&to_json(&result)?);
        return Ok(());
    }

    print_merge_summary(&result);
    emit(&result.text, output)
}

fn print_merge_summary(result: &MultiDraftResult) {
    for draft in &result.drafts {
        match &draft.error {
            Some(error) => eprintln!("  {:<14} failed: {}", draft.source, error),
            None => eprintln!(
                "  {:<14} {} nodes, {} edges",
                draft.source,
                draft.graph.node_count(),
                draft.graph.edge_count()
            ),
        }
    }
    eprintln!(
        "Merged: {} nodes, {} edges",
        result.graph.node_count(),
        result.graph.edge_count()
    );
}

// =============================================================================
// TESTS
// =============================================================================
