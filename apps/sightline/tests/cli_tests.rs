//! Integration tests for the Sightline CLI commands.
//!
//! Commands are called directly; inputs and outputs live in temp dirs.

#![allow(clippy::unwrap_used, clippy::panic)]

use sightline::cli::{
    cmd_apply, cmd_diff, cmd_merge, cmd_parse, cmd_render, cmd_replay, load_config,
    validate_file_path,
};
use sightline_core::{
    EngineConfig, MermaidParser, SightlineError, TraversalMode,
    primitives::MAX_OPERATIONS_PER_REQUEST,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

const CHAIN_TRANSCRIPT: &str = r#"{
    "initial": [{"description": "start", "suggested_id": "A"}],
    "steps": {
        "A": {"visual_observation": "Begin", "outgoing_edges": [{"target_id": "B"}]},
        "B": {"visual_observation": "Work", "outgoing_edges": [{"target_id": "C"}],
              "incoming_edges": [{"direction": "Top"}]},
        "C": {"visual_observation": "Finish", "incoming_edges": [{"direction": "Left"}]}
    },
    "synthesis": "graph LR\n    A[Begin] --> B[Work]\n    B --> C[Finish]",
    "drafts": {
        "Structuralist": "graph TD\n    Login[Log in] --> Home",
        "Optimist": "graph TD\n    SignIn[Sign in] --> Home\n    Home --> Logout",
        "Pessimist": "graph TD\n    Login --> Home"
    },
    "id_map": {"SignIn": "Login"}
}"#;

// =============================================================================
// CONFIG TESTS
// =============================================================================

#[test]
fn test_load_config_defaults_without_path() {
    let config = load_config(None).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn test_load_config_from_toml() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "sightline.toml", "traversal = \"bfs\"\nmax_steps = 12\n");

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.traversal, TraversalMode::Bfs);
    assert_eq!(config.max_steps, 12);
}

#[test]
fn test_load_config_rejects_invalid_bounds() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "bad.toml", "max_steps = 0\n");

    let result = load_config(Some(&path));
    assert!(matches!(result, Err(SightlineError::InvalidConfig(_))));
}

#[test]
fn test_missing_input_file_rejected() {
    let dir = TempDir::new().unwrap();
    let result = validate_file_path(&dir.path().join("absent.mmd"));
    assert!(matches!(result, Err(SightlineError::IoError(_))));
}

#[test]
fn test_directory_input_rejected() {
    let dir = TempDir::new().unwrap();
    assert!(validate_file_path(dir.path()).is_err());
}

// =============================================================================
// TEXT COMMAND TESTS
// =============================================================================

#[test]
fn test_parse_and_render_commands_succeed() {
    let dir = TempDir::new().unwrap();
    let diagram = write(&dir, "d.mmd", "graph TD\n    A[Start] --> B{Ok?}");
    let graph = write(
        &dir,
        "g.json",
        r#"{"direction": "LR", "nodes": [{"id": "A", "label": "Start"}], "edges": []}"#,
    );

    assert!(cmd_parse(false, &diagram).is_ok());
    assert!(cmd_parse(true, &diagram).is_ok());
    assert!(cmd_render(false, &graph).is_ok());
}

#[test]
fn test_render_rejects_malformed_graph_json() {
    let dir = TempDir::new().unwrap();
    let graph = write(&dir, "g.json", "{not json");

    let result = cmd_render(false, &graph);
    assert!(matches!(result, Err(SightlineError::SerializationError(_))));
}

#[test]
fn test_diff_command_succeeds() {
    let dir = TempDir::new().unwrap();
    let old = write(&dir, "old.mmd", "graph TD\n    A --> B");
    let new = write(&dir, "new.mmd", "graph TD\n    A --> B\n    B --> C");

    assert!(cmd_diff(false, &old, &new).is_ok());
    assert!(cmd_diff(true, &old, &new).is_ok());
}

#[test]
fn test_apply_command_writes_corrected_diagram() {
    let dir = TempDir::new().unwrap();
    let diagram = write(&dir, "d.mmd", "graph TD\n    A[Begin] --> B[End]");
    let ops = write(
        &dir,
        "ops.json",
        r#"[
            {"op": "relabel", "node_id": "A", "new_label": "Start"},
            {"op": "remove_node", "node_id": "Ghost"},
            {"op": "relabel_edge", "src": "A", "dst": "B", "new_label": "go"}
        ]"#,
    );
    let out = dir.path().join("fixed.mmd");

    cmd_apply(false, &diagram, &ops, Some(&out)).unwrap();

    let text = read(&out);
    assert_eq!(text, "graph TD\n    A[Start]\n    B[End]\n    A -->|go| B");
}

#[test]
fn test_apply_command_skips_undecodable_operations() {
    let dir = TempDir::new().unwrap();
    let diagram = write(&dir, "d.mmd", "graph TD\n    A --> B");
    let ops = write(
        &dir,
        "ops.json",
        r#"[
            {"op": "relabel", "node_id": "A", "new_label": "Start"},
            {"op": "explode"},
            {"op": "add_edge", "src": "B", "dst": "A"}
        ]"#,
    );
    let out = dir.path().join("fixed.mmd");

    cmd_apply(false, &diagram, &ops, Some(&out)).unwrap();

    let graph = MermaidParser::parse(&read(&out)).graph;
    assert_eq!(graph.node("A").unwrap().label, "Start");
    assert!(graph.contains_edge("B", "A"));
}

#[test]
fn test_apply_command_rejects_non_array_operations() {
    let dir = TempDir::new().unwrap();
    let diagram = write(&dir, "d.mmd", "graph TD\n    A --> B");
    let ops = write(&dir, "ops.json", r#"{"op": "relabel"}"#);

    let result = cmd_apply(false, &diagram, &ops, None);
    assert!(matches!(result, Err(SightlineError::SerializationError(_))));
}

#[test]
fn test_apply_command_rejects_oversized_batch() {
    let dir = TempDir::new().unwrap();
    let diagram = write(&dir, "d.mmd", "graph TD\n    A --> B");
    let batch = vec![r#"{"op": "remove_node", "node_id": "Z"}"#; MAX_OPERATIONS_PER_REQUEST + 1];
    let ops = write(&dir, "ops.json", &format!("[{}]", batch.join(",")));

    let result = cmd_apply(false, &diagram, &ops, None);
    assert!(matches!(result, Err(SightlineError::InvalidInput(_))));
}

// =============================================================================
// TRANSCRIPT COMMAND TESTS
// =============================================================================

#[test]
fn test_replay_writes_synthesized_diagram() {
    let dir = TempDir::new().unwrap();
    let transcript = write(&dir, "run.json", CHAIN_TRANSCRIPT);
    let out = dir.path().join("chain.mmd");

    cmd_replay(
        EngineConfig::default(),
        false,
        &transcript,
        "chain.png",
        Some("4x4"),
        Some("bfs"),
        Some(&out),
    )
    .unwrap();

    let graph = MermaidParser::parse(&read(&out)).graph;
    assert_eq!(graph.node_count(), 3);
    assert!(graph.contains_edge("A", "B"));
    assert!(graph.contains_edge("B", "C"));
    assert!(read(&out).starts_with("graph LR"));
}

#[test]
fn test_replay_rejects_unknown_traversal() {
    let dir = TempDir::new().unwrap();
    let transcript = write(&dir, "run.json", CHAIN_TRANSCRIPT);

    let result = cmd_replay(
        EngineConfig::default(),
        false,
        &transcript,
        "chain.png",
        None,
        Some("zigzag"),
        None,
    );
    assert!(matches!(result, Err(SightlineError::InvalidConfig(_))));
}

#[test]
fn test_replay_rejects_malformed_transcript() {
    let dir = TempDir::new().unwrap();
    let transcript = write(&dir, "run.json", "{\"initial\": 7");

    let result = cmd_replay(
        EngineConfig::default(),
        false,
        &transcript,
        "chain.png",
        None,
        None,
        None,
    );
    assert!(matches!(result, Err(SightlineError::SerializationError(_))));
}

#[test]
fn test_merge_writes_union_of_drafts() {
    let dir = TempDir::new().unwrap();
    let transcript = write(&dir, "run.json", CHAIN_TRANSCRIPT);
    let out = dir.path().join("merged.mmd");

    cmd_merge(EngineConfig::default(), false, &transcript, None, Some(&out)).unwrap();

    let graph = MermaidParser::parse(&read(&out)).graph;
    assert!(graph.contains_node("Login"));
    assert!(!graph.contains_node("SignIn"));
    assert!(graph.contains_edge("Login", "Home"));
    assert!(graph.contains_edge("Home", "Logout"));
    assert_eq!(graph.node("Login").map(|n| n.label.as_str()), Some("Log in"));
}

#[test]
fn test_merge_with_no_sources_rejected() {
    let dir = TempDir::new().unwrap();
    let transcript = write(&dir, "run.json", CHAIN_TRANSCRIPT);

    let result = cmd_merge(EngineConfig::default(), false, &transcript, Some(" , "), None);
    assert!(matches!(result, Err(SightlineError::InvalidConfig(_))));
}
