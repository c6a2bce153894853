//! # Sightline CLI Module
//!
//! This module implements the CLI interface for Sightline.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `parse` - Parse diagram text and print its canonical form
//! - `render` - Render a graph JSON file as diagram text
//! - `diff` - Structural diff of two diagram files
//! - `apply` - Apply structural corrections to a diagram file
//! - `replay` - Run a full interpretation against a recorded transcript
//! - `merge` - Run multi-draft mode against a recorded transcript

mod commands;

use clap::{Parser, Subcommand};
use sightline_core::{EngineConfig, SightlineError};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Sightline - Flowchart Interpretation Engine
///
/// Turns an unreliable oracle's local answers into one consistent
/// diagram graph.
#[derive(Parser, Debug)]
#[command(name = "sightline")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a TOML engine configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Parse diagram text and print its canonical form
    Parse {
        /// Diagram text file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Render a graph JSON file as diagram text
    Render {
        /// Graph JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Structural diff of two diagram files
    Diff {
        /// Earlier diagram
        #[arg(long)]
        old: PathBuf,

        /// Later diagram
        #[arg(long)]
        new: PathBuf,
    },

    /// Apply structural corrections to a diagram file
    Apply {
        /// Diagram text file
        #[arg(short, long)]
        file: PathBuf,

        /// JSON array of graph operations
        #[arg(long)]
        ops: PathBuf,

        /// Write the corrected diagram here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a full interpretation against a recorded transcript
    Replay {
        /// Transcript JSON file
        #[arg(short, long)]
        transcript: PathBuf,

        /// Image location passed to the oracle
        #[arg(short, long, default_value = "transcript")]
        image: String,

        /// Grid overlay as ROWSxCOLS, e.g. 6x8
        #[arg(short, long)]
        grid: Option<String>,

        /// Frontier policy (dfs, bfs); overrides the config file
        #[arg(long)]
        traversal: Option<String>,

        /// Write the diagram here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run multi-draft mode against a recorded transcript
    Merge {
        /// Transcript JSON file
        #[arg(short, long)]
        transcript: PathBuf,

        /// Comma-separated draft source names, in priority order
        #[arg(short, long)]
        sources: Option<String>,

        /// Write the merged diagram here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Load the engine configuration named on the command line, or the defaults.
pub fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, SightlineError> {
    match path {
        Some(path) => {
            let path = validate_file_path(path)?;
            tracing::debug!("Loading engine config from {}", path.display());
            EngineConfig::load(path)
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), SightlineError> {
    let json_mode = cli.json_mode;
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(config, &host, port).await,
        Some(Commands::Parse { file }) => cmd_parse(json_mode, &file),
        Some(Commands::Render { file }) => cmd_render(json_mode, &file),
        Some(Commands::Diff { old, new }) => cmd_diff(json_mode, &old, &new),
        Some(Commands::Apply { file, ops, output }) => {
            cmd_apply(json_mode, &file, &ops, output.as_deref())
        }
        Some(Commands::Replay {
            transcript,
            image,
            grid,
            traversal,
            output,
        }) => cmd_replay(
            config,
            json_mode,
            &transcript,
            &image,
            grid.as_deref(),
            traversal.as_deref(),
            output.as_deref(),
        ),
        Some(Commands::Merge {
            transcript,
            sources,
            output,
        }) => cmd_merge(
            config,
            json_mode,
            &transcript,
            sources.as_deref(),
            output.as_deref(),
        ),
        None => {
            println!("No command specified. Use --help for usage information.");
            Ok(())
        }
    }
}
