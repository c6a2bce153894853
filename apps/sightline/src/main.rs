//! # Sightline - Flowchart Interpretation Server
//!
//! The main binary for the Sightline diagram interpretation engine.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for parsing, diffing, correcting and replaying diagrams
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                apps/sightline (THE BINARY)            │
//! │                                                       │
//! │     ┌─────────────┐             ┌─────────────┐       │
//! │     │    CLI      │             │  HTTP API   │       │
//! │     │   (clap)    │             │   (axum)    │       │
//! │     └──────┬──────┘             └──────┬──────┘       │
//! │            └─────────────┬─────────────┘              │
//! │                          ▼                            │
//! │                 ┌─────────────────┐                   │
//! │                 │ sightline-core  │                   │
//! │                 │   (THE LOGIC)   │                   │
//! │                 └─────────────────┘                   │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! sightline server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! sightline parse -f diagram.mmd
//! sightline replay -t run.json --grid 6x8 -o diagram.mmd
//! sightline merge -t run.json --sources Structuralist,Pessimist
//! ```

use clap::Parser;
use sightline::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // SIGHTLINE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("SIGHTLINE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "sightline=debug,tower_http=debug"
    } else {
        "sightline=info,tower_http=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Sightline startup banner.
fn print_banner() {
    eprintln!(
        r#"
  ┌─┐┬┌─┐┬ ┬┌┬┐┬  ┬┌┐┌┌─┐
  └─┐││ ┬├─┤ │ │  ││││├┤
  └─┘┴└─┘┴ ┴ ┴ ┴─┘┴┘└┘└─┘

  Flowchart Interpretation Engine v{}

  Crawl • Reconcile • Synthesize
"#,
        env!("CARGO_PKG_VERSION")
    );
}
