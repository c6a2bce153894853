//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! Every request is self-contained: nothing is stored between requests.

use super::{
    AppState,
    types::{
        ApplyRequest, ApplyResponse, DiffRequest, DiffResponse, HealthResponse, ParseRequest,
        ParseResponse, ReconcileRequest, ReconcileResponse, RenderRequest, RenderResponse,
    },
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use sightline_core::{Interpreter, MermaidParser, ScriptedOracle};

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// PARSE HANDLER
// =============================================================================

/// Parse diagram text into a graph.
pub async fn parse_handler(Json(request): Json<ParseRequest>) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ParseResponse::error(format!("Invalid request: {}", e))),
        );
    }

    let parsed = MermaidParser::parse(&request.text);
    (
        StatusCode::OK,
        Json(ParseResponse::success(parsed.graph, parsed.warnings)),
    )
}

// =============================================================================
// RENDER HANDLER
// =============================================================================

/// Render a graph as diagram text.
pub async fn render_handler(Json(request): Json<RenderRequest>) -> impl IntoResponse {
    Json(RenderResponse {
        success: true,
        text: request.graph.to_text(),
    })
}

// =============================================================================
// DIFF HANDLER
// =============================================================================

/// Structural diff of two diagram texts.
pub async fn diff_handler(Json(request): Json<DiffRequest>) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(DiffResponse::error(format!("Invalid request: {}", e))),
        );
    }

    let old = MermaidParser::parse(&request.old).graph;
    let new = MermaidParser::parse(&request.new).graph;
    (StatusCode::OK, Json(DiffResponse::success(old.diff(&new))))
}

// =============================================================================
// APPLY HANDLER
// =============================================================================

/// Apply structural corrections to a diagram.
///
/// Operations that cannot be applied are skipped and reported, never
/// treated as request errors.
pub async fn apply_handler(Json(request): Json<ApplyRequest>) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApplyResponse::error(format!("Invalid request: {}", e))),
        );
    }

    let parsed = MermaidParser::parse(&request.text);
    let mut graph = parsed.graph;
    let report = graph.apply_json_operations(&request.operations);

    let mut diagnostics = parsed.warnings;
    diagnostics.extend(report.diagnostics);

    (
        StatusCode::OK,
        Json(ApplyResponse {
            success: true,
            text: Some(graph.to_text()),
            applied: report.applied,
            skipped: report.skipped,
            diagnostics,
            error: None,
        }),
    )
}

// =============================================================================
// RECONCILE HANDLER
// =============================================================================

/// Run a full interpretation against a recorded transcript.
///
/// The engine is synchronous, so the run happens on a blocking thread.
pub async fn reconcile_handler(
    State(state): State<AppState>,
    Json(request): Json<ReconcileRequest>,
) -> impl IntoResponse {
    let interpreter = Interpreter::new(state.config.as_ref().clone());
    let image = request.image_ref();
    let oracle = ScriptedOracle::new(request.transcript);

    let joined =
        tokio::task::spawn_blocking(move || interpreter.process(&oracle, &image)).await;

    match joined {
        Ok(Ok(interpretation)) => {
            if interpretation.needs_review() {
                tracing::warn!(
                    outcome = ?interpretation.outcome,
                    "reconciliation ended without convergence"
                );
            }
            (
                StatusCode::OK,
                Json(ReconcileResponse::success(interpretation)),
            )
        }
        Ok(Err(e)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ReconcileResponse::error(format!("Interpretation failed: {}", e))),
        ),
        Err(e) => {
            tracing::error!(error = %e, "interpretation task panicked or was cancelled");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReconcileResponse::error("Interpretation task failed")),
            )
        }
    }
}
