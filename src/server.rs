//! HTTP surface for the reporting/export layer.
//!
//! Thin boundary over the analysis engine:
//!   POST /mock                 — generate a demo run with baked deviations
//!   POST /analyze/{run_id}     — run full analysis, idempotent per run
//!   GET  /report/{run_id}      — retrieve a stored report
//!   GET  /report/{run_id}/text — human-readable report text only

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::AnalysisError;
use crate::mock::generate_mock_run;
use crate::pipeline::AnalysisEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AnalysisEngine>,
}

pub async fn run_server(state: AppState, addr: &str) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/mock", post(create_mock_run))
        .route("/analyze/{run_id}", post(analyze_run))
        .route("/report/{run_id}", get(get_report))
        .route("/report/{run_id}/text", get(get_report_text))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Compliance service listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn error_response(err: AnalysisError) -> Response {
    let status = match &err {
        AnalysisError::RunNotFound(_) | AnalysisError::GraphNotFound(_) => StatusCode::NOT_FOUND,
        AnalysisError::GraphInvalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AnalysisError::Cancelled(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn create_mock_run(State(state): State<AppState>) -> Response {
    match generate_mock_run(state.engine.store().as_ref()).await {
        Ok(mock) => (
            StatusCode::OK,
            Json(json!({
                "status": "created",
                "run_id": mock.run_id,
                "event_count": mock.event_count,
                "deviations_baked_in": [
                    "wound_irrigation — MISSING",
                    "loculation_breakdown before drainage_expression — OUT OF ORDER",
                ],
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn analyze_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    match state.engine.analyze(&run_id).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_report(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    match state.engine.get_report(&run_id).await {
        Ok(Some(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Report not found. Run /analyze first." })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_report_text(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    match state.engine.get_report(&run_id).await {
        Ok(Some(report)) => (StatusCode::OK, report.report_text).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Report not found. Run /analyze first." })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}
