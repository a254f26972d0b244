//! HTTP surface: `GET /health` and `POST /run`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Instrument, Level};

use crate::error::{RunError, RunResult};
use crate::request::{JobEnvelope, RunResponse};
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// Templates available in the workflow directory.
    workflows: Vec<String>,
}

async fn health_check(State(state): State<AppState>) -> Response {
    match state.orchestrator.store().list().await {
        Ok(workflows) => Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            workflows,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Workflow directory unreadable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    version: env!("CARGO_PKG_VERSION"),
                    workflows: Vec::new(),
                }),
            )
                .into_response()
        }
    }
}

/// Run one job envelope to completion.
///
/// The run executes in its own task under a child of the shutdown token.
/// If the caller disconnects, the handler future is dropped and the drop
/// guard cancels the run. A body that is not a valid envelope is answered
/// with the same `{"error", "code"}` shape as every other failure.
async fn run_job(
    State(state): State<AppState>,
    payload: Result<Json<JobEnvelope>, JsonRejection>,
) -> RunResult<Json<RunResponse>> {
    let Json(envelope) = payload.map_err(|rejection| RunError::BadRequest(rejection.body_text()))?;
    let job_id = envelope
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();

    let span = tracing::info_span!("run", job_id = %job_id);
    let orchestrator = state.orchestrator.clone();
    let request = envelope.input;
    let handle = tokio::spawn(
        async move { orchestrator.run(request, &cancel).await }.instrument(span),
    );

    match handle.await {
        Ok(result) => result.map(Json),
        Err(e) => Err(RunError::Internal(format!("run task aborted: {e}"))),
    }
}

/// Build the application router with its middleware stack.
pub fn router(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/health", get(health_check))
        .route("/run", post(run_job))
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}
