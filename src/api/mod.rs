use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::dispatcher::job::validate_job_id;
use crate::dispatcher::{Dispatcher, JobStatus};
use crate::worker::logs::DEFAULT_MAX_LINES;
use crate::worker::LogReader;

#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Dispatcher,
    pub logs: LogReader,
}

#[derive(Deserialize)]
struct SubmitJobRequest {
    id: Option<String>,
    path: Option<String>,
}

#[derive(Deserialize)]
struct LogsQuery {
    id: Option<String>,
    #[serde(rename = "fromLine", default)]
    from_line: usize,
    #[serde(rename = "maxLines", default = "default_max_lines")]
    max_lines: usize,
}

fn default_max_lines() -> usize {
    DEFAULT_MAX_LINES
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Routes:
///
/// - `POST /` submit `{"id", "path"}`
/// - `DELETE /` cancel the current job
/// - `GET /` current status
/// - `GET /logs?id=&fromLine=&maxLines=` complete output lines
/// - `GET /health`
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/",
            get(status_handler)
                .post(submit_handler)
                .delete(cancel_handler),
        )
        .route("/logs", get(logs_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled, then drain open requests.
pub async fn run_api(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting job API server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn submit_handler(State(state): State<ApiState>, body: Bytes) -> Response {
    let request: SubmitJobRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
                .into_response()
        }
    };

    let (Some(id), Some(path)) = (request.id, request.path) else {
        return Json(JobStatus::rejected("", "Missing id or path in request")).into_response();
    };

    Json(state.dispatcher.submit(id, path).await).into_response()
}

async fn cancel_handler(State(state): State<ApiState>) -> Json<JobStatus> {
    Json(state.dispatcher.cancel().await)
}

async fn status_handler(State(state): State<ApiState>) -> Json<JobStatus> {
    let status = state.dispatcher.current_status();
    tracing::debug!(job_id = %status.id, phase = %status.phase, "Status requested");
    Json(status)
}

async fn logs_handler(State(state): State<ApiState>, Query(query): Query<LogsQuery>) -> Response {
    let Some(id) = query.id else {
        return (StatusCode::BAD_REQUEST, "Missing id in request").into_response();
    };
    if let Err(e) = validate_job_id(&id) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    Json(
        state
            .logs
            .read_lines(&id, query.from_line, query.max_lines)
            .await,
    )
    .into_response()
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
