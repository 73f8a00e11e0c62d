//! API request handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;

use crate::run::{RunStatusView, StartRunRequest, TailResponse};
use crate::usage::SubscriptionUsage;
use crate::workspace::Workspace;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Upper bound on one tail call's relay budget.
const MAX_TAIL_WAIT_SECS: u64 = 300;

/// Identity header supplied by the fronting proxy. Access control itself
/// happens upstream; this layer only scopes runs per user.
const USER_HEADER: &str = "x-user-id";

/// Fallback identity for single-user deployments.
const DEFAULT_USER: &str = "local";

fn current_user(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_USER)
        .to_string()
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Launch a run and stream its NDJSON output live.
///
/// The run id and stream token travel in response headers so the client has
/// them before the first line arrives; if this connection drops, the client
/// resumes via the tail endpoint with its last known offset.
pub async fn start_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartRunRequest>,
) -> ApiResult<Response> {
    let user = current_user(&headers);
    let started = state.runs.start_run(&user, request).await?;

    info!(run_id = %started.run_id, user = %user, "run started over HTTP");

    let stream = UnboundedReceiverStream::new(started.lines)
        .map(|line| Ok::<_, Infallible>(Bytes::from(format!("{line}\n"))));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header("x-run-id", started.run_id.as_str())
        .header("x-stream-token", started.stream_token.as_str())
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::internal(e.to_string()))
}

/// Get run status and, once finished, its summary.
pub async fn get_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunStatusView>> {
    let user = current_user(&headers);
    Ok(Json(state.runs.status(&user, &run_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    /// Byte offset to resume from; defaults to the start of the log.
    #[serde(default)]
    pub offset: u64,
    /// Relay budget in seconds.
    pub wait: Option<u64>,
}

/// Relay the durable log from a byte offset (long-poll reconnect path).
pub async fn tail_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Query(query): Query<TailQuery>,
) -> ApiResult<Json<TailResponse>> {
    let user = current_user(&headers);
    let wait = query
        .wait
        .map(|w| Duration::from_secs(w.min(MAX_TAIL_WAIT_SECS)))
        .unwrap_or(state.tail_wait);

    let response = state.runs.tail(&user, &run_id, query.offset, wait).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub stream_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Cancel the run registered under the caller's stream token.
///
/// A token that matches nothing yields `cancelled: false`; a missing token
/// is a client bug and gets a 400.
pub async fn cancel_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Json<CancelResponse>> {
    let user = current_user(&headers);
    let token = request.stream_token.unwrap_or_default();
    if token.is_empty() {
        return Err(ApiError::bad_request("stream_token is required"));
    }

    let cancelled = state.runs.cancel(&user, &token)?;
    Ok(Json(CancelResponse { cancelled }))
}

/// List candidate workspace directories under the configured root.
pub async fn list_workspaces(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<Workspace>>> {
    Ok(Json(state.runs.resolver().list().await?))
}

/// Fetch subscription usage windows from the external usage API.
pub async fn get_usage(State(state): State<AppState>) -> ApiResult<Json<SubscriptionUsage>> {
    Ok(Json(state.usage.fetch().await?))
}
