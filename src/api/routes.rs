//! API route definitions.

use axum::http::{HeaderValue, Method};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.cors_origins);

    // Tracing layer with request timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(handlers::health))
        // Run lifecycle
        .route("/runs", post(handlers::start_run))
        .route("/runs/cancel", post(handlers::cancel_run))
        .route("/runs/{run_id}", get(handlers::get_run))
        .route("/runs/{run_id}/tail", get(handlers::tail_run))
        // Collaborator surfaces
        .route("/workspaces", get(handlers::list_workspaces))
        .route("/usage", get(handlers::get_usage))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}

/// Build the CORS layer from the configured origin list.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST];

    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(methods)
        .allow_headers(Any)
}
