//! HTTP API module.
//!
//! REST endpoints for launching, streaming, tailing, and cancelling agent
//! runs, plus the workspace and usage collaborator surfaces.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
