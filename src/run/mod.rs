//! Run lifecycle: models and the orchestration service.

pub mod models;
pub mod service;

pub use models::{RunRecord, RunStarted, RunStatus, RunStatusView, StartRunRequest, TailResponse};
pub use service::RunService;
