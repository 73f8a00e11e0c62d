//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::KvCache;
use crate::config::AppConfig;
use crate::run::RunService;
use crate::usage::UsageClient;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Run service owning processes, records, and cancellation.
    pub runs: RunService,
    /// Client for the subscription usage collaborator.
    pub usage: Arc<UsageClient>,
    /// Default relay budget for tail calls.
    pub tail_wait: Duration,
    /// Allowed CORS origins; empty allows any.
    pub cors_origins: Vec<String>,
}

impl AppState {
    /// Create new application state.
    ///
    /// The cache is constructed by the caller (once, at server start) so
    /// that registry teardown follows the server lifetime.
    pub fn new(config: &AppConfig, cache: Arc<dyn KvCache>) -> Self {
        Self {
            runs: RunService::new(&config.runner, cache),
            usage: Arc::new(UsageClient::new(
                config.usage.api_url.clone(),
                config.usage.credentials_path.clone(),
            )),
            tail_wait: Duration::from_secs(config.runner.tail_wait_secs),
            cors_origins: config.server.cors_origins.clone(),
        }
    }
}
