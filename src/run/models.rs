//! Run data models.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::events::RunSummary;
use crate::exec::RunConfiguration;

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Agent process is live and producing output.
    Running,
    /// Process finished on its own with a zero exit code.
    Completed,
    /// Process failed: non-zero exit, timeout, or launch error.
    Failed,
    /// Terminated through the cancellation registry.
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Server-side record of one run, created at launch and kept for the
/// lifetime of the process. One run id maps to exactly one log file.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub user_id: String,
    pub stream_token: String,
    pub workspace: String,
    pub working_dir: PathBuf,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Failure or cancellation message, when there is one.
    pub message: Option<String>,
    /// Derived once the process has finished.
    pub summary: Option<RunSummary>,
}

/// Request to launch a run.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRunRequest {
    pub prompt: String,
    /// Workspace name under the configured root.
    pub workspace: String,
    /// Client-chosen cancellation token; synthesized when absent.
    #[serde(default)]
    pub stream_token: Option<String>,
    #[serde(flatten)]
    pub config: RunConfiguration,
}

/// What a successful launch hands back to the caller.
#[derive(Debug)]
pub struct RunStarted {
    pub run_id: String,
    pub stream_token: String,
    pub log_path: PathBuf,
    /// Live feed of output lines from the executor's callback.
    pub lines: mpsc::UnboundedReceiver<String>,
}

/// Externally visible view of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusView {
    pub run_id: String,
    pub workspace: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// Current size of the durable log; a valid relay offset.
    pub log_offset: u64,
    /// Pid while the run is live and registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

/// Result of one tail (relay) call.
#[derive(Debug, Clone, Serialize)]
pub struct TailResponse {
    /// Complete lines in file order; the sentinel is never included.
    pub lines: Vec<String>,
    /// Offset to pass to the next tail call.
    pub next_offset: u64,
    /// Whether the end-of-stream sentinel was reached.
    pub done: bool,
    pub status: RunStatus,
}
