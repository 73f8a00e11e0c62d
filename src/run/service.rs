//! Run orchestration service.
//!
//! Owns the executor, the cancellation registry, and the in-memory run
//! records. The service launches runs on background tasks, appends the
//! `[DONE]` sentinel when a run finishes, and backs the relay's
//! `is_running` predicate for reconnecting consumers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cache::KvCache;
use crate::config::RunnerConfig;
use crate::events::summarize;
use crate::exec::{CancelRegistry, ExecError, Executor, RunResult};
use crate::relay::{DONE_SENTINEL, relay};
use crate::run::models::{
    RunRecord, RunStarted, RunStatus, RunStatusView, StartRunRequest, TailResponse,
};
use crate::workspace::WorkspaceResolver;

/// How much trailing stderr to keep in a failure message.
const STDERR_TAIL_CHARS: usize = 400;

/// Orchestrates agent runs for all users.
#[derive(Clone)]
pub struct RunService {
    executor: Executor,
    registry: CancelRegistry,
    resolver: WorkspaceResolver,
    logs_dir: PathBuf,
    timeout: Duration,
    records: Arc<DashMap<String, RunRecord>>,
    token_index: Arc<DashMap<(String, String), String>>,
}

impl RunService {
    /// Build the service from runner settings and the shared cache.
    pub fn new(config: &RunnerConfig, cache: Arc<dyn KvCache>) -> Self {
        let registry = CancelRegistry::new(cache);
        Self {
            executor: Executor::new(config.binary.clone(), registry.clone()),
            registry,
            resolver: WorkspaceResolver::new(config.workspace_root.clone()),
            logs_dir: config.logs_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            records: Arc::new(DashMap::new()),
            token_index: Arc::new(DashMap::new()),
        }
    }

    pub fn resolver(&self) -> &WorkspaceResolver {
        &self.resolver
    }

    /// Launch a run. Returns once the process task is spawned; output
    /// arrives through the returned live channel and the durable log.
    pub async fn start_run(&self, user_id: &str, request: StartRunRequest) -> Result<RunStarted> {
        let StartRunRequest {
            prompt,
            workspace: workspace_name,
            stream_token,
            config,
        } = request;

        if prompt.trim().is_empty() {
            bail!("prompt must not be empty");
        }
        let workspace = self.resolver.resolve(&workspace_name).await?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let stream_token = stream_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| nanoid::nanoid!());

        tokio::fs::create_dir_all(&self.logs_dir)
            .await
            .context("creating runs log directory")?;
        let log_path = self.logs_dir.join(format!("run-{run_id}.ndjson"));

        let record = RunRecord {
            run_id: run_id.clone(),
            user_id: user_id.to_string(),
            stream_token: stream_token.clone(),
            workspace: workspace.name.clone(),
            working_dir: workspace.path.clone(),
            log_path: log_path.clone(),
            started_at: Utc::now(),
            status: RunStatus::Running,
            message: None,
            summary: None,
        };
        self.records.insert(run_id.clone(), record);
        self.token_index.insert(
            (user_id.to_string(), stream_token.clone()),
            run_id.clone(),
        );

        info!(
            run_id = %run_id,
            workspace = %workspace.name,
            user = %user_id,
            "starting agent run"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let service = self.clone();
        let task_run_id = run_id.clone();
        let task_user = user_id.to_string();
        let task_token = stream_token.clone();
        let task_log_path = log_path.clone();
        tokio::spawn(async move {
            let outcome = service
                .executor
                .execute(
                    &prompt,
                    &workspace.path,
                    service.timeout,
                    &config,
                    config.resume_session_id.as_deref(),
                    config.include_partials,
                    &task_log_path,
                    &task_user,
                    &task_token,
                    |line| {
                        // A disconnected live consumer is fine; the durable
                        // log remains the source of truth.
                        let _ = tx.send(line.to_string());
                    },
                )
                .await;
            service.finish(&task_run_id, outcome).await;
        });

        Ok(RunStarted {
            run_id,
            stream_token,
            log_path,
            lines: rx,
        })
    }

    /// Record the outcome of a finished run and seal its durable log.
    async fn finish(&self, run_id: &str, outcome: Result<RunResult, ExecError>) {
        let (status, message, summary) = match outcome {
            Ok(result) => {
                let summary = summarize(&result.output);
                if result.success {
                    (RunStatus::Completed, None, summary)
                } else if result.timed_out {
                    (
                        RunStatus::Failed,
                        Some(format!(
                            "run exceeded the {}s wall-clock limit",
                            self.timeout.as_secs()
                        )),
                        summary,
                    )
                } else {
                    let mut message = match result.exit_code {
                        Some(code) => format!("agent exited with code {code}"),
                        None => "agent terminated by signal".to_string(),
                    };
                    let stderr = result.stderr.trim();
                    if !stderr.is_empty() {
                        let tail: String = stderr
                            .chars()
                            .rev()
                            .take(STDERR_TAIL_CHARS)
                            .collect::<Vec<_>>()
                            .into_iter()
                            .rev()
                            .collect();
                        message.push_str(": ");
                        message.push_str(&tail);
                    }
                    (RunStatus::Failed, Some(message), summary)
                }
            }
            Err(err) => (RunStatus::Failed, Some(err.to_string()), None),
        };

        if let Some(record) = self.records.get(run_id) {
            let log_path = record.log_path.clone();
            drop(record);
            if let Err(err) = append_sentinel(&log_path).await {
                warn!(run_id, error = %err, "failed to seal run log");
            }
        }

        if let Some(mut record) = self.records.get_mut(run_id) {
            // A cancel that raced the process exit keeps its verdict.
            if record.status != RunStatus::Cancelled {
                record.status = status;
                record.message = message;
            }
            record.summary = summary;
            info!(run_id, status = %record.status, "run finished");
        }
    }

    /// Cancel the run registered under `(user_id, token)`.
    ///
    /// `Ok(false)` means nothing was registered: already finished or never
    /// started. An empty token is a loud error, not a quiet miss.
    pub fn cancel(&self, user_id: &str, token: &str) -> Result<bool> {
        let cancelled = self.registry.cancel(user_id, token)?;
        if cancelled {
            let key = (user_id.to_string(), token.to_string());
            if let Some(run_id) = self.token_index.get(&key).map(|r| r.value().clone()) {
                if let Some(mut record) = self.records.get_mut(&run_id) {
                    record.status = RunStatus::Cancelled;
                    record.message = Some("cancelled by user".to_string());
                    info!(run_id = %run_id, "run cancelled");
                }
            }
        }
        Ok(cancelled)
    }

    /// Whether the run's process is still live. Backs the relay predicate.
    pub fn is_running(&self, run_id: &str) -> bool {
        self.records
            .get(run_id)
            .map(|r| r.status == RunStatus::Running)
            .unwrap_or(false)
    }

    /// Status view for one of the user's runs.
    pub async fn status(&self, user_id: &str, run_id: &str) -> Result<RunStatusView> {
        let record = self
            .records
            .get(run_id)
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .context("run not found")?;

        let log_offset = tokio::fs::metadata(&record.log_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let pid = self.registry.lookup(&record.user_id, &record.stream_token);

        Ok(RunStatusView {
            run_id: record.run_id,
            workspace: record.workspace,
            status: record.status,
            started_at: record.started_at,
            log_offset,
            pid,
            message: record.message,
            summary: record.summary,
        })
    }

    /// Relay the run's durable log from `offset` for at most `wait`.
    ///
    /// Safe to call repeatedly with the returned offset: no lines are
    /// replayed or dropped across disconnects, and a budget expiry is a
    /// normal "come back later" outcome.
    pub async fn tail(
        &self,
        user_id: &str,
        run_id: &str,
        offset: u64,
        wait: Duration,
    ) -> Result<TailResponse> {
        let record = self
            .records
            .get(run_id)
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .context("run not found")?;

        let mut lines = Vec::new();
        let outcome = relay(
            &record.log_path,
            offset,
            |line| lines.push(line.to_string()),
            || self.is_running(run_id),
            wait,
        )
        .await;

        let status = self
            .records
            .get(run_id)
            .map(|r| r.status)
            .unwrap_or(record.status);

        Ok(TailResponse {
            lines,
            next_offset: outcome.offset,
            done: outcome.done,
            status,
        })
    }
}

/// Append the end-of-stream sentinel to a run log.
async fn append_sentinel(path: &std::path::Path) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(DONE_SENTINEL.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}
