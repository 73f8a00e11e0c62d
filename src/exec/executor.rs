//! Agent process execution.
//!
//! Spawns the agent CLI for one run and pumps its stdout through three
//! composable stages: the spawned byte stream, a line splitter, and a
//! fan-out that appends each complete line to the run's durable log while
//! handing it to the live callback. The process is bounded by a wall-clock
//! timeout and registered for targeted cancellation for its whole lifetime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use super::command::{RunConfiguration, build_command};
use super::registry::CancelRegistry;

/// Grace period for reaping the child after EOF or a kill.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for draining stdout after the process is gone. Bounded because an
/// orphaned grandchild can inherit the pipe and keep it open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Cap on captured stderr. Stdout is the NDJSON event stream and is kept in
/// full; stderr is diagnostics only.
const MAX_STDERR_BYTES: usize = 1024 * 1024;

/// Failures surfaced before or around the process itself. Runtime failures
/// of the agent (non-zero exit, timeout) are not errors; they are reported
/// in [`RunResult`] so partial output stays usable.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("working directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("agent binary not found: {0}")]
    BinaryNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one agent run.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    /// Whether the process finished on its own with a zero exit code.
    pub success: bool,
    /// Full captured stdout (the NDJSON stream).
    pub output: String,
    /// Captured stderr.
    pub stderr: String,
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Whether the wall-clock timeout killed the run.
    pub timed_out: bool,
}

/// Launches agent processes and keeps the cancellation registry current.
#[derive(Clone)]
pub struct Executor {
    binary: String,
    registry: CancelRegistry,
}

impl Executor {
    pub fn new(binary: impl Into<String>, registry: CancelRegistry) -> Self {
        Self {
            binary: binary.into(),
            registry,
        }
    }

    /// Run the agent once.
    ///
    /// The prompt goes to the process over stdin; every complete stdout line
    /// is appended to `log_path` and passed to `on_line`. The pid is held in
    /// the cancellation registry under `(user_id, stream_token)` from spawn
    /// until exit. An empty `stream_token` gets a synthesized replacement so
    /// the entry never lands on the unscoped per-user key.
    pub async fn execute<F>(
        &self,
        prompt: &str,
        working_dir: &Path,
        timeout: Duration,
        config: &RunConfiguration,
        resume_session_id: Option<&str>,
        streaming_partials: bool,
        log_path: &Path,
        user_id: &str,
        stream_token: &str,
        on_line: F,
    ) -> Result<RunResult, ExecError>
    where
        F: FnMut(&str) + Send,
    {
        if tokio::fs::metadata(working_dir).await.is_err() {
            return Err(ExecError::DirectoryNotFound(working_dir.to_path_buf()));
        }

        let token = if stream_token.is_empty() {
            nanoid::nanoid!()
        } else {
            stream_token.to_string()
        };

        let command = build_command(&self.binary, config, resume_session_id, streaming_partials);
        debug!("spawning agent: {}", command.shell());

        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExecError::BinaryNotFound(command.program.clone())
                } else {
                    ExecError::Io(e)
                }
            })?;

        if let Some(pid) = child.id() {
            self.registry.register(user_id, &token, pid).ok();
        }

        let result = drive_process(&mut child, prompt, timeout, log_path, on_line).await;

        // Natural-exit cleanup for exactly this run's key.
        self.registry.clear(user_id, &token);
        result
    }
}

/// Pump the child's stdio until exit, timeout, or kill.
async fn drive_process<F>(
    child: &mut Child,
    prompt: &str,
    timeout: Duration,
    log_path: &Path,
    mut on_line: F,
) -> Result<RunResult, ExecError>
where
    F: FnMut(&str) + Send,
{
    // Deliver the prompt and close stdin so the agent sees EOF. Done on a
    // side task: a large prompt could otherwise deadlock against an agent
    // that writes before reading.
    if let Some(mut stdin) = child.stdin.take() {
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            if let Err(err) = stdin.write_all(prompt.as_bytes()).await {
                warn!("failed to write prompt to agent stdin: {err}");
            }
        });
    }

    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(read_bounded(stderr, MAX_STDERR_BYTES)));

    let mut log_file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await?;

    let stdout = child.stdout.take();
    let mut lines = stdout.map(|s| BufReader::new(s).lines());
    let deadline = Instant::now() + timeout;
    let mut output = String::new();
    let mut timed_out = false;
    let mut early_status = None;

    if let Some(lines) = lines.as_mut() {
        // Read until EOF, process exit, or the wall-clock limit.
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        log_file.write_all(line.as_bytes()).await?;
                        log_file.write_all(b"\n").await?;
                        log_file.flush().await?;
                        output.push_str(&line);
                        output.push('\n');
                        on_line(&line);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!("error reading agent stdout: {err}");
                        break;
                    }
                },
                status = child.wait() => {
                    match status {
                        Ok(status) => early_status = Some(status),
                        Err(err) => warn!("error waiting for agent: {err}"),
                    }
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("agent run exceeded {}s, killing", timeout.as_secs());
                    if let Err(err) = child.kill().await {
                        warn!("failed to kill timed-out agent: {err}");
                    }
                    timed_out = true;
                    break;
                }
            }
        }

        // The process is gone (or being killed) but the pipe may still hold
        // buffered lines, or be pinned open by an orphaned grandchild.
        // Drain within a bounded window.
        let drain_deadline = Instant::now() + DRAIN_TIMEOUT;
        loop {
            match tokio::time::timeout_at(drain_deadline, lines.next_line()).await {
                Ok(Ok(Some(line))) => {
                    log_file.write_all(line.as_bytes()).await?;
                    log_file.write_all(b"\n").await?;
                    log_file.flush().await?;
                    output.push_str(&line);
                    output.push('\n');
                    on_line(&line);
                }
                _ => break,
            }
        }
    }

    // Reap the child if the read loop ended before observing its exit.
    let status = match early_status {
        Some(status) => Some(status),
        None => match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                warn!("error waiting for agent: {err}");
                None
            }
            Err(_) => {
                warn!("agent did not exit after stdout closed; killing");
                let _ = child.kill().await;
                let _ = child.wait().await;
                None
            }
        },
    };

    let stderr = match stderr_task {
        Some(task) => match tokio::time::timeout(REAP_TIMEOUT, task).await {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Err(err)) => {
                warn!("stderr capture task failed: {err}");
                String::new()
            }
            Err(_) => {
                warn!("stderr capture timed out");
                String::new()
            }
        },
        None => String::new(),
    };

    let exit_code = status.and_then(|s| s.code());
    let success = !timed_out && status.map(|s| s.success()).unwrap_or(false);

    Ok(RunResult {
        success,
        output,
        stderr,
        exit_code,
        timed_out,
    })
}

/// Read from an async reader, truncating at `max_bytes`.
async fn read_bounded<R: AsyncRead + Unpin>(mut reader: R, max_bytes: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            // Keep draining so the child never blocks on a full pipe.
            continue;
        }
        buf.extend_from_slice(&chunk[..n.min(remaining)]);
    }

    buf
}
