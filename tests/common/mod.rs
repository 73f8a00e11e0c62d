//! Test utilities and common setup.

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tether::api::{AppState, create_router};
use tether::cache::MemoryCache;
use tether::config::AppConfig;

/// A test application plus the temp directory backing it.
///
/// Keep the context alive for the duration of the test: dropping it removes
/// the stub agent, the workspaces, and the run logs.
pub struct TestContext {
    pub app: Router,
    /// Held so the stub agent and run logs outlive the test.
    #[allow(dead_code)]
    pub dir: tempfile::TempDir,
}

/// Stub agent binary used instead of the real CLI.
///
/// Consumes the prompt from stdin, sleeps when the prompt asks for it (so
/// cancellation tests have a live process to kill), then emits a small but
/// realistic NDJSON stream.
fn write_stub_agent(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("agent.sh");
    std::fs::write(
        &path,
        r#"#!/bin/sh
prompt=$(cat)
case "$prompt" in
  *SLEEP*) sleep 30 ;;
esac
printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}],"usage":{"input_tokens":21,"output_tokens":4}}}'
printf '%s\n' '{"type":"result","result":"hello","usage":{"output_tokens":7},"num_turns":1,"session_id":"s-int","modelUsage":{"claude-opus-4-5-20251101":{"contextWindow":200000}}}'
"#,
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }
    path
}

/// Create a test application with all services initialized.
pub fn test_app() -> TestContext {
    let dir = tempfile::tempdir().unwrap();

    let stub = write_stub_agent(dir.path());
    let workspace_root = dir.path().join("workspaces");
    std::fs::create_dir_all(workspace_root.join("proj")).unwrap();

    let mut config = AppConfig::default();
    config.runner.binary = stub.to_string_lossy().into_owned();
    config.runner.workspace_root = workspace_root;
    config.runner.logs_dir = dir.path().join("runs");
    config.runner.timeout_secs = 60;
    config.runner.tail_wait_secs = 2;
    // Point at a file that does not exist so /usage exercises the
    // credentials-unavailable path without touching the network.
    config.usage.credentials_path = dir.path().join("absent-credentials.json");

    let state = AppState::new(&config, Arc::new(MemoryCache::new()));
    TestContext {
        app: create_router(state),
        dir,
    }
}
