//! Cancellation registry.
//!
//! Maps `(user id, stream token)` to the OS pid of an in-flight run so a
//! specific run can be terminated without touching the user's other
//! concurrent runs. Entries live in the generic [`KvCache`] collaborator;
//! the registry only owns key derivation and the kill path.

use std::sync::Arc;

use anyhow::{Result, bail};
use log::{debug, warn};

use crate::cache::KvCache;

/// Key prefix for pid entries.
const PID_KEY_PREFIX: &str = "agent-pid";

/// Registry of cancellable in-flight runs.
#[derive(Clone)]
pub struct CancelRegistry {
    cache: Arc<dyn KvCache>,
}

impl CancelRegistry {
    pub fn new(cache: Arc<dyn KvCache>) -> Self {
        Self { cache }
    }

    /// Key scoped to one `(user, token)` pair.
    ///
    /// For any non-empty token this can never equal [`Self::legacy_key`]:
    /// the token adds a third `:`-separated segment the unscoped key lacks.
    fn scoped_key(user_id: &str, token: &str) -> String {
        format!("{PID_KEY_PREFIX}:{user_id}:{token}")
    }

    /// The historical unscoped per-user key. Kept only so tests can assert
    /// that token-bearing calls never collapse onto it.
    pub fn legacy_key(user_id: &str) -> String {
        format!("{PID_KEY_PREFIX}:{user_id}")
    }

    /// Record the pid for a run. The token must already be non-empty; the
    /// executor synthesizes one before spawning when the client sent none.
    pub fn register(&self, user_id: &str, token: &str, pid: u32) -> Result<()> {
        if token.is_empty() {
            bail!("stream token must not be empty when registering a pid");
        }
        let key = Self::scoped_key(user_id, token);
        debug!("registering pid {pid} under {key}");
        self.cache.put(&key, pid.to_string());
        Ok(())
    }

    /// Look up the pid for a run, if still registered.
    pub fn lookup(&self, user_id: &str, token: &str) -> Option<u32> {
        if token.is_empty() {
            return None;
        }
        self.cache
            .get(&Self::scoped_key(user_id, token))
            .and_then(|v| v.parse().ok())
    }

    /// Remove a run's entry, reporting whether one existed. Clearing one
    /// token never disturbs another token's entry.
    pub fn clear(&self, user_id: &str, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        self.cache.remove(&Self::scoped_key(user_id, token))
    }

    /// Cancel the run registered under `(user_id, token)`.
    ///
    /// Returns `Ok(true)` when an entry was found (the process is signalled
    /// and the entry removed) and `Ok(false)` when there is nothing to
    /// cancel. An empty token is a programming error, reported loudly and
    /// distinctly from "not found".
    pub fn cancel(&self, user_id: &str, token: &str) -> Result<bool> {
        if token.is_empty() {
            bail!("cancel requires a stream token");
        }

        let Some(pid) = self.lookup(user_id, token) else {
            debug!("cancel: no pid registered for user {user_id} token {token}");
            return Ok(false);
        };

        self.clear(user_id, token);
        if !kill_process(pid) && !force_kill_process(pid) {
            // The process may have exited between lookup and signal; the
            // entry is gone either way, so the cancel still counts.
            warn!("cancel: signalling pid {pid} failed (already exited?)");
        }
        Ok(true)
    }
}

/// Kill a process by PID.
pub fn kill_process(pid: u32) -> bool {
    use std::process::Command as StdCommand;

    StdCommand::new("kill")
        .arg(pid.to_string())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Force kill a process by PID (SIGKILL).
pub fn force_kill_process(pid: u32) -> bool {
    use std::process::Command as StdCommand;

    StdCommand::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
