//! Application configuration.
//!
//! Loaded from an optional TOML file plus `TETHER_`-prefixed environment
//! variables (e.g. `TETHER_SERVER__PORT=9000`). Every field has a default so
//! the server can start with no config file at all.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub runner: RunnerConfig,
    pub usage: UsageConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allowed CORS origins. Empty list allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8460,
            cors_origins: Vec::new(),
        }
    }
}

/// Settings for launching and logging agent runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Agent CLI binary to launch.
    pub binary: String,
    /// Model passed to the CLI when a request does not name one.
    pub default_model: String,
    /// Root directory that workspaces are resolved under.
    pub workspace_root: PathBuf,
    /// Directory holding one durable NDJSON log per run.
    pub logs_dir: PathBuf,
    /// Wall-clock limit for a single run, in seconds.
    pub timeout_secs: u64,
    /// Default budget for a tail (relay) call, in seconds.
    pub tail_wait_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tether");
        Self {
            binary: "claude".to_string(),
            default_model: String::new(),
            workspace_root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("workspace"),
            logs_dir: data_dir.join("runs"),
            timeout_secs: 1800,
            tail_wait_secs: 25,
        }
    }
}

/// Subscription usage API settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Endpoint returning the account's usage windows.
    pub api_url: String,
    /// Credentials file holding the OAuth access token.
    pub credentials_path: PathBuf,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.anthropic.com/api/oauth/usage".to_string(),
            credentials_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude/.credentials.json"),
        }
    }
}

impl AppConfig {
    /// Load configuration, optionally from an explicit file path.
    ///
    /// Without an explicit path, `tether.toml` next to the working directory
    /// and `~/.config/tether/config.toml` are tried; both are optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(p) => {
                builder = builder.add_source(File::from(p).format(FileFormat::Toml));
            }
            None => {
                if let Some(config_dir) = dirs::config_dir() {
                    builder = builder.add_source(
                        File::from(config_dir.join("tether/config.toml"))
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }
                builder = builder.add_source(
                    File::with_name("tether")
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        let raw = builder
            .add_source(Environment::with_prefix("TETHER").separator("__"))
            .build()
            .context("building configuration")?;

        let mut cfg: AppConfig = raw
            .try_deserialize()
            .context("deserializing configuration")?;

        cfg.runner.workspace_root = expand_path(&cfg.runner.workspace_root);
        cfg.runner.logs_dir = expand_path(&cfg.runner.logs_dir);
        cfg.usage.credentials_path = expand_path(&cfg.usage.credentials_path);
        Ok(cfg)
    }
}

/// Expand `~` and environment variables in a configured path.
fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::full(s).map(|c| c.into_owned()).unwrap_or_else(|_| s.to_string())),
        None => path.to_path_buf(),
    }
}
