//! Agent CLI command construction.
//!
//! Pure mapping from a [`RunConfiguration`] to the argv handed to the agent
//! binary. Nothing here touches the filesystem or environment; the executor
//! owns spawning.

use serde::{Deserialize, Serialize};

/// Directive appended to every run's system prompt. Runs are non-interactive,
/// so the agent must never block waiting for an answer.
const NO_QUESTIONS_DIRECTIVE: &str =
    "Do not ask the user questions; when something is ambiguous, make the most reasonable choice and continue.";

/// Output format requested from the agent CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Newline-delimited JSON events as they are produced.
    #[default]
    StreamJson,
    /// One JSON document after the run finishes.
    Json,
    /// Plain text.
    Text,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::StreamJson => "stream-json",
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
        }
    }
}

/// Immutable description of how a run should be launched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfiguration {
    /// Model identifier; empty means the CLI's own default.
    pub model: String,
    /// Permission mode; emitted only when set.
    pub permission_mode: Option<String>,
    pub output_format: OutputFormat,
    /// Request verbose output even for non-streaming formats.
    pub verbose: bool,
    /// Tool allow-list; empty means no restriction flag.
    pub tools: Vec<String>,
    pub max_turns: Option<u32>,
    /// Inline system prompt. Ignored when `system_prompt_file` is set.
    pub system_prompt: Option<String>,
    /// File-based system prompt; takes precedence over the inline one.
    pub system_prompt_file: Option<String>,
    /// Caller text merged into the always-present append-system-prompt flag.
    pub append_system_prompt: Option<String>,
    /// Emit partial content-block events while streaming.
    pub include_partials: bool,
    /// Prior session to resume. When present it is the only resume strategy.
    pub resume_session_id: Option<String>,
    /// Continue the most recent conversation. Never combined with a resume id.
    pub continue_conversation: bool,
    pub no_session_persistence: bool,
}

/// An argv-style command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Render as a single shell-safe string, escaping each value
    /// individually. Suitable for logging or handing to `sh -c`.
    pub fn shell(&self) -> String {
        let mut out = shell_escape(&self.program);
        for arg in &self.args {
            out.push(' ');
            out.push_str(&shell_escape(arg));
        }
        out
    }
}

/// Build the agent command line. Never fails: unset optional fields simply
/// omit their flags.
pub fn build_command(
    program: &str,
    config: &RunConfiguration,
    resume_session_id: Option<&str>,
    streaming_partials: bool,
) -> CommandLine {
    let mut args: Vec<String> = Vec::new();

    args.push("--output-format".to_string());
    args.push(config.output_format.as_str().to_string());

    // The stream format requires verbose event output; for the plain formats
    // verbosity stays opt-in.
    if config.output_format == OutputFormat::StreamJson || config.verbose {
        args.push("--verbose".to_string());
    }

    if streaming_partials {
        args.push("--include-partial-messages".to_string());
    }

    if !config.model.is_empty() {
        args.push("--model".to_string());
        args.push(config.model.clone());
    }

    if let Some(mode) = config.permission_mode.as_deref().filter(|m| !m.is_empty()) {
        args.push("--permission-mode".to_string());
        args.push(mode.to_string());
    }

    if !config.tools.is_empty() {
        args.push("--tools".to_string());
        args.push(config.tools.join(","));
    }

    if let Some(max_turns) = config.max_turns {
        args.push("--max-turns".to_string());
        args.push(max_turns.to_string());
    }

    // File prompt wins; the inline prompt is dropped entirely when both are set.
    if let Some(file) = config
        .system_prompt_file
        .as_deref()
        .filter(|f| !f.is_empty())
    {
        args.push("--system-prompt-file".to_string());
        args.push(file.to_string());
    } else if let Some(prompt) = config.system_prompt.as_deref().filter(|p| !p.is_empty()) {
        args.push("--system-prompt".to_string());
        args.push(prompt.to_string());
    }

    // Always exactly one occurrence, caller text first, directive appended.
    let append = match config
        .append_system_prompt
        .as_deref()
        .filter(|p| !p.is_empty())
    {
        Some(caller) => format!("{caller}\n\n{NO_QUESTIONS_DIRECTIVE}"),
        None => NO_QUESTIONS_DIRECTIVE.to_string(),
    };
    args.push("--append-system-prompt".to_string());
    args.push(append);

    match resume_session_id.filter(|s| !s.is_empty()) {
        Some(session_id) => {
            args.push("--resume".to_string());
            args.push(session_id.to_string());
        }
        None if config.continue_conversation => {
            args.push("--continue".to_string());
        }
        None => {}
    }

    if config.no_session_persistence {
        args.push("--no-session-persistence".to_string());
    }

    CommandLine {
        program: program.to_string(),
        args,
    }
}

/// Escape a string for safe use in a shell command.
pub fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '/')
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}
