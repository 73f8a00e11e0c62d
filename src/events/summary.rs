//! Run summary derivation from captured NDJSON output.
//!
//! The summary is always recomputed from the durable log text, never stored
//! on its own. Context-fill figures come from the *last* non-sidechain
//! assistant message (the most recent call reflects current context fill);
//! output tokens and turn count come from the terminal `result` event.

use serde::Serialize;
use serde_json::Value;

use super::{AgentEvent, ContentBlock, TokenUsage, decode_line};

/// Structured summary of one finished (or aborted) run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RunSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Short model name, e.g. `opus-4.5`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u64>,
    pub input_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub output_tokens: u64,
    pub num_turns: u64,
    /// Tool invocations in document order, rendered as `Name: primary arg`.
    pub tool_calls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Derive a [`RunSummary`] from raw NDJSON text.
///
/// Total: malformed lines are skipped, and input without a `result` event
/// (including empty or entirely non-JSON input) yields `None`.
pub fn summarize(raw: &str) -> Option<RunSummary> {
    let mut last_usage: Option<TokenUsage> = None;
    let mut assistant_output_total: u64 = 0;
    let mut assistant_count: u64 = 0;
    let mut tool_calls: Vec<String> = Vec::new();
    let mut result = None;

    for line in raw.lines() {
        match decode_line(line) {
            Some(AgentEvent::Assistant(event)) => {
                if event.is_sidechain {
                    continue;
                }
                assistant_count += 1;
                if let Some(usage) = event.message.usage {
                    last_usage = Some(usage);
                    assistant_output_total += usage.output_tokens;
                }
                for block in &event.message.content {
                    if let ContentBlock::ToolUse { name, input } = block {
                        tool_calls.push(render_tool_call(name, input));
                    }
                }
            }
            Some(AgentEvent::Result(event)) => {
                result = Some(event);
            }
            _ => {}
        }
    }

    let result = result?;

    let usage = last_usage.unwrap_or_default();
    let output_tokens = match result.usage {
        Some(cumulative) => cumulative.output_tokens,
        None => assistant_output_total,
    };
    let num_turns = result.num_turns.unwrap_or(assistant_count);
    let (model, context_window) = match result.primary_model_usage() {
        Some((id, window)) => (Some(short_model_name(id)), window),
        None => (None, None),
    };

    Some(RunSummary {
        session_id: result.session_id.clone(),
        model,
        context_window,
        input_tokens: usage.input_tokens,
        cache_creation_tokens: usage.cache_creation_input_tokens,
        cache_read_tokens: usage.cache_read_input_tokens,
        output_tokens,
        num_turns,
        tool_calls,
        duration_ms: result.duration_ms,
        result: result.result.clone(),
    })
}

/// Maximum command length shown for a `Bash` invocation.
const BASH_PREVIEW_CHARS: usize = 80;

/// Render one tool invocation as `Name: primary argument`.
fn render_tool_call(name: &str, input: &Value) -> String {
    let arg = |key: &str| input.get(key).and_then(Value::as_str);
    let detail = match name {
        "Read" | "Edit" | "Write" => arg("file_path"),
        "Glob" | "Grep" => arg("pattern"),
        "Bash" => {
            return match arg("command") {
                Some(command) => {
                    let preview: String = command.chars().take(BASH_PREVIEW_CHARS).collect();
                    format!("{name}: {preview}")
                }
                None => name.to_string(),
            };
        }
        "Task" => arg("description"),
        _ => None,
    };
    match detail {
        Some(detail) => format!("{name}: {detail}"),
        None => name.to_string(),
    }
}

/// Normalize a full model id to its short form.
///
/// `claude-opus-4-5-20251101` becomes `opus-4.5`; ids that do not follow the
/// `claude-<family>-<version…>[-<date>]` shape pass through verbatim.
pub fn short_model_name(id: &str) -> String {
    let Some(rest) = id.strip_prefix("claude-") else {
        return id.to_string();
    };

    let mut segments: Vec<&str> = rest.split('-').collect();
    if let Some(last) = segments.last() {
        if last.len() == 8 && last.chars().all(|c| c.is_ascii_digit()) {
            segments.pop();
        }
    }

    let Some((family, version)) = segments.split_first() else {
        return id.to_string();
    };
    if family.is_empty() || !family.chars().all(|c| c.is_ascii_alphabetic()) {
        return id.to_string();
    }
    if version.iter().any(|s| !s.chars().all(|c| c.is_ascii_digit()) || s.is_empty()) {
        return id.to_string();
    }

    if version.is_empty() {
        (*family).to_string()
    } else {
        format!("{}-{}", family, version.join("."))
    }
}
