//! NDJSON event model for agent CLI output.
//!
//! The agent CLI emits one JSON object per stdout line. Each line is decoded
//! once, at this boundary, into a closed set of variants; downstream code
//! matches on the variants instead of probing raw JSON for keys. Unknown
//! event kinds decode to [`AgentEvent::Other`] and malformed lines decode to
//! `None`, so a parse never fails the stream.

pub mod summary;

use serde::Deserialize;
use serde_json::Value;

pub use summary::{RunSummary, summarize};

/// One decoded line of agent output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Session bootstrap (`subtype: "init"` carries session id and model).
    System(SystemEvent),
    /// A full assistant message, possibly from a parallel sidechain agent.
    Assistant(AssistantEvent),
    /// Partial content-block delta emitted while streaming.
    StreamEvent(StreamDelta),
    /// Terminal event with cumulative usage and the final text.
    Result(ResultEvent),
    /// Any event kind this version does not model.
    #[serde(other)]
    Other,
}

/// Decode a single NDJSON line. Blank and malformed lines yield `None`.
pub fn decode_line(line: &str) -> Option<AgentEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemEvent {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantEvent {
    #[serde(default)]
    pub message: AssistantMessage,
    /// Marks a parallel sub-agent turn, excluded from aggregate accounting.
    #[serde(default, rename = "isSidechain")]
    pub is_sidechain: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub model: Option<String>,
}

/// A block inside an assistant message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Token usage figures as reported by the CLI.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Envelope for partial streaming events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub event: Option<PartialEvent>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl StreamDelta {
    /// Extract the text fragment carried by a `text_delta`, if any.
    pub fn text_fragment(&self) -> Option<&str> {
        match self.event.as_ref()? {
            PartialEvent::ContentBlockDelta { delta } => match delta {
                ContentDelta::TextDelta { text } => Some(text.as_str()),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Inner partial event per the streaming protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartialEvent {
    ContentBlockStart {},
    ContentBlockDelta {
        #[serde(default)]
        delta: ContentDelta,
    },
    ContentBlockStop {},
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta {
        #[serde(default)]
        text: String,
    },
    ThinkingDelta {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    #[default]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultEvent {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: Option<bool>,
    /// Final textual result of the run.
    #[serde(default)]
    pub result: Option<String>,
    /// Cumulative usage across the whole run.
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    /// Per-model usage map, keyed by full model id.
    #[serde(default, rename = "modelUsage")]
    pub model_usage: Option<Value>,
    #[serde(default)]
    pub num_turns: Option<u64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ResultEvent {
    /// First entry of the per-model usage map: `(model id, context window)`.
    ///
    /// Returns `None` when the map is absent or empty; callers must then omit
    /// model and context-window figures rather than defaulting them.
    pub fn primary_model_usage(&self) -> Option<(&str, Option<u64>)> {
        let (model, entry) = self.model_usage.as_ref()?.as_object()?.iter().next()?;
        let context_window = entry.get("contextWindow").and_then(Value::as_u64);
        Some((model.as_str(), context_window))
    }
}
