// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Transcript events
//!
//! The flat, time-ordered execution log a timeline is reconstructed from.
//! Every event carries a required timestamp plus optional span linkage and a
//! `uuid`; the payload is a closed enum tagged by the `event` field, so adding
//! a new kind is a compile-checked change everywhere events are matched.
//!
//! # Wire shape
//!
//! ```json
//! {"event": "model", "timestamp": "2025-01-01T00:00:00Z", "span_id": "a1",
//!  "uuid": "e7", "model": "gpt-4o", "input": [...], "output": {...}}
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TimelineError};

/// A single transcript event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the event started (required, every event must be orderable)
    pub timestamp: DateTime<Utc>,

    /// Seconds since the sample started working, when recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_start: Option<f64>,

    /// Id of the span this event was emitted inside
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Stable event identifier, used to anchor fork points
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payload, tagged by the `event` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Model(ModelEvent),
    Tool(ToolEvent),
    SpanBegin(SpanBeginEvent),
    SpanEnd(SpanEndEvent),
    Compaction(CompactionEvent),
    Score(ScoreEvent),
    Info(InfoEvent),
    Logger(LoggerEvent),
    Error(ErrorEvent),
    State(ChangeEvent),
    Store(ChangeEvent),
    SampleInit(SampleInitEvent),
    Subtask(SubtaskEvent),
    /// Any kind this crate does not model; kept as an opaque leaf
    #[serde(other)]
    Other,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, kind: impl Into<EventKind>) -> Self {
        Self {
            timestamp,
            working_start: None,
            span_id: None,
            uuid: None,
            kind: kind.into(),
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    /// Wire name of the event kind
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EventKind::Model(_) => "model",
            EventKind::Tool(_) => "tool",
            EventKind::SpanBegin(_) => "span_begin",
            EventKind::SpanEnd(_) => "span_end",
            EventKind::Compaction(_) => "compaction",
            EventKind::Score(_) => "score",
            EventKind::Info(_) => "info",
            EventKind::Logger(_) => "logger",
            EventKind::Error(_) => "error",
            EventKind::State(_) => "state",
            EventKind::Store(_) => "store",
            EventKind::SampleInit(_) => "sample_init",
            EventKind::Subtask(_) => "subtask",
            EventKind::Other => "other",
        }
    }

    /// Completion time if recorded, otherwise the start timestamp
    pub fn end_time(&self) -> DateTime<Utc> {
        let completed = match &self.kind {
            EventKind::Model(model) => model.completed,
            EventKind::Tool(tool) => tool.completed,
            _ => None,
        };
        completed.unwrap_or(self.timestamp)
    }

    /// Tokens consumed by this event (model events only)
    pub fn total_tokens(&self) -> u64 {
        match &self.kind {
            EventKind::Model(model) => model.output.usage.as_ref().map_or(0, ModelUsage::total),
            _ => 0,
        }
    }

    /// Error text carried by a model or tool event
    pub fn error_message(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Model(model) => model.error.as_deref().or(model.output.error.as_deref()),
            EventKind::Tool(tool) => tool.error.as_ref().map(|e| e.message.as_str()),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&ModelEvent> {
        match &self.kind {
            EventKind::Model(model) => Some(model),
            _ => None,
        }
    }

    pub fn as_tool(&self) -> Option<&ToolEvent> {
        match &self.kind {
            EventKind::Tool(tool) => Some(tool),
            _ => None,
        }
    }

    pub fn is_compaction(&self) -> bool {
        matches!(self.kind, EventKind::Compaction(_))
    }
}

/// Call to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvent {
    pub model: String,
    #[serde(default)]
    pub input: Vec<ChatMessage>,
    #[serde(default)]
    pub output: ModelOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

impl ModelEvent {
    pub fn new(model: impl Into<String>, input: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            input,
            output: ModelOutput::default(),
            error: None,
            completed: None,
        }
    }

    pub fn with_output(mut self, message: ChatMessage) -> Self {
        self.output.choices.push(ChatCompletionChoice {
            message,
            stop_reason: Some("stop".to_string()),
        });
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.output.usage = Some(ModelUsage {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            ..ModelUsage::default()
        });
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn completed_at(mut self, completed: DateTime<Utc>) -> Self {
        self.completed = Some(completed);
        self
    }

    /// First choice's message
    pub fn output_message(&self) -> Option<&ChatMessage> {
        self.output.choices.first().map(|choice| &choice.message)
    }

    /// Text of the first system message in the input
    pub fn system_prompt(&self) -> Option<String> {
        self.input
            .iter()
            .find(|message| message.role == Role::System)
            .map(|message| message.content.to_stable_string())
    }
}

/// Model response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelOutput {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatCompletionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ModelUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChoice {
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Token usage reported for a model call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens_cache_write: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens_cache_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl ModelUsage {
    /// Sum of every per-category field; `total_tokens` is provider-reported
    /// and not added again.
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.input_tokens_cache_write.unwrap_or(0)
            + self.input_tokens_cache_read.unwrap_or(0)
            + self.reasoning_tokens.unwrap_or(0)
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Message content: plain text or structured content parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Structured(Value),
}

impl MessageContent {
    /// Stable serialization: strings as-is, structured content as JSON with
    /// sorted object keys.
    pub fn to_stable_string(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Structured(value) => value.to_string(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

/// A chat message in a model's input or output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn system(content: &str) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: &str, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    /// Tool call id, referenced by `tool_call_id` of tool messages
    pub id: String,
    pub function: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolCallError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

impl ToolEvent {
    pub fn new(id: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function: function.into(),
            arguments: Value::Null,
            result: Value::Null,
            error: None,
            completed: None,
        }
    }

    pub fn with_error(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ToolCallError {
            kind: kind.into(),
            message: message.into(),
        });
        self
    }

    pub fn completed_at(mut self, completed: DateTime<Utc>) -> Self {
        self.completed = Some(completed);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// Opens a span; `id` is referenced by later `span_id`/`parent_id` fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanBeginEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Declared span type ("agent", "solver", "tool", "scorers", ...)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub span_type: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl SpanBeginEvent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            span_type: None,
            name: name.into(),
            metadata: None,
        }
    }

    pub fn with_type(mut self, span_type: impl Into<String>) -> Self {
        self.span_type = Some(span_type.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// `metadata.description`, when the emitter recorded one
    pub fn description(&self) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEndEvent {
    pub id: String,
}

impl SpanEndEvent {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Context compaction; invalidates prior conversation context
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompactionEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_before: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_after: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub score: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
    #[serde(default)]
    pub intermediate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerEvent {
    #[serde(default)]
    pub message: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: EvalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalError {
    pub message: String,
    #[serde(default)]
    pub traceback: String,
}

/// State or store change set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(default)]
    pub changes: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInitEvent {
    #[serde(default)]
    pub sample: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskEvent {
    pub name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub result: Value,
}

macro_rules! impl_event_kind_from {
    ($($payload:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$payload> for EventKind {
                fn from(payload: $payload) -> Self {
                    EventKind::$variant(payload)
                }
            }
        )*
    };
}

impl_event_kind_from! {
    ModelEvent => Model,
    ToolEvent => Tool,
    SpanBeginEvent => SpanBegin,
    SpanEndEvent => SpanEnd,
    CompactionEvent => Compaction,
    ScoreEvent => Score,
    InfoEvent => Info,
    LoggerEvent => Logger,
    ErrorEvent => Error,
    SampleInitEvent => SampleInit,
    SubtaskEvent => Subtask,
}

/// Parse events from either a JSON array or JSON Lines
pub fn parse_events(text: &str) -> Result<Vec<Event>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|source| TimelineError::Parse {
            line: source.line(),
            source,
        });
    }

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| TimelineError::Parse {
                line: index + 1,
                source,
            })
        })
        .collect()
}

/// Read and parse an event file
pub fn load_events(path: impl AsRef<Path>) -> Result<Vec<Event>> {
    let text = std::fs::read_to_string(path)?;
    parse_events(&text)
}
