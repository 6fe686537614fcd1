use crate::tools::ToolSpec;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio_util::sync::CancellationToken;

// ── Content ──────────────────────────────────────────────────────

/// One ordered piece of message content.
///
/// Tool-call requests arrive under two naming conventions: the agent runtime's
/// own `toolCall{arguments}` and the Anthropic-style `tool_use{input}` carried
/// over from imported transcripts. Both are accepted and treated identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType", alias = "mime_type")]
        mime_type: String,
    },
    #[serde(rename = "toolCall")]
    ToolCall {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(rename = "toolResult", alias = "tool_result")]
    ToolResult {
        #[serde(rename = "toolCallId", alias = "tool_use_id", default)]
        tool_call_id: Option<String>,
        #[serde(default)]
        content: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::ToolCall { .. } => "toolCall",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "toolResult",
        }
    }

    /// View a tool-call request part, whichever convention it uses.
    pub fn as_tool_call(&self) -> Option<ToolCall> {
        match self {
            Self::ToolCall {
                id,
                name,
                arguments,
            } => Some(ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            Self::ToolUse { id, name, input } => Some(ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
            }),
            _ => None,
        }
    }
}

/// Message content: either a bare string or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Parts(Vec::new())
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(value: Vec<ContentPart>) -> Self {
        Self::Parts(value)
    }
}

impl MessageContent {
    /// Concatenate the text of this content, dropping non-text parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => concat_text_parts(parts),
        }
    }
}

/// Join text parts in order with no separator.
pub fn concat_text_parts(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// A tool call in its structured (internal) representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

// ── Usage & stop reason ──────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
    pub total: f64,
}

/// Token accounting for one provider call. Cost stays zero-filled when the
/// provider does not report pricing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total_tokens: u64,
    pub cost: UsageCost,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    #[default]
    Stop,
    Length,
    ToolUse,
    Error,
    Aborted,
}

impl StopReason {
    /// Reason reported on a successful terminal event: only `toolUse` survives,
    /// everything else collapses to `stop`.
    pub fn terminal(self) -> Self {
        match self {
            Self::ToolUse => Self::ToolUse,
            _ => Self::Stop,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::ToolUse => write!(f, "toolUse"),
            Self::Error => write!(f, "error"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

// ── Messages ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub content: MessageContent,
    #[serde(default)]
    pub timestamp: i64,
}

/// The assistant envelope produced by one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub api: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

impl AssistantMessage {
    pub fn empty(model: &ModelSpec) -> Self {
        Self {
            content: Vec::new(),
            api: model.api.clone(),
            provider: model.provider.clone(),
            model: model.id.clone(),
            usage: Usage::default(),
            stop_reason: StopReason::Stop,
            error_message: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Envelope for a failed or aborted call: no content, zero usage.
    pub fn failed(model: &ModelSpec, reason: StopReason, message: impl Into<String>) -> Self {
        Self {
            stop_reason: reason,
            error_message: Some(message.into()),
            ..Self::empty(model)
        }
    }

    pub fn text(&self) -> String {
        concat_text_parts(&self.content)
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(ContentPart::as_tool_call)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultMessage {
    #[serde(default, alias = "tool_call_id")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub timestamp: i64,
}

/// A single turn in a conversation, tagged by `role`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    #[serde(alias = "tool")]
    ToolResult(ToolResultMessage),
}

impl Message {
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::User(UserMessage {
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn tool_result(tool_call_id: Option<String>, content: impl Into<MessageContent>) -> Self {
        Self::ToolResult(ToolResultMessage {
            tool_call_id,
            tool_name: None,
            content: content.into(),
            is_error: false,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::ToolResult(_) => "toolResult",
        }
    }
}

// ── Call inputs ──────────────────────────────────────────────────

/// Everything the model sees for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

/// Identifies the model a call is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub id: String,
    pub provider: String,
    pub api: String,
    pub base_url: String,
}

/// Per-call options resolved by the caller.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub api_key: Option<String>,
    pub headers: HashMap<String, String>,
    /// Cooperative cancellation; firing it aborts the in-flight request.
    pub cancel: CancellationToken,
}

// ── Events ───────────────────────────────────────────────────────

/// Terminal events a provider stream can emit.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantMessageEvent {
    Done {
        reason: StopReason,
        message: AssistantMessage,
    },
    Error {
        reason: StopReason,
        error: AssistantMessage,
    },
}

impl AssistantMessageEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            Self::Error {
                reason: StopReason::Aborted,
                ..
            }
        )
    }

    pub fn into_message(self) -> AssistantMessage {
        match self {
            Self::Done { message, .. } => message,
            Self::Error { error, .. } => error,
        }
    }
}

/// Sending half handed to the task that produces events.
pub type AssistantEventSender = tokio::sync::mpsc::Sender<AssistantMessageEvent>;

/// Event stream returned by a [`StreamFn`]. Ends once the producer is done.
pub struct AssistantMessageEventStream {
    inner: BoxStream<'static, AssistantMessageEvent>,
}

impl AssistantMessageEventStream {
    pub fn channel() -> (AssistantEventSender, Self) {
        let (tx, rx) = tokio::sync::mpsc::channel::<AssistantMessageEvent>(8);
        let inner = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed();
        (tx, Self { inner })
    }

    /// Drain the stream and return the final envelope.
    ///
    /// A stream that closes without a terminal event yields an error envelope.
    pub async fn result(mut self, model: &ModelSpec) -> AssistantMessage {
        let mut last = None;
        while let Some(event) = self.inner.next().await {
            last = Some(event);
        }
        last.map(AssistantMessageEvent::into_message)
            .unwrap_or_else(|| {
                AssistantMessage::failed(
                    model,
                    StopReason::Error,
                    "stream ended without a terminal event",
                )
            })
    }
}

impl Stream for AssistantMessageEventStream {
    type Item = AssistantMessageEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// The streaming contract the agent runtime calls for every model turn.
pub trait StreamFn: Send + Sync {
    fn stream(
        &self,
        model: &ModelSpec,
        context: &Context,
        options: StreamOptions,
    ) -> AssistantMessageEventStream;
}
