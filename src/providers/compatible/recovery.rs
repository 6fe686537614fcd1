//! Recovery of tool calls and text from non-conforming chat-completions output.
//!
//! Some OpenAI-compatible servers leak `</think>` reasoning into `content`,
//! emit tool calls as inline `<tool_call>{...}</tool_call>` markup (sometimes
//! inside `reasoning_content`), and double-encode argument strings. Everything
//! here is best-effort: a malformed item is reported to the diagnostics sink
//! and dropped or patched, never turned into a failed call.

use super::convert::{ApiChatResponse, ApiUsage, ResponseToolCall};
use super::CompatError;
use crate::config::ProviderCompatConfig;
use crate::observability::DiagnosticSink;
use crate::providers::traits::{AssistantMessage, ContentPart, ModelSpec, StopReason, Usage};
use crate::util::truncate_with_ellipsis;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

const COMPONENT: &str = "provider-compat";
const PREVIEW_CHARS: usize = 120;
const THINK_CLOSE: &str = "</think>";

static INLINE_TOOL_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").unwrap());

/// A tool call whose arguments are still a JSON string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Which response field inline markup was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineSource {
    Content,
    Reasoning,
}

impl InlineSource {
    fn label(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Reasoning => "reasoning_content",
        }
    }
}

/// Text left after inline extraction plus the calls that were recovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineExtraction {
    pub text: String,
    pub calls: Vec<RawToolCall>,
}

/// Drop everything up to and including the last `</think>` and trim the rest.
/// Text without the marker is returned unchanged.
pub fn strip_thinking(text: &str) -> String {
    match text.rfind(THINK_CLOSE) {
        Some(idx) => text[idx + THINK_CLOSE.len()..].trim().to_string(),
        None => text.to_string(),
    }
}

fn encode_raw_arguments(raw: Option<&Value>) -> String {
    match raw {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn parse_inline_block(body: &str) -> Option<(String, String)> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())?
        .to_string();
    let raw_arguments = value.get("arguments").or_else(|| value.get("parameters"));
    Some((name, encode_raw_arguments(raw_arguments)))
}

/// Pull every `<tool_call>` block out of `text`.
///
/// Blocks that are not JSON or lack a string `name` are reported and dropped.
/// When at least one block is present, the blocks are removed and the
/// remaining text is trimmed.
pub fn extract_inline_tool_calls(
    text: &str,
    source: InlineSource,
    sink: &dyn DiagnosticSink,
) -> InlineExtraction {
    if !text.contains("<tool_call>") {
        return InlineExtraction {
            text: text.to_string(),
            calls: Vec::new(),
        };
    }

    let mut calls = Vec::new();
    for cap in INLINE_TOOL_CALL_RE.captures_iter(text) {
        let body = cap.get(1).map_or("", |m| m.as_str());
        match parse_inline_block(body) {
            Some((name, arguments)) => calls.push(RawToolCall {
                id: format!("inline_{}", uuid::Uuid::new_v4()),
                name,
                arguments,
            }),
            None => sink.warn(
                COMPONENT,
                &format!(
                    "Dropping malformed inline tool call in {}: {}",
                    source.label(),
                    truncate_with_ellipsis(body.trim(), PREVIEW_CHARS)
                ),
            ),
        }
    }

    InlineExtraction {
        text: INLINE_TOOL_CALL_RE.replace_all(text, "").trim().to_string(),
        calls,
    }
}

/// Collapse one layer of string encoding: `"\"{\\\"a\\\":1}\""` becomes
/// `{"a":1}`. Anything that does not decode to a JSON string is returned as-is.
pub fn unwrap_double_encoded(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(inner)) => inner,
        _ => raw.to_string(),
    }
}

/// Parse an argument string into an object. Failures are reported and
/// replaced with `{}` so the call can still run.
pub fn parse_arguments(name: &str, raw: &str, sink: &dyn DiagnosticSink) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Object(Map::new());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            sink.warn(
                COMPONENT,
                &format!(
                    "Tool call {name} arguments are not a JSON object ({}); using {{}}",
                    truncate_with_ellipsis(&other.to_string(), PREVIEW_CHARS)
                ),
            );
            Value::Object(Map::new())
        }
        Err(error) => {
            sink.warn(
                COMPONENT,
                &format!(
                    "Tool call {name} arguments are not valid JSON ({error}): {}; using {{}}",
                    truncate_with_ellipsis(trimmed, PREVIEW_CHARS)
                ),
            );
            Value::Object(Map::new())
        }
    }
}

fn structured_tool_calls(
    tool_calls: Option<Vec<ResponseToolCall>>,
    sink: &dyn DiagnosticSink,
) -> Vec<RawToolCall> {
    tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|call| {
            let Some(function) = call.function else {
                sink.warn(COMPONENT, "Dropping structured tool call without a function");
                return None;
            };
            let Some(name) = function
                .name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
            else {
                sink.warn(COMPONENT, "Dropping structured tool call without a name");
                return None;
            };
            Some(RawToolCall {
                id: call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4())),
                name,
                arguments: encode_raw_arguments(function.arguments.as_ref()),
            })
        })
        .collect()
}

fn usage_from(api: Option<ApiUsage>) -> Usage {
    let api = api.unwrap_or_default();
    let input = api.prompt_tokens.unwrap_or(0);
    let output = api.completion_tokens.unwrap_or(0);
    Usage {
        input,
        output,
        total_tokens: api.total_tokens.unwrap_or_else(|| input.saturating_add(output)),
        ..Usage::default()
    }
}

/// Turn a parsed chat-completions response into an assistant envelope.
///
/// Tool calls are ordered structured first, then those recovered from
/// `content`, then those recovered from `reasoning_content`. Reasoning text
/// itself is discarded.
pub fn recover_assistant_message(
    response: ApiChatResponse,
    model: &ModelSpec,
    compat: &ProviderCompatConfig,
    sink: &dyn DiagnosticSink,
) -> Result<AssistantMessage, CompatError> {
    let usage = usage_from(response.usage);
    let choice = response
        .choices
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| CompatError::NoChoices(model.provider.clone()))?;
    let message = choice.message;

    let mut raw_calls = structured_tool_calls(message.tool_calls, sink);

    let content = strip_thinking(message.content.as_deref().unwrap_or_default());
    let from_content = extract_inline_tool_calls(&content, InlineSource::Content, sink);
    raw_calls.extend(from_content.calls);

    if let Some(reasoning) = message.reasoning_content.as_deref() {
        raw_calls.extend(extract_inline_tool_calls(reasoning, InlineSource::Reasoning, sink).calls);
    }

    let mut envelope = AssistantMessage::empty(model);
    if !from_content.text.is_empty() {
        envelope.content.push(ContentPart::text(from_content.text));
    }

    for call in raw_calls {
        let arguments = if compat.unwrap_double_encoded_tool_args {
            unwrap_double_encoded(&call.arguments)
        } else {
            call.arguments
        };
        envelope.content.push(ContentPart::ToolCall {
            arguments: parse_arguments(&call.name, &arguments, sink),
            id: call.id,
            name: call.name,
        });
    }

    envelope.stop_reason = if envelope.tool_calls().is_empty() {
        match choice.finish_reason.as_deref() {
            Some("length") => StopReason::Length,
            _ => StopReason::Stop,
        }
    } else {
        StopReason::ToolUse
    };
    envelope.usage = usage;

    Ok(envelope)
}
