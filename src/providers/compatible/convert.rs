//! Internal message model <-> OpenAI-style chat-completions wire shapes.

use crate::providers::traits::{ContentPart, Message, ToolCall};
use crate::tools::ToolSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Request side ─────────────────────────────────────────────────

/// One chat-completions message. `content` is always present and is `null`
/// rather than `""` when there is no text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireFunction {
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireToolFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Serialize arguments as JSON text for the wire. A missing value becomes an
/// empty object.
fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

fn to_wire_tool_call(call: ToolCall) -> WireToolCall {
    WireToolCall {
        id: call.id,
        kind: "function",
        function: WireFunction {
            arguments: encode_arguments(&call.arguments),
            name: call.name,
        },
    }
}

fn to_wire_message(message: &Message) -> WireMessage {
    match message {
        Message::User(user) => WireMessage {
            role: "user",
            content: non_empty(user.content.text()),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::Assistant(assistant) => {
            let tool_calls: Vec<WireToolCall> = assistant
                .content
                .iter()
                .filter_map(ContentPart::as_tool_call)
                .map(to_wire_tool_call)
                .collect();
            WireMessage {
                role: "assistant",
                content: non_empty(assistant.text()),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }
        }
        Message::ToolResult(result) => {
            // A result without an id can no longer be correlated with its call;
            // a fresh id keeps the payload well-formed.
            let tool_call_id = result
                .tool_call_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("unknown_{}", uuid::Uuid::new_v4()));
            WireMessage {
                role: "tool",
                content: non_empty(result.content.text()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id),
            }
        }
    }
}

/// Build the wire message list: the system prompt first (when non-blank),
/// then one entry per turn in order.
pub fn build_wire_messages(system_prompt: Option<&str>, messages: &[Message]) -> Vec<WireMessage> {
    let system = system_prompt
        .filter(|prompt| !prompt.trim().is_empty())
        .map(|prompt| WireMessage {
            role: "system",
            content: Some(prompt.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });

    system
        .into_iter()
        .chain(messages.iter().map(to_wire_message))
        .collect()
}

/// Convert tool descriptors, dropping any without a usable name.
pub fn build_wire_tools(tools: &[ToolSpec]) -> Vec<WireTool> {
    tools
        .iter()
        .filter(|tool| !tool.name.trim().is_empty())
        .map(|tool| WireTool {
            kind: "function",
            function: WireToolFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: if tool.parameters.is_null() {
                    serde_json::json!({ "type": "object", "properties": {} })
                } else {
                    tool.parameters.clone()
                },
            },
        })
        .collect()
}

// ── Response side ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiChatResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Option<Vec<Choice>>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Thinking models return their chain of thought here; some of them also
    /// emit tool calls inside it.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<ResponseFunction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFunction {
    #[serde(default)]
    pub name: Option<String>,
    /// Normally a JSON string; some servers send the object directly.
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ApiUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::traits::{AssistantMessage, MessageContent, ToolResultMessage, Usage};
    use serde_json::json;

    fn assistant(content: Vec<ContentPart>) -> Message {
        Message::Assistant(AssistantMessage {
            content,
            api: String::new(),
            provider: String::new(),
            model: String::new(),
            usage: Usage::default(),
            stop_reason: crate::providers::StopReason::ToolUse,
            error_message: None,
            timestamp: 0,
        })
    }

    #[test]
    fn system_prompt_comes_first() {
        let wire = build_wire_messages(Some("be brief"), &[Message::user("hi")]);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[0].content.as_deref(), Some("be brief"));
        assert_eq!(wire[1].role, "user");
    }

    #[test]
    fn blank_system_prompt_is_skipped() {
        let wire = build_wire_messages(Some("  "), &[Message::user("hi")]);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "user");
    }

    #[test]
    fn text_parts_concatenate_without_separator() {
        let message = Message::user(vec![
            ContentPart::text("a"),
            ContentPart::Image {
                data: "AA==".into(),
                mime_type: "image/png".into(),
            },
            ContentPart::text("b"),
        ]);
        let wire = build_wire_messages(None, &[message]);
        assert_eq!(wire[0].content.as_deref(), Some("ab"));
    }

    #[test]
    fn assistant_with_only_tool_calls_serializes_null_content() {
        let message = assistant(vec![ContentPart::ToolCall {
            id: "c1".into(),
            name: "read".into(),
            arguments: json!({"path": "a.txt"}),
        }]);
        let wire = build_wire_messages(None, &[message]);
        let encoded = serde_json::to_value(&wire[0]).unwrap();

        assert!(encoded["content"].is_null());
        assert_eq!(encoded["tool_calls"][0]["type"], "function");
        assert_eq!(encoded["tool_calls"][0]["function"]["name"], "read");
        let args: Value =
            serde_json::from_str(encoded["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
                .unwrap();
        assert_eq!(args, json!({"path": "a.txt"}));
    }

    #[test]
    fn tool_use_parts_convert_like_tool_calls() {
        let message = assistant(vec![
            ContentPart::text("let me look"),
            ContentPart::ToolUse {
                id: "u1".into(),
                name: "exec".into(),
                input: json!({"cmd": "ls"}),
            },
            ContentPart::ToolCall {
                id: "c2".into(),
                name: "read".into(),
                arguments: Value::Null,
            },
        ]);
        let wire = build_wire_messages(None, &[message]);
        let calls = wire[0].tool_calls.as_ref().unwrap();

        assert_eq!(wire[0].content.as_deref(), Some("let me look"));
        assert_eq!(calls[0].id, "u1");
        assert_eq!(calls[0].function.arguments, r#"{"cmd":"ls"}"#);
        assert_eq!(calls[1].function.arguments, "{}");
    }

    #[test]
    fn string_arguments_are_serialized_as_json() {
        let message = assistant(vec![ContentPart::ToolCall {
            id: "c1".into(),
            name: "exec".into(),
            arguments: json!("ls -la"),
        }]);
        let wire = build_wire_messages(None, &[message]);
        let encoded = &wire[0].tool_calls.as_ref().unwrap()[0].function.arguments;
        assert_eq!(encoded, r#""ls -la""#);
        assert_eq!(serde_json::from_str::<Value>(encoded).unwrap(), json!("ls -la"));
    }

    #[test]
    fn tool_result_keeps_id_and_role() {
        let message = Message::tool_result(Some("c1".into()), "file contents");
        let wire = build_wire_messages(None, &[message]);
        assert_eq!(wire[0].role, "tool");
        assert_eq!(wire[0].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(wire[0].content.as_deref(), Some("file contents"));
    }

    #[test]
    fn tool_result_without_id_gets_unknown_prefix() {
        let message = Message::ToolResult(ToolResultMessage {
            tool_call_id: None,
            tool_name: None,
            content: MessageContent::Text(String::new()),
            is_error: false,
            timestamp: 0,
        });
        let wire = build_wire_messages(None, &[message]);
        assert!(wire[0]
            .tool_call_id
            .as_deref()
            .unwrap()
            .starts_with("unknown_"));
        assert!(wire[0].content.is_none());
    }

    #[test]
    fn tools_without_names_are_dropped_and_parameters_default() {
        let tools = vec![
            ToolSpec {
                name: "read".into(),
                description: String::new(),
                parameters: Value::Null,
            },
            ToolSpec {
                name: "   ".into(),
                description: "ghost".into(),
                parameters: json!({"type": "object"}),
            },
        ];
        let wire = build_wire_tools(&tools);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].function.name, "read");
        assert_eq!(wire[0].function.description, "");
        assert_eq!(wire[0].function.parameters["type"], "object");
    }

    #[test]
    fn response_tolerates_missing_fields() {
        let body = r#"{"choices":[{"message":{"content":"hi"}}]}"#;
        let parsed: ApiChatResponse = serde_json::from_str(body).unwrap();
        let choices = parsed.choices.unwrap();
        assert_eq!(choices[0].message.content.as_deref(), Some("hi"));
        assert!(choices[0].finish_reason.is_none());
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn response_accepts_object_arguments() {
        let body = r#"{"choices":[{"message":{"tool_calls":[{"function":{"name":"read","arguments":{"path":"x"}}}]}}]}"#;
        let parsed: ApiChatResponse = serde_json::from_str(body).unwrap();
        let choices = parsed.choices.unwrap();
        let calls = choices[0].message.tool_calls.clone().unwrap();
        let call = &calls[0];
        assert!(call.id.is_none());
        assert_eq!(
            call.function.as_ref().unwrap().arguments,
            Some(json!({"path": "x"}))
        );
    }
}
