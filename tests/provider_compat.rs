//! Non-streaming compat transport against a mock chat-completions server.

use futures_util::StreamExt;
use openclaw_compat::config::ProviderCompatConfig;
use openclaw_compat::observability::MemorySink;
use openclaw_compat::providers::compatible::CompatTransport;
use openclaw_compat::providers::traits::{
    AssistantMessageEvent, Context, Message, ModelSpec, StopReason, StreamFn, StreamOptions,
};
use openclaw_compat::tools::ToolSpec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn model(base_url: &str) -> ModelSpec {
    ModelSpec {
        id: "qwen3-coder".into(),
        provider: "local".into(),
        api: "openai-completions".into(),
        base_url: base_url.into(),
    }
}

fn transport(compat: ProviderCompatConfig) -> (CompatTransport, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::default());
    (CompatTransport::new(compat, sink.clone()), sink)
}

fn context(tools: Vec<ToolSpec>) -> Context {
    Context {
        system_prompt: Some("You are terse.".into()),
        messages: vec![Message::user("read a.txt")],
        tools,
    }
}

fn completion(message: Value, finish_reason: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{"message": message, "finish_reason": finish_reason}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 5}
    })
}

async fn mount_completion(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

async fn single_event(
    transport: &CompatTransport,
    model: &ModelSpec,
    context: &Context,
    options: StreamOptions,
) -> AssistantMessageEvent {
    let events: Vec<_> = transport.stream(model, context, options).collect().await;
    assert_eq!(events.len(), 1, "expected exactly one terminal event");
    events.into_iter().next().unwrap()
}

#[tokio::test]
async fn request_is_non_streaming_with_bearer_and_json() {
    let server = MockServer::start().await;
    mount_completion(&server, completion(json!({"content": "hello"}), "stop")).await;

    let (transport, _sink) = transport(ProviderCompatConfig::default());
    let options = StreamOptions {
        api_key: Some("test-key".into()),
        temperature: Some(0.2),
        ..StreamOptions::default()
    };
    let event = single_event(
        &transport,
        &model(&format!("{}/v1", server.uri())),
        &context(Vec::new()),
        options,
    )
    .await;

    let AssistantMessageEvent::Done { reason, message } = event else {
        panic!("expected done event");
    };
    assert_eq!(reason, StopReason::Stop);
    assert_eq!(message.text(), "hello");
    assert_eq!(message.usage.input, 12);
    assert_eq!(message.usage.output, 5);
    assert_eq!(message.usage.total_tokens, 17);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    assert_eq!(
        request.headers.get("authorization").unwrap().to_str().unwrap(),
        "Bearer test-key"
    );
    assert_eq!(
        request.headers.get("content-type").unwrap().to_str().unwrap(),
        "application/json"
    );
    let body: Value = request.body_json().unwrap();
    assert_eq!(body["model"], "qwen3-coder");
    assert_eq!(body["stream"], false);
    assert!(body.get("tools").is_none());
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["messages"][1]["content"], "read a.txt");
}

#[tokio::test]
async fn tools_are_sent_as_function_definitions() {
    let server = MockServer::start().await;
    mount_completion(&server, completion(json!({"content": "ok"}), "stop")).await;

    let (transport, _sink) = transport(ProviderCompatConfig::default());
    let tools = vec![ToolSpec {
        name: "read".into(),
        description: "Read a file".into(),
        parameters: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
    }];
    single_event(
        &transport,
        &model(&format!("{}/v1", server.uri())),
        &context(tools),
        StreamOptions::default(),
    )
    .await;

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["tools"][0]["type"], "function");
    assert_eq!(body["tools"][0]["function"]["name"], "read");
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn thinking_and_inline_tool_calls_are_recovered() {
    let server = MockServer::start().await;
    let content = "<think>plan it</think>\nOn it. <tool_call>{\"name\":\"read\",\"arguments\":{\"path\":\"a.txt\"}}</tool_call>";
    mount_completion(&server, completion(json!({"content": content}), "stop")).await;

    let (transport, sink) = transport(ProviderCompatConfig::default());
    let event = single_event(
        &transport,
        &model(&format!("{}/v1", server.uri())),
        &context(Vec::new()),
        StreamOptions::default(),
    )
    .await;

    let AssistantMessageEvent::Done { reason, message } = event else {
        panic!("expected done event");
    };
    assert_eq!(reason, StopReason::ToolUse);
    assert_eq!(message.text(), "On it.");
    let calls = message.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "read");
    assert_eq!(calls[0].arguments, json!({"path": "a.txt"}));
    assert!(calls[0].id.starts_with("inline_"));
    assert!(sink.is_empty());
}

#[tokio::test]
async fn double_encoded_arguments_are_unwrapped_when_enabled() {
    let server = MockServer::start().await;
    let arguments = serde_json::to_string(&json!({"path": "a.txt"})).unwrap();
    let double = serde_json::to_string(&arguments).unwrap();
    mount_completion(
        &server,
        completion(
            json!({
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "read", "arguments": double}
                }]
            }),
            "tool_calls",
        ),
    )
    .await;

    let compat = ProviderCompatConfig {
        disable_streaming: true,
        unwrap_double_encoded_tool_args: true,
    };
    let (transport, sink) = transport(compat);
    let event = single_event(
        &transport,
        &model(&format!("{}/v1", server.uri())),
        &context(Vec::new()),
        StreamOptions::default(),
    )
    .await;

    let message = event.into_message();
    assert_eq!(message.stop_reason, StopReason::ToolUse);
    let calls = message.tool_calls();
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].arguments, json!({"path": "a.txt"}));
    assert!(message.text().is_empty());
    assert!(sink.is_empty());
}

#[tokio::test]
async fn http_error_yields_one_sanitized_error_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("upstream rejected key sk-abcdef1234567890"),
        )
        .mount(&server)
        .await;

    let (transport, _sink) = transport(ProviderCompatConfig::default());
    let event = single_event(
        &transport,
        &model(&format!("{}/v1", server.uri())),
        &context(Vec::new()),
        StreamOptions::default(),
    )
    .await;

    let AssistantMessageEvent::Error { reason, error } = event else {
        panic!("expected error event");
    };
    assert_eq!(reason, StopReason::Error);
    assert_eq!(error.stop_reason, StopReason::Error);
    assert!(error.content.is_empty());
    let text = error.error_message.unwrap();
    assert!(text.contains("500"));
    assert!(text.contains("[REDACTED]"));
    assert!(!text.contains("sk-abcdef1234567890"));
}

#[tokio::test]
async fn missing_choices_is_an_error_event() {
    let server = MockServer::start().await;
    mount_completion(&server, json!({"id": "x", "choices": []})).await;

    let (transport, _sink) = transport(ProviderCompatConfig::default());
    let event = single_event(
        &transport,
        &model(&format!("{}/v1", server.uri())),
        &context(Vec::new()),
        StreamOptions::default(),
    )
    .await;

    assert_eq!(event.event_type(), "error");
    assert!(!event.is_aborted());
    assert!(event
        .into_message()
        .error_message
        .unwrap()
        .contains("No choices"));
}

#[tokio::test]
async fn cancellation_during_request_yields_aborted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(json!({"content": "late"}), "stop"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let (transport, _sink) = transport(ProviderCompatConfig::default());
    let options = StreamOptions::default();
    let cancel = options.cancel.clone();
    let stream = transport.stream(
        &model(&format!("{}/v1", server.uri())),
        &context(Vec::new()),
        options,
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.collect::<Vec<_>>())
        .await
        .expect("cancellation should end the stream promptly");
    assert_eq!(events.len(), 1);
    assert!(events[0].is_aborted());
}

#[tokio::test]
async fn full_endpoint_base_url_is_used_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/coding/v3/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion(json!({"content": "hi"}), "stop")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (transport, _sink) = transport(ProviderCompatConfig::default());
    let model = model(&format!("{}/api/coding/v3/chat/completions", server.uri()));
    let message = transport
        .stream(&model, &context(Vec::new()), StreamOptions::default())
        .result(&model)
        .await;
    assert_eq!(message.text(), "hi");
    assert_eq!(message.provider, "local");
}

#[tokio::test]
async fn huge_usage_counts_still_yield_one_done_event() {
    let server = MockServer::start().await;
    mount_completion(
        &server,
        json!({
            "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": u64::MAX, "completion_tokens": 1}
        }),
    )
    .await;

    let (transport, _sink) = transport(ProviderCompatConfig::default());
    let event = single_event(
        &transport,
        &model(&format!("{}/v1", server.uri())),
        &context(Vec::new()),
        StreamOptions::default(),
    )
    .await;

    let AssistantMessageEvent::Done { message, .. } = event else {
        panic!("expected done event");
    };
    assert_eq!(message.usage.input, u64::MAX);
    assert_eq!(message.usage.total_tokens, u64::MAX);
}
