//! Non-streaming transport for OpenAI-compatible chat-completions servers.
//!
//! Providers flagged with `disable_streaming` are called with a single
//! `stream: false` request. The response is normalized by [`recovery`] and
//! surfaced through the same one-event stream the runtime expects from a
//! native streaming provider.

pub mod convert;
pub mod recovery;

use crate::config::ProviderCompatConfig;
use crate::observability::{DiagnosticSink, TracingSink};
use crate::providers::sanitize_api_error;
use crate::providers::traits::{
    AssistantMessage, AssistantMessageEvent, AssistantMessageEventStream, Context, ModelSpec,
    StopReason, StreamFn, StreamOptions,
};
use crate::util::single_line;
use convert::{build_wire_messages, build_wire_tools, ApiChatResponse, WireMessage, WireTool};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const ERROR_BODY_PLACEHOLDER: &str = "<failed to read provider error body>";

#[derive(Debug, thiserror::Error)]
pub enum CompatError {
    #[error("{provider} API error ({status}): {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("No choices in response from {0}")]
    NoChoices(String),
    #[error("Request aborted")]
    Aborted,
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{provider} returned an unexpected chat-completions payload: {message}")]
    Decode { provider: String, message: String },
    #[error("Invalid header {name}: {message}")]
    Header { name: String, message: String },
}

impl CompatError {
    pub fn stop_reason(&self) -> StopReason {
        match self {
            Self::Aborted => StopReason::Aborted,
            _ => StopReason::Error,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

/// Issues one non-streaming chat-completions call per model turn.
#[derive(Clone)]
pub struct CompatTransport {
    client: Client,
    compat: ProviderCompatConfig,
    sink: Arc<dyn DiagnosticSink>,
}

impl CompatTransport {
    pub fn new(compat: ProviderCompatConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            client: http_client(),
            compat,
            sink,
        }
    }

    pub fn with_tracing(compat: ProviderCompatConfig) -> Self {
        Self::new(compat, Arc::new(TracingSink))
    }

    /// Run one call to completion and return the recovered envelope.
    pub async fn complete(
        &self,
        model: &ModelSpec,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<AssistantMessage, CompatError> {
        if options.cancel.is_cancelled() {
            return Err(CompatError::Aborted);
        }

        let tools = build_wire_tools(&context.tools);
        let request = ApiChatRequest {
            model: &model.id,
            messages: build_wire_messages(context.system_prompt.as_deref(), &context.messages),
            stream: false,
            tools: (!tools.is_empty()).then_some(tools),
            temperature: options.temperature.filter(|t| t.is_finite()),
            max_tokens: options.max_tokens,
        };
        let url = chat_completions_url(&model.base_url);
        let headers = build_headers(options)?;

        tracing::debug!(
            provider = %model.provider,
            model = %model.id,
            url = %url,
            "Sending non-streaming chat-completions request"
        );

        let exchange = async {
            let response = self
                .client
                .post(&url)
                .headers(headers)
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .map(|body| sanitize_api_error(&body))
                    .unwrap_or_else(|_| ERROR_BODY_PLACEHOLDER.to_string());
                return Err(CompatError::Http {
                    provider: model.provider.clone(),
                    status: status.as_u16(),
                    body,
                });
            }

            let body = response.text().await?;
            parse_chat_response_body(&model.provider, &body)
        };

        let response = tokio::select! {
            biased;
            () = options.cancel.cancelled() => return Err(CompatError::Aborted),
            result = exchange => result?,
        };

        recovery::recover_assistant_message(response, model, &self.compat, self.sink.as_ref())
    }
}

impl StreamFn for CompatTransport {
    fn stream(
        &self,
        model: &ModelSpec,
        context: &Context,
        options: StreamOptions,
    ) -> AssistantMessageEventStream {
        let (tx, stream) = AssistantMessageEventStream::channel();
        let transport = self.clone();
        let model = model.clone();
        let context = context.clone();

        tokio::spawn(async move {
            let result = transport.complete(&model, &context, &options).await;
            let event = match result {
                // Cancellation that lands after the body arrived still wins.
                Ok(_) if options.cancel.is_cancelled() => aborted_event(&model),
                Ok(message) => AssistantMessageEvent::Done {
                    reason: message.stop_reason.terminal(),
                    message,
                },
                Err(error) => {
                    let reason = error.stop_reason();
                    if reason == StopReason::Aborted {
                        tracing::info!(provider = %model.provider, model = %model.id, "Provider request aborted");
                    } else {
                        tracing::warn!(provider = %model.provider, model = %model.id, "Provider request failed: {error}");
                    }
                    AssistantMessageEvent::Error {
                        reason,
                        error: AssistantMessage::failed(&model, reason, error.to_string()),
                    }
                }
            };
            // The receiver may already be gone; nothing else to notify.
            let _ = tx.send(event).await;
        });

        stream
    }
}

fn aborted_event(model: &ModelSpec) -> AssistantMessageEvent {
    AssistantMessageEvent::Error {
        reason: StopReason::Aborted,
        error: AssistantMessage::failed(model, StopReason::Aborted, CompatError::Aborted.to_string()),
    }
}

fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|error| {
            tracing::warn!("Failed to build timeout client for compat transport: {error}");
            Client::new()
        })
}

/// Resolve the chat-completions endpoint. A base URL that already names the
/// endpoint is used verbatim.
pub fn chat_completions_url(base_url: &str) -> String {
    let has_full_endpoint = reqwest::Url::parse(base_url)
        .map(|url| url.path().trim_end_matches('/').ends_with("/chat/completions"))
        .unwrap_or_else(|_| base_url.trim_end_matches('/').ends_with("/chat/completions"));

    if has_full_endpoint {
        base_url.to_string()
    } else {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }
}

/// Bearer auth first, then caller headers, then the JSON content type, which
/// callers cannot override.
fn build_headers(options: &StreamOptions) -> Result<HeaderMap, CompatError> {
    let mut headers = HeaderMap::new();

    if let Some(key) = options.api_key.as_deref().filter(|key| !key.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|error| {
            CompatError::Header {
                name: AUTHORIZATION.to_string(),
                message: error.to_string(),
            }
        })?;
        headers.insert(AUTHORIZATION, value);
    }

    for (name, value) in &options.headers {
        let invalid = |message: String| CompatError::Header {
            name: name.clone(),
            message,
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|error| invalid(error.to_string()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|error| invalid(error.to_string()))?;
        headers.insert(header_name, header_value);
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

fn parse_chat_response_body(provider: &str, body: &str) -> Result<ApiChatResponse, CompatError> {
    serde_json::from_str::<ApiChatResponse>(body).map_err(|error| CompatError::Decode {
        provider: provider.to_string(),
        message: format!("{error}; body={}", single_line(&sanitize_api_error(body))),
    })
}
