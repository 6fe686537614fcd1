//! Provider subsystem: the internal message model, the OpenAI-compatible
//! non-streaming transport, and per-provider stream-function selection.

pub mod compatible;
pub mod traits;

#[allow(unused_imports)]
pub use traits::{
    AssistantMessage, AssistantMessageEvent, AssistantMessageEventStream, ContentPart, Context,
    Message, MessageContent, ModelSpec, StopReason, StreamFn, StreamOptions, ToolCall,
    ToolResultMessage, Usage, UsageCost, UserMessage,
};

use crate::config::{Config, ProviderCompatConfig};
use crate::observability::DiagnosticSink;
use crate::util::truncate_with_ellipsis;
use anyhow::Context as _;
use compatible::CompatTransport;
use std::collections::HashMap;
use std::sync::Arc;

/// API name reported on envelopes produced by the compat transport.
pub const COMPAT_API: &str = "openai-completions";

const MAX_API_ERROR_CHARS: usize = 200;
const REDACTED: &str = "[REDACTED]";

/// A token prefix worth redacting, and how many secret-looking characters must
/// follow it before the match counts.
struct SecretPrefix {
    prefix: &'static str,
    min_len: usize,
}

const SECRET_PREFIXES: &[SecretPrefix] = &[
    SecretPrefix { prefix: "sk-", min_len: 1 },
    SecretPrefix { prefix: "ghp_", min_len: 1 },
    SecretPrefix { prefix: "github_pat_", min_len: 1 },
    SecretPrefix { prefix: "AIza", min_len: 1 },
    SecretPrefix { prefix: "AKIA", min_len: 1 },
    SecretPrefix { prefix: "xoxb-", min_len: 1 },
    SecretPrefix { prefix: "\"api_key\":\"", min_len: 8 },
    SecretPrefix { prefix: "\"apiKey\":\"", min_len: 8 },
    SecretPrefix { prefix: "\"access_token\":\"", min_len: 8 },
    SecretPrefix { prefix: "\"token\":\"", min_len: 8 },
    SecretPrefix { prefix: "api_key=", min_len: 8 },
    SecretPrefix { prefix: "access_token=", min_len: 8 },
    SecretPrefix { prefix: "Bearer ", min_len: 16 },
    SecretPrefix { prefix: "bearer ", min_len: 16 },
];

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

/// Byte offset where the secret-looking run starting at `from` ends.
fn secret_run_end(input: &str, from: usize) -> usize {
    input[from..]
        .char_indices()
        .find(|(_, c)| !is_secret_char(*c))
        .map_or(input.len(), |(i, _)| from + i)
}

/// Redact API-key-like tokens from text that may reach logs or error messages.
pub fn scrub_secret_patterns(input: &str) -> String {
    let mut scrubbed = input.to_string();

    for SecretPrefix { prefix, min_len } in SECRET_PREFIXES {
        let mut cursor = 0;
        while let Some(rel) = scrubbed[cursor..].find(prefix) {
            let start = cursor + rel;
            let secret_start = start + prefix.len();
            let end = secret_run_end(&scrubbed, secret_start);

            // A bare prefix is not a secret; keep scanning past it.
            if end - secret_start < *min_len {
                cursor = secret_start;
                continue;
            }

            scrubbed.replace_range(start..end, REDACTED);
            cursor = start + REDACTED.len();
        }
    }

    scrubbed
}

/// Scrub secrets and cap the length of a provider error body.
pub fn sanitize_api_error(input: &str) -> String {
    truncate_with_ellipsis(&scrub_secret_patterns(input), MAX_API_ERROR_CHARS)
}

/// Everything needed to route one call to a configured provider.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub model: ModelSpec,
    pub api_key: Option<String>,
    pub headers: HashMap<String, String>,
    pub compat: ProviderCompatConfig,
}

impl ResolvedProvider {
    /// Per-call options seeded from the provider entry.
    pub fn stream_options(&self, temperature: Option<f64>) -> StreamOptions {
        StreamOptions {
            temperature,
            api_key: self.api_key.clone(),
            headers: self.headers.clone(),
            ..StreamOptions::default()
        }
    }
}

/// Look up a provider entry by id (or the configured default) and pair it with a model.
pub fn resolve_provider(
    config: &Config,
    provider: Option<&str>,
    model: Option<&str>,
) -> anyhow::Result<ResolvedProvider> {
    let provider_id = provider
        .or(config.default_provider.as_deref())
        .context("No provider given and default_provider is not set")?;
    let entry = config
        .providers
        .get(provider_id)
        .with_context(|| format!("Unknown provider: {provider_id}"))?;
    let model_id = model
        .or(entry.model.as_deref())
        .or(config.default_model.as_deref())
        .with_context(|| format!("No model configured for provider {provider_id}"))?;

    Ok(ResolvedProvider {
        model: ModelSpec {
            id: model_id.to_string(),
            provider: provider_id.to_string(),
            api: COMPAT_API.to_string(),
            base_url: entry.base_url.clone(),
        },
        api_key: entry.api_key.clone().filter(|key| !key.trim().is_empty()),
        headers: entry.headers.clone(),
        compat: entry.compat.clone(),
    })
}

/// Pick the stream function for a provider.
///
/// Providers flagged with `disable_streaming` are routed through the
/// non-streaming compat transport; everything else keeps the runtime's native
/// stream function.
pub fn select_stream_fn(
    compat: &ProviderCompatConfig,
    native: Arc<dyn StreamFn>,
    sink: Arc<dyn DiagnosticSink>,
) -> Arc<dyn StreamFn> {
    if compat.disable_streaming {
        tracing::debug!("Routing provider through non-streaming compat transport");
        Arc::new(CompatTransport::new(compat.clone(), sink))
    } else {
        native
    }
}
