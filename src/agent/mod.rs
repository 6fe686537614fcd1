//! Run preparation and the tool-call turn loop.

pub mod prompt;

pub use prompt::{PromptContext, PromptMode, SystemPromptBuilder};

use crate::config::Config;
use crate::providers::traits::{
    AssistantMessage, AssistantMessageEvent, Context, Message, ModelSpec, StopReason, StreamFn,
    StreamOptions,
};
use crate::session;
use crate::tools::{ToolAdapter, ToolSpec};
use anyhow::Result;
use futures_util::StreamExt;
use std::path::Path;

/// Upper bound on model turns per user message.
pub const MAX_TOOL_ITERATIONS: usize = 10;

/// Who the run is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunKind {
    #[default]
    Main,
    Subagent,
}

#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub kind: RunKind,
    pub model: &'a str,
    /// Session transcript, consulted for bootstrap expiry.
    pub transcript: Option<&'a Path>,
}

/// System prompt and tool definitions resolved for one run.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub system_prompt: String,
    pub tools: Vec<ToolSpec>,
    pub prompt_mode: PromptMode,
    pub compact: bool,
    pub bootstrap_injected: bool,
}

impl PreparedRun {
    pub fn context(&self, messages: Vec<Message>) -> Context {
        Context {
            system_prompt: Some(self.system_prompt.clone()),
            messages,
            tools: self.tools.clone(),
        }
    }
}

/// Thread agent settings into the prompt builder and tool definitions.
///
/// Main sessions get the full prompt; subagents get
/// `agent.subagent_prompt_mode`. `agent.compact_mode` applies to both the
/// prompt and the tool list.
pub fn prepare_run(
    config: &Config,
    adapter: &ToolAdapter,
    request: &RunRequest<'_>,
) -> Result<PreparedRun> {
    let compact = config.agent.compact_mode;
    let prompt_mode = match request.kind {
        RunKind::Main => PromptMode::Full,
        RunKind::Subagent => config.agent.subagent_prompt_mode.into(),
    };
    let bootstrap_injected =
        session::should_inject_bootstrap(request.transcript, config.agent.bootstrap_expiry_messages);

    let tools = adapter.definitions(compact);
    let ctx = PromptContext {
        workspace_dir: &config.workspace_dir,
        model_name: request.model,
        tools: &tools,
        include_bootstrap: bootstrap_injected,
    };
    let system_prompt = SystemPromptBuilder::for_run(prompt_mode, compact).build(&ctx)?;

    tracing::debug!(
        kind = ?request.kind,
        mode = ?prompt_mode,
        compact,
        bootstrap_injected,
        tools = tools.len(),
        "Prepared run"
    );

    Ok(PreparedRun {
        system_prompt,
        tools,
        prompt_mode,
        compact,
        bootstrap_injected,
    })
}

/// Drive model turns until the model stops asking for tools.
///
/// Every assistant turn and tool result is appended to `messages`. Returns
/// the final assistant envelope; an error event ends the loop with an error.
pub async fn run_tool_loop(
    stream_fn: &dyn StreamFn,
    model: &ModelSpec,
    prepared: &PreparedRun,
    adapter: &ToolAdapter,
    messages: &mut Vec<Message>,
    options: &StreamOptions,
) -> Result<AssistantMessage> {
    for iteration in 0..MAX_TOOL_ITERATIONS {
        let context = prepared.context(messages.clone());
        let mut stream = stream_fn.stream(model, &context, options.clone());

        let Some(event) = stream.next().await else {
            anyhow::bail!("Provider stream ended without a result");
        };
        let message = match event {
            AssistantMessageEvent::Done { message, .. } => message,
            AssistantMessageEvent::Error { reason, error } => {
                anyhow::bail!(
                    "Model call failed ({reason}): {}",
                    error.error_message.unwrap_or_default()
                );
            }
        };

        messages.push(Message::Assistant(message.clone()));
        if message.stop_reason != StopReason::ToolUse {
            return Ok(message);
        }

        for call in message.tool_calls() {
            tracing::debug!(iteration, tool = %call.name, "Executing tool call");
            let result = adapter.execute(&call).await;
            messages.push(Message::ToolResult(result));
        }
    }

    anyhow::bail!("Agent exceeded maximum tool iterations ({MAX_TOOL_ITERATIONS})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubagentPromptMode;
    use crate::providers::traits::{AssistantMessageEventStream, ContentPart};
    use crate::tools::{Tool, ToolResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::io::Write;
    use std::sync::Arc;

    struct ExecTool;

    #[async_trait]
    impl Tool for ExecTool {
        fn name(&self) -> &str {
            "exec"
        }

        fn description(&self) -> &str {
            "Run a shell command. Returns stdout."
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"cmd": {"type": "string", "description": "Command"}},
                "required": ["cmd"]
            })
        }

        async fn execute(&self, _args: Value) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok("done"))
        }
    }

    struct CronTool;

    #[async_trait]
    impl Tool for CronTool {
        fn name(&self) -> &str {
            "cron_add"
        }

        fn description(&self) -> &str {
            "Schedule a job"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _args: Value) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok("scheduled"))
        }
    }

    fn adapter() -> ToolAdapter {
        ToolAdapter::without_hooks(vec![Arc::new(ExecTool), Arc::new(CronTool)])
    }

    fn config(workspace: &Path) -> Config {
        let mut config = Config::default();
        config.workspace_dir = workspace.to_path_buf();
        config
    }

    fn request(kind: RunKind, transcript: Option<&Path>) -> RunRequest<'_> {
        RunRequest {
            kind,
            model: "qwen3-coder",
            transcript,
        }
    }

    #[test]
    fn main_run_without_compact_uses_default_prompt_and_all_tools() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config(dir.path());
        let run = prepare_run(&config, &adapter(), &request(RunKind::Main, None)).unwrap();

        assert_eq!(run.prompt_mode, PromptMode::Full);
        assert_eq!(run.tools.len(), 2);
        assert!(run.system_prompt.contains("## Safety"));
        assert!(run.system_prompt.contains("cron_add"));
    }

    #[test]
    fn compact_mode_threads_into_prompt_and_tools() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.agent.compact_mode = true;
        let run = prepare_run(&config, &adapter(), &request(RunKind::Main, None)).unwrap();

        assert!(run.compact);
        assert_eq!(run.tools.len(), 1);
        assert_eq!(run.tools[0].name, "exec");
        assert!(!run.system_prompt.contains("## Safety"));
        assert!(!run.system_prompt.contains("cron_add"));
    }

    #[test]
    fn subagent_uses_configured_prompt_mode() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.agent.subagent_prompt_mode = SubagentPromptMode::None;
        let run = prepare_run(&config, &adapter(), &request(RunKind::Subagent, None)).unwrap();

        assert_eq!(run.prompt_mode, PromptMode::None);
        assert_eq!(run.system_prompt.trim().lines().count(), 1);
        // Tools are still offered even when the prompt is silent about them.
        assert_eq!(run.tools.len(), 2);
    }

    #[test]
    fn bootstrap_expires_after_configured_user_messages() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("BOOTSTRAP.md"), "WELCOME_ONBOARDING").unwrap();
        let mut transcript = tempfile::NamedTempFile::new().unwrap();
        for _ in 0..2 {
            writeln!(
                transcript,
                r#"{{"type":"message","message":{{"role":"user","content":"hi"}}}}"#
            )
            .unwrap();
        }

        let mut config = config(dir.path());
        config.agent.bootstrap_expiry_messages = 3;
        let fresh = prepare_run(
            &config,
            &adapter(),
            &request(RunKind::Main, Some(transcript.path())),
        )
        .unwrap();
        assert!(fresh.bootstrap_injected);
        assert!(fresh.system_prompt.contains("WELCOME_ONBOARDING"));

        config.agent.bootstrap_expiry_messages = 2;
        let expired = prepare_run(
            &config,
            &adapter(),
            &request(RunKind::Main, Some(transcript.path())),
        )
        .unwrap();
        assert!(!expired.bootstrap_injected);
        assert!(!expired.system_prompt.contains("WELCOME_ONBOARDING"));
    }

    /// Replays scripted envelopes, one per call.
    struct ScriptedStream {
        model: ModelSpec,
        replies: Mutex<Vec<AssistantMessage>>,
        seen_messages: Mutex<Vec<usize>>,
    }

    impl StreamFn for ScriptedStream {
        fn stream(
            &self,
            _model: &ModelSpec,
            context: &Context,
            _options: StreamOptions,
        ) -> AssistantMessageEventStream {
            self.seen_messages.lock().push(context.messages.len());
            let (tx, stream) = AssistantMessageEventStream::channel();
            let next = self.replies.lock().pop();
            let event = match next {
                Some(message) => AssistantMessageEvent::Done {
                    reason: message.stop_reason.terminal(),
                    message,
                },
                None => AssistantMessageEvent::Error {
                    reason: StopReason::Error,
                    error: AssistantMessage::failed(&self.model, StopReason::Error, "script empty"),
                },
            };
            tokio::spawn(async move {
                let _ = tx.send(event).await;
            });
            stream
        }
    }

    fn model() -> ModelSpec {
        ModelSpec {
            id: "m".into(),
            provider: "p".into(),
            api: "a".into(),
            base_url: "http://localhost".into(),
        }
    }

    #[tokio::test]
    async fn tool_loop_executes_calls_then_returns_final_text() {
        let model = model();
        let mut tool_turn = AssistantMessage::empty(&model);
        tool_turn.content.push(ContentPart::ToolCall {
            id: "c1".into(),
            name: "exec".into(),
            arguments: json!({"cmd": "ls"}),
        });
        tool_turn.stop_reason = StopReason::ToolUse;
        let mut final_turn = AssistantMessage::empty(&model);
        final_turn.content.push(ContentPart::text("all done"));

        let scripted = ScriptedStream {
            model: model.clone(),
            replies: Mutex::new(vec![final_turn, tool_turn]),
            seen_messages: Mutex::new(Vec::new()),
        };
        let dir = tempfile::TempDir::new().unwrap();
        let adapter = adapter();
        let prepared =
            prepare_run(&config(dir.path()), &adapter, &request(RunKind::Main, None)).unwrap();
        let mut messages = vec![Message::user("list files")];

        let result = run_tool_loop(
            &scripted,
            &model,
            &prepared,
            &adapter,
            &mut messages,
            &StreamOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.text(), "all done");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role(), "toolResult");
        assert_eq!(*scripted.seen_messages.lock(), vec![1, 3]);
    }

    #[tokio::test]
    async fn tool_loop_surfaces_error_events() {
        let model = model();
        let scripted = ScriptedStream {
            model: model.clone(),
            replies: Mutex::new(Vec::new()),
            seen_messages: Mutex::new(Vec::new()),
        };
        let dir = tempfile::TempDir::new().unwrap();
        let adapter = adapter();
        let prepared =
            prepare_run(&config(dir.path()), &adapter, &request(RunKind::Main, None)).unwrap();
        let mut messages = vec![Message::user("hi")];

        let err = run_tool_loop(
            &scripted,
            &model,
            &prepared,
            &adapter,
            &mut messages,
            &StreamOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("script empty"));
    }
}
