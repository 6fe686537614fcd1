//! Tool subsystem: the [`Tool`] trait, compact-mode definitions, and the
//! adapter that runs model-requested tool calls through hooks.
//!
//! [`ToolAdapter::definitions`] produces what the model sees;
//! [`ToolAdapter::execute`] turns one [`ToolCall`] into a tool-result turn.
//! Neither ever aborts the run: unknown tools, hook cancellations and tool
//! failures all come back as error results for the model to read.

pub mod compact;
pub mod file_read;
pub mod traits;

pub use file_read::FileReadTool;
pub use traits::{Tool, ToolResult, ToolSpec};

use crate::hooks::{HookResult, NoopHooks, ToolHooks};
use crate::observability::{DiagnosticSink, TracingSink};
use crate::providers::traits::{MessageContent, ToolCall, ToolResultMessage};
use std::sync::Arc;

/// Built-in tools available to every run.
pub fn default_tools(workspace_dir: &std::path::Path) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(FileReadTool::new(workspace_dir))]
}

pub struct ToolAdapter {
    tools: Vec<Arc<dyn Tool>>,
    hooks: Arc<dyn ToolHooks>,
    sink: Arc<dyn DiagnosticSink>,
}

impl ToolAdapter {
    pub fn new(
        tools: Vec<Arc<dyn Tool>>,
        hooks: Arc<dyn ToolHooks>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self { tools, hooks, sink }
    }

    pub fn without_hooks(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self::new(tools, Arc::new(NoopHooks), Arc::new(TracingSink))
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    /// Tool descriptors for the model. In compact mode only the allow-listed
    /// tools survive, with minimal schemas; otherwise every tool is described
    /// in full.
    pub fn definitions(&self, compact_mode: bool) -> Vec<ToolSpec> {
        let specs = self.tools.iter().map(|tool| tool.spec()).collect();
        if compact_mode {
            compact::compact_specs(specs)
        } else {
            specs
        }
    }

    /// Run one tool call and package the outcome as a tool-result turn.
    pub async fn execute(&self, call: &ToolCall) -> ToolResultMessage {
        let outcome = self.run(call).await;
        let (content, is_error) = match outcome {
            Ok(result) if result.success => (result.output, false),
            Ok(result) => (
                result
                    .error
                    .unwrap_or_else(|| format!("Tool {} failed", call.name)),
                true,
            ),
            Err(message) => (message, true),
        };

        ToolResultMessage {
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.name.clone()),
            content: MessageContent::Text(content),
            is_error,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    async fn run(&self, call: &ToolCall) -> Result<ToolResult, String> {
        let Some(tool) = self.find(&call.name) else {
            self.sink
                .warn("tools", &format!("Model requested unknown tool: {}", call.name));
            return Err(format!("Unknown tool: {}", call.name));
        };

        let args = match self
            .hooks
            .before_tool_call(&call.name, call.arguments.clone())
            .await
        {
            HookResult::Continue(args) => args,
            HookResult::Cancel(reason) => {
                tracing::info!(tool = %call.name, %reason, "tool call cancelled by hook");
                return Err(format!("Tool call cancelled: {reason}"));
            }
        };

        let result = match tool.execute(args).await {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(tool = %call.name, "Tool execution failed: {error:#}");
                ToolResult::failed(format!("{error:#}"))
            }
        };
        self.hooks.after_tool_call(&call.name, &result).await;
        Ok(result)
    }
}
