//! Hook runner interface consulted around tool execution.

use crate::tools::ToolResult;
use async_trait::async_trait;
use serde_json::Value;

/// Result of a modifying hook.
#[derive(Debug, Clone, PartialEq)]
pub enum HookResult<T> {
    /// Proceed, possibly with a modified payload.
    Continue(T),
    /// Stop; the reason is surfaced to the model.
    Cancel(String),
}

#[async_trait]
pub trait ToolHooks: Send + Sync {
    async fn before_tool_call(&self, name: &str, args: Value) -> HookResult<Value> {
        let _ = name;
        HookResult::Continue(args)
    }

    async fn after_tool_call(&self, name: &str, result: &ToolResult) {
        let _ = (name, result);
    }
}

/// Hooks that change nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl ToolHooks for NoopHooks {}
