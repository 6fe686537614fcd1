use super::traits::{Tool, ToolResult};
use async_trait::async_trait;
use serde_json::json;
use std::path::{Component, Path, PathBuf};

const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Read a workspace file with line numbers.
pub struct FileReadTool {
    workspace_dir: PathBuf,
}

impl FileReadTool {
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
        }
    }

    /// Resolve a relative path inside the workspace. Absolute paths and parent
    /// components are refused.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        (!escapes).then(|| self.workspace_dir.join(relative))
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read file contents with line numbers. Supports partial reading via offset and limit."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the workspace."
                },
                "offset": {
                    "type": "integer",
                    "description": "Starting line number (1-based, default: 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default: all)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing 'path' parameter"))?;

        let Some(resolved) = self.resolve(path) else {
            return Ok(ToolResult::failed(format!(
                "Path not allowed outside the workspace: {path}"
            )));
        };

        match tokio::fs::metadata(&resolved).await {
            Ok(meta) if meta.len() > MAX_FILE_SIZE_BYTES => {
                return Ok(ToolResult::failed(format!(
                    "File too large: {} bytes (limit: {MAX_FILE_SIZE_BYTES} bytes)",
                    meta.len()
                )));
            }
            Ok(_) => {}
            Err(e) => return Ok(ToolResult::failed(format!("Failed to read {path}: {e}"))),
        }

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read file: {e}"))?;
        let contents = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = contents.lines().collect();
        let total = lines.len();

        let start = args
            .get("offset")
            .and_then(serde_json::Value::as_u64)
            .map_or(0, |v| usize::try_from(v.max(1)).unwrap_or(usize::MAX) - 1)
            .min(total);
        let end = args
            .get("limit")
            .and_then(serde_json::Value::as_u64)
            .map_or(total, |l| {
                start
                    .saturating_add(usize::try_from(l).unwrap_or(usize::MAX))
                    .min(total)
            });

        if start >= end {
            return Ok(ToolResult::ok(format!(
                "[No lines in range, file has {total} lines]"
            )));
        }

        let numbered = lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{}: {line}", start + i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let summary = if start > 0 || end < total {
            format!("[Lines {}-{end} of {total}]", start + 1)
        } else {
            format!("[{total} lines total]")
        };

        Ok(ToolResult::ok(format!("{numbered}\n{summary}")))
    }
}
