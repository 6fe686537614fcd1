use crate::config::SubagentPromptMode;
use crate::tools::compact::one_line_description;
use crate::tools::ToolSpec;
use anyhow::Result;
use chrono::Local;
use std::fmt::Write;
use std::path::Path;

const BOOTSTRAP_MAX_CHARS: usize = 20_000;
const BOOTSTRAP_FILE: &str = "BOOTSTRAP.md";

const WORKSPACE_FILES: &[&str] = &[
    "AGENTS.md",
    "SOUL.md",
    "TOOLS.md",
    "IDENTITY.md",
    "USER.md",
    "HEARTBEAT.md",
    BOOTSTRAP_FILE,
    "MEMORY.md",
];

/// Identity files kept in compact mode.
const CORE_WORKSPACE_FILES: &[&str] = &["AGENTS.md", "SOUL.md", "IDENTITY.md", "USER.md", BOOTSTRAP_FILE];

/// How much of the system prompt a run receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptMode {
    #[default]
    Full,
    Minimal,
    None,
}

impl From<SubagentPromptMode> for PromptMode {
    fn from(mode: SubagentPromptMode) -> Self {
        match mode {
            SubagentPromptMode::Full => Self::Full,
            SubagentPromptMode::Minimal => Self::Minimal,
            SubagentPromptMode::None => Self::None,
        }
    }
}

pub struct PromptContext<'a> {
    pub workspace_dir: &'a Path,
    pub model_name: &'a str,
    pub tools: &'a [ToolSpec],
    /// Inject BOOTSTRAP.md. Cleared once the session has outgrown onboarding.
    pub include_bootstrap: bool,
}

pub trait PromptSection: Send + Sync {
    fn name(&self) -> &str;
    fn build(&self, ctx: &PromptContext<'_>) -> Result<String>;
}

#[derive(Default)]
pub struct SystemPromptBuilder {
    sections: Vec<Box<dyn PromptSection>>,
}

impl SystemPromptBuilder {
    pub fn with_defaults() -> Self {
        Self {
            sections: vec![
                Box::new(IdentitySection { compact: false }),
                Box::new(ToolsSection { compact: false }),
                Box::new(SafetySection),
                Box::new(WorkspaceSection),
                Box::new(DateTimeSection),
                Box::new(RuntimeSection),
                Box::new(ChannelMediaSection),
            ],
        }
    }

    /// Section list for a run. `Full` without compact mode is exactly
    /// [`SystemPromptBuilder::with_defaults`].
    pub fn for_run(mode: PromptMode, compact: bool) -> Self {
        let sections: Vec<Box<dyn PromptSection>> = match (mode, compact) {
            (PromptMode::Full, false) => return Self::with_defaults(),
            (PromptMode::Full, true) => vec![
                Box::new(IdentitySection { compact: true }),
                Box::new(ToolsSection { compact: true }),
                Box::new(WorkspaceSection),
            ],
            (PromptMode::Minimal, compact) => vec![
                Box::new(ToolsSection { compact }),
                Box::new(WorkspaceSection),
                Box::new(RuntimeSection),
            ],
            (PromptMode::None, _) => vec![Box::new(IdentityLineSection)],
        };
        Self { sections }
    }

    pub fn add_section(mut self, section: Box<dyn PromptSection>) -> Self {
        self.sections.push(section);
        self
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name()).collect()
    }

    pub fn build(&self, ctx: &PromptContext<'_>) -> Result<String> {
        let mut output = String::new();
        for section in &self.sections {
            let part = section.build(ctx)?;
            if part.trim().is_empty() {
                continue;
            }
            output.push_str(part.trim_end());
            output.push_str("\n\n");
        }
        Ok(output)
    }
}

pub struct IdentitySection {
    pub compact: bool,
}
pub struct ToolsSection {
    pub compact: bool,
}
pub struct SafetySection;
pub struct WorkspaceSection;
pub struct RuntimeSection;
pub struct DateTimeSection;
pub struct ChannelMediaSection;
pub struct IdentityLineSection;

impl PromptSection for IdentitySection {
    fn name(&self) -> &str {
        "identity"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> Result<String> {
        let mut prompt = String::from("## Project Context\n\n");
        prompt.push_str(
            "The following workspace files define your identity, behavior, and context.\n\n",
        );

        let files = if self.compact {
            CORE_WORKSPACE_FILES
        } else {
            WORKSPACE_FILES
        };
        for file in files {
            if *file == BOOTSTRAP_FILE && !ctx.include_bootstrap {
                continue;
            }
            // Compact prompts do not spend tokens on missing-file markers.
            inject_workspace_file(&mut prompt, ctx.workspace_dir, file, !self.compact);
        }

        Ok(prompt)
    }
}

impl PromptSection for ToolsSection {
    fn name(&self) -> &str {
        "tools"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> Result<String> {
        if ctx.tools.is_empty() {
            return Ok(String::new());
        }
        let mut out = String::from("## Tools\n\n");
        for tool in ctx.tools {
            if self.compact {
                let _ = writeln!(
                    out,
                    "- **{}**: {}",
                    tool.name,
                    one_line_description(&tool.description)
                );
            } else {
                let _ = writeln!(
                    out,
                    "- **{}**: {}\n  Parameters: `{}`",
                    tool.name, tool.description, tool.parameters
                );
            }
        }
        Ok(out)
    }
}

impl PromptSection for SafetySection {
    fn name(&self) -> &str {
        "safety"
    }

    fn build(&self, _ctx: &PromptContext<'_>) -> Result<String> {
        Ok("## Safety\n\n- Do not exfiltrate private data.\n- Do not run destructive commands without asking.\n- When in doubt, ask before acting externally.".into())
    }
}

impl PromptSection for WorkspaceSection {
    fn name(&self) -> &str {
        "workspace"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> Result<String> {
        Ok(format!(
            "## Workspace\n\nWorking directory: `{}`",
            ctx.workspace_dir.display()
        ))
    }
}

impl PromptSection for RuntimeSection {
    fn name(&self) -> &str {
        "runtime"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> Result<String> {
        let host =
            hostname::get().map_or_else(|_| "unknown".into(), |h| h.to_string_lossy().to_string());
        Ok(format!(
            "## Runtime\n\nHost: {host} | OS: {} | Model: {}",
            std::env::consts::OS,
            ctx.model_name
        ))
    }
}

impl PromptSection for DateTimeSection {
    fn name(&self) -> &str {
        "datetime"
    }

    fn build(&self, _ctx: &PromptContext<'_>) -> Result<String> {
        let now = Local::now();
        Ok(format!(
            "## Current Date & Time\n\n{} ({})",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.format("%Z")
        ))
    }
}

impl PromptSection for ChannelMediaSection {
    fn name(&self) -> &str {
        "channel_media"
    }

    fn build(&self, _ctx: &PromptContext<'_>) -> Result<String> {
        Ok("## Channel Media Markers\n\n\
            Messages from channels may contain media markers:\n\
            - `[IMAGE:<path>]` is an image attachment.\n\
            - `[Document: <name>] <path>` is a file attachment saved to the workspace."
            .into())
    }
}

impl PromptSection for IdentityLineSection {
    fn name(&self) -> &str {
        "identity_line"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> Result<String> {
        Ok(format!(
            "You are a subagent running on {}. Complete the delegated task and report back.",
            ctx.model_name
        ))
    }
}

fn inject_workspace_file(prompt: &mut String, workspace_dir: &Path, filename: &str, mark_missing: bool) {
    let path = workspace_dir.join(filename);
    let Ok(content) = std::fs::read_to_string(&path) else {
        if mark_missing {
            let _ = writeln!(prompt, "### {filename}\n\n[File not found: {filename}]\n");
        }
        return;
    };

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return;
    }
    let _ = writeln!(prompt, "### {filename}\n");
    let truncated = trimmed
        .char_indices()
        .nth(BOOTSTRAP_MAX_CHARS)
        .map_or(trimmed, |(idx, _)| &trimmed[..idx]);
    prompt.push_str(truncated);
    if truncated.len() < trimmed.len() {
        let _ = writeln!(
            prompt,
            "\n\n[... truncated at {BOOTSTRAP_MAX_CHARS} chars, use `read` for the full file]\n"
        );
    } else {
        prompt.push_str("\n\n");
    }
}
