use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Environment variable that relocates the config directory.
pub const CONFIG_DIR_ENV: &str = "OPENCLAW_COMPAT_CONFIG_DIR";
/// Environment variable that overrides the default provider's API key.
pub const API_KEY_ENV: &str = "OPENCLAW_COMPAT_API_KEY";

const CONFIG_FILE_NAME: &str = "config.toml";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level configuration, loaded from `config.toml`.
///
/// Resolution order: `OPENCLAW_COMPAT_CONFIG_DIR` env → `~/.openclaw-compat/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Workspace directory - computed from the config directory, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Provider id used when a call does not name one.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Model used when neither the call nor the provider entry names one.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Default model temperature (0.0–2.0). Default: `0.7`.
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,

    /// Provider entries keyed by id (`[providers.<id>]`).
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Agent defaults (`[agent]`).
    #[serde(default)]
    pub agent: AgentConfig,

    /// Channel account settings (`[channels]`).
    #[serde(default)]
    pub channels: ChannelsConfig,
}

fn default_temperature() -> f64 {
    0.7
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::new(),
            config_path: PathBuf::new(),
            default_provider: None,
            default_model: None,
            default_temperature: default_temperature(),
            providers: HashMap::new(),
            agent: AgentConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

// ── Providers ─────────────────────────────────────────────────────

/// One OpenAI-compatible provider endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProviderConfig {
    /// Base URL, e.g. `http://127.0.0.1:8000/v1`. A URL that already ends in
    /// `/chat/completions` is used as-is.
    pub base_url: String,
    /// Bearer token. Overridden for the default provider by `OPENCLAW_COMPAT_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model routed to this provider when the call does not name one.
    #[serde(default)]
    pub model: Option<String>,
    /// Extra request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Workarounds for non-conforming servers (`[providers.<id>.compat]`).
    #[serde(default)]
    pub compat: ProviderCompatConfig,
}

/// Per-provider compatibility flags. Resolved once and never changed for the
/// duration of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderCompatConfig {
    /// Replace the runtime's streaming transport with a single non-streaming request.
    #[serde(default)]
    pub disable_streaming: bool,
    /// Collapse tool-call arguments the server encoded as a JSON string twice.
    #[serde(default)]
    pub unwrap_double_encoded_tool_args: bool,
}

// ── Agent ─────────────────────────────────────────────────────────

/// How much of the system prompt a subagent run receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubagentPromptMode {
    /// Same prompt as the main session.
    Full,
    /// Tools, workspace and runtime sections only.
    #[default]
    Minimal,
    /// A single identity line.
    None,
}

pub(crate) fn parse_subagent_prompt_mode(raw: &str) -> Option<SubagentPromptMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "full" => Some(SubagentPromptMode::Full),
        "minimal" => Some(SubagentPromptMode::Minimal),
        "none" => Some(SubagentPromptMode::None),
        _ => None,
    }
}

/// Agent defaults (`[agent]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentConfig {
    /// Trim prompt sections and tool schemas to cut per-request tokens. Default: `false`.
    #[serde(default, alias = "compact_context")]
    pub compact_mode: bool,
    /// Prompt verbosity for subagent runs. Default: `minimal`.
    #[serde(default)]
    pub subagent_prompt_mode: SubagentPromptMode,
    /// Stop injecting BOOTSTRAP.md once a session has this many user messages.
    /// `0` keeps injecting it forever. Default: `0`.
    #[serde(default)]
    pub bootstrap_expiry_messages: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            compact_mode: false,
            subagent_prompt_mode: SubagentPromptMode::default(),
            bootstrap_expiry_messages: 0,
        }
    }
}

// ── Channels ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ChannelsConfig {
    /// iMessage-style channel accounts (`[channels.imessage]`).
    #[serde(default)]
    pub imessage: IMessageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct IMessageConfig {
    /// Accounts keyed by name (`[channels.imessage.accounts.<name>]`).
    #[serde(default)]
    pub accounts: HashMap<String, IMessageAccountConfig>,
}

impl IMessageConfig {
    /// Settings for `account`, falling back to defaults for unknown names.
    pub fn account(&self, account: &str) -> IMessageAccountConfig {
        self.accounts.get(account).cloned().unwrap_or_default()
    }
}

/// Per-account inbound handling.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IMessageAccountConfig {
    /// Hold inbound flushes while the remote user is typing. Default: `false`.
    #[serde(default)]
    pub typing_gate: bool,
    /// Resume a paused conversation if no typing-stop arrives within this window. Default: `30000`.
    #[serde(default = "default_typing_timeout_ms")]
    pub typing_timeout_ms: u64,
    /// Quiet period before buffered inbound messages are flushed. Default: `1500`.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_typing_timeout_ms() -> u64 {
    30_000
}

fn default_debounce_ms() -> u64 {
    1_500
}

impl Default for IMessageAccountConfig {
    fn default() -> Self {
        Self {
            typing_gate: false,
            typing_timeout_ms: default_typing_timeout_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".openclaw-compat"))
}

fn resolve_config_dir() -> Result<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir)),
        _ => default_config_dir(),
    }
}

impl Config {
    /// Load `config.toml` from the resolved config directory, creating it with
    /// defaults on first run.
    pub async fn load_or_init() -> Result<Self> {
        let config_dir = resolve_config_dir()?;
        Self::load_or_init_in(&config_dir).await
    }

    /// Same as [`Config::load_or_init`] with an explicit directory.
    pub async fn load_or_init_in(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let workspace_dir = config_dir.join("workspace");

        fs::create_dir_all(config_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;
        fs::create_dir_all(&workspace_dir)
            .await
            .context("Failed to create workspace directory")?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.save().await?;
            config
        } else {
            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.clone();
            config
        };
        config.workspace_dir = workspace_dir;

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            workspace = %config.workspace_dir.display(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            anyhow::bail!(
                "default_temperature must be between 0.0 and 2.0 (got {})",
                self.default_temperature
            );
        }

        if let Some(provider) = self.default_provider.as_deref() {
            if !self.providers.contains_key(provider) {
                anyhow::bail!("default_provider '{provider}' has no [providers.{provider}] entry");
            }
        }

        for (id, provider) in &self.providers {
            if provider.base_url.trim().is_empty() {
                anyhow::bail!("providers.{id}.base_url must not be empty");
            }
            reqwest::Url::parse(&provider.base_url)
                .with_context(|| format!("providers.{id}.base_url is not a valid URL"))?;
        }

        for (name, account) in &self.channels.imessage.accounts {
            if account.typing_gate && account.typing_timeout_ms == 0 {
                anyhow::bail!(
                    "channels.imessage.accounts.{name}.typing_timeout_ms must be greater than 0 when typing_gate is enabled"
                );
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                if let Some(provider) = self
                    .default_provider
                    .as_deref()
                    .and_then(|id| self.providers.get_mut(id))
                {
                    provider.api_key = Some(key);
                }
            }
        }

        if let Ok(mode) = std::env::var("OPENCLAW_COMPAT_SUBAGENT_PROMPT_MODE") {
            match parse_subagent_prompt_mode(&mode) {
                Some(mode) => self.agent.subagent_prompt_mode = mode,
                None => tracing::warn!(
                    value = %mode,
                    "Ignoring invalid OPENCLAW_COMPAT_SUBAGENT_PROMPT_MODE (expected full, minimal or none)"
                ),
            }
        }
    }

    /// Write the config atomically: temp file, then rename over the original.
    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let temp_path = parent_dir.join(format!(".{CONFIG_FILE_NAME}.tmp-{}", uuid::Uuid::new_v4()));
        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config file")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(error) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(error).context("Failed to replace config file");
        }

        #[cfg(unix)]
        {
            use std::{fs::Permissions, os::unix::fs::PermissionsExt};
            let _ = fs::set_permissions(&self.config_path, Permissions::from_mode(0o600)).await;
        }

        Ok(())
    }
}
