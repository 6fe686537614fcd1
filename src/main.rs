use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use openclaw_compat::agent::{prepare_run, run_tool_loop, RunKind, RunRequest};
use openclaw_compat::config::{self, Config, CONFIG_DIR_ENV};
use openclaw_compat::observability::{DiagnosticSink, TracingSink};
use openclaw_compat::providers::compatible::CompatTransport;
use openclaw_compat::providers::traits::{Message, StreamFn};
use openclaw_compat::providers::{resolve_provider, select_stream_fn};
use openclaw_compat::session;
use openclaw_compat::tools::{default_tools, ToolAdapter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

fn parse_temperature(s: &str) -> std::result::Result<f64, String> {
    let t: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !(0.0..=2.0).contains(&t) {
        return Err("temperature must be between 0.0 and 2.0".to_string());
    }
    Ok(t)
}

/// Agent runtime patches for OpenAI-compatible providers.
#[derive(Parser, Debug)]
#[command(name = "openclaw-compat")]
#[command(version)]
#[command(about = "Run agent turns against OpenAI-compatible providers.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum RunKindArg {
    Main,
    Subagent,
}

impl From<RunKindArg> for RunKind {
    fn from(kind: RunKindArg) -> Self {
        match kind {
            RunKindArg::Main => Self::Main,
            RunKindArg::Subagent => Self::Subagent,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one message and run tool calls until the model answers
    Chat {
        /// Provider id from the config (defaults to `default_provider`)
        #[arg(short, long)]
        provider: Option<String>,

        /// Model id (defaults to the provider's or the global default)
        #[arg(long)]
        model: Option<String>,

        /// Temperature (0.0 - 2.0)
        #[arg(short, long, value_parser = parse_temperature)]
        temperature: Option<f64>,

        /// Prepare the run as a subagent or a main session
        #[arg(long, value_enum, default_value = "main")]
        kind: RunKindArg,

        /// Session transcript used for bootstrap expiry
        #[arg(long)]
        transcript: Option<PathBuf>,

        message: String,
    },

    /// Inspect session transcripts
    Transcript {
        #[command(subcommand)]
        transcript_command: TranscriptCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum TranscriptCommands {
    /// Count user messages in a transcript
    Count {
        path: PathBuf,

        /// Stop counting once this many user messages are seen
        #[arg(long, default_value_t = usize::MAX)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var(CONFIG_DIR_ENV, config_dir);
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    match cli.command {
        Commands::Config { config_command } => match config_command {
            ConfigCommands::Schema => {
                let schema = schemars::schema_for!(config::Config);
                println!(
                    "{}",
                    serde_json::to_string_pretty(&schema)
                        .context("failed to serialize JSON Schema")?
                );
                Ok(())
            }
        },

        Commands::Transcript { transcript_command } => match transcript_command {
            TranscriptCommands::Count { path, limit } => {
                println!("{}", session::count_user_messages(&path, limit));
                Ok(())
            }
        },

        Commands::Chat {
            provider,
            model,
            temperature,
            kind,
            transcript,
            message,
        } => {
            let config = Config::load_or_init().await?;
            chat(
                &config,
                provider.as_deref(),
                model.as_deref(),
                temperature,
                kind.into(),
                transcript,
                message,
            )
            .await
        }
    }
}

async fn chat(
    config: &Config,
    provider: Option<&str>,
    model: Option<&str>,
    temperature: Option<f64>,
    kind: RunKind,
    transcript: Option<PathBuf>,
    message: String,
) -> Result<()> {
    let resolved = resolve_provider(config, provider, model)?;
    let sink: Arc<dyn DiagnosticSink> = Arc::new(TracingSink);

    // No streaming client ships in this binary, so both paths share the
    // chat-completions transport.
    let native: Arc<dyn StreamFn> =
        Arc::new(CompatTransport::new(resolved.compat.clone(), sink.clone()));
    let stream_fn = select_stream_fn(&resolved.compat, native, sink);

    let adapter = ToolAdapter::without_hooks(default_tools(&config.workspace_dir));
    let prepared = prepare_run(
        config,
        &adapter,
        &RunRequest {
            kind,
            model: &resolved.model.id,
            transcript: transcript.as_deref(),
        },
    )?;

    let options =
        resolved.stream_options(Some(temperature.unwrap_or(config.default_temperature)));
    let mut messages = vec![Message::user(message)];
    let reply = run_tool_loop(
        stream_fn.as_ref(),
        &resolved.model,
        &prepared,
        &adapter,
        &mut messages,
        &options,
    )
    .await?;

    println!("{}", reply.text());
    Ok(())
}
