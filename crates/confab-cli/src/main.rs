use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use confab_core::{ChatTurn, CompletionOptions, CompletionProvider};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{ConfabConfig, ProviderKind};

#[derive(Parser)]
#[command(name = "confab")]
#[command(version)]
#[command(about = "confab: one chat request format for OpenAI, Anthropic, Gemini and local LLMs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration (keys masked)
    Config,

    /// Send a single prompt and print the completion
    Ask {
        /// Adapter to use (defaults to [defaults].provider)
        #[arg(short, long, value_enum)]
        provider: Option<ProviderKind>,

        /// System instruction sent ahead of the prompt
        #[arg(short, long)]
        system: Option<String>,

        /// Maximum output tokens
        #[arg(short, long)]
        max_tokens: Option<u32>,

        /// The prompt to send
        prompt: String,
    },

    /// Send a conversation from a JSON file ("-" for stdin) and print the completion
    Complete {
        #[arg(short, long, value_enum)]
        provider: Option<ProviderKind>,

        #[arg(short, long)]
        max_tokens: Option<u32>,

        /// Extra request field, repeatable. Values are parsed as JSON, else taken as strings
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// JSON array of {"role", "content"} turns
        messages: PathBuf,
    },

    /// Print the request body an adapter would send, without calling it
    Inspect {
        #[arg(short, long, value_enum)]
        provider: Option<ProviderKind>,

        #[arg(short, long)]
        max_tokens: Option<u32>,

        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        messages: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so completions can be piped
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Ask {
            provider,
            system,
            max_tokens,
            prompt,
        } => cmd_ask(&cli.config, provider, system, max_tokens, &prompt).await,
        Commands::Complete {
            provider,
            max_tokens,
            options,
            messages,
        } => cmd_complete(&cli.config, provider, max_tokens, &options, &messages).await,
        Commands::Inspect {
            provider,
            max_tokens,
            options,
            messages,
        } => cmd_inspect(&cli.config, provider, max_tokens, &options, &messages).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        tokio::fs::write(&config_path, config::DEFAULT_CONFIG).await?;
        // load() refuses group/other readable files
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("confab initialized at {}", config_dir.display());
    println!("Edit {} to configure providers.", config_path.display());
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ConfabConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.redacted())?);
    Ok(())
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    provider: Option<ProviderKind>,
    system: Option<String>,
    max_tokens: Option<u32>,
    prompt: &str,
) -> Result<()> {
    let cfg = ConfabConfig::load(config_path)?;
    let kind = provider.unwrap_or(cfg.defaults.provider);
    let provider = cfg.build_provider(kind)?;

    let mut turns = Vec::with_capacity(2);
    if let Some(system) = system {
        turns.push(ChatTurn::system(system));
    }
    turns.push(ChatTurn::user(prompt));

    let text = provider
        .complete(
            &turns,
            max_tokens.unwrap_or(cfg.defaults.max_tokens),
            &CompletionOptions::new(),
        )
        .await
        .with_context(|| format!("{} completion failed", kind))?;
    println!("{}", text);
    Ok(())
}

async fn cmd_complete(
    config_path: &Option<PathBuf>,
    provider: Option<ProviderKind>,
    max_tokens: Option<u32>,
    options: &[String],
    messages: &Path,
) -> Result<()> {
    let cfg = ConfabConfig::load(config_path)?;
    let kind = provider.unwrap_or(cfg.defaults.provider);
    let provider = cfg.build_provider(kind)?;
    let turns = read_turns(messages).await?;
    let options = parse_options(options)?;

    let text = provider
        .complete(
            &turns,
            max_tokens.unwrap_or(cfg.defaults.max_tokens),
            &options,
        )
        .await
        .with_context(|| format!("{} completion failed", kind))?;
    println!("{}", text);
    Ok(())
}

async fn cmd_inspect(
    config_path: &Option<PathBuf>,
    provider: Option<ProviderKind>,
    max_tokens: Option<u32>,
    options: &[String],
    messages: &Path,
) -> Result<()> {
    let cfg = ConfabConfig::load(config_path)?;
    let kind = provider.unwrap_or(cfg.defaults.provider);
    let provider = cfg.build_provider(kind)?;
    let turns = read_turns(messages).await?;
    let options = parse_options(options)?;

    let body = provider.build_request(
        &turns,
        max_tokens.unwrap_or(cfg.defaults.max_tokens),
        &options,
    )?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Read a JSON array of chat turns from a file, or stdin for "-"
async fn read_turns(path: &Path) -> Result<Vec<ChatTurn>> {
    let content = if path == Path::new("-") {
        use tokio::io::AsyncReadExt;
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read messages from {}", path.display()))?
    };
    let turns: Vec<ChatTurn> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse messages in {}", path.display()))?;
    debug!("Loaded {} turns from {}", turns.len(), path.display());
    Ok(turns)
}

/// Parse repeated `KEY=VALUE` flags into request options
fn parse_options(raw: &[String]) -> Result<CompletionOptions> {
    let mut options = CompletionOptions::new();
    for item in raw {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid option {:?}, expected KEY=VALUE", item))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("Invalid option {:?}, key is empty", item));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        options.insert(key.to_string(), value);
    }
    Ok(options)
}
