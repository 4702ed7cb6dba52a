//! OpenAgent CLI: the main entry point.
//!
//! Commands:
//! - `chat`: interactive session (the default), or one message with `-m`
//! - `config`: show, locate, initialize, or validate configuration
//! - `doctor`: diagnose setup problems

use clap::{Parser, Subcommand};

mod commands;
mod render;

#[derive(Parser)]
#[command(
    name = "openagent",
    about = "OpenAgent: an autonomous coding agent for your terminal",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    chat: ChatArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Flags shared by the default command and `chat`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ChatArgs {
    /// Run every command without asking for approval
    #[arg(long)]
    pub auto_approve: bool,

    /// Auto-respond on the human's behalf until the agent says "done"
    #[arg(long, alias = "nohuman")]
    pub no_human: bool,

    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    pub message: Option<String>,

    /// Override the configured model
    #[arg(long)]
    pub model: Option<String>,

    /// Print runtime events as JSON lines instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        #[command(flatten)]
        args: ChatArgs,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose setup problems
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init,
    /// Load and validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // stdout carries assistant output; logs go to stderr
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        None => commands::chat::run(cli.chat).await?,
        Some(Commands::Chat { args }) => commands::chat::run(args).await?,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
        Some(Commands::Doctor) => commands::doctor::run().await?,
    }

    Ok(())
}
