#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.

//! Main entry point for the turnsync CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// turnsync CLI
#[derive(Parser)]
#[command(name = "turnsync")]
#[command(about = "Follow and talk to live agent conversations", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to the configuration file (yaml, json or toml)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Transcript server base URL, overriding configuration and preferences
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Bearer token for the transcript server
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Preference store location (default: user config directory)
    #[arg(long, global = true)]
    pub preferences: Option<PathBuf>,
}

/// Subcommands for the turnsync CLI
#[derive(Subcommand)]
enum Commands {
    /// Follow a conversation live; lines typed on stdin are sent as messages
    Follow(commands::follow::FollowArgs),

    /// Send a message or answer a question in a conversation
    Send(commands::send::SendArgs),

    /// Print the transcript of a conversation
    History(commands::history::HistoryArgs),

    /// List agent sessions
    Sessions(commands::sessions::SessionsArgs),

    /// Manage configuration and stored preferences
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(
            long,
            short,
            help = "The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)"
        )]
        shell: String,
    },
}

/// Installs the stderr log subscriber. `RUST_LOG` wins over the configured
/// level.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .parse_lossy(format!("warn,client={log_level},cli={log_level},shared={log_level}"))
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Completion { shell } => commands::completion::run(&shell)?,
        Commands::Config { action } => {
            commands::config::run(action, &cli.global)?;
        }
        command => {
            let config = commands::resolve_config(&cli.global)?;
            init_tracing(&config.log_level);
            match command {
                Commands::Follow(args) => commands::follow::run(&config, args).await?,
                Commands::Send(args) => commands::send::run(&config, args).await?,
                Commands::History(args) => commands::history::run(&config, args).await?,
                Commands::Sessions(args) => commands::sessions::run(&config, &args).await?,
                Commands::Config { .. } | Commands::Completion { .. } => {}
            }
        }
    }

    Ok(())
}
