use altbot_backend::cli::{self, KeyCommand};
use altbot_backend::config::{AltbotConfig, DEFAULT_CONFIG_PATH};
use altbot_backend::node::AltbotNode;
use altbot_backend::setup;
use altbot_backend::telemetry;
use altbot_backend::utils;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Alt-text bot for Mastodon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "ALTBOT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Run the interactive setup wizard and exit
    #[arg(long)]
    setup: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Manage API keys for the HTTP endpoint
    Admin {
        #[command(subcommand)]
        action: KeyCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing();

    if let Some(Command::Admin { action }) = args.command {
        let config = if args.config.exists() {
            AltbotConfig::load(&args.config)?
        } else {
            AltbotConfig::default()
        };
        return cli::run_admin(&config, action);
    }

    utils::print_banner();
    if args.setup {
        setup::run_setup(&args.config)?;
        return Ok(());
    }

    let config = if args.config.exists() {
        AltbotConfig::load(&args.config)?
    } else {
        tracing::info!(path = %args.config.display(), "no configuration found, starting setup");
        setup::run_setup(&args.config)?
    };

    let node = AltbotNode::start(config).await?;
    node.run().await
}
