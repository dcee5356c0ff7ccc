use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::Context;

#[derive(Parser)]
#[command(name = "recall", version, about = "Recall spaced-repetition CLI")]
struct Cli {
    /// SQLite database path (defaults to the configured path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file path (defaults to ~/.config/recall/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Container management
    Container {
        #[command(subcommand)]
        action: commands::container::ContainerAction,
    },
    /// Card management and review
    Card {
        #[command(subcommand)]
        action: commands::card::CardAction,
    },
    /// Timer synchronization
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recall=info,recall_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = Context::load(cli.config, cli.db).and_then(|ctx| match cli.command {
        Commands::Container { action } => commands::container::run(&ctx, action),
        Commands::Card { action } => commands::card::run(&ctx, action),
        Commands::Sync { action } => commands::sync::run(&ctx, action),
        Commands::Config { action } => commands::config::run(&ctx, action),
    });

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
