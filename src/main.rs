use anyhow::{Context, Result};
use clap::Parser;
use wayfare_core::Config;

mod cli;
mod commands;
mod context;

use cli::{Cli, Command};
use context::AppContext;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => Config::config_path()?,
    };
    let config = Config::load_from(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let filter = if cli.debug {
        "debug"
    } else {
        config.logging.filter.as_str()
    };
    wayfare_core::init(filter)?;

    let command = match cli.command {
        Command::Config { action } => return commands::config(&config, &config_path, action),
        other => other,
    };

    config.ensure_valid()?;
    let ctx = AppContext::new(&config)?;
    tracing::info!("Wayfare started");

    match command {
        Command::Auth { action } => commands::auth(&ctx, action).await,
        Command::Sync { target } => commands::sync(&ctx, target).await,
        Command::Share { action } => commands::share(&ctx, action).await,
        Command::Config { action } => commands::config(&config, &config_path, action),
    }
}
