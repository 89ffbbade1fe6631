//! tcache - transform-and-cache engine
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;
use tcache::cli::{Cli, Commands};
use tcache::config::{Config, ConfigManager};
use tcache::error::{TcacheError, TcacheResult};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            if e.is_configuration() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run() -> TcacheResult<()> {
    let cli = Cli::parse();

    // Initialize logging: 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("tcache=warn"),
        1 => EnvFilter::new("tcache=info"),
        _ => EnvFilter::new("tcache=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().map_err(|e| TcacheError::io("getting current directory", e))?;

    let config_path = locate_config(cli.config, &cwd)?;
    let mut config = match &config_path {
        Some(path) => {
            debug!("Using config: {}", path.display());
            ConfigManager::with_path(path.clone()).load().await?
        }
        None => {
            debug!("No config file found, using defaults");
            Config::default()
        }
    };

    if config.project.root_dir.is_relative() {
        config.project.root_dir = cwd.join(&config.project.root_dir);
    }

    // Dispatch to command
    match cli.command {
        Commands::Transform(args) => tcache::cli::commands::transform(args, &config).await,
        Commands::Cache(args) => tcache::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            tcache::cli::commands::config(args, &config, config_path.as_deref()).await
        }
    }
}

/// `-c` wins, then the nearest `tcache.toml`, then the user config file
fn locate_config(explicit: Option<PathBuf>, cwd: &std::path::Path) -> TcacheResult<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(TcacheError::ConfigNotFound(path));
        }
        return Ok(Some(path));
    }

    if let Some(local) = ConfigManager::find_local_config(cwd) {
        return Ok(Some(local));
    }

    let global = ConfigManager::default_config_path();
    Ok(global.is_file().then_some(global))
}
