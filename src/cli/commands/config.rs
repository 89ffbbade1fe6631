//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, LOCAL_CONFIG_NAME};
use crate::error::{TcacheError, TcacheResult};
use console::style;
use std::path::Path;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, source: Option<&Path>) -> TcacheResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(source),
        Some(ConfigAction::Init { force }) => init_config(force).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> TcacheResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(source: Option<&Path>) {
    match source {
        Some(path) => println!("{}", path.display()),
        None => println!("{}", style("(defaults, no config file found)").dim()),
    }
}

async fn init_config(force: bool) -> TcacheResult<()> {
    let cwd = std::env::current_dir().map_err(|e| TcacheError::io("getting current directory", e))?;
    let manager = ConfigManager::with_path(cwd.join(LOCAL_CONFIG_NAME));
    let path = manager.path();

    if path.exists() && !force {
        eprintln!(
            "{} Config already exists at {}",
            style("!").yellow(),
            path.display()
        );
        eprintln!("{} Use --force to overwrite", style("Hint:").yellow());
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    println!("{} Created {}", style("✓").green(), path.display());

    Ok(())
}
