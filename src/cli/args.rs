//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// tcache - transform and cache source files
///
/// Runs files through the configured transformer plugins and keeps the
/// results in a content-addressed cache.
#[derive(Parser, Debug)]
#[command(name = "tcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path (default: nearest tcache.toml)
    #[arg(short, long, global = true, env = "TCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transform a file and print the result
    Transform(TransformArgs),

    /// Inspect or clear the transform cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the transform command
#[derive(Parser, Debug)]
pub struct TransformArgs {
    /// File to transform
    pub file: PathBuf,

    /// Instrument the file for coverage collection
    #[arg(long)]
    pub coverage: bool,

    /// Bypass the transform cache for this run
    #[arg(long)]
    pub no_cache: bool,

    /// Use the asynchronous transform path
    #[arg(long = "async")]
    pub async_mode: bool,

    /// Treat the file as a built-in module of the host runtime
    #[arg(long)]
    pub core_module: bool,

    /// Print the cache entry's source map path to stderr
    #[arg(long)]
    pub show_map: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show the configuration file in use
    Path,

    /// Write a default tcache.toml to the current directory
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print this project's cache directory
    Path,

    /// Show entry counts and disk usage
    Stats {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove this project's cache directory
    Clear,
}

/// Output format for listings
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Plain,
}
