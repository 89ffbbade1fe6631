//! Cache command - inspect or clear the transform cache

use crate::cache::{format_bytes, CacheStats};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::TcacheResult;
use crate::pipeline::TransformPipeline;
use console::style;
use std::path::Path;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> TcacheResult<()> {
    let pipeline = TransformPipeline::builder(config.clone()).build()?;
    let cache = pipeline.cache();

    match args.action {
        CacheAction::Path => println!("{}", cache.directory().display()),
        CacheAction::Stats { format } => {
            let stats = cache.stats()?;
            match format {
                OutputFormat::Table => print_stats_table(cache.directory(), &stats, cache.is_enabled()),
                OutputFormat::Json => print_stats_json(cache.directory(), &stats)?,
                OutputFormat::Plain => {
                    println!("{} {} {}", stats.entries, stats.maps, stats.bytes)
                }
            }
        }
        CacheAction::Clear => {
            if cache.clear()? {
                println!(
                    "{} Removed {}",
                    style("✓").green(),
                    cache.directory().display()
                );
            } else {
                println!("Nothing to clear.");
            }
        }
    }

    Ok(())
}

fn print_stats_table(dir: &Path, stats: &CacheStats, enabled: bool) {
    let state = if enabled {
        style("enabled").green().to_string()
    } else {
        style("disabled").dim().to_string()
    };

    println!("{:<12} {}", "DIRECTORY", dir.display());
    println!("{:<12} {}", "STATE", state);
    println!("{}", "-".repeat(40));
    println!("{:<12} {}", "Entries", stats.entries);
    println!("{:<12} {}", "Source maps", stats.maps);
    println!("{:<12} {}", "Size", format_bytes(stats.bytes));
}

fn print_stats_json(dir: &Path, stats: &CacheStats) -> TcacheResult<()> {
    #[derive(serde::Serialize)]
    struct StatsJson<'a> {
        directory: &'a Path,
        #[serde(flatten)]
        stats: &'a CacheStats,
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&StatsJson {
            directory: dir,
            stats
        })?
    );
    Ok(())
}
