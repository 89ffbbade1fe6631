//! Configuration schema for tcache
//!
//! Configuration is stored in `tcache.toml`, discovered from the working
//! directory upwards, or at `~/.config/tcache/config.toml`.

use crate::error::{TcacheError, TcacheResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Paths matching any of these regexes are never transformed
    pub ignore_patterns: Vec<String>,

    /// Project identity
    pub project: ProjectConfig,

    /// Transform cache settings
    pub cache: CacheConfig,

    /// Coverage collection settings
    pub coverage: CoverageConfig,

    /// Ordered transform rules; the first matching pattern wins
    #[serde(rename = "transform")]
    pub transforms: Vec<TransformRuleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore_patterns: vec!["/node_modules/".to_string()],
            project: ProjectConfig::default(),
            cache: CacheConfig::default(),
            coverage: CoverageConfig::default(),
            transforms: vec![TransformRuleConfig {
                pattern: r"\.[cm]?[jt]sx?$".to_string(),
                transformer: "passthrough".to_string(),
                options: empty_options(),
            }],
        }
    }
}

impl Config {
    /// Serialized form folded into every cache key.
    ///
    /// Any change to the configuration produces a different string and
    /// therefore invalidates every cached transform of this project.
    /// Paths that are not valid UTF-8 cannot be serialized and are rejected.
    pub fn config_string(&self) -> TcacheResult<String> {
        serde_json::to_string(self).map_err(|e| TcacheError::ConfigInvalid {
            path: self.project.root_dir.clone(),
            reason: format!("configuration cannot be serialized for cache keys: {}", e),
        })
    }
}

/// Project identity, used to isolate cache directories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Project root; relative source paths are resolved against it
    pub root_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            root_dir: PathBuf::from("."),
        }
    }
}

/// Transform cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Persist transform results on disk
    pub enabled: bool,

    /// Root cache directory
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_cache_dir(),
        }
    }
}

/// Get the default cache directory
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tcache")
}

/// Coverage collection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Instrument transformed files for coverage
    pub collect: bool,

    /// Glob patterns of files to instrument (empty = all)
    pub include: Vec<String>,

    /// Glob patterns of files never instrumented
    pub exclude: Vec<String>,

    /// Coverage provider name, passed through to the instrumenter
    pub provider: String,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            collect: false,
            include: vec![],
            exclude: vec!["**/node_modules/**".to_string(), "**/*.test.*".to_string()],
            provider: "babel".to_string(),
        }
    }
}

/// A single `[[transform]]` rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRuleConfig {
    /// Regex matched against the full file path
    pub pattern: String,

    /// Transformer specifier handed to the plugin loader
    pub transformer: String,

    /// Options passed to the transformer factory
    #[serde(default = "empty_options")]
    pub options: serde_json::Value,
}

fn empty_options() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
