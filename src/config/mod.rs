//! Configuration management for tcache

pub mod schema;

pub use schema::{CacheConfig, Config, CoverageConfig, ProjectConfig, TransformRuleConfig};

use crate::error::{TcacheError, TcacheResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// File name of a project-local configuration
pub const LOCAL_CONFIG_NAME: &str = "tcache.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tcache")
            .join("config.toml")
    }

    /// Find the nearest `tcache.toml`, starting at `start` and walking up
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration, falling back to defaults if the file does not exist
    pub async fn load(&self) -> TcacheResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> TcacheResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| TcacheError::io(format!("reading config from {}", path.display()), e))?;

        let mut config: Config =
            toml::from_str(&content).map_err(|e| TcacheError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        // A relative root is relative to the config file, not the cwd
        if config.project.root_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.project.root_dir = parent.join(&config.project.root_dir);
            }
        }

        debug!(
            "Loaded config from {} ({} transform rules)",
            path.display(),
            config.transforms.len()
        );
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> TcacheResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            TcacheError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> TcacheResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TcacheError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
