//! Error types for tcache
//!
//! All modules use `TcacheResult<T>` as their return type. Only fatal
//! conditions live here; cache read failures and malformed inline source
//! maps are recovered where they happen and never become an error value.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tcache operations
pub type TcacheResult<T> = Result<T, TcacheError>;

/// All errors that can occur in tcache
#[derive(Error, Debug)]
pub enum TcacheError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {kind} pattern '{pattern}': {reason}")]
    InvalidPattern {
        kind: &'static str,
        pattern: String,
        reason: String,
    },

    // Transformer resolution errors
    #[error("Transformer not found: {0}")]
    TransformerNotFound(String),

    #[error("Invalid transformer '{specifier}': a transform must export a `process` function{detail}")]
    InvalidTransformer { specifier: String, detail: String },

    #[error("Transformer '{specifier}' failed to initialize: {reason}")]
    TransformerInit { specifier: String, reason: String },

    // Transform errors
    #[error("Transformer '{transformer}' only exposes `process_async`; {path} must be transformed with transform_async")]
    SyncUnsupported { transformer: String, path: PathBuf },

    #[error("Transformer '{transformer}' must return a string or an object with a `code` string field from process, got {got} while transforming {path}")]
    ContractViolation {
        transformer: String,
        path: PathBuf,
        got: String,
    },

    #[error("Transformer '{transformer}' failed on {path}: {message}")]
    Plugin {
        transformer: String,
        path: PathBuf,
        message: String,
    },

    #[error("Coverage instrumentation failed on {path}: {message}")]
    Instrumentation { path: PathBuf, message: String },

    #[error("Failed to read source file {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl TcacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a plugin failure for a transformer invocation
    pub fn plugin(
        transformer: impl Into<String>,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Plugin {
            transformer: transformer.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the error points at configuration rather than a single file
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid { .. }
                | Self::ConfigNotFound(_)
                | Self::InvalidPattern { .. }
                | Self::TransformerNotFound(_)
                | Self::InvalidTransformer { .. }
                | Self::TransformerInit { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidTransformer { .. } => {
                Some("Transformers need a `process` (or `process_async`) capability, directly or from `create_transformer`")
            }
            Self::TransformerNotFound(_) => Some("Check the `transformer` names in your [[transform]] rules"),
            Self::InvalidPattern { .. } => Some("Patterns use regex syntax, e.g. \"\\\\.js$\""),
            Self::SyncUnsupported { .. } => Some("Use `tcache transform --async`"),
            Self::ContractViolation { .. } => {
                Some("process must return the transformed code or `{ code, map }`")
            }
            _ => None,
        }
    }
}
