//! Transformer plugin contract
//!
//! A plugin is resolved once into a [`TransformerCapabilities`] record:
//! optional `process`, `process_async` and `get_cache_key` capabilities
//! plus a `can_instrument` flag. The pipeline dispatches on which
//! capabilities are present.

use crate::error::{TcacheError, TcacheResult};
use crate::fs::ContentCache;
use crate::sourcemap::{RawSourceMap, SourceMap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// What the calling module system supports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerCapabilities {
    pub supports_dynamic_import: bool,
    pub supports_static_esm: bool,
    pub supports_top_level_await: bool,
    pub supports_export_namespace_from: bool,
}

/// Options handed to every transformer call
#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// File being transformed
    pub path: PathBuf,

    /// Built-in module of the host runtime
    pub is_core_module: bool,

    /// Coverage instrumentation requested for this file
    pub instrument: bool,

    /// Caller module-system capabilities
    pub caller: CallerCapabilities,

    /// Serialized project configuration
    pub config_string: Arc<str>,

    /// Options of the matching transform rule
    pub transformer_options: Arc<serde_json::Value>,

    /// Contents already read during this run
    pub content_cache: Option<ContentCache>,
}

impl TransformOptions {
    pub fn new(path: impl Into<PathBuf>, config_string: Arc<str>) -> Self {
        Self {
            path: path.into(),
            is_core_module: false,
            instrument: false,
            caller: CallerCapabilities::default(),
            config_string,
            transformer_options: Arc::new(serde_json::Value::Object(serde_json::Map::new())),
            content_cache: None,
        }
    }
}

/// Raw value returned by `process` / `process_async`
#[derive(Debug, Clone)]
pub enum ProcessOutput {
    /// Just the transformed code
    Code(String),

    /// Code plus an optional source map
    Structured {
        code: String,
        map: Option<RawSourceMap>,
    },

    /// Untyped output from plugins bridged from a dynamic host. Must be a
    /// JSON string or an object with a string `code` field.
    Dynamic(serde_json::Value),
}

impl From<String> for ProcessOutput {
    fn from(code: String) -> Self {
        Self::Code(code)
    }
}

impl From<&str> for ProcessOutput {
    fn from(code: &str) -> Self {
        Self::Code(code.to_string())
    }
}

/// Output that passed contract validation
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub code: String,
    pub map: Option<RawSourceMap>,
}

impl ProcessOutput {
    /// Enforce the output contract every transformer must follow
    pub fn validate(self, transformer: &str, path: &Path) -> TcacheResult<Transformed> {
        match self {
            Self::Code(code) => Ok(Transformed { code, map: None }),
            Self::Structured { code, map } => Ok(Transformed { code, map }),
            Self::Dynamic(value) => validate_dynamic(value, transformer, path),
        }
    }
}

fn validate_dynamic(
    value: serde_json::Value,
    transformer: &str,
    path: &Path,
) -> TcacheResult<Transformed> {
    use serde_json::Value;

    let violation = |got: &str| TcacheError::ContractViolation {
        transformer: transformer.to_string(),
        path: path.to_path_buf(),
        got: got.to_string(),
    };

    let mut object = match value {
        Value::String(code) => return Ok(Transformed { code, map: None }),
        Value::Object(object) => object,
        Value::Null => return Err(violation("null")),
        Value::Array(_) => return Err(violation("an array")),
        Value::Bool(_) => return Err(violation("a boolean")),
        Value::Number(_) => return Err(violation("a number")),
    };

    let code = match object.remove("code") {
        Some(Value::String(code)) => code,
        _ => return Err(violation("an object without a `code` string")),
    };

    let map = match object.remove("map") {
        None | Some(Value::Null) => None,
        Some(Value::String(json)) => Some(RawSourceMap::Json(json)),
        Some(value @ Value::Object(_)) => match serde_json::from_value::<SourceMap>(value) {
            Ok(map) => Some(RawSourceMap::Structured(map)),
            Err(e) => {
                warn!(
                    "Ignoring malformed source map from '{}' for {}: {}",
                    transformer,
                    path.display(),
                    e
                );
                None
            }
        },
        Some(_) => {
            warn!(
                "Ignoring source map of unexpected type from '{}' for {}",
                transformer,
                path.display()
            );
            None
        }
    };

    Ok(Transformed { code, map })
}

/// Synchronous `process` capability
pub trait Process: Send + Sync {
    fn process(
        &self,
        source: &str,
        path: &Path,
        options: &TransformOptions,
    ) -> TcacheResult<ProcessOutput>;
}

impl<F> Process for F
where
    F: Fn(&str, &Path, &TransformOptions) -> TcacheResult<ProcessOutput> + Send + Sync,
{
    fn process(
        &self,
        source: &str,
        path: &Path,
        options: &TransformOptions,
    ) -> TcacheResult<ProcessOutput> {
        self(source, path, options)
    }
}

/// Asynchronous `process_async` capability
#[async_trait]
pub trait ProcessAsync: Send + Sync {
    async fn process_async(
        &self,
        source: &str,
        path: &Path,
        options: &TransformOptions,
    ) -> TcacheResult<ProcessOutput>;
}

/// Optional `get_cache_key` capability
pub trait CacheKeySource: Send + Sync {
    fn cache_key(&self, source: &str, path: &Path, options: &TransformOptions) -> String;
}

impl<F> CacheKeySource for F
where
    F: Fn(&str, &Path, &TransformOptions) -> String + Send + Sync,
{
    fn cache_key(&self, source: &str, path: &Path, options: &TransformOptions) -> String {
        self(source, path, options)
    }
}

/// Optional `create_transformer` factory of a plugin module
pub trait TransformerFactory: Send + Sync {
    fn create_transformer(
        &self,
        options: &serde_json::Value,
    ) -> TcacheResult<TransformerCapabilities>;
}

impl<F> TransformerFactory for F
where
    F: Fn(&serde_json::Value) -> TcacheResult<TransformerCapabilities> + Send + Sync,
{
    fn create_transformer(
        &self,
        options: &serde_json::Value,
    ) -> TcacheResult<TransformerCapabilities> {
        self(options)
    }
}

/// Capability record of one transformer
#[derive(Clone, Default)]
pub struct TransformerCapabilities {
    pub process: Option<Arc<dyn Process>>,
    pub process_async: Option<Arc<dyn ProcessAsync>>,
    pub get_cache_key: Option<Arc<dyn CacheKeySource>>,
    pub can_instrument: bool,
}

impl TransformerCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_process<F>(mut self, process: F) -> Self
    where
        F: Fn(&str, &Path, &TransformOptions) -> TcacheResult<ProcessOutput> + Send + Sync + 'static,
    {
        self.process = Some(Arc::new(process));
        self
    }

    pub fn with_process_async(mut self, process: impl ProcessAsync + 'static) -> Self {
        self.process_async = Some(Arc::new(process));
        self
    }

    pub fn with_cache_key<F>(mut self, key: F) -> Self
    where
        F: Fn(&str, &Path, &TransformOptions) -> String + Send + Sync + 'static,
    {
        self.get_cache_key = Some(Arc::new(key));
        self
    }

    /// The transformer instruments code itself when asked to
    pub fn instrumenting(mut self) -> Self {
        self.can_instrument = true;
        self
    }

    /// Has at least one way to transform code
    pub fn is_usable(&self) -> bool {
        self.process.is_some() || self.process_async.is_some()
    }
}

impl fmt::Debug for TransformerCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerCapabilities")
            .field("process", &self.process.is_some())
            .field("process_async", &self.process_async.is_some())
            .field("get_cache_key", &self.get_cache_key.is_some())
            .field("can_instrument", &self.can_instrument)
            .finish()
    }
}

/// What a plugin loader hands back for a specifier
#[derive(Clone, Default)]
pub struct PluginModule {
    /// Capabilities exported directly by the module
    pub exports: TransformerCapabilities,

    /// Factory taking precedence over `exports` when present
    pub create_transformer: Option<Arc<dyn TransformerFactory>>,
}

impl PluginModule {
    pub fn from_exports(exports: TransformerCapabilities) -> Self {
        Self {
            exports,
            create_transformer: None,
        }
    }

    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Fn(&serde_json::Value) -> TcacheResult<TransformerCapabilities> + Send + Sync + 'static,
    {
        Self {
            exports: TransformerCapabilities::default(),
            create_transformer: Some(Arc::new(factory)),
        }
    }
}

impl fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginModule")
            .field("exports", &self.exports)
            .field("create_transformer", &self.create_transformer.is_some())
            .finish()
    }
}

/// Turns a transformer specifier into a plugin module
pub trait PluginLoader: Send + Sync {
    fn load(&self, specifier: &str) -> TcacheResult<PluginModule>;
}

/// A plugin resolved for one (specifier, options) pair
#[derive(Debug)]
pub struct ResolvedTransformer {
    pub identity: String,
    pub capabilities: TransformerCapabilities,
    pub options: Arc<serde_json::Value>,
}

impl ResolvedTransformer {
    pub fn new(
        identity: impl Into<String>,
        capabilities: TransformerCapabilities,
        options: serde_json::Value,
    ) -> Self {
        Self {
            identity: identity.into(),
            capabilities,
            options: Arc::new(options),
        }
    }

    pub fn can_instrument(&self) -> bool {
        self.capabilities.can_instrument
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(output: ProcessOutput) -> TcacheResult<Transformed> {
        output.validate("mock", Path::new("/src/a.js"))
    }

    #[test]
    fn plain_and_structured_outputs_pass() {
        assert_eq!(validate("x".into()).unwrap().code, "x");
        assert_eq!(validate(ProcessOutput::Dynamic(json!("x"))).unwrap().code, "x");
        assert_eq!(
            validate(ProcessOutput::Dynamic(json!({ "code": "x" })))
                .unwrap()
                .code,
            "x"
        );
    }

    #[test]
    fn invalid_dynamic_outputs_are_rejected() {
        for value in [
            json!(null),
            json!(["code"]),
            json!({ "map": null }),
            json!({ "code": 5 }),
            json!(true),
            json!(1),
        ] {
            let err = validate(ProcessOutput::Dynamic(value.clone())).unwrap_err();
            assert!(
                err.to_string().contains("must return a string"),
                "{value} gave {err}"
            );
        }
    }

    #[test]
    fn dynamic_map_forms() {
        let map = json!({ "version": 3, "sources": ["a.ts"], "names": [], "mappings": "AAAA" });

        let structured = validate(ProcessOutput::Dynamic(json!({ "code": "x", "map": map })))
            .unwrap()
            .map;
        assert!(matches!(structured, Some(RawSourceMap::Structured(_))));

        let text = validate(ProcessOutput::Dynamic(json!({ "code": "x", "map": map.to_string() })))
            .unwrap()
            .map;
        assert!(matches!(text, Some(RawSourceMap::Json(_))));

        // A broken map degrades to no map rather than failing the transform
        let broken = validate(ProcessOutput::Dynamic(json!({ "code": "x", "map": { "version": 3 } })))
            .unwrap();
        assert_eq!(broken.code, "x");
        assert!(broken.map.is_none());
    }

    #[test]
    fn capabilities_usable() {
        assert!(!TransformerCapabilities::new().is_usable());
        let caps = TransformerCapabilities::new().with_process(|s, _, _| Ok(s.into()));
        assert!(caps.is_usable());
        assert!(!caps.can_instrument);
        assert!(caps.instrumenting().can_instrument);
    }

    #[test]
    fn factory_module_debug() {
        let module = PluginModule::from_factory(|_| Ok(TransformerCapabilities::new()));
        assert!(format!("{module:?}").contains("create_transformer: true"));
    }
}
