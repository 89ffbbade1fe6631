//! The transform pipeline
//!
//! One [`TransformPipeline`] serves one project configuration. For each
//! file it reads the source, resolves a transformer, consults the cache,
//! runs the transformer and (optionally) coverage instrumentation, composes
//! source maps and persists the result.
//!
//! ```text
//! NotStarted → SourceAcquired → TransformerResolved → CacheChecked
//!     → CacheHit | Transformed → [Instrumented] → MapComposed → Persisted → Done
//! ```
//!
//! Any stage can end in `Failed`; nothing is cached for a failed file.

pub mod coverage;

pub use coverage::{
    CoverageFilter, FileHitInstrumenter, InstrumentDecider, InstrumentedOutput, Instrumenter,
};

use crate::cache::{CacheKey, CacheKeyComputer, Lookup, TransformCache};
use crate::config::Config;
use crate::error::{TcacheError, TcacheResult};
use crate::fs::{ContentCache, FileSystem, OsFileSystem};
use crate::sourcemap::{self, SourceMap};
use crate::transform::{
    BuiltinLoader, CallerCapabilities, PluginLoader, ProcessOutput, ResolvedTransformer,
    TransformOptions, TransformerRegistry,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Progress of a single file through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NotStarted,
    SourceAcquired,
    TransformerResolved,
    CacheChecked,
    CacheHit,
    Transformed,
    Instrumented,
    MapComposed,
    Persisted,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::SourceAcquired => "source-acquired",
            Self::TransformerResolved => "transformer-resolved",
            Self::CacheChecked => "cache-checked",
            Self::CacheHit => "cache-hit",
            Self::Transformed => "transformed",
            Self::Instrumented => "instrumented",
            Self::MapComposed => "map-composed",
            Self::Persisted => "persisted",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn trace_stage(stage: Stage, path: &Path) {
    debug!("[{}] {}", stage, path.display());
}

/// One file to transform
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub path: PathBuf,

    /// Source text; read from the file system when absent
    pub source: Option<String>,

    pub is_core_module: bool,

    /// This run collects coverage
    pub collect_coverage: bool,

    pub caller: CallerCapabilities,

    /// Read-through cache shared with the caller
    pub content_cache: Option<ContentCache>,
}

impl TransformRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source: None,
            is_core_module: false,
            collect_coverage: false,
            caller: CallerCapabilities::default(),
            content_cache: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn core_module(mut self) -> Self {
        self.is_core_module = true;
        self
    }

    pub fn with_coverage(mut self, collect: bool) -> Self {
        self.collect_coverage = collect;
        self
    }

    pub fn with_caller(mut self, caller: CallerCapabilities) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_content_cache(mut self, cache: ContentCache) -> Self {
        self.content_cache = Some(cache);
        self
    }
}

/// Output of a transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
    /// Final code, possibly ending in an inline source map comment
    pub code: String,
    pub original_code: String,
    /// Persisted source map, if any
    pub source_map_path: Option<PathBuf>,
}

/// A cache miss that still has to run the transformer
struct Job {
    path: PathBuf,
    source: String,
    key: CacheKey,
    transformer: Arc<ResolvedTransformer>,
    options: TransformOptions,
}

enum Prepared {
    Ready(Arc<TransformResult>),
    Run(Job),
}

/// Builder for [`TransformPipeline`]
pub struct PipelineBuilder {
    config: Config,
    loader: Option<Arc<dyn PluginLoader>>,
    fs: Option<Arc<dyn FileSystem>>,
    decider: Option<Arc<dyn InstrumentDecider>>,
    instrumenter: Option<Arc<dyn Instrumenter>>,
}

impl PipelineBuilder {
    /// Plugin loader (default: [`BuiltinLoader`])
    pub fn loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// File system (default: [`OsFileSystem`])
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Coverage decision (default: [`CoverageFilter`] over `[coverage]`)
    pub fn decider(mut self, decider: Arc<dyn InstrumentDecider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// Coverage instrumenter (default: none, so nothing is instrumented)
    pub fn instrumenter(mut self, instrumenter: Arc<dyn Instrumenter>) -> Self {
        self.instrumenter = Some(instrumenter);
        self
    }

    pub fn build(self) -> TcacheResult<TransformPipeline> {
        let config = self.config;
        let loader: Arc<dyn PluginLoader> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(BuiltinLoader::new()),
        };
        let fs: Arc<dyn FileSystem> = match self.fs {
            Some(fs) => fs,
            None => Arc::new(OsFileSystem),
        };
        let decider: Arc<dyn InstrumentDecider> = match self.decider {
            Some(decider) => decider,
            None => Arc::new(CoverageFilter::new(&config.coverage)?),
        };

        let registry = TransformerRegistry::new(&config, loader)?;
        let config_string: Arc<str> = config.config_string()?.into();
        let keys = CacheKeyComputer::new(&config_string);
        let cache = TransformCache::new(
            &config.cache,
            &config.project.name,
            keys.config_hash(),
            Arc::clone(&fs),
        );

        debug!(
            "Transform pipeline for '{}' caching in {}",
            config.project.name,
            cache.directory().display()
        );

        Ok(TransformPipeline {
            config,
            config_string,
            registry,
            keys,
            cache,
            fs,
            decider,
            instrumenter: self.instrumenter,
        })
    }
}

/// Transform-and-cache engine for one project configuration
///
/// Safe to share across threads. Resolved transformers and in-memory
/// results are private to the instance.
pub struct TransformPipeline {
    config: Config,
    config_string: Arc<str>,
    registry: TransformerRegistry,
    keys: CacheKeyComputer,
    cache: TransformCache,
    fs: Arc<dyn FileSystem>,
    decider: Arc<dyn InstrumentDecider>,
    instrumenter: Option<Arc<dyn Instrumenter>>,
}

impl TransformPipeline {
    pub fn builder(config: Config) -> PipelineBuilder {
        PipelineBuilder {
            config,
            loader: None,
            fs: None,
            decider: None,
            instrumenter: None,
        }
    }

    /// Pipeline with the default file system and no instrumenter
    pub fn new(config: Config, loader: Arc<dyn PluginLoader>) -> TcacheResult<Self> {
        Self::builder(config).loader(loader).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &TransformCache {
        &self.cache
    }

    /// Whether `path` would be handed to a transformer
    pub fn should_transform(&self, path: &Path) -> bool {
        self.registry.rule_for(path).is_some()
    }

    /// Load the transformer for `path` ahead of time, surfacing
    /// configuration errors without transforming anything
    pub fn preload_transformer(&self, path: &Path) -> TcacheResult<bool> {
        Ok(self.registry.preload(path)?.is_some())
    }

    /// Load every configured transformer
    pub fn preload_all(&self) -> TcacheResult<usize> {
        self.registry.preload_all()
    }

    /// Transform with the synchronous `process` capability
    pub fn transform(&self, request: TransformRequest) -> TcacheResult<Arc<TransformResult>> {
        let job = match self.prepare(&request)? {
            Prepared::Ready(result) => return Ok(result),
            Prepared::Run(job) => job,
        };

        let output = match &job.transformer.capabilities.process {
            Some(process) => process.process(&job.source, &job.path, &job.options),
            None => {
                trace_stage(Stage::Failed, &job.path);
                return Err(TcacheError::SyncUnsupported {
                    transformer: job.transformer.identity.clone(),
                    path: job.path,
                });
            }
        };

        self.finish(job, output)
    }

    /// Transform preferring `process_async`, falling back to `process`
    pub async fn transform_async(
        &self,
        request: TransformRequest,
    ) -> TcacheResult<Arc<TransformResult>> {
        let job = match self.prepare(&request)? {
            Prepared::Ready(result) => return Ok(result),
            Prepared::Run(job) => job,
        };

        let capabilities = &job.transformer.capabilities;
        let output = match (&capabilities.process_async, &capabilities.process) {
            (Some(process_async), _) => {
                process_async
                    .process_async(&job.source, &job.path, &job.options)
                    .await
            }
            (None, Some(process)) => process.process(&job.source, &job.path, &job.options),
            (None, None) => Err(TcacheError::InvalidTransformer {
                specifier: job.transformer.identity.clone(),
                detail: String::new(),
            }),
        };

        self.finish(job, output)
    }

    /// Everything up to and including the cache lookup
    fn prepare(&self, request: &TransformRequest) -> TcacheResult<Prepared> {
        let path = request.path.as_path();
        trace_stage(Stage::NotStarted, path);

        let source = self.read_source(request)?;
        trace_stage(Stage::SourceAcquired, path);

        let Some(transformer) = self.registry.resolve(path, request.is_core_module)? else {
            debug!("No transformer for {}, passing through", path.display());
            return Ok(Prepared::Ready(Arc::new(TransformResult {
                code: source.clone(),
                original_code: source,
                source_map_path: None,
            })));
        };
        trace_stage(Stage::TransformerResolved, path);

        let instrument = request.collect_coverage
            && self
                .decider
                .should_instrument(path, &self.config.coverage, &self.config);

        let options = TransformOptions {
            path: path.to_path_buf(),
            is_core_module: request.is_core_module,
            instrument,
            caller: request.caller,
            config_string: Arc::clone(&self.config_string),
            transformer_options: Arc::clone(&transformer.options),
            content_cache: request.content_cache.clone(),
        };

        let key = self.keys.compute(&source, path, &options, &transformer);
        trace_stage(Stage::CacheChecked, path);

        match self.cache.lookup(&key, path) {
            Lookup::Memory(result) => {
                trace_stage(Stage::CacheHit, path);
                Ok(Prepared::Ready(result))
            }
            Lookup::Disk(entry) => {
                trace_stage(Stage::CacheHit, path);
                let result = TransformResult {
                    code: entry.code,
                    original_code: source,
                    source_map_path: entry.source_map_path,
                };
                Ok(Prepared::Ready(self.cache.remember(key, result)))
            }
            Lookup::Miss => Ok(Prepared::Run(Job {
                path: path.to_path_buf(),
                source,
                key,
                transformer,
                options,
            })),
        }
    }

    fn read_source(&self, request: &TransformRequest) -> TcacheResult<String> {
        if let Some(source) = &request.source {
            return Ok(source.clone());
        }

        let read = match &request.content_cache {
            Some(cache) => cache
                .read_through(&request.path, self.fs.as_ref())
                .map(|content| content.to_string()),
            None => self.fs.read_to_string(&request.path),
        };

        read.map_err(|source| TcacheError::SourceRead {
            path: request.path.clone(),
            source,
        })
    }

    /// Validate plugin output, instrument, compose maps and persist
    fn finish(
        &self,
        job: Job,
        output: TcacheResult<ProcessOutput>,
    ) -> TcacheResult<Arc<TransformResult>> {
        let Job {
            path,
            source,
            key,
            transformer,
            options,
        } = job;
        let identity = transformer.identity.as_str();

        let transformed = output
            .map_err(|e| match e {
                TcacheError::Plugin { .. } | TcacheError::ContractViolation { .. } => e,
                other => TcacheError::plugin(identity, &path, other.to_string()),
            })
            .and_then(|output| output.validate(identity, &path))
            .inspect_err(|_| trace_stage(Stage::Failed, &path))?;
        trace_stage(Stage::Transformed, &path);

        let transformer_map = match transformed.map {
            Some(raw) => raw.parse().map_or_else(
                |e| {
                    warn!(
                        "Ignoring unparsable source map from '{}' for {}: {}",
                        identity,
                        path.display(),
                        e
                    );
                    None
                },
                Some,
            ),
            None => inline_map(&transformed.code, &path),
        };

        let instrumenter = self
            .instrumenter
            .as_ref()
            .filter(|_| options.instrument && !transformer.can_instrument());

        let (code, map) = match instrumenter {
            Some(instrumenter) => {
                let input = sourcemap::strip_inline_map(&transformed.code);
                let instrumented = instrumenter
                    .instrument(&input, &path, &options)
                    .map_err(|e| match e {
                        TcacheError::Instrumentation { .. } => e,
                        other => TcacheError::Instrumentation {
                            path: path.clone(),
                            message: other.to_string(),
                        },
                    })
                    .inspect_err(|_| trace_stage(Stage::Failed, &path))?;
                trace_stage(Stage::Instrumented, &path);

                let map = match (&transformer_map, &instrumented.map) {
                    (Some(_), None) => {
                        // The transformer map no longer describes the instrumented lines
                        debug!(
                            "Dropping source map for {}: instrumenter returned none",
                            path.display()
                        );
                        None
                    }
                    _ => sourcemap::compose(
                        transformer_map.as_ref(),
                        instrumented.map.as_ref(),
                        &source,
                        &path,
                    ),
                };
                (with_inline_map(instrumented.code, map.as_ref(), &path), map)
            }
            None if options.instrument && transformer.can_instrument() => {
                // The transformer instrumented the code itself
                let map = sourcemap::compose(transformer_map.as_ref(), None, &source, &path);
                (with_inline_map(transformed.code, map.as_ref(), &path), map)
            }
            None => (transformed.code, transformer_map),
        };
        trace_stage(Stage::MapComposed, &path);

        let source_map_path = self.cache.store(&key, &path, &code, map.as_ref());
        trace_stage(Stage::Persisted, &path);

        let result = self.cache.remember(
            key,
            TransformResult {
                code,
                original_code: source,
                source_map_path,
            },
        );
        trace_stage(Stage::Done, &path);
        Ok(result)
    }
}

fn inline_map(code: &str, path: &Path) -> Option<SourceMap> {
    match sourcemap::extract_inline_map(code)? {
        Ok(map) => Some(map),
        Err(e) => {
            warn!("Ignoring malformed inline source map in {}: {}", path.display(), e);
            None
        }
    }
}

fn with_inline_map(code: String, map: Option<&SourceMap>, path: &Path) -> String {
    let Some(map) = map else {
        return code;
    };
    match sourcemap::append_inline_map(&code, map) {
        Ok(with_map) => with_map,
        Err(e) => {
            warn!("Could not inline source map for {}: {}", path.display(), e);
            code
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::CountingFs;
    use crate::sourcemap::vlq::{self, OriginalPosition, Segment};
    use crate::sourcemap::RawSourceMap;
    use crate::transform::{PluginModule, ProcessAsync, TransformerCapabilities};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const BANANA: &str = "module.exports = \"banana\";";

    struct Fixture {
        dir: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = Config::default();
            config.project.name = "fixture".to_string();
            config.project.root_dir = dir.path().to_path_buf();
            config.cache.directory = dir.path().join("cache");
            config.transforms[0].transformer = "test".to_string();
            Self { dir, config }
        }

        fn file(&self, name: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join("src").join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, content).unwrap();
            path
        }

        fn builder(&self, module: PluginModule) -> PipelineBuilder {
            let mut loader = BuiltinLoader::new();
            loader.register("test", module);
            TransformPipeline::builder(self.config.clone()).loader(Arc::new(loader))
        }

        fn pipeline(&self, module: PluginModule) -> TransformPipeline {
            self.builder(module).build().unwrap()
        }
    }

    /// A `process` that counts its calls
    fn counting(calls: &Arc<AtomicUsize>) -> TransformerCapabilities {
        let calls = Arc::clone(calls);
        TransformerCapabilities::new().with_process(move |source, _, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProcessOutput::from(source))
        })
    }

    fn line_map(path: &Path, lines: usize) -> SourceMap {
        let decoded: vlq::Lines = (0..lines)
            .map(|line| {
                vec![Segment::new(
                    0,
                    Some(OriginalPosition {
                        source: 0,
                        line: line as u32,
                        column: 0,
                        name: None,
                    }),
                )]
            })
            .collect();
        let mut map = SourceMap::new(path.display().to_string());
        map.mappings = vlq::encode(&decoded);
        map
    }

    #[derive(Default)]
    struct CountingDecider {
        calls: AtomicUsize,
    }

    impl InstrumentDecider for CountingDecider {
        fn should_instrument(&self, _: &Path, _: &crate::config::CoverageConfig, _: &Config) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn banana_passes_through() {
        let fx = Fixture::new();
        let path = fx.file("banana.js", BANANA);
        let pipeline = fx.pipeline(crate::transform::builtin::passthrough());

        let result = pipeline.transform(TransformRequest::new(&path)).unwrap();
        assert_eq!(result.code, BANANA);
        assert_eq!(result.original_code, BANANA);
        assert!(result.source_map_path.is_none());
    }

    #[test]
    fn repeated_transform_is_memoized() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let calls = Arc::new(AtomicUsize::new(0));
        let fs = Arc::new(CountingFs::default());
        let pipeline = fx
            .builder(PluginModule::from_exports(counting(&calls)))
            .file_system(fs.clone())
            .build()
            .unwrap();

        let contents = ContentCache::new();
        let request = TransformRequest::new(&path).with_content_cache(contents.clone());

        let first = pipeline.transform(request.clone()).unwrap();
        let second = pipeline.transform(request).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs.reads_of(&path), 1);
        assert_eq!(contents.len(), 1);
    }

    #[test]
    fn config_change_busts_cache() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let calls = Arc::new(AtomicUsize::new(0));

        let first = fx.pipeline(PluginModule::from_exports(counting(&calls)));
        first.transform(TransformRequest::new(&path)).unwrap();

        let mut changed = fx.config.clone();
        changed.transforms[0].options = json!({ "target": "es2020" });
        let mut loader = BuiltinLoader::new();
        loader.register("test", PluginModule::from_exports(counting(&calls)));
        let second = TransformPipeline::new(changed, Arc::new(loader)).unwrap();
        second.transform(TransformRequest::new(&path)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn core_modules_skip_everything() {
        let fx = Fixture::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let decider = Arc::new(CountingDecider::default());
        let pipeline = fx
            .builder(PluginModule::from_exports(counting(&calls)))
            .decider(decider.clone())
            .instrumenter(Arc::new(FileHitInstrumenter))
            .build()
            .unwrap();

        let request = TransformRequest::new("/virtual/fs.js")
            .with_source("exports.read = 1;")
            .core_module()
            .with_coverage(true);
        let result = pipeline.transform(request).unwrap();

        assert_eq!(result.code, "exports.read = 1;");
        assert_eq!(decider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ignored_and_unmatched_paths_pass_through() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(crate::transform::builtin::banner());

        assert!(pipeline.should_transform(Path::new("/p/src/a.js")));
        assert!(!pipeline.should_transform(Path::new("/p/node_modules/x/a.js")));
        assert!(!pipeline.should_transform(Path::new("/p/readme.md")));

        let result = pipeline
            .transform(TransformRequest::new("/p/readme.md").with_source("# hi"))
            .unwrap();
        assert_eq!(result.code, "# hi");
    }

    #[test]
    fn contract_violations_are_rejected() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");

        for bad in [json!(null), json!(["a"]), json!({ "map": null })] {
            let module = PluginModule::from_exports(
                TransformerCapabilities::new()
                    .with_process(move |_, _, _| Ok(ProcessOutput::Dynamic(bad.clone()))),
            );
            let pipeline = fx.pipeline(module);
            let err = pipeline.transform(TransformRequest::new(&path)).unwrap_err();
            assert!(err.to_string().contains("must return a string"), "{err}");
            assert_eq!(pipeline.cache().stats().unwrap().entries, 0);
        }

        for good in [json!("ok();"), json!({ "code": "ok();" })] {
            let module = PluginModule::from_exports(
                TransformerCapabilities::new()
                    .with_process(move |_, _, _| Ok(ProcessOutput::Dynamic(good.clone()))),
            );
            let result = fx
                .pipeline(module)
                .transform(TransformRequest::new(&path))
                .unwrap();
            assert_eq!(result.code, "ok();");
        }
    }

    #[test]
    fn missing_process_is_rejected() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");

        let direct = fx.pipeline(PluginModule::from_exports(TransformerCapabilities::new()));
        let err = direct.transform(TransformRequest::new(&path)).unwrap_err();
        assert!(err.to_string().contains("must export a `process` function"));

        let factory = fx.pipeline(PluginModule::from_factory(|_| {
            Ok(TransformerCapabilities::new())
        }));
        let err = factory.preload_transformer(&path).unwrap_err();
        assert!(matches!(err, TcacheError::InvalidTransformer { .. }));
    }

    #[test]
    fn plugin_failure_is_not_cached() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let pipeline = fx.pipeline(PluginModule::from_exports(
            TransformerCapabilities::new()
                .with_process(|_, _, _| Err(TcacheError::User("syntax error".to_string()))),
        ));

        let err = pipeline.transform(TransformRequest::new(&path)).unwrap_err();
        assert!(matches!(err, TcacheError::Plugin { .. }));
        assert!(err.to_string().contains("syntax error"));
        assert_eq!(pipeline.cache().stats().unwrap().entries, 0);
    }

    #[test]
    fn missing_source_file_is_read_error() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(crate::transform::builtin::passthrough());
        let err = pipeline
            .transform(TransformRequest::new(fx.dir.path().join("nope.js")))
            .unwrap_err();
        assert!(matches!(err, TcacheError::SourceRead { .. }));
    }

    #[test]
    fn supplied_map_is_persisted_verbatim() {
        let fx = Fixture::new();
        let path = fx.file("a.ts", "let a = 1;\nlet b = 2;");
        let mut map = line_map(&path, 2);
        map.extra.insert("x_custom".to_string(), json!(true));

        let supplied = map.clone();
        let pipeline = fx.pipeline(PluginModule::from_exports(
            TransformerCapabilities::new().with_process(move |source, _, _| {
                Ok(ProcessOutput::Structured {
                    code: source.replace("let", "var"),
                    map: Some(RawSourceMap::Structured(supplied.clone())),
                })
            }),
        ));

        let result = pipeline.transform(TransformRequest::new(&path)).unwrap();
        assert_eq!(result.code, "var a = 1;\nvar b = 2;");

        let map_path = result.source_map_path.as_ref().unwrap();
        assert_eq!(std::fs::read_to_string(map_path).unwrap(), map.to_json().unwrap());
    }

    #[test]
    fn inline_map_is_extracted_and_persisted() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let map = line_map(&path, 1);

        let inline = sourcemap::append_inline_map("a();", &map).unwrap();
        let returned = inline.clone();
        let pipeline = fx.pipeline(PluginModule::from_exports(
            TransformerCapabilities::new()
                .with_process(move |_, _, _| Ok(ProcessOutput::from(returned.as_str()))),
        ));

        let result = pipeline.transform(TransformRequest::new(&path)).unwrap();
        assert_eq!(result.code, inline);
        let persisted = std::fs::read_to_string(result.source_map_path.as_ref().unwrap()).unwrap();
        assert_eq!(SourceMap::from_json(&persisted).unwrap(), map);
    }

    #[test]
    fn malformed_inline_map_is_ignored() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let code = "a();\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,bm90IGpzb24=";
        let pipeline = fx.pipeline(PluginModule::from_exports(
            TransformerCapabilities::new().with_process(move |_, _, _| Ok(ProcessOutput::from(code))),
        ));

        let result = pipeline.transform(TransformRequest::new(&path)).unwrap();
        assert_eq!(result.code, code);
        assert!(result.source_map_path.is_none());
    }

    #[test]
    fn instrumented_output_carries_composed_inline_map() {
        let fx = Fixture::new();
        let path = fx.file("a.ts", "one();\ntwo();");
        let pipeline = fx
            .builder(crate::transform::builtin::banner())
            .instrumenter(Arc::new(FileHitInstrumenter))
            .build()
            .unwrap();

        let result = pipeline
            .transform(TransformRequest::new(&path).with_coverage(true))
            .unwrap();

        let inline = sourcemap::extract_inline_map(&result.code).unwrap().unwrap();
        assert_eq!(inline.sources, vec![path.display().to_string()]);
        assert_eq!(
            inline.sources_content,
            Some(vec![Some("one();\ntwo();".to_string())])
        );

        // coverage header + banner line, then the two original lines
        let lines = inline.decoded_mappings().unwrap();
        assert_eq!(lines[2][0].original.unwrap().line, 0);
        assert_eq!(lines[3][0].original.unwrap().line, 1);

        let persisted = std::fs::read_to_string(result.source_map_path.as_ref().unwrap()).unwrap();
        assert_eq!(SourceMap::from_json(&persisted).unwrap(), inline);
    }

    #[test]
    fn instrumenting_transformer_is_not_instrumented_twice() {
        struct Panicking;
        impl Instrumenter for Panicking {
            fn instrument(&self, _: &str, _: &Path, _: &TransformOptions) -> TcacheResult<InstrumentedOutput> {
                panic!("instrumenter must not run");
            }
        }

        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let saw_flag = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&saw_flag);
        let module = PluginModule::from_exports(
            TransformerCapabilities::new()
                .with_process(move |source, _, options| {
                    if options.instrument {
                        flag.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(ProcessOutput::from(source))
                })
                .instrumenting(),
        );
        let pipeline = fx
            .builder(module)
            .instrumenter(Arc::new(Panicking))
            .build()
            .unwrap();

        pipeline
            .transform(TransformRequest::new(&path).with_coverage(true))
            .unwrap();
        assert_eq!(saw_flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pipelines_do_not_share_memory() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let created = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let module = {
            let created = Arc::clone(&created);
            let calls = Arc::clone(&calls);
            PluginModule::from_factory(move |_| {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(counting(&calls))
            })
        };

        let mut other = fx.config.clone();
        other.transforms[0].options = json!({ "target": "es2020" });

        let build = |config: Config, fs: Arc<CountingFs>| {
            let mut loader = BuiltinLoader::new();
            loader.register("test", module.clone());
            TransformPipeline::builder(config)
                .loader(Arc::new(loader))
                .file_system(fs)
                .build()
                .unwrap()
        };

        let first_fs = Arc::new(CountingFs::default());
        let second_fs = Arc::new(CountingFs::default());
        let first = build(fx.config.clone(), first_fs.clone());
        let second = build(other, second_fs.clone());

        let a = first.transform(TransformRequest::new(&path)).unwrap();
        let b = second.transform(TransformRequest::new(&path)).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.code, b.code);

        assert_eq!(first_fs.reads_of(&path), 1);
        assert_eq!(second_fs.reads_of(&path), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(first.cache().memory_len(), 1);
        assert_eq!(second.cache().memory_len(), 1);
        assert_ne!(first.cache().directory(), second.cache().directory());
    }

    #[test]
    fn second_instance_hits_shared_disk_tier() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let calls = Arc::new(AtomicUsize::new(0));

        let first = fx.pipeline(PluginModule::from_exports(counting(&calls)));
        let second = fx.pipeline(PluginModule::from_exports(counting(&calls)));

        let a = first.transform(TransformRequest::new(&path)).unwrap();
        let b = second.transform(TransformRequest::new(&path)).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.code, b.code);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overflowing_transformer_map_falls_back_to_coverage_map() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let mut broken = SourceMap::new(path.display().to_string());
        broken.mappings = "C,+///////////P".to_string();

        let pipeline = fx
            .builder(PluginModule::from_exports(TransformerCapabilities::new().with_process(
                move |source, _, _| {
                    Ok(ProcessOutput::Structured {
                        code: source.to_string(),
                        map: Some(RawSourceMap::Structured(broken.clone())),
                    })
                },
            )))
            .instrumenter(Arc::new(FileHitInstrumenter))
            .build()
            .unwrap();

        let result = pipeline
            .transform(TransformRequest::new(&path).with_coverage(true))
            .unwrap();

        let inline = sourcemap::extract_inline_map(&result.code).unwrap().unwrap();
        assert_eq!(inline.sources, vec![path.display().to_string()]);
        let lines = inline.decoded_mappings().unwrap();
        assert_eq!(lines[1][0].original.unwrap().line, 0);
    }

    #[test]
    fn instrumenter_without_map_drops_transformer_map() {
        struct MapLess;
        impl Instrumenter for MapLess {
            fn instrument(&self, code: &str, _: &Path, _: &TransformOptions) -> TcacheResult<InstrumentedOutput> {
                Ok(InstrumentedOutput {
                    code: format!("hit();\n{code}"),
                    map: None,
                })
            }
        }

        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let pipeline = fx
            .builder(crate::transform::builtin::banner())
            .instrumenter(Arc::new(MapLess))
            .build()
            .unwrap();

        let result = pipeline
            .transform(TransformRequest::new(&path).with_coverage(true))
            .unwrap();

        assert!(result.code.starts_with("hit();\n"));
        assert!(!result.code.contains("sourceMappingURL"));
        assert!(result.source_map_path.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn unserializable_config_fails_to_build() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut fx = Fixture::new();
        fx.config.cache.directory = PathBuf::from(OsStr::from_bytes(b"/tmp/tc-\xff"));

        let err = fx
            .builder(crate::transform::builtin::passthrough())
            .build()
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn corrupt_disk_entry_is_recomputed() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let calls = Arc::new(AtomicUsize::new(0));

        fx.pipeline(PluginModule::from_exports(counting(&calls)))
            .transform(TransformRequest::new(&path))
            .unwrap();

        for (file, _) in OsFileSystem.list_files(&fx.config.cache.directory).unwrap() {
            std::fs::write(file, "garbage").unwrap();
        }

        let result = fx
            .pipeline(PluginModule::from_exports(counting(&calls)))
            .transform(TransformRequest::new(&path))
            .unwrap();
        assert_eq!(result.code, "a();");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disabled_cache_bypasses_both_tiers() {
        let mut fx = Fixture::new();
        fx.config.cache.enabled = false;
        let path = fx.file("a.js", "a();");
        let calls = Arc::new(AtomicUsize::new(0));
        let fs = Arc::new(CountingFs::default());
        let pipeline = fx
            .builder(PluginModule::from_exports(counting(&calls)))
            .file_system(fs.clone())
            .build()
            .unwrap();

        let first = pipeline.transform(TransformRequest::new(&path)).unwrap();
        let second = pipeline.transform(TransformRequest::new(&path)).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(fs.reads_of(&path), 2);
        assert_eq!(fs.write_count(), 0);
        assert!(!fx.config.cache.directory.exists());
    }

    struct Upper {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProcessAsync for Upper {
        async fn process_async(
            &self,
            source: &str,
            _path: &Path,
            _options: &TransformOptions,
        ) -> TcacheResult<ProcessOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(ProcessOutput::from(source.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn async_only_transformer() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = fx.pipeline(PluginModule::from_exports(
            TransformerCapabilities::new().with_process_async(Upper {
                calls: Arc::clone(&calls),
            }),
        ));

        let err = pipeline.transform(TransformRequest::new(&path)).unwrap_err();
        assert!(matches!(err, TcacheError::SyncUnsupported { .. }));

        let result = pipeline
            .transform_async(TransformRequest::new(&path))
            .await
            .unwrap();
        assert_eq!(result.code, "A();");

        // Once cached, the sync entry point is served from memory
        let again = pipeline.transform(TransformRequest::new(&path)).unwrap();
        assert!(Arc::ptr_eq(&result, &again));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_prefers_process_async() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let sync_calls = Arc::new(AtomicUsize::new(0));
        let async_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = fx.pipeline(PluginModule::from_exports(
            counting(&sync_calls).with_process_async(Upper {
                calls: Arc::clone(&async_calls),
            }),
        ));

        let result = pipeline
            .transform_async(TransformRequest::new(&path))
            .await
            .unwrap();
        assert_eq!(result.code, "A();");
        assert_eq!(async_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sync_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_result() {
        let fx = Fixture::new();
        let path = fx.file("a.js", "a();");
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = fx.pipeline(PluginModule::from_exports(
            TransformerCapabilities::new().with_process_async(Upper {
                calls: Arc::clone(&calls),
            }),
        ));

        let results = futures_util::future::join_all(
            (0..8).map(|_| pipeline.transform_async(TransformRequest::new(&path))),
        )
        .await;

        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn async_falls_back_to_process() {
        let fx = Fixture::new();
        let path = fx.file("banana.js", BANANA);
        let result = fx
            .pipeline(crate::transform::builtin::passthrough())
            .transform_async(TransformRequest::new(&path))
            .await
            .unwrap();
        assert_eq!(result.code, BANANA);
    }
}
