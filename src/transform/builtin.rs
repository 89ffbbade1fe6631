//! Built-in plugins and the default plugin loader
//!
//! - `passthrough`: returns the source unchanged
//! - `banner`: prepends a comment banner and emits a line-shift source map

use crate::error::{TcacheError, TcacheResult};
use crate::sourcemap::vlq::{self, OriginalPosition, Segment};
use crate::sourcemap::{RawSourceMap, SourceMap};
use crate::transform::plugin::{
    PluginLoader, PluginModule, ProcessOutput, TransformOptions, TransformerCapabilities,
};
use std::collections::HashMap;
use std::path::Path;

const DEFAULT_BANNER: &str = "/* transformed by tcache */";

/// Loader over an in-process table of plugin modules
#[derive(Debug, Clone, Default)]
pub struct BuiltinLoader {
    modules: HashMap<String, PluginModule>,
}

impl BuiltinLoader {
    /// A loader with the built-in plugins registered
    pub fn new() -> Self {
        let mut loader = Self::empty();
        loader
            .register("passthrough", passthrough())
            .register("banner", banner());
        loader
    }

    /// A loader with nothing registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register (or replace) a module under `specifier`
    pub fn register(&mut self, specifier: impl Into<String>, module: PluginModule) -> &mut Self {
        self.modules.insert(specifier.into(), module);
        self
    }

    /// Registered specifiers, sorted
    pub fn specifiers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl PluginLoader for BuiltinLoader {
    fn load(&self, specifier: &str) -> TcacheResult<PluginModule> {
        self.modules
            .get(specifier)
            .cloned()
            .ok_or_else(|| TcacheError::TransformerNotFound(specifier.to_string()))
    }
}

fn plugin_version(name: &str) -> String {
    format!("{name}@{}", env!("CARGO_PKG_VERSION"))
}

/// Returns the source unchanged
pub fn passthrough() -> PluginModule {
    let version = plugin_version("passthrough");
    PluginModule::from_exports(
        TransformerCapabilities::new()
            .with_process(|source, _, _| Ok(ProcessOutput::from(source)))
            .with_cache_key(move |_, _, _| version.clone()),
    )
}

/// Prepends `options.banner` (default `/* transformed by tcache */`)
pub fn banner() -> PluginModule {
    PluginModule::from_factory(|options| {
        let text = match options.get("banner") {
            None => DEFAULT_BANNER.to_string(),
            Some(value) => value
                .as_str()
                .ok_or_else(|| TcacheError::User("`banner` option must be a string".to_string()))?
                .to_string(),
        };
        let key = format!("{}:{}", plugin_version("banner"), text);

        Ok(TransformerCapabilities::new()
            .with_process(move |source, path, opts| Ok(add_banner(&text, source, path, opts)))
            .with_cache_key(move |_, _, _| key.clone()))
    })
}

fn add_banner(text: &str, source: &str, path: &Path, _options: &TransformOptions) -> ProcessOutput {
    let shift = text.split('\n').count();
    let source_lines = source.split('\n').count();

    let mut lines: vlq::Lines = vec![Vec::new(); shift];
    lines.extend((0..source_lines).map(|line| {
        vec![Segment::new(
            0,
            Some(OriginalPosition {
                source: 0,
                line: line as u32,
                column: 0,
                name: None,
            }),
        )]
    }));

    let mut map = SourceMap::new(path.display().to_string());
    map.mappings = vlq::encode(&lines);

    ProcessOutput::Structured {
        code: format!("{text}\n{source}"),
        map: Some(RawSourceMap::Structured(map)),
    }
}
