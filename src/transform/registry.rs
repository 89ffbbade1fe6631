//! Transformer selection and resolution
//!
//! Rules are matched in declaration order against the full file path,
//! after ignore patterns. The plugin behind a rule is loaded on first use
//! and kept for the lifetime of the registry, which belongs to exactly one
//! pipeline.

use crate::config::Config;
use crate::error::{TcacheError, TcacheResult};
use crate::transform::plugin::{PluginLoader, ResolvedTransformer};
use dashmap::DashMap;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// One `pattern → transformer` rule
#[derive(Debug, Clone)]
pub struct TransformRule {
    pub pattern: Regex,
    pub specifier: String,
    pub options: serde_json::Value,
}

impl TransformRule {
    pub fn new(
        pattern: &str,
        specifier: impl Into<String>,
        options: serde_json::Value,
    ) -> TcacheResult<Self> {
        Ok(Self {
            pattern: compile("transform", pattern)?,
            specifier: specifier.into(),
            options,
        })
    }

    /// Cache identity of the resolved transformer
    fn identity(&self) -> String {
        format!("{}\0{}", self.specifier, self.options)
    }
}

fn compile(kind: &'static str, pattern: &str) -> TcacheResult<Regex> {
    Regex::new(pattern).map_err(|e| TcacheError::InvalidPattern {
        kind,
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Resolves file paths to transformers
pub struct TransformerRegistry {
    rules: Vec<TransformRule>,
    ignore: Vec<Regex>,
    loader: Arc<dyn PluginLoader>,
    resolved: DashMap<String, Arc<ResolvedTransformer>>,
}

impl TransformerRegistry {
    /// Build from the `[[transform]]` rules and ignore patterns of `config`
    pub fn new(config: &Config, loader: Arc<dyn PluginLoader>) -> TcacheResult<Self> {
        let rules = config
            .transforms
            .iter()
            .map(|rule| TransformRule::new(&rule.pattern, &rule.transformer, rule.options.clone()))
            .collect::<TcacheResult<Vec<_>>>()?;

        let ignore = config
            .ignore_patterns
            .iter()
            .map(|pattern| compile("ignore", pattern))
            .collect::<TcacheResult<Vec<_>>>()?;

        Ok(Self::from_rules(rules, ignore, loader))
    }

    pub fn from_rules(
        rules: Vec<TransformRule>,
        ignore: Vec<Regex>,
        loader: Arc<dyn PluginLoader>,
    ) -> Self {
        Self {
            rules,
            ignore,
            loader,
            resolved: DashMap::new(),
        }
    }

    /// Whether `path` matches an ignore pattern
    pub fn is_ignored(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.ignore.iter().any(|re| re.is_match(&path))
    }

    /// The rule that applies to `path`, if any
    pub fn rule_for(&self, path: &Path) -> Option<&TransformRule> {
        if self.is_ignored(path) {
            return None;
        }
        let text = path.to_string_lossy();
        self.rules.iter().find(|rule| rule.pattern.is_match(&text))
    }

    /// Resolve the transformer for `path`
    ///
    /// `Ok(None)` means the file is not transformed: it is a core module,
    /// ignored, or matches no rule.
    pub fn resolve(
        &self,
        path: &Path,
        is_core_module: bool,
    ) -> TcacheResult<Option<Arc<ResolvedTransformer>>> {
        if is_core_module {
            return Ok(None);
        }
        match self.rule_for(path) {
            Some(rule) => self.load(rule).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve eagerly so configuration errors surface before any work
    pub fn preload(&self, path: &Path) -> TcacheResult<Option<Arc<ResolvedTransformer>>> {
        self.resolve(path, false)
    }

    /// Resolve every configured rule, returning how many were loaded
    pub fn preload_all(&self) -> TcacheResult<usize> {
        for rule in &self.rules {
            self.load(rule)?;
        }
        Ok(self.resolved.len())
    }

    fn load(&self, rule: &TransformRule) -> TcacheResult<Arc<ResolvedTransformer>> {
        let identity = rule.identity();
        if let Some(found) = self.resolved.get(&identity) {
            return Ok(Arc::clone(found.value()));
        }

        debug!("Loading transformer '{}'", rule.specifier);
        let module = self.loader.load(&rule.specifier)?;

        let (capabilities, detail) = match &module.create_transformer {
            Some(factory) => {
                let created = factory.create_transformer(&rule.options).map_err(|e| {
                    TcacheError::TransformerInit {
                        specifier: rule.specifier.clone(),
                        reason: e.to_string(),
                    }
                })?;
                (created, " (create_transformer returned none)")
            }
            None => (module.exports.clone(), ""),
        };

        if !capabilities.is_usable() {
            return Err(TcacheError::InvalidTransformer {
                specifier: rule.specifier.clone(),
                detail: detail.to_string(),
            });
        }
        if capabilities.get_cache_key.is_none() {
            debug!(
                "Transformer '{}' has no get_cache_key; its own changes will not invalidate cached output",
                rule.specifier
            );
        }

        let resolved = Arc::new(ResolvedTransformer::new(
            rule.specifier.clone(),
            capabilities,
            rule.options.clone(),
        ));

        // Concurrent first resolutions race benignly; the first insert wins
        Ok(Arc::clone(
            self.resolved.entry(identity).or_insert(resolved).value(),
        ))
    }
}
