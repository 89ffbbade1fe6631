//! Coverage collaborators
//!
//! Whether a file is instrumented and how are both outside the pipeline.
//! It only asks an [`InstrumentDecider`] and calls an [`Instrumenter`].

use crate::config::{Config, CoverageConfig};
use crate::error::{TcacheError, TcacheResult};
use crate::sourcemap::vlq::{self, OriginalPosition, Segment};
use crate::sourcemap::SourceMap;
use crate::transform::TransformOptions;
use glob::Pattern;
use std::path::Path;

/// Decides per file whether coverage instrumentation applies
pub trait InstrumentDecider: Send + Sync {
    fn should_instrument(&self, path: &Path, coverage: &CoverageConfig, config: &Config) -> bool;
}

/// Output of an instrumentation pass
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentedOutput {
    pub code: String,
    /// Maps the instrumented code back to its input
    pub map: Option<SourceMap>,
}

/// Rewrites code to record coverage
pub trait Instrumenter: Send + Sync {
    fn instrument(
        &self,
        code: &str,
        path: &Path,
        options: &TransformOptions,
    ) -> TcacheResult<InstrumentedOutput>;
}

/// Glob include/exclude filter over `[coverage]`
///
/// Excludes win over includes and an empty include list selects every
/// file. Patterns are tried against the absolute path and against the
/// path relative to `project.root_dir`. Patterns are compiled once from
/// the configuration given to [`CoverageFilter::new`].
#[derive(Debug, Clone)]
pub struct CoverageFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl CoverageFilter {
    pub fn new(coverage: &CoverageConfig) -> TcacheResult<Self> {
        Ok(Self {
            include: compile(&coverage.include)?,
            exclude: compile(&coverage.exclude)?,
        })
    }

    fn matches_any(patterns: &[Pattern], candidates: &[&Path]) -> bool {
        patterns
            .iter()
            .any(|p| candidates.iter().any(|c| p.matches_path(c)))
    }
}

fn compile(patterns: &[String]) -> TcacheResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| TcacheError::InvalidPattern {
                kind: "coverage",
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

impl InstrumentDecider for CoverageFilter {
    fn should_instrument(&self, path: &Path, _coverage: &CoverageConfig, config: &Config) -> bool {
        let relative = path.strip_prefix(&config.project.root_dir).ok();
        let candidates: Vec<&Path> = std::iter::once(path).chain(relative).collect();

        if Self::matches_any(&self.exclude, &candidates) {
            return false;
        }
        self.include.is_empty() || Self::matches_any(&self.include, &candidates)
    }
}

/// Global object the file-hit instrumenter records into
pub const FILE_HIT_GLOBAL: &str = "__tcache_coverage__";

/// Minimal instrumenter that records which files were loaded
///
/// Prepends one statement marking the file as hit and returns a map that
/// shifts every line down by one.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileHitInstrumenter;

impl Instrumenter for FileHitInstrumenter {
    fn instrument(
        &self,
        code: &str,
        path: &Path,
        _options: &TransformOptions,
    ) -> TcacheResult<InstrumentedOutput> {
        let file = serde_json::to_string(&path.to_string_lossy())?;
        let header = format!(
            "(globalThis.{g} = globalThis.{g} || {{}})[{file}] = true;",
            g = FILE_HIT_GLOBAL
        );

        let mut lines: vlq::Lines = vec![Vec::new()];
        lines.extend((0..code.split('\n').count()).map(|line| {
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

        Ok(InstrumentedOutput {
            code: format!("{header}\n{code}"),
            map: Some(map),
        })
    }
}
