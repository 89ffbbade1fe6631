//! Cache key derivation
//!
//! A key is a SHA-256 fingerprint of everything that can change a
//! transform's output. Same inputs, same key, across processes and
//! restarts; this is what lets the disk cache outlive a run.

use crate::transform::{ResolvedTransformer, TransformOptions};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Bumped whenever the on-disk entry format changes
pub const CACHE_FORMAT_VERSION: &str = "1";

/// Contribution used for transformers without `get_cache_key`.
///
/// Such transformers only get invalidation from source and configuration
/// changes; a new transformer version with the same config reuses stale
/// entries.
pub const NO_TRANSFORMER_KEY: &str = "<no-transformer-cache-key>";

const MAX_STEM_LEN: usize = 64;

/// Opaque cache key, lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character prefix used to fan entries out over subdirectories
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA256 of arbitrary bytes as lowercase hex
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Computes cache keys for one configuration
///
/// The configuration hash is computed once per pipeline, not per file.
#[derive(Debug, Clone)]
pub struct CacheKeyComputer {
    config_hash: String,
}

impl CacheKeyComputer {
    pub fn new(config_string: &str) -> Self {
        Self {
            config_hash: content_hash(config_string.as_bytes()),
        }
    }

    /// Hash of the serialized configuration
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Derive the key for transforming `source` at `path`
    pub fn compute(
        &self,
        source: &str,
        path: &Path,
        options: &TransformOptions,
        transformer: &ResolvedTransformer,
    ) -> CacheKey {
        let contribution = match &transformer.capabilities.get_cache_key {
            Some(key_source) => key_source.cache_key(source, path, options),
            None => NO_TRANSFORMER_KEY.to_string(),
        };
        let source_hash = content_hash(source.as_bytes());
        let path = path.to_string_lossy();

        let mut hasher = Sha256::new();
        for part in [
            source_hash.as_str(),
            self.config_hash.as_str(),
            contribution.as_str(),
            if options.instrument { "instrument" } else { "" },
            path.as_ref(),
            CACHE_FORMAT_VERSION,
        ] {
            // Length prefixes keep ("ab", "c") and ("a", "bc") apart
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }

        CacheKey(hex::encode(hasher.finalize()))
    }
}

/// Deterministic, file-name-safe stem derived from a source path
///
/// Only the base name is kept. Collisions are harmless because the full
/// key is appended to the stem.
pub fn cache_file_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    sanitize_segment(&name, "file")
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_` and cap the
/// length, falling back to `empty` for an empty input
pub fn sanitize_segment(text: &str, empty: &str) -> String {
    let segment: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();

    if segment.is_empty() {
        empty.to_string()
    } else {
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{ProcessOutput, TransformerCapabilities};
    use std::sync::Arc;

    fn transformer(with_key: Option<&'static str>) -> ResolvedTransformer {
        let mut caps = TransformerCapabilities::new()
            .with_process(|source, _, _| Ok(ProcessOutput::from(source)));
        if let Some(key) = with_key {
            caps = caps.with_cache_key(move |_, _, _| key.to_string());
        }
        ResolvedTransformer::new("test", caps, serde_json::json!({}))
    }

    fn options(path: &str, instrument: bool) -> TransformOptions {
        let mut options = TransformOptions::new(path, Arc::from("{}"));
        options.instrument = instrument;
        options
    }

    #[test]
    fn key_is_deterministic() {
        let computer = CacheKeyComputer::new("{}");
        let t = transformer(Some("v1"));
        let path = Path::new("/p/a.js");

        let a = computer.compute("a();", path, &options("/p/a.js", false), &t);
        let b = CacheKeyComputer::new("{}").compute("a();", path, &options("/p/a.js", false), &t);

        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.shard(), &a.as_str()[..2]);
    }

    #[test]
    fn every_input_changes_the_key() {
        let computer = CacheKeyComputer::new("{}");
        let t = transformer(Some("v1"));
        let path = Path::new("/p/a.js");
        let base = computer.compute("a();", path, &options("/p/a.js", false), &t);

        let other_source = computer.compute("b();", path, &options("/p/a.js", false), &t);
        let other_config =
            CacheKeyComputer::new(r#"{"x":1}"#).compute("a();", path, &options("/p/a.js", false), &t);
        let other_plugin =
            computer.compute("a();", path, &options("/p/a.js", false), &transformer(Some("v2")));
        let instrumented = computer.compute("a();", path, &options("/p/a.js", true), &t);
        let other_path = computer.compute(
            "a();",
            Path::new("/q/a.js"),
            &options("/q/a.js", false),
            &t,
        );

        for other in [other_source, other_config, other_plugin, instrumented, other_path] {
            assert_ne!(base, other);
        }
    }

    #[test]
    fn missing_get_cache_key_uses_marker() {
        let computer = CacheKeyComputer::new("{}");
        let path = Path::new("/p/a.js");

        let without = computer.compute("a();", path, &options("/p/a.js", false), &transformer(None));
        let marker = computer.compute(
            "a();",
            path,
            &options("/p/a.js", false),
            &transformer(Some(NO_TRANSFORMER_KEY)),
        );
        assert_eq!(without, marker);
    }

    #[test]
    fn content_hash_known_value() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn stem_is_sanitized() {
        assert_eq!(cache_file_stem(Path::new("/src/app.test.js")), "app_test_js");
        assert_eq!(cache_file_stem(Path::new("/src/we ird:na|me.ts")), "we_ird_na_me_ts");
        assert_eq!(cache_file_stem(Path::new("/")), "file");
        assert_eq!(
            cache_file_stem(Path::new(&"x".repeat(200))).len(),
            MAX_STEM_LEN
        );
    }

    #[test]
    fn stem_is_deterministic() {
        let path = Path::new("/src/ünïcode.js");
        assert_eq!(cache_file_stem(path), cache_file_stem(path));
        assert_eq!(cache_file_stem(path), "_n_code_js");
    }

    #[test]
    fn sanitize_segment_fallback() {
        assert_eq!(sanitize_segment("", "default"), "default");
        assert_eq!(sanitize_segment("my app/v2", "default"), "my_app_v2");
    }
}
