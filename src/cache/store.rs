//! Two-tier transform cache
//!
//! The memory tier belongs to one pipeline instance. The disk tier is
//! shared by path convention and survives restarts.

use crate::cache::key::{cache_file_stem, content_hash, sanitize_segment, CacheKey};
use crate::config::CacheConfig;
use crate::error::{TcacheError, TcacheResult};
use crate::fs::FileSystem;
use crate::pipeline::TransformResult;
use crate::sourcemap::SourceMap;
use dashmap::DashMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const MAP_EXTENSION: &str = ".map";

/// Format bytes as human-readable size (e.g., "1.5 MB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// A transform read back from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub code: String,
    pub source_map_path: Option<PathBuf>,
}

/// Outcome of a cache lookup
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Already produced by this pipeline instance
    Memory(Arc<TransformResult>),
    /// Persisted by this or an earlier process
    Disk(CacheEntry),
    Miss,
}

/// On-disk usage of one project's cache directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub maps: usize,
    pub bytes: u64,
}

/// Memory + disk transform cache for one project and configuration
pub struct TransformCache {
    enabled: bool,
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    memory: DashMap<CacheKey, Arc<TransformResult>>,
}

impl TransformCache {
    /// `config_hash` isolates configurations sharing one cache directory
    pub fn new(
        config: &CacheConfig,
        project_name: &str,
        config_hash: &str,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            dir: config
                .directory
                .join(project_dir_name(project_name, config_hash)),
            fs,
            memory: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// This project's cache directory
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Where the code of `key` for `path` lives on disk
    pub fn entry_path(&self, key: &CacheKey, path: &Path) -> PathBuf {
        self.dir
            .join(key.shard())
            .join(format!("{}_{}", cache_file_stem(path), key))
    }

    /// Memory tier first, then disk. Unreadable or corrupt disk entries
    /// are misses.
    pub fn lookup(&self, key: &CacheKey, path: &Path) -> Lookup {
        if !self.enabled {
            return Lookup::Miss;
        }

        if let Some(hit) = self.memory.get(key) {
            return Lookup::Memory(Arc::clone(hit.value()));
        }

        let code_path = self.entry_path(key, path);
        let raw = match self.fs.read_to_string(&code_path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Cache miss for {}: {}", path.display(), e);
                return Lookup::Miss;
            }
        };

        let Some(code) = decode_entry(&raw) else {
            debug!(
                "Ignoring corrupt cache entry {} for {}",
                code_path.display(),
                path.display()
            );
            return Lookup::Miss;
        };

        let map_path = map_path(&code_path);
        let source_map_path = self.fs.exists(&map_path).then_some(map_path);

        debug!("Disk cache hit for {}", path.display());
        Lookup::Disk(CacheEntry {
            code: code.to_string(),
            source_map_path,
        })
    }

    /// Persist `code` (and `map`) for `key`, returning the map file path.
    ///
    /// Failures are logged and swallowed: the transform still succeeds, it
    /// just is not cached.
    pub fn store(
        &self,
        key: &CacheKey,
        path: &Path,
        code: &str,
        map: Option<&SourceMap>,
    ) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }

        let code_path = self.entry_path(key, path);
        if let Some(shard) = code_path.parent() {
            if let Err(e) = self.fs.create_dir_all(shard) {
                warn!("Failed to create cache directory {}: {}", shard.display(), e);
                return None;
            }
        }

        // The map goes first so a visible code entry always has its map
        let source_map_path = map.and_then(|map| {
            let map_path = map_path(&code_path);
            let written = map
                .to_json()
                .map_err(|e| e.to_string())
                .and_then(|json| {
                    self.fs
                        .write_atomic(&map_path, json.as_bytes())
                        .map_err(|e| e.to_string())
                });
            match written {
                Ok(()) => Some(map_path),
                Err(e) => {
                    warn!("Failed to write source map {}: {}", map_path.display(), e);
                    None
                }
            }
        });

        if let Err(e) = self
            .fs
            .write_atomic(&code_path, encode_entry(code).as_bytes())
        {
            warn!("Failed to write cache entry {}: {}", code_path.display(), e);
        }

        source_map_path
    }

    /// Keep `result` in the memory tier. The first result stored under a
    /// key wins, so every caller sees the same allocation.
    pub fn remember(&self, key: CacheKey, result: TransformResult) -> Arc<TransformResult> {
        if !self.enabled {
            return Arc::new(result);
        }
        Arc::clone(self.memory.entry(key).or_insert_with(|| Arc::new(result)).value())
    }

    /// Number of results held in memory
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Remove this project's cache directory and forget in-memory results.
    /// Returns whether anything existed on disk.
    pub fn clear(&self) -> TcacheResult<bool> {
        self.memory.clear();
        if !self.fs.exists(&self.dir) {
            return Ok(false);
        }
        self.fs
            .remove_dir_all(&self.dir)
            .map_err(|e| TcacheError::io(format!("removing {}", self.dir.display()), e))?;
        Ok(true)
    }

    /// Count entries, maps and bytes on disk
    pub fn stats(&self) -> TcacheResult<CacheStats> {
        if !self.fs.exists(&self.dir) {
            return Ok(CacheStats::default());
        }

        let files = self
            .fs
            .list_files(&self.dir)
            .map_err(|e| TcacheError::io(format!("listing {}", self.dir.display()), e))?;

        let mut stats = CacheStats::default();
        for (file, len) in files {
            if file.to_string_lossy().ends_with(MAP_EXTENSION) {
                stats.maps += 1;
            } else {
                stats.entries += 1;
            }
            stats.bytes += len;
        }
        Ok(stats)
    }
}

fn project_dir_name(project_name: &str, config_hash: &str) -> String {
    let hash = config_hash.get(..16).unwrap_or(config_hash);
    format!("tcache-{}-{}", sanitize_segment(project_name, "default"), hash)
}

fn map_path(code_path: &Path) -> PathBuf {
    let mut path = code_path.as_os_str().to_owned();
    path.push(MAP_EXTENSION);
    PathBuf::from(path)
}

/// `<sha256 of code>\n<code>`
fn encode_entry(code: &str) -> String {
    format!("{}\n{}", content_hash(code.as_bytes()), code)
}

fn decode_entry(raw: &str) -> Option<&str> {
    let (checksum, code) = raw.split_once('\n')?;
    (checksum == content_hash(code.as_bytes())).then_some(code)
}
