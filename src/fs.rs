//! File-system capability and the read-through content cache
//!
//! The pipeline never touches `std::fs` directly; everything goes through a
//! [`FileSystem`] so hosts can virtualize it and tests can count reads.

use dashmap::DashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// File operations the transform pipeline depends on
pub trait FileSystem: Send + Sync {
    /// Read a whole file as UTF-8
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Whether a file exists
    fn exists(&self, path: &Path) -> bool;

    /// Create a directory and all missing parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Replace `path` with `contents` so readers see either the old file
    /// or the complete new one, never a partial write
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Remove a directory tree
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// All regular files below `dir` with their sizes
    fn list_files(&self, dir: &Path) -> io::Result<Vec<(PathBuf, u64)>>;
}

/// The real file system
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let dir = path.parent().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no parent directory", path.display()),
            )
        })?;

        // The temp file must live on the same file system for rename to be atomic
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(contents)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(path)
    }

    fn list_files(&self, dir: &Path) -> io::Result<Vec<(PathBuf, u64)>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            for entry in std::fs::read_dir(&current)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    files.push((entry.path(), entry.metadata()?.len()));
                }
            }
        }

        Ok(files)
    }
}

/// Read-through cache of file contents, shared between a caller and the
/// pipeline calls it makes.
///
/// Cloning is cheap and clones share storage. Each logical run creates its
/// own; nothing is process-global.
#[derive(Debug, Clone, Default)]
pub struct ContentCache {
    files: Arc<DashMap<PathBuf, Arc<str>>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached content of `path`, if it has been read or inserted
    pub fn get(&self, path: &Path) -> Option<Arc<str>> {
        self.files.get(path).map(|entry| Arc::clone(entry.value()))
    }

    /// Seed the cache with content the caller already holds
    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<Arc<str>>) {
        self.files.insert(path.into(), content.into());
    }

    /// Return the cached content, reading it through `fs` on first use
    pub fn read_through(&self, path: &Path, fs: &dyn FileSystem) -> io::Result<Arc<str>> {
        if let Some(content) = self.get(path) {
            return Ok(content);
        }
        let content: Arc<str> = fs.read_to_string(path)?.into();
        Ok(Arc::clone(
            self.files
                .entry(path.to_path_buf())
                .or_insert(content)
                .value(),
        ))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
