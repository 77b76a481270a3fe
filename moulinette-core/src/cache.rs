//! On-disk cache of fetched input data.
//!
//! Entries are directories keyed by job name and request date. An entry is
//! created empty, filled by the fetchers, and reused as-is afterwards.
//! Concurrent population of the same key is not coordinated here.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Replace everything but ASCII alphanumerics, `-` and `_` with `_`.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Cache key for a job's data at a given request date.
pub fn cache_key(job_name: &str, request_date: &str) -> String {
    format!("{}_{}", sanitize(job_name), sanitize(request_date))
}

/// Storage for fetched data, shared across jobs.
pub trait DataCache: Send + Sync {
    fn has_entry(&self, key: &str) -> bool;

    /// Directory of an existing entry.
    fn get_entry(&self, key: &str) -> Option<PathBuf>;

    /// Create an empty entry and return its directory, which exists until invalidated.
    fn add_entry(&self, key: &str) -> io::Result<PathBuf>;

    /// Drop an entry; missing entries are not an error.
    fn invalidate(&self, key: &str) -> io::Result<()>;
}

/// One directory per key under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    root: PathBuf,
}

impl DirectoryCache {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(sanitize(key))
    }
}

impl DataCache for DirectoryCache {
    fn has_entry(&self, key: &str) -> bool {
        self.entry_path(key).is_dir()
    }

    fn get_entry(&self, key: &str) -> Option<PathBuf> {
        let path = self.entry_path(key);
        path.is_dir().then_some(path)
    }

    fn add_entry(&self, key: &str) -> io::Result<PathBuf> {
        let path = self.entry_path(key);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn invalidate(&self, key: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.entry_path(key)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
