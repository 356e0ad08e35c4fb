use crate::error::{ErrorContext, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, warn};

/// Extension of every cache file
pub const CACHE_FILE_EXTENSION: &str = "json";

const TREND_FILE_PREFIX: &str = "trend_";

/// A valid file found by [`DiskCache::entries`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCacheEntry {
    /// Cache key (file stem)
    pub key: String,
    /// Time since the file was last written
    pub age: Duration,
}

/// Persistent cache tier. One JSON file per key; file mtime is the only
/// staleness signal.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    expiry: Duration,
}

impl DiskCache {
    /// Create a disk cache rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>, expiry: Duration) -> Self {
        Self {
            dir: dir.into(),
            expiry,
        }
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Validity window
    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Path of the file backing `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{CACHE_FILE_EXTENSION}"))
    }

    fn age_of(path: &Path) -> io::Result<Duration> {
        let modified = fs::metadata(path)?.modified()?;
        // mtime in the future counts as brand new
        Ok(SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO))
    }

    /// Read `key` if its file is younger than the expiry window.
    ///
    /// Unreadable or corrupt files are logged, removed and reported as a miss.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read_with_age(key).map(|(value, _)| value)
    }

    /// [`DiskCache::read`] plus the file's age
    pub fn read_with_age<T: DeserializeOwned>(&self, key: &str) -> Option<(T, Duration)> {
        let path = self.path_for(key);

        let age = match Self::age_of(&path) {
            Ok(age) => age,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                error!("Failed to stat cache file {}: {}", path.display(), e);
                return None;
            }
        };

        if age >= self.expiry {
            debug!(key, age_secs = age.as_secs(), "Disk cache entry expired");
            return None;
        }

        let parsed = fs::read(&path)
            .map_err(crate::error::HealthTrendsError::from)
            .and_then(|bytes| serde_json::from_slice::<T>(&bytes).map_err(Into::into));

        match parsed {
            Ok(value) => Some((value, age)),
            Err(e) => {
                error!("Discarding unreadable cache file {}: {}", path.display(), e);
                if let Err(remove_err) = fs::remove_file(&path) {
                    warn!("Failed to remove {}: {}", path.display(), remove_err);
                }
                None
            }
        }
    }

    /// Write `value` under `key`. The file is written to a temporary name and
    /// renamed so readers never see a partial file.
    pub fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory {}", self.dir.display()))?;

        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.{CACHE_FILE_EXTENSION}.tmp"));
        let bytes = serde_json::to_vec(value)?;

        fs::write(&tmp, bytes)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move cache file into {}", path.display()))?;
        Ok(())
    }

    /// Delete the file for `key`; returns whether one existed
    pub fn remove(&self, key: &str) -> bool {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to remove cache file {}: {}", path.display(), e);
                false
            }
        }
    }

    fn trend_files(&self) -> Vec<(String, PathBuf)> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to list cache directory {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().and_then(|e| e.to_str()) == Some(CACHE_FILE_EXTENSION)
            })
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?.to_string();
                stem.starts_with(TREND_FILE_PREFIX).then_some((stem, path))
            })
            .collect()
    }

    /// Delete every `trend_*.json` file; returns how many were removed
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for (_, path) in self.trend_files() {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove cache file {}: {}", path.display(), e),
            }
        }
        removed
    }

    /// Keys of files still inside the expiry window, sorted by key
    pub fn entries(&self) -> Vec<DiskCacheEntry> {
        let mut entries: Vec<DiskCacheEntry> = self
            .trend_files()
            .into_iter()
            .filter_map(|(key, path)| {
                let age = Self::age_of(&path).ok()?;
                (age < self.expiry).then_some(DiskCacheEntry { key, age })
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}
