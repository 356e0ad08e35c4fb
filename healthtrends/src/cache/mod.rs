//! Two-tier trend cache: an in-memory TTL map in front of one JSON file per key

mod disk;
mod memory;

pub use disk::{DiskCache, DiskCacheEntry, CACHE_FILE_EXTENSION};
pub use memory::{CacheManager, CacheStats};
