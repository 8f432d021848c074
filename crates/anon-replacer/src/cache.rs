//! Persistent mapping cache
//!
//! Maps `(entity_type, raw_text)` to the replacement chosen the first time
//! the pair was seen, so the same value is replaced identically within a
//! document and across runs. Keys are truncated SHA-256 digests; the raw
//! value is never stored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anon_core::{AnonError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex characters kept from the digest
const KEY_LEN: usize = 32;

/// Cache shared across tasks
pub type SharedMappingCache = Arc<tokio::sync::Mutex<MappingCache>>;

/// Stable key for an `(entity_type, raw_text)` pair
pub fn cache_key(entity_type: &str, raw_text: &str) -> String {
    let digest = Sha256::digest(format!("{entity_type}::{raw_text}").as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..KEY_LEN].to_string()
}

// ============================================================================
// Mapping Cache
// ============================================================================

/// JSON-file backed replacement cache.
///
/// Not internally synchronized; wrap in [`SharedMappingCache`] for
/// concurrent use.
#[derive(Debug)]
pub struct MappingCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    stats: Arc<CacheStats>,
}

impl MappingCache {
    /// Open the cache at `path`. A missing or unreadable file yields an
    /// empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::load(&path);
        tracing::debug!(path = %path.display(), entries = entries.len(), "Mapping cache loaded");

        Self {
            path,
            entries,
            stats: Arc::new(CacheStats::new("mapping")),
        }
    }

    fn load(path: &Path) -> BTreeMap<String, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read mapping cache");
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt mapping cache ignored");
                BTreeMap::new()
            }
        }
    }

    /// Look up a previously chosen replacement
    pub fn get(&self, entity_type: &str, raw_text: &str) -> Option<String> {
        let result = self.entries.get(&cache_key(entity_type, raw_text)).cloned();

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        result
    }

    /// Store a replacement and persist. Persistence failures are logged;
    /// the in-memory entry is kept either way.
    pub fn put(&mut self, entity_type: &str, raw_text: &str, replacement: &str) -> String {
        let key = cache_key(entity_type, raw_text);
        let previous = self.entries.insert(key, replacement.to_string());
        self.stats.record_write();

        if previous.as_deref() != Some(replacement) {
            if let Err(e) = self.save() {
                tracing::warn!(
                    path = %self.path.display(),
                    entity_type,
                    error = %e,
                    "Failed to persist mapping cache"
                );
            }
        }

        replacement.to_string()
    }

    /// Write the cache to disk as pretty-printed JSON
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| AnonError::CacheError(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Remove every mapping and the backing file
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.stats.reset();

        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Statistics since this cache was opened, with the current entry count
    pub fn stats_report(&self) -> CacheStatsReport {
        self.stats.report(self.len())
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Wrap in a shared async mutex
    pub fn into_shared(self) -> SharedMappingCache {
        Arc::new(tokio::sync::Mutex::new(self))
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Statistics for cache performance monitoring
#[derive(Debug)]
pub struct CacheStats {
    name: String,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl CacheStats {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Get total lookups (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Calculate hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Get a summary report
    pub fn report(&self, entries: usize) -> CacheStatsReport {
        CacheStatsReport {
            name: self.name.clone(),
            entries,
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            total_requests: self.total_requests(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub name: String,
    /// Stored mappings
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub total_requests: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_key_shape() {
        let key = cache_key("EMAIL_ADDRESS", "john@example.com");
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, cache_key("EMAIL_ADDRESS", "john@example.com"));
        assert_ne!(key, cache_key("PERSON", "john@example.com"));
        // Case and whitespace sensitive
        assert_ne!(key, cache_key("EMAIL_ADDRESS", "John@example.com "));
    }

    #[test]
    fn test_put_get_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("map.json");

        let mut cache = MappingCache::open(&path);
        assert!(cache.get("PERSON", "王小明").is_none());
        cache.put("PERSON", "王小明", "李大華");
        assert_eq!(cache.get("PERSON", "王小明").as_deref(), Some("李大華"));
        assert!(path.exists());

        let reopened = MappingCache::open(&path);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("PERSON", "王小明").as_deref(), Some("李大華"));

        // Raw values never reach the file
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("王小明"));
    }

    #[test]
    fn test_corrupt_file_yields_empty_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = MappingCache::open(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("map.json");

        let mut cache = MappingCache::open(&path);
        cache.put("PHONE_NUMBER", "0912345678", "0987654321");
        cache.clear().unwrap();

        assert!(cache.is_empty());
        assert!(!path.exists());
        // Clearing again is fine
        cache.clear().unwrap();
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let mut cache = MappingCache::open(dir.path().join("map.json"));

        cache.get("PERSON", "a");
        cache.put("PERSON", "a", "b");
        cache.get("PERSON", "a");

        let report = cache.stats_report();
        assert_eq!(report.hits, 1);
        assert_eq!(report.misses, 1);
        assert_eq!(report.writes, 1);
        assert_eq!(report.entries, 1);
        assert!((report.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_save_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the write fail
        let path = dir.path().join("map.json");
        std::fs::create_dir_all(&path).unwrap();

        let mut cache = MappingCache::open(&path);
        let value = cache.put("PERSON", "a", "b");
        assert_eq!(value, "b");
        assert_eq!(cache.get("PERSON", "a").as_deref(), Some("b"));
    }
}
