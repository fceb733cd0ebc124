//! Size-bounded, TTL-expiring LRU store with crash-safe persistence.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::entry::CacheEntry;
use super::key::CacheKeyCodec;
use super::snapshot::{load_snapshot, SnapshotDocument, SnapshotWriter};
use crate::metrics::MetricsAccumulator;
use crate::types::config::CacheConfig;
use crate::{ReelError, ReelResult};

/// Occupancy of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of stored entries (expired ones not yet detected included).
    pub entries: usize,

    /// Sum of `size_bytes` over stored entries.
    pub total_size_bytes: usize,

    /// Configured budget.
    pub max_size_bytes: usize,
}

impl CacheStats {
    /// Fraction of the budget in use.
    pub fn utilization(&self) -> f64 {
        if self.max_size_bytes == 0 {
            0.0
        } else {
            self.total_size_bytes as f64 / self.max_size_bytes as f64
        }
    }
}

struct StoreState {
    /// Ordered from most to least recently accessed.
    entries: LruCache<String, CacheEntry>,
    total_size: usize,
    generation: u64,
}

impl StoreState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.total_size -= entry.size_bytes;
        Some(entry)
    }

    fn document(&mut self) -> SnapshotDocument {
        self.generation += 1;
        let entries = self.entries.iter().rev().map(|(_, e)| e.clone()).collect();
        SnapshotDocument::new(entries).with_generation(self.generation)
    }
}

/// Memoizes expensive external calls.
///
/// Every table mutation, including the touch performed by a hit, happens
/// under one mutex. Snapshots handed to the background writer are built
/// under that same mutex, so persistence never observes a half-applied
/// eviction. The mutex is never held across an `.await`.
pub struct CacheStore {
    state: Mutex<StoreState>,
    codec: CacheKeyCodec,
    max_size_bytes: usize,
    default_ttl: Duration,
    metrics: Arc<MetricsAccumulator>,
    writer: Option<SnapshotWriter>,
}

impl CacheStore {
    /// Opens a store from configuration.
    ///
    /// With persistence enabled, live entries of an existing snapshot are
    /// loaded and a background writer is started. A missing or corrupt
    /// snapshot starts an empty cache.
    pub fn open(config: &CacheConfig, metrics: Arc<MetricsAccumulator>) -> ReelResult<Self> {
        if config.max_size_bytes == 0 {
            return Err(ReelError::config("cache.max_size_bytes must be greater than 0"));
        }

        let mut store = Self::build(
            CacheKeyCodec::new(config.volatile_fields.iter().cloned()),
            config.max_size_bytes,
            config.default_ttl(),
            metrics,
        );

        if config.enabled {
            store.restore(load_snapshot(&config.snapshot_path));
            store.writer = Some(SnapshotWriter::spawn(&config.snapshot_path)?);
        }

        tracing::debug!(
            entries = store.len(),
            max_size_bytes = store.max_size_bytes,
            persistent = store.writer.is_some(),
            "Cache store opened"
        );

        Ok(store)
    }

    /// Creates a store without persistence.
    pub fn in_memory(
        max_size_bytes: usize,
        default_ttl: Duration,
        metrics: Arc<MetricsAccumulator>,
    ) -> Self {
        Self::build(CacheKeyCodec::default(), max_size_bytes.max(1), default_ttl, metrics)
    }

    fn build(
        codec: CacheKeyCodec,
        max_size_bytes: usize,
        default_ttl: Duration,
        metrics: Arc<MetricsAccumulator>,
    ) -> Self {
        Self {
            state: Mutex::new(StoreState {
                entries: LruCache::unbounded(),
                total_size: 0,
                generation: 0,
            }),
            codec,
            max_size_bytes,
            default_ttl,
            metrics,
            writer: None,
        }
    }

    /// Inserts loaded entries, oldest access first, trimming to the budget.
    fn restore(&mut self, entries: Vec<CacheEntry>) {
        let max_size_bytes = self.max_size_bytes;
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());

        for entry in entries {
            if entry.size_bytes > max_size_bytes {
                continue;
            }
            if let Some(old) = state.entries.put(entry.key.clone(), entry.clone()) {
                state.total_size -= old.size_bytes;
            }
            state.total_size += entry.size_bytes;

            while state.total_size > max_size_bytes {
                match state.entries.pop_lru() {
                    Some((_, evicted)) => state.total_size -= evicted.size_bytes,
                    None => break,
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Key codec used by this store.
    pub fn codec(&self) -> &CacheKeyCodec {
        &self.codec
    }

    /// Shared metrics.
    pub fn metrics(&self) -> &Arc<MetricsAccumulator> {
        &self.metrics
    }

    /// TTL used when a caller does not provide one.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Encodes the key for an (operation, parameters) pair.
    pub fn key_for(&self, operation: &str, params: &Value) -> String {
        self.codec.encode(operation, params)
    }

    /// Looks up a value.
    ///
    /// A live entry is touched and counted as a hit. An expired entry is
    /// removed and counted as a miss.
    pub fn get(&self, operation: &str, params: &Value) -> Option<Value> {
        let key = self.key_for(operation, params);
        self.get_by_key(&key)
    }

    /// Looks up a value by its encoded key.
    pub fn get_by_key(&self, key: &str) -> Option<Value> {
        let mut state = self.lock();

        // Peek first so an expired entry is not promoted.
        let is_expired = state.entries.peek(key).map(CacheEntry::is_expired);

        match is_expired {
            Some(true) => {
                state.remove(key);
                self.metrics.record_expiration();
                self.metrics.record_cache_access(false);
                tracing::debug!(key, "Cache entry expired");
                None
            }
            Some(false) => {
                self.metrics.record_cache_access(true);
                state.entries.get_mut(key).map(|entry| {
                    entry.touch();
                    entry.value.clone()
                })
            }
            None => {
                self.metrics.record_cache_access(false);
                None
            }
        }
    }

    /// Looks up a value and deserializes it.
    ///
    /// A stored value that does not fit `T` is reported as absent; the lookup
    /// itself has already been counted as a hit.
    pub fn get_as<T: DeserializeOwned>(&self, operation: &str, params: &Value) -> Option<T> {
        let value = self.get(operation, params)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                tracing::debug!(operation, error = %e, "Cached value has an unexpected shape");
                None
            }
        }
    }

    /// Whether a live entry exists, without touching it or counting a lookup.
    pub fn contains(&self, operation: &str, params: &Value) -> bool {
        let key = self.key_for(operation, params);
        self.lock()
            .entries
            .peek(&key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Stores a value.
    ///
    /// Returns `false` without caching anything when the value cannot be
    /// serialized or is larger than the whole budget. Least recently accessed
    /// entries are evicted until the new one fits.
    pub fn set<V: Serialize + ?Sized>(
        &self,
        operation: &str,
        params: &Value,
        value: &V,
        ttl: Duration,
    ) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(operation, error = %e, "Value is not serializable, not caching");
                return false;
            }
        };
        let key = self.key_for(operation, params);
        self.insert(key, operation, value, ttl)
    }

    fn insert(&self, key: String, operation: &str, value: Value, ttl: Duration) -> bool {
        let size_bytes = value.to_string().len();
        if size_bytes > self.max_size_bytes {
            tracing::warn!(
                operation,
                size_bytes,
                max_size_bytes = self.max_size_bytes,
                "Value exceeds the cache budget, not caching"
            );
            return false;
        }

        let mut state = self.lock();
        state.remove(&key);

        while state.total_size + size_bytes > self.max_size_bytes {
            match state.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    state.total_size -= evicted.size_bytes;
                    self.metrics.record_eviction();
                    tracing::debug!(
                        key = %evicted_key,
                        operation = %evicted.operation,
                        size_bytes = evicted.size_bytes,
                        "Evicted least recently used entry"
                    );
                }
                None => break,
            }
        }

        let entry = CacheEntry::new(key.clone(), operation, value, ttl, size_bytes);
        state.entries.put(key, entry);
        state.total_size += size_bytes;

        self.schedule_snapshot(&mut state);
        true
    }

    /// Returns the cached value or computes, stores and returns it.
    ///
    /// An error from `compute` is returned unchanged and nothing is cached. A
    /// value that cannot be cached is still returned.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        operation: &str,
        params: &Value,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get_as::<T>(operation, params) {
            return Ok(cached);
        }

        let value = compute().await?;
        self.set(operation, params, &value, ttl);
        Ok(value)
    }

    /// Removes entries.
    ///
    /// Without a pattern the store is emptied. With a pattern only entries
    /// whose key or operation contains it are removed. Returns the number of
    /// removed entries.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let mut state = self.lock();

        let removed = match pattern {
            None => {
                let count = state.entries.len();
                state.entries.clear();
                state.total_size = 0;
                count
            }
            Some(pattern) => {
                let keys: Vec<String> = state
                    .entries
                    .iter()
                    .filter(|(key, entry)| key.contains(pattern) || entry.operation.contains(pattern))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &keys {
                    state.remove(key);
                }
                keys.len()
            }
        };

        tracing::info!(removed, pattern = pattern.unwrap_or("*"), "Cache cleared");
        self.schedule_snapshot(&mut state);
        removed
    }

    /// Removes every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.lock();

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
            self.metrics.record_expiration();
        }

        if !expired.is_empty() {
            self.schedule_snapshot(&mut state);
        }
        expired.len()
    }

    /// Returns occupancy statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            total_size_bytes: state.total_size,
            max_size_bytes: self.max_size_bytes,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the store holds no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every stored entry, most recently accessed first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.lock().entries.iter().map(|(_, e)| e.clone()).collect()
    }

    /// Writes a snapshot synchronously. A no-op without persistence.
    pub fn persist_now(&self) -> ReelResult<()> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let document = self.lock().document();
        writer.write_now(&document)
    }

    /// Must be called with the table lock held, so queued snapshots keep the
    /// order of the mutations that produced them.
    fn schedule_snapshot(&self, state: &mut StoreState) {
        if let Some(writer) = &self.writer {
            writer.schedule(state.document());
        }
    }
}
