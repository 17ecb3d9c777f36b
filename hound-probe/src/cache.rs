//! Two-tier result cache
//!
//! L1 is a bounded in-memory LRU with a short TTL, checked lazily on read. L2 is a
//! [`PersistentStore`] with a long TTL; an L2 hit is promoted back into L1. Writes
//! go through both tiers. Concurrent lookups for one key share a single fetch.
//!
//! L2 failures never reach the caller: they are logged and read as a miss.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use hound_core::{
    CacheEntry, CacheKey, CachedValue, ProbeRequest, ProfileResult, DEFAULT_L1_CAPACITY,
    DEFAULT_L1_TTL_SECS, DEFAULT_L2_TTL_SECS,
};

use crate::{LruCache, PersistentStore, SingleFlight};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub l1_capacity: usize,
    pub l1_ttl_secs: u64,
    pub l2_ttl_secs: u64,
    /// Directory for the on-disk L2 tier; in-process store when unset
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            l1_capacity: DEFAULT_L1_CAPACITY,
            l1_ttl_secs: DEFAULT_L1_TTL_SECS,
            l2_ttl_secs: DEFAULT_L2_TTL_SECS,
            dir: None,
        }
    }
}

/// Where a looked-up result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    L1,
    L2,
    /// This caller ran the fetch
    Fetched,
    /// Another caller's in-flight fetch was shared
    Joined,
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub result: ProfileResult,
    pub source: CacheSource,
}

impl CacheLookup {
    /// Served without this caller touching the network
    pub fn is_cached(&self) -> bool {
        self.source != CacheSource::Fetched
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub joins: u64,
    pub l1_len: usize,
    pub l1_evictions: u64,
    pub l2_errors: u64,
}

#[derive(Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    l2_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct CacheInner {
    config: CacheConfig,
    l1: Mutex<LruCache<CacheKey, CacheEntry>>,
    l2: Option<Arc<dyn PersistentStore>>,
    flights: SingleFlight<CacheKey, (ProfileResult, CacheSource)>,
    counters: Counters,
}

/// Cheap to clone; clones share the same tiers
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<CacheInner>,
}

impl TieredCache {
    pub fn new(config: CacheConfig, l2: Option<Arc<dyn PersistentStore>>) -> Self {
        let l1 = Mutex::new(LruCache::new(config.l1_capacity));
        Self {
            inner: Arc::new(CacheInner {
                config,
                l1,
                l2,
                flights: SingleFlight::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn memory_only(config: CacheConfig) -> Self {
        Self::new(config, None)
    }

    /// No reads or writes; concurrent fetches are still collapsed
    pub fn disabled() -> Self {
        Self::new(
            CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            },
            None,
        )
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Look up a request in L1, then L2
    pub async fn get(&self, request: &ProbeRequest) -> Option<ProfileResult> {
        self.inner
            .lookup(&request.cache_key(), request)
            .await
            .map(|(result, _)| result)
    }

    /// Write a value through both tiers
    pub async fn put(&self, key: &CacheKey, value: CachedValue) {
        self.inner.write_through(key, value).await;
    }

    /// Cache a probe outcome. Returns false for outcomes that are not cacheable.
    pub async fn put_result(&self, request: &ProbeRequest, result: &ProfileResult) -> bool {
        self.inner.store(&request.cache_key(), result).await
    }

    pub async fn delete(&self, request: &ProbeRequest) {
        let key = request.cache_key();
        self.inner.l1.lock().remove(&key);
        if let Some(l2) = &self.inner.l2 {
            if let Err(e) = l2.delete(&key).await {
                self.inner.l2_failed(&key, "delete", &e);
            }
        }
    }

    /// Drop every L1 entry; L2 is untouched
    pub fn clear_memory(&self) {
        self.inner.l1.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        let l1 = self.inner.l1.lock();
        CacheStats {
            l1_hits: counters.l1_hits.load(Ordering::Relaxed),
            l2_hits: counters.l2_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            joins: counters.joins.load(Ordering::Relaxed),
            l1_len: l1.len(),
            l1_evictions: l1.evictions(),
            l2_errors: counters.l2_errors.load(Ordering::Relaxed),
        }
    }

    /// Serve `request` from cache, or run `fetch` once for every concurrent caller
    /// of the same key and cache its outcome.
    ///
    /// `fetch` is only invoked by the caller that starts the flight. If every caller
    /// is dropped mid-flight the fetch is abandoned and the next caller starts over.
    pub async fn get_or_fetch<F, Fut>(&self, request: &ProbeRequest, fetch: F) -> CacheLookup
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProfileResult> + Send + 'static,
    {
        let key = request.cache_key();

        if let Some(value) = self.inner.l1_value(&key) {
            Counters::bump(&self.inner.counters.l1_hits);
            return CacheLookup {
                result: value.to_result(request),
                source: CacheSource::L1,
            };
        }

        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        let flight_key = key.clone();

        let ((result, source), joined) = self
            .inner
            .flights
            .run(key, move || {
                let fetching = fetch();
                async move {
                    // A flight that finished just before ours may have filled the cache
                    if let Some(hit) = inner.lookup(&flight_key, &request).await {
                        return hit;
                    }
                    Counters::bump(&inner.counters.misses);

                    let result = fetching.await;
                    inner.store(&flight_key, &result).await;
                    (result, CacheSource::Fetched)
                }
            })
            .await;

        if joined {
            Counters::bump(&self.inner.counters.joins);
            return CacheLookup {
                result,
                source: CacheSource::Joined,
            };
        }
        CacheLookup { result, source }
    }
}

impl CacheInner {
    async fn lookup(
        &self,
        key: &CacheKey,
        request: &ProbeRequest,
    ) -> Option<(ProfileResult, CacheSource)> {
        if !self.config.enabled {
            return None;
        }

        if let Some(value) = self.l1_value(key) {
            Counters::bump(&self.counters.l1_hits);
            return Some((value.to_result(request), CacheSource::L1));
        }

        let l2 = self.l2.as_ref()?;
        let entry = match l2.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                self.l2_failed(key, "read", &e);
                return None;
            }
        };

        let now = Utc::now();
        if entry.is_expired(now) {
            debug!("L2 entry {} expired", key);
            if let Err(e) = l2.delete(key).await {
                self.l2_failed(key, "delete", &e);
            }
            return None;
        }

        // Promoted entries never outlive their L2 original
        let ttl = self.config.l1_ttl_secs.min(entry.remaining_secs(now));
        let result = entry.value.to_result(request);
        self.l1_insert(key.clone(), CacheEntry::new(entry.value, ttl));

        Counters::bump(&self.counters.l2_hits);
        Some((result, CacheSource::L2))
    }

    fn l1_value(&self, key: &CacheKey) -> Option<CachedValue> {
        if !self.config.enabled {
            return None;
        }
        let mut l1 = self.l1.lock();
        if l1.peek(key)?.is_expired(Utc::now()) {
            l1.remove(key);
            return None;
        }
        l1.get(key).map(|entry| entry.value.clone())
    }

    fn l1_insert(&self, key: CacheKey, entry: CacheEntry) {
        if let Some((evicted, _)) = self.l1.lock().insert(key, entry) {
            debug!("Evicted {} from L1", evicted);
        }
    }

    async fn store(&self, key: &CacheKey, result: &ProfileResult) -> bool {
        if !self.config.enabled {
            return false;
        }
        match CachedValue::from_result(result) {
            Some(value) => {
                self.write_through(key, value).await;
                true
            }
            None => false,
        }
    }

    async fn write_through(&self, key: &CacheKey, value: CachedValue) {
        if !self.config.enabled {
            return;
        }

        let persisted = CacheEntry::new(value.clone(), self.config.l2_ttl_secs);
        self.l1_insert(key.clone(), CacheEntry::new(value, self.config.l1_ttl_secs));

        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.put(key, &persisted).await {
                self.l2_failed(key, "write", &e);
            }
        }
    }

    fn l2_failed(&self, key: &CacheKey, op: &str, err: &dyn std::fmt::Display) {
        Counters::bump(&self.counters.l2_errors);
        warn!("L2 cache {} failed for {}: {}", op, key, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DiskStore, MemoryStore};
    use chrono::Duration as ChronoDuration;
    use hound_core::{IdentifierKind, IndeterminateReason, Platform};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn request(identifier: &str) -> ProbeRequest {
        let platform = Platform::new("GitHub", "https://github.com/{username}");
        ProbeRequest::new(&platform, identifier, IdentifierKind::Username)
    }

    fn found(identifier: &str) -> ProfileResult {
        let request = request(identifier);
        ProfileResult::found(&request, &format!("https://github.com/{}", identifier))
    }

    #[tokio::test]
    async fn test_round_trip_and_ttl() {
        let cache = TieredCache::memory_only(CacheConfig::default());
        let alice = request("alice123");
        assert!(cache.get(&alice).await.is_none());

        let result = found("alice123");
        assert!(cache.put_result(&alice, &result).await);
        assert_eq!(cache.get(&alice).await, Some(result));

        let expired = TieredCache::memory_only(CacheConfig {
            l1_ttl_secs: 0,
            ..CacheConfig::default()
        });
        expired.put_result(&alice, &found("alice123")).await;
        assert!(expired.get(&alice).await.is_none());
        assert_eq!(expired.stats().l1_len, 0);
    }

    #[tokio::test]
    async fn test_confirmed_absent_is_cached() {
        let cache = TieredCache::memory_only(CacheConfig::default());
        let bob = request("bob");
        let absent = ProfileResult::absent(&bob, "https://github.com/bob");

        assert!(cache.put_result(&bob, &absent).await);
        let cached = cache.get(&bob).await.unwrap();
        assert!(!cached.exists);
        assert!(cached.is_conclusive());
        assert_eq!(cached.url, "https://github.com/bob");
    }

    #[tokio::test]
    async fn test_indeterminate_not_cached() {
        let cache = TieredCache::memory_only(CacheConfig::default());
        let alice = request("alice123");
        let timeout = ProfileResult::indeterminate(
            &alice,
            "https://github.com/alice123",
            IndeterminateReason::Timeout,
        );

        assert!(!cache.put_result(&alice, &timeout).await);
        assert!(cache.get(&alice).await.is_none());
    }

    #[tokio::test]
    async fn test_l1_evicts_least_recently_used() {
        let cache = TieredCache::memory_only(CacheConfig {
            l1_capacity: 2,
            ..CacheConfig::default()
        });
        for name in ["a", "b"] {
            cache.put_result(&request(name), &found(name)).await;
        }
        // Touch "a" so "b" becomes the oldest
        assert!(cache.get(&request("a")).await.is_some());
        cache.put_result(&request("c"), &found("c")).await;

        assert!(cache.get(&request("a")).await.is_some());
        assert!(cache.get(&request("b")).await.is_none());
        assert!(cache.get(&request("c")).await.is_some());
        assert_eq!(cache.stats().l1_evictions, 1);
    }

    #[tokio::test]
    async fn test_l2_hit_promoted_to_l1() {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::new(CacheConfig::default(), Some(store.clone()));
        let alice = request("alice123");

        cache.put_result(&alice, &found("alice123")).await;
        assert_eq!(store.len(), 1);
        cache.clear_memory();

        assert!(cache.get(&alice).await.is_some());
        assert!(cache.get(&alice).await.is_some());
        let stats = cache.stats();
        assert_eq!(stats.l2_hits, 1);
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.l1_len, 1);
    }

    #[tokio::test]
    async fn test_expired_l2_entry_is_deleted() {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::new(CacheConfig::default(), Some(store.clone()));
        let alice = request("alice123");

        let mut stale = CacheEntry::new(
            CachedValue::from_result(&found("alice123")).unwrap(),
            DEFAULT_L2_TTL_SECS,
        );
        stale.inserted_at = Utc::now() - ChronoDuration::days(2);
        store.put(&alice.cache_key(), &stale).await.unwrap();

        assert!(cache.get(&alice).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_l2_entry_with_huge_ttl_is_served() {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::new(CacheConfig::default(), Some(store.clone()));
        let alice = request("alice123");

        let entry = CacheEntry::new(
            CachedValue::from_result(&found("alice123")).unwrap(),
            10_000_000_000_000,
        );
        store.put(&alice.cache_key(), &entry).await.unwrap();

        assert!(cache.get(&alice).await.is_some());
        // Promotion keeps the configured L1 TTL
        assert!(cache.get(&alice).await.is_some());
        let stats = cache.stats();
        assert_eq!(stats.l2_hits, 1);
        assert_eq!(stats.l1_hits, 1);
    }

    #[tokio::test]
    async fn test_corrupt_l2_degrades_to_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).unwrap());
        let cache = TieredCache::new(CacheConfig::default(), Some(store));
        let alice = request("alice123");
        std::fs::write(
            dir.path().join(format!("{}.json", alice.cache_key().as_str())),
            b"{not json",
        )
        .unwrap();

        let lookup = cache
            .get_or_fetch(&alice, || async { found("alice123") })
            .await;
        assert_eq!(lookup.source, CacheSource::Fetched);
        assert!(lookup.result.exists);
        assert_eq!(cache.stats().l2_errors, 1);

        // The fetch overwrote the bad file
        cache.clear_memory();
        assert!(cache.get(&alice).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_run_once() {
        let cache = TieredCache::memory_only(CacheConfig::default());
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                let runs = runs.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_fetch(&request("alice123"), move || async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            found("alice123")
                        })
                        .await
                })
            })
            .collect();

        let mut lookups = Vec::new();
        for handle in handles {
            lookups.push(handle.await.unwrap());
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            lookups.iter().filter(|l| l.source == CacheSource::Fetched).count(),
            1
        );
        assert!(lookups.iter().all(|l| l.result == lookups[0].result));

        // Later callers are served from L1
        let again = cache
            .get_or_fetch(&request("alice123"), || async { found("someone-else") })
            .await;
        assert_eq!(again.source, CacheSource::L1);
        assert_eq!(again.result.identifier, "alice123");
    }

    #[tokio::test]
    async fn test_disabled_cache_always_fetches() {
        let cache = TieredCache::disabled();
        let alice = request("alice123");
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let runs = runs.clone();
            let lookup = cache
                .get_or_fetch(&alice, move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    found("alice123")
                })
                .await;
            assert_eq!(lookup.source, CacheSource::Fetched);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(cache.get(&alice).await.is_none());
    }
}
