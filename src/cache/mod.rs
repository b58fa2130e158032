use crate::error::DataResult;
use crate::metrics::Metrics;
use crate::pool::BackendPool;
use dashmap::DashMap;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A stored value and the window it stays valid for
#[derive(Clone)]
pub struct CacheEntry {
    data: Arc<dyn Any + Send + Sync>,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    pub fn new<T: Send + Sync + 'static>(data: T, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            stored_at: Instant::now(),
            ttl,
        }
    }

    #[inline]
    pub fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }

    /// Clone of the value if it is still valid and of type `T`
    pub fn get<T: Clone + 'static>(&self, now: Instant) -> Option<T> {
        if !self.is_valid(now) {
            return None;
        }
        self.data.downcast_ref::<T>().cloned()
    }
}

/// Keyed [`CacheEntry`] map whose fills lose to concurrent clears.
///
/// Every clear bumps a generation before removing entries. A fill records the
/// generation before it starts reading and stores its value only if no clear
/// ran in between, so a read that overlapped a write never outlives it.
#[derive(Default)]
pub struct TtlMap {
    entries: DashMap<String, CacheEntry>,
    generation: AtomicU64,
}

impl TtlMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current invalidation generation; take it before reading the source.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.entries.get(key)?.get::<T>(Instant::now())
    }

    /// Store `entry` unless a clear ran after `generation` was taken.
    /// Returns whether the entry was kept.
    pub fn insert_since(&self, key: &str, entry: CacheEntry, generation: u64) -> bool {
        if self.generation() != generation {
            return false;
        }
        let data = Arc::clone(&entry.data);
        self.entries.insert(key.to_string(), entry);

        // A clear that bumped the generation before this insert landed may
        // already have swept past the key.
        if self.generation() != generation {
            self.entries
                .remove_if(key, |_, stored| Arc::ptr_eq(&stored.data, &data));
            return false;
        }
        true
    }

    /// Drop every entry whose key starts with `prefix`; everything when `None`.
    pub fn clear(&self, prefix: Option<&str>) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let before = self.entries.len();
        match prefix {
            Some(prefix) => self.entries.retain(|key, _| !key.starts_with(prefix)),
            None => self.entries.clear(),
        }
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted keys, expired entries included
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
}

/// TTL cache in front of backend reads.
///
/// Expired entries are never purged in the background; a lookup treats them
/// as absent and the next successful read overwrites them. Keys start with the
/// table name so that `clear_cache(table)` drops every read for that table.
/// A read still in flight when the cache is cleared is returned to its caller
/// but not stored.
pub struct QueryCache {
    entries: TtlMap,
    pool: Arc<BackendPool>,
}

impl QueryCache {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self {
            entries: TtlMap::new(),
            pool,
        }
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Serve `cache_key` (the table name when `None`) from the cache, or run
    /// `query_fn` through the pool's retry policy and store the result.
    /// Failures are returned and never stored.
    pub async fn cached_query<T, F, Fut>(
        &self,
        table: &str,
        cache_key: Option<&str>,
        ttl: Duration,
        query_fn: F,
    ) -> DataResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = DataResult<T>>,
    {
        let attempts = self.pool.retry_policy().attempts();
        self.cached_query_with_attempts(table, cache_key, ttl, attempts, query_fn)
            .await
    }

    /// Same as `cached_query` with an explicit attempt budget for the miss path.
    pub async fn cached_query_with_attempts<T, F, Fut>(
        &self,
        table: &str,
        cache_key: Option<&str>,
        ttl: Duration,
        attempts: u32,
        query_fn: F,
    ) -> DataResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = DataResult<T>>,
    {
        let key = cache_key.unwrap_or(table);

        if let Some(value) = self.entries.get::<T>(key) {
            trace!("Query cache hit: {}", key);
            Metrics::record_cache_lookup(table, true);
            return Ok(value);
        }
        Metrics::record_cache_lookup(table, false);

        let generation = self.entries.generation();
        let value = self.pool.execute_with_attempts(attempts, query_fn).await?;
        if !ttl.is_zero()
            && !self
                .entries
                .insert_since(key, CacheEntry::new(value.clone(), ttl), generation)
        {
            debug!("Query cache skipped fill of {}: cleared during read", key);
        }
        Ok(value)
    }

    /// Drop every entry whose key starts with `prefix`; everything when `None`.
    /// Returns the number of entries removed.
    pub fn clear_cache(&self, prefix: Option<&str>) -> usize {
        let removed = self.entries.clear(prefix);
        if removed > 0 {
            debug!("Query cache cleared {} entries (prefix {:?})", removed, prefix);
        }
        removed
    }

    pub fn clear_all(&self) -> usize {
        self.clear_cache(None)
    }

    /// Entry count and keys, expired entries included
    pub fn stats(&self) -> CacheStats {
        let keys = self.entries.keys();
        CacheStats {
            size: keys.len(),
            keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataError;
    use crate::pool::RetryPolicy;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;
    use tokio_test::assert_ok;

    fn cache() -> QueryCache {
        let pool = BackendPool::new(None, 1, RetryPolicy::fixed(3, Duration::from_millis(1)));
        QueryCache::new(Arc::new(pool))
    }

    #[tokio::test]
    async fn test_hit_skips_query_within_ttl() {
        let cache = cache();
        let calls = AtomicU32::new(0);
        let query = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, DataError>(vec!["a".to_string()])
        };

        let first = cache
            .cached_query("patients", Some("patients:id=eq.1"), Duration::from_secs(60), query)
            .await;
        let second = cache
            .cached_query("patients", Some("patients:id=eq.1"), Duration::from_secs(60), query)
            .await;

        assert_eq!(assert_ok!(first), vec!["a".to_string()]);
        assert_eq!(assert_ok!(second), vec!["a".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_requeries() {
        let cache = cache();
        let calls = AtomicU32::new(0);
        let query = || async { Ok::<_, DataError>(calls.fetch_add(1, Ordering::SeqCst) + 1) };

        let ttl = Duration::from_millis(40);
        assert_eq!(cache.cached_query("slots", None, ttl, query).await.unwrap(), 1);
        assert_eq!(cache.cached_query("slots", None, ttl, query).await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.cached_query("slots", None, ttl, query).await.unwrap(), 2);
        assert_eq!(cache.stats().size, 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = cache();
        let calls = AtomicU32::new(0);

        let result: DataResult<u32> = cache
            .cached_query("patients", None, Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DataError::Connection("down".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().size, 0);

        let ok = cache
            .cached_query("patients", None, Duration::from_secs(60), || async { Ok(7u32) })
            .await;
        assert_eq!(assert_ok!(ok), 7);
    }

    #[tokio::test]
    async fn test_clear_by_table_prefix() {
        let cache = cache();
        let ttl = Duration::from_secs(60);
        for key in ["patients:id=eq.1", "patients:owner=p1", "appointments:id=eq.9"] {
            cache
                .cached_query(key.split(':').next().unwrap(), Some(key), ttl, || async { Ok(1u8) })
                .await
                .unwrap();
        }

        assert_eq!(cache.clear_cache(Some("patients")), 2);
        assert_eq!(cache.stats().keys, vec!["appointments:id=eq.9".to_string()]);
        assert_eq!(cache.clear_all(), 1);
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_write_then_read_sees_new_value() {
        let cache = cache();
        let stored = parking_lot::Mutex::new("old".to_string());
        let ttl = Duration::from_secs(60);
        let read = || async { Ok::<_, DataError>(stored.lock().clone()) };

        assert_eq!(cache.cached_query("patients", Some("patients:1"), ttl, read).await.unwrap(), "old");

        *stored.lock() = "new".to_string();
        cache.clear_cache(Some("patients"));

        assert_eq!(cache.cached_query("patients", Some("patients:1"), ttl, read).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_read_overlapping_write_is_not_cached() {
        let cache = cache();
        let stored = parking_lot::Mutex::new("old".to_string());
        let read_started = Notify::new();
        let release = Notify::new();
        let ttl = Duration::from_secs(60);

        let slow_read = cache.cached_query("patients", Some("patients:1"), ttl, || async {
            let value = stored.lock().clone();
            read_started.notify_one();
            release.notified().await;
            Ok::<_, DataError>(value)
        });
        let write = async {
            read_started.notified().await;
            *stored.lock() = "new".to_string();
            cache.clear_cache(Some("patients"));
            release.notify_one();
        };
        let (overlapping, ()) = tokio::join!(slow_read, write);
        assert_eq!(assert_ok!(overlapping), "old");
        assert_eq!(cache.stats().size, 0);

        let fresh = cache
            .cached_query("patients", Some("patients:1"), ttl, || async {
                Ok::<_, DataError>(stored.lock().clone())
            })
            .await;
        assert_eq!(assert_ok!(fresh), "new");
    }

    #[test]
    fn test_fill_after_clear_is_dropped() {
        let map = TtlMap::new();
        let ttl = Duration::from_secs(60);

        let stale = map.generation();
        map.clear(Some("patients"));
        assert!(!map.insert_since("patients:1", CacheEntry::new(1u8, ttl), stale));
        assert!(map.is_empty());

        let current = map.generation();
        assert!(map.insert_since("patients:1", CacheEntry::new(2u8, ttl), current));
        assert_eq!(map.get::<u8>("patients:1"), Some(2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_entry_type_mismatch_is_a_miss() {
        let entry = CacheEntry::new(5u32, Duration::from_secs(1));
        assert_eq!(entry.get::<u32>(Instant::now()), Some(5));
        assert_eq!(entry.get::<String>(Instant::now()), None);
    }
}
