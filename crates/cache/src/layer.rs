//! Generic keyed cache layer backed by DashMap for lock-free concurrent
//! access. Each entry tracks insertion time, last access, size, and TTL;
//! eviction runs on access, during periodic sweeps, and by LRU when a
//! layer exceeds its byte cap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Entry<V> {
    value: Arc<V>,
    inserted_at: Instant,
    last_access: Instant,
    size_bytes: usize,
    ttl: Option<Duration>,
}

impl<V> Entry<V> {
    fn expired(&self, sliding: bool) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        let anchor = if sliding { self.last_access } else { self.inserted_at };
        anchor.elapsed() > ttl
    }
}

/// One cache layer. Keys are `(tenant_id, sub_key)` flattened into a single
/// namespaced string so a tenant prefix scan stays cheap.
pub struct CacheLayer<V> {
    name: &'static str,
    store: DashMap<String, Entry<V>>,
    default_ttl: Option<Duration>,
    /// Sliding layers refresh their TTL anchor on every hit.
    sliding: bool,
    /// 0 means unbounded.
    cap_bytes: usize,
    total_bytes: AtomicUsize,
}

fn scoped(tenant_id: &str, key: &str) -> String {
    format!("{tenant_id}\u{1f}{key}")
}

impl<V: Send + Sync + 'static> CacheLayer<V> {
    pub fn new(
        name: &'static str,
        default_ttl: Option<Duration>,
        sliding: bool,
        cap_bytes: usize,
    ) -> Self {
        Self {
            name,
            store: DashMap::new(),
            default_ttl,
            sliding,
            cap_bytes,
            total_bytes: AtomicUsize::new(0),
        }
    }

    /// Get an entry, touching its last access. Expired entries are evicted
    /// in place and reported as misses.
    pub fn get(&self, tenant_id: &str, key: &str) -> Option<Arc<V>> {
        let start = Instant::now();
        let scoped_key = scoped(tenant_id, key);

        let result = match self.store.get_mut(&scoped_key) {
            Some(mut entry) => {
                if entry.expired(self.sliding) {
                    drop(entry);
                    self.remove(&scoped_key, "ttl");
                    None
                } else {
                    entry.last_access = Instant::now();
                    Some(Arc::clone(&entry.value))
                }
            }
            None => None,
        };

        match &result {
            Some(value) => {
                metrics::counter!("cache_hits", "layer" => self.name).increment(1);
                metrics::histogram!("cache_value_bytes", "layer" => self.name)
                    .record(std::mem::size_of_val(value.as_ref()) as f64);
            }
            None => {
                metrics::counter!("cache_misses", "layer" => self.name).increment(1);
            }
        }
        metrics::histogram!("cache_get_latency_us", "layer" => self.name)
            .record(start.elapsed().as_micros() as f64);

        result
    }

    /// Insert or replace an entry. `ttl = None` uses the layer default;
    /// `size_bytes` feeds the byte-cap eviction policy.
    pub fn set(&self, tenant_id: &str, key: &str, value: V, ttl: Option<Duration>, size_bytes: usize) {
        let scoped_key = scoped(tenant_id, key);
        let entry = Entry {
            value: Arc::new(value),
            inserted_at: Instant::now(),
            last_access: Instant::now(),
            size_bytes,
            ttl: ttl.or(self.default_ttl),
        };

        if let Some(old) = self.store.insert(scoped_key, entry) {
            self.total_bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size_bytes, Ordering::Relaxed);

        if self.cap_bytes > 0 && self.total_bytes.load(Ordering::Relaxed) > self.cap_bytes {
            self.evict_lru();
        }
    }

    pub fn invalidate(&self, tenant_id: &str, key: &str) -> bool {
        self.remove(&scoped(tenant_id, key), "manual")
    }

    /// Drop every entry in one tenant's keyspace.
    pub fn invalidate_tenant(&self, tenant_id: &str) -> usize {
        let keys: Vec<String> = self.scan_scoped(tenant_id, "");
        let count = keys.len();
        for key in keys {
            self.remove(&key, "manual");
        }
        count
    }

    /// Drop every entry under a sub-key prefix within one tenant.
    pub fn invalidate_prefix(&self, tenant_id: &str, prefix: &str) -> usize {
        let keys: Vec<String> = self.scan_scoped(tenant_id, prefix);
        let count = keys.len();
        for key in keys {
            self.remove(&key, "manual");
        }
        count
    }

    /// List a tenant's sub-keys, unscoped.
    pub fn scan_keys(&self, tenant_id: &str) -> Vec<String> {
        let prefix = scoped(tenant_id, "");
        self.store
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.key()[prefix.len()..].to_string())
            .collect()
    }

    fn scan_scoped(&self, tenant_id: &str, sub_prefix: &str) -> Vec<String> {
        let prefix = scoped(tenant_id, sub_prefix);
        self.store
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Remove TTL-expired entries. Called from the periodic sweep task.
    pub fn sweep(&self) -> usize {
        let expired: Vec<String> = self
            .store
            .iter()
            .filter(|e| e.value().expired(self.sliding))
            .map(|e| e.key().clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.remove(&key, "ttl");
        }
        count
    }

    /// Evict least-recently-accessed entries until under the low-water
    /// mark (3/4 of the cap).
    fn evict_lru(&self) {
        let low_water = self.cap_bytes / 4 * 3;
        let mut candidates: Vec<(String, Instant)> = self
            .store
            .iter()
            .map(|e| (e.key().clone(), e.value().last_access))
            .collect();
        candidates.sort_by_key(|(_, last_access)| *last_access);

        for (key, _) in candidates {
            if self.total_bytes.load(Ordering::Relaxed) <= low_water {
                break;
            }
            self.remove(&key, "memory");
        }
    }

    fn remove(&self, scoped_key: &str, reason: &'static str) -> bool {
        match self.store.remove(scoped_key) {
            Some((_, entry)) => {
                self.total_bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                metrics::counter!("cache_evictions", "layer" => self.name, "reason" => reason)
                    .increment(1);
                metrics::counter!("cache_bytes_reclaimed", "layer" => self.name, "reason" => reason)
                    .increment(entry.size_bytes as u64);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(ttl_ms: Option<u64>, cap: usize) -> CacheLayer<String> {
        CacheLayer::new("test", ttl_ms.map(Duration::from_millis), false, cap)
    }

    #[test]
    fn test_get_set_scoped_by_tenant() {
        let layer = layer(None, 0);
        layer.set("a", "k", "from-a".to_string(), None, 6);
        layer.set("b", "k", "from-b".to_string(), None, 6);

        assert_eq!(layer.get("a", "k").as_deref(), Some(&"from-a".to_string()));
        assert_eq!(layer.get("b", "k").as_deref(), Some(&"from-b".to_string()));
        assert!(layer.get("c", "k").is_none());
    }

    #[test]
    fn test_ttl_expiry_on_access() {
        let layer = layer(Some(10), 0);
        layer.set("a", "k", "v".to_string(), None, 1);
        assert!(layer.get("a", "k").is_some());
        std::thread::sleep(Duration::from_millis(25));
        assert!(layer.get("a", "k").is_none());
        assert_eq!(layer.len(), 0);
    }

    #[test]
    fn test_sweep_removes_expired() {
        let layer = layer(Some(10), 0);
        layer.set("a", "k1", "v".to_string(), None, 1);
        layer.set("a", "k2", "v".to_string(), Some(Duration::from_secs(60)), 1);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(layer.sweep(), 1);
        assert_eq!(layer.len(), 1);
    }

    #[test]
    fn test_lru_eviction_under_cap() {
        let layer = layer(None, 100);
        layer.set("a", "old", "v".to_string(), None, 40);
        std::thread::sleep(Duration::from_millis(5));
        layer.set("a", "mid", "v".to_string(), None, 40);
        std::thread::sleep(Duration::from_millis(5));
        layer.set("a", "new", "v".to_string(), None, 40);

        // 120 bytes > 100 cap; LRU eviction runs until <= 75 bytes.
        assert!(layer.total_bytes() <= 75);
        assert!(layer.get("a", "new").is_some());
        assert!(layer.get("a", "old").is_none());
    }

    #[test]
    fn test_invalidate_tenant_and_prefix() {
        let layer = layer(None, 0);
        layer.set("a", "pane:1", "v".to_string(), None, 1);
        layer.set("a", "pane:2", "v".to_string(), None, 1);
        layer.set("a", "sf:1", "v".to_string(), None, 1);
        layer.set("b", "pane:1", "v".to_string(), None, 1);

        assert_eq!(layer.invalidate_prefix("a", "pane:"), 2);
        assert!(layer.get("a", "sf:1").is_some());
        assert_eq!(layer.invalidate_tenant("a"), 1);
        assert!(layer.get("b", "pane:1").is_some());
    }

    #[test]
    fn test_scan_keys_returns_unscoped() {
        let layer = layer(None, 0);
        layer.set("a", "x", "v".to_string(), None, 1);
        layer.set("a", "y", "v".to_string(), None, 1);
        let mut keys = layer.scan_keys("a");
        keys.sort();
        assert_eq!(keys, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_replace_adjusts_total_bytes() {
        let layer = layer(None, 0);
        layer.set("a", "k", "v".to_string(), None, 50);
        layer.set("a", "k", "w".to_string(), None, 10);
        assert_eq!(layer.total_bytes(), 10);
    }
}
