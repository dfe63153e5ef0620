//! 元素描述缓存
//!
//! 键为 (app_name, element_id)；默认按插入时间淘汰最早的条目（与连接池的最近使用策略不同，可配置统一）。

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::cache::stats::{CacheStats, CacheStatsSnapshot};
use crate::cache::store::{EvictionPolicy, Lookup, TtlStore};
use crate::collaborators::ElementDescriptor;

/// 元素缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementKey {
    pub app_name: String,
    pub element_id: String,
}

impl ElementKey {
    pub fn new(app_name: impl Into<String>, element_id: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            element_id: element_id.into(),
        }
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.app_name, self.element_id)
    }
}

pub struct ElementCache {
    inner: Mutex<TtlStore<ElementKey, ElementDescriptor>>,
    stats: CacheStats,
}

impl ElementCache {
    pub fn new(capacity: usize, default_ttl: Duration, policy: EvictionPolicy) -> Self {
        Self {
            inner: Mutex::new(TtlStore::new(capacity, default_ttl, policy)),
            stats: CacheStats::default(),
        }
    }

    fn store(&self) -> MutexGuard<'_, TtlStore<ElementKey, ElementDescriptor>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_element(&self, key: &ElementKey) -> Option<ElementDescriptor> {
        let mut store = self.store();
        match store.get(key, Instant::now()) {
            Lookup::Hit(entry) => {
                self.stats.record_hit();
                Some(entry.value.clone())
            }
            Lookup::Expired => {
                self.stats.record_expirations(1);
                self.stats.record_miss();
                None
            }
            Lookup::Miss => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// ttl 为 None 时使用缓存默认 TTL
    pub fn put_element(&self, key: ElementKey, value: ElementDescriptor, ttl: Option<Duration>) {
        let outcome = self.store().insert(key, value, ttl, Instant::now());
        self.stats.record_expirations(outcome.expired as u64);
        if let Some(evicted) = outcome.evicted {
            self.stats.record_evictions(1);
            tracing::debug!(key = %evicted, "element evicted");
        }
    }

    /// 句柄失效时移除
    pub fn invalidate(&self, key: &ElementKey) -> bool {
        self.store().remove(key).is_some()
    }

    /// 移除某应用的全部元素
    pub fn invalidate_app(&self, app_name: &str) -> usize {
        let mut store = self.store();
        let keys: Vec<ElementKey> = store
            .keys()
            .into_iter()
            .filter(|k| k.app_name == app_name)
            .collect();
        for key in &keys {
            store.remove(key);
        }
        keys.len()
    }

    pub fn purge_expired(&self) -> usize {
        let n = self.store().purge_expired(Instant::now()).len();
        self.stats.record_expirations(n as u64);
        n
    }

    pub fn len(&self) -> usize {
        self.store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &ElementKey) -> bool {
        self.store().contains_key(key)
    }

    pub fn capacity(&self) -> usize {
        self.store().capacity()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let store = self.store();
        self.stats.snapshot(store.len(), store.capacity())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::collaborators::Bounds;

    fn element(title: &str) -> ElementDescriptor {
        ElementDescriptor::new(
            "AXButton",
            title,
            Bounds { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
            "Safari",
        )
    }

    fn key(id: &str) -> ElementKey {
        ElementKey::new("Safari", id)
    }

    #[test]
    fn test_default_policy_evicts_oldest_insert() {
        let cache = ElementCache::new(3, Duration::from_secs(30), EvictionPolicy::OldestInserted);
        for id in ["a", "b", "c"] {
            cache.put_element(key(id), element(id), None);
        }
        assert!(cache.get_element(&key("a")).is_some());
        cache.put_element(key("d"), element("d"), None);

        assert!(!cache.contains(&key("a")));
        assert!(cache.contains(&key("b")));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_lru_policy_keeps_recently_used() {
        let cache = ElementCache::new(3, Duration::from_secs(30), EvictionPolicy::LeastRecentlyUsed);
        for id in ["a", "b", "c"] {
            cache.put_element(key(id), element(id), None);
        }
        assert!(cache.get_element(&key("a")).is_some());
        cache.put_element(key("d"), element("d"), None);

        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));
        assert!(cache.contains(&key("d")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_n_plus_one_evicts_exactly_one() {
        let n = 5;
        let cache = ElementCache::new(n, Duration::from_secs(30), EvictionPolicy::OldestInserted);
        for i in 0..=n {
            let id = format!("el{i}");
            cache.put_element(key(&id), element(&id), None);
        }
        assert_eq!(cache.len(), n);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_ttl_visibility() {
        let cache = ElementCache::new(4, Duration::from_secs(30), EvictionPolicy::OldestInserted);
        cache.put_element(key("short"), element("short"), Some(Duration::from_millis(50)));

        assert!(cache.get_element(&key("short")).is_some());
        std::thread::sleep(Duration::from_millis(120));
        assert!(cache.get_element(&key("short")).is_none());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_invalidate_app() {
        let cache = ElementCache::new(8, Duration::from_secs(30), EvictionPolicy::OldestInserted);
        cache.put_element(key("a"), element("a"), None);
        cache.put_element(ElementKey::new("Mail", "send"), element("send"), None);
        assert_eq!(cache.invalidate_app("Safari"), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&ElementKey::new("Mail", "send")));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_access_keeps_capacity() {
        let capacity = 16;
        let cache = Arc::new(ElementCache::new(
            capacity,
            Duration::from_secs(30),
            EvictionPolicy::LeastRecentlyUsed,
        ));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let id = format!("t{t}-{}", i % 40);
                        cache.put_element(key(&id), element(&id), None);
                        let _ = cache.get_element(&key(&id));
                        assert!(cache.len() <= capacity);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= capacity);
        let stats = cache.stats();
        assert_eq!(stats.size, cache.len());
        assert_eq!(stats.hits + stats.misses, 8 * 200);
    }
}
