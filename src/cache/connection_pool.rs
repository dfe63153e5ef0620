//! 无障碍 API 连接池
//!
//! 每个应用一个连接句柄，按应用名索引；满容量时按最近使用淘汰（可配置）。
//! 若请求的 pid 与池中记录不一致（应用已重启），视为失效句柄：清除并按未命中处理。

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::cache::stats::{CacheStats, CacheStatsSnapshot};
use crate::cache::store::{EvictionPolicy, Lookup, TtlStore};

/// 单个应用的连接句柄
#[derive(Debug, Clone, PartialEq)]
pub struct AccessibilityConnection {
    pub app_name: String,
    pub pid: u32,
    pub created_at: Instant,
    pub last_used: Instant,
    pub use_count: u64,
}

impl AccessibilityConnection {
    pub fn new(app_name: impl Into<String>, pid: u32) -> Self {
        let now = Instant::now();
        Self {
            app_name: app_name.into(),
            pid,
            created_at: now,
            last_used: now,
            use_count: 0,
        }
    }
}

pub struct ConnectionPool {
    inner: Mutex<TtlStore<String, AccessibilityConnection>>,
    stats: CacheStats,
}

impl ConnectionPool {
    pub fn new(capacity: usize, ttl: Duration, policy: EvictionPolicy) -> Self {
        Self {
            inner: Mutex::new(TtlStore::new(capacity, ttl, policy)),
            stats: CacheStats::default(),
        }
    }

    fn store(&self) -> MutexGuard<'_, TtlStore<String, AccessibilityConnection>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 查找可用连接；命中时刷新 last_used 与 use_count
    pub fn get_connection(&self, app_name: &str, pid: u32) -> Option<AccessibilityConnection> {
        let now = Instant::now();
        let key = app_name.to_string();
        let mut store = self.store();
        match store.get(&key, now) {
            Lookup::Hit(entry) if entry.value.pid == pid => {
                entry.value.last_used = now;
                entry.value.use_count += 1;
                let conn = entry.value.clone();
                self.stats.record_hit();
                Some(conn)
            }
            Lookup::Hit(_) => {
                store.remove(&key);
                self.stats.record_miss();
                tracing::debug!(app = %app_name, pid, "stale accessibility connection dropped");
                None
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

    /// 放入新连接（同名覆盖），必要时淘汰一个
    pub fn put_connection(&self, app_name: &str, pid: u32) -> AccessibilityConnection {
        self.insert(AccessibilityConnection::new(app_name, pid))
    }

    fn insert(&self, conn: AccessibilityConnection) -> AccessibilityConnection {
        let outcome = self
            .store()
            .insert(conn.app_name.clone(), conn.clone(), None, conn.created_at);
        self.stats.record_expirations(outcome.expired as u64);
        if let Some(evicted) = outcome.evicted {
            self.stats.record_evictions(1);
            tracing::debug!(app = %evicted, "accessibility connection evicted");
        }
        conn
    }

    /// 有则复用，无则新建（新建即计一次使用）
    pub fn acquire(&self, app_name: &str, pid: u32) -> AccessibilityConnection {
        match self.get_connection(app_name, pid) {
            Some(conn) => conn,
            None => {
                let mut conn = AccessibilityConnection::new(app_name, pid);
                conn.use_count = 1;
                self.insert(conn)
            }
        }
    }

    pub fn remove(&self, app_name: &str) -> bool {
        self.store().remove(&app_name.to_string()).is_some()
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

    pub fn apps(&self) -> Vec<String> {
        self.store().keys()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let store = self.store();
        self.stats.snapshot(store.len(), store.capacity())
    }
}
