//! 带 TTL 与容量上限的键值存储
//!
//! 底层是 `lru::LruCache`：最近使用顺序由链表维护，淘汰时直接弹出链尾。
//! 本身不加锁，由连接池 / 元素缓存各自用独立的 Mutex 包裹。
//! 按插入时间淘汰时，查找使用 `peek_mut`，不改变链表顺序。

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Deserialize;

/// 缓存满时选择淘汰对象的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// 淘汰最久未被访问的条目
    LeastRecentlyUsed,
    /// 淘汰最早插入的条目（访问不影响顺序）
    OldestInserted,
}

/// 缓存条目：负载 + 插入时间 + TTL + 访问计数
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
}

impl<V> CacheEntry<V> {
    /// `now - inserted_at > ttl` 即视为过期
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

/// 查找结果
#[derive(Debug)]
pub enum Lookup<'a, V> {
    Hit(&'a mut CacheEntry<V>),
    /// 条目存在但已过期，已被移除
    Expired,
    Miss,
}

/// 插入结果
#[derive(Debug, PartialEq, Eq)]
pub struct InsertOutcome<K> {
    /// 因容量不足被淘汰的键
    pub evicted: Option<K>,
    /// 为腾出空间顺带清掉的过期条目数
    pub expired: usize,
    /// 是否覆盖了已有键
    pub replaced: bool,
}

pub struct TtlStore<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    capacity: usize,
    default_ttl: Duration,
    policy: EvictionPolicy,
}

impl<K: Hash + Eq, V> std::fmt::Debug for TtlStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlStore")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("default_ttl", &self.default_ttl)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone,
{
    /// capacity 为 0 时不存任何条目（LruCache 至少需要 1 个槽位）
    pub fn new(capacity: usize, default_ttl: Duration, policy: EvictionPolicy) -> Self {
        let slots = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(slots),
            capacity,
            default_ttl,
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// 查找；LRU 策略下命中会提升到链表头。过期条目在此处惰性清除
    pub fn get(&mut self, key: &K, now: Instant) -> Lookup<'_, V> {
        let expired = match self.entries.peek(key) {
            None => return Lookup::Miss,
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            self.entries.pop(key);
            return Lookup::Expired;
        }

        let entry = match self.policy {
            EvictionPolicy::LeastRecentlyUsed => self.entries.get_mut(key),
            EvictionPolicy::OldestInserted => self.entries.peek_mut(key),
        };
        match entry {
            Some(entry) => {
                entry.access_count += 1;
                Lookup::Hit(entry)
            }
            None => Lookup::Miss,
        }
    }

    /// 插入；满容量时先清过期条目，仍满则弹出链尾一个
    pub fn insert(&mut self, key: K, value: V, ttl: Option<Duration>, now: Instant) -> InsertOutcome<K> {
        let mut outcome = InsertOutcome {
            evicted: None,
            expired: 0,
            replaced: false,
        };
        if self.capacity == 0 {
            return outcome;
        }

        let entry = CacheEntry {
            value,
            inserted_at: now,
            ttl: ttl.unwrap_or(self.default_ttl),
            access_count: 0,
        };

        // 覆盖同名键：put 会把它移到链表头，插入时间随之重置
        if self.entries.contains(&key) {
            self.entries.put(key, entry);
            outcome.replaced = true;
            return outcome;
        }

        if self.entries.len() >= self.capacity {
            outcome.expired = self.purge_expired(now).len();
        }
        if self.entries.len() >= self.capacity {
            outcome.evicted = self.entries.pop_lru().map(|(k, _)| k);
        }

        self.entries.put(key, entry);
        outcome
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key).map(|e| e.value)
    }

    /// 清除全部过期条目，返回被清除的键
    pub fn purge_expired(&mut self, now: Instant) -> Vec<K> {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired
    }

    /// 按最近使用（或最近插入）到最久的顺序返回键
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
