//! 无障碍对象缓存：连接池 + 元素缓存
//!
//! 两个缓存各自持有独立的锁与统计，互不争用；后台清扫由 core::task_scheduler 定时调用 `sweep_expired`。

pub mod connection_pool;
pub mod element_cache;
pub mod stats;
pub mod store;

use serde::Serialize;

use crate::config::CacheSection;

pub use connection_pool::{AccessibilityConnection, ConnectionPool};
pub use element_cache::{ElementCache, ElementKey};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{CacheEntry, EvictionPolicy, TtlStore};

/// 连接池与元素缓存的组合
pub struct AccessibilityCache {
    pub connections: ConnectionPool,
    pub elements: ElementCache,
}

/// 一次清扫的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub connections: usize,
    pub elements: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.connections + self.elements
    }
}

/// 两个缓存的统计快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccessibilityCacheStats {
    pub connections: CacheStatsSnapshot,
    pub elements: CacheStatsSnapshot,
}

impl AccessibilityCache {
    pub fn new(connections: ConnectionPool, elements: ElementCache) -> Self {
        Self { connections, elements }
    }

    pub fn from_config(cfg: &CacheSection) -> Self {
        Self {
            connections: ConnectionPool::new(
                cfg.connection_capacity,
                cfg.connection_ttl(),
                cfg.connection_eviction,
            ),
            elements: ElementCache::new(cfg.element_capacity, cfg.element_ttl(), cfg.element_eviction),
        }
    }

    /// 清除两个缓存中所有过期条目
    pub fn sweep_expired(&self) -> SweepReport {
        SweepReport {
            connections: self.connections.purge_expired(),
            elements: self.elements.purge_expired(),
        }
    }

    pub fn stats(&self) -> AccessibilityCacheStats {
        AccessibilityCacheStats {
            connections: self.connections.stats(),
            elements: self.elements.stats(),
        }
    }
}
