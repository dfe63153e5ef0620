//! 后台任务调度：缓存过期清扫、无障碍健康巡检
//!
//! 每个任务都是挂在共享 CancellationToken 上的 tokio 任务，不阻塞指令执行；
//! `shutdown` 取消 token 并等待全部任务退出。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::AccessibilityCache;
use crate::collaborators::AccessibilityLocator;
use crate::core::CollaboratorError;
use crate::execution::{call_with_deadline, FastPathExecutor};

/// 后台任务类型
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TaskKind {
    CacheSweep,
    HealthCheck,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::CacheSweep => "cache_sweep",
            TaskKind::HealthCheck => "health_check",
        }
    }
}

/// 后台任务运行计数
#[derive(Debug, Default)]
pub struct SchedulerCounters {
    pub sweeps: AtomicU64,
    pub health_checks: AtomicU64,
}

/// 后台任务调度器
pub struct TaskScheduler {
    token: CancellationToken,
    tasks: Vec<(TaskKind, JoinHandle<()>)>,
    counters: Arc<SchedulerCounters>,
}

impl TaskScheduler {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            tasks: Vec::new(),
            counters: Arc::new(SchedulerCounters::default()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn counters(&self) -> Arc<SchedulerCounters> {
        self.counters.clone()
    }

    pub fn running(&self) -> Vec<TaskKind> {
        self.tasks
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(k, _)| *k)
            .collect()
    }

    /// 定时清除两个缓存中的过期条目，与请求量无关
    pub fn spawn_cache_sweep(&mut self, cache: Arc<AccessibilityCache>, every: Duration) {
        let token = self.token.clone();
        let counters = self.counters.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // 第一次 tick 立即返回
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let report = cache.sweep_expired();
                        counters.sweeps.fetch_add(1, Ordering::Relaxed);
                        if report.total() > 0 {
                            tracing::debug!(
                                connections = report.connections,
                                elements = report.elements,
                                "cache sweep purged expired entries"
                            );
                        }
                    }
                }
            }
            tracing::debug!("cache sweep stopped");
        });
        self.tasks.push((TaskKind::CacheSweep, handle));
    }

    /// 定时探测无障碍 API：权限丢失时关闭快速路径，恢复后重新打开
    pub fn spawn_health_check(
        &mut self,
        locator: Arc<dyn AccessibilityLocator>,
        fast_path: Arc<FastPathExecutor>,
        every: Duration,
        deadline: Duration,
    ) {
        let token = self.token.clone();
        let counters = self.counters.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let probe = call_with_deadline(
                            TaskKind::HealthCheck.as_str(),
                            deadline,
                            &token,
                            locator.health_check(),
                        )
                        .await;
                        counters.health_checks.fetch_add(1, Ordering::Relaxed);
                        apply_health(&probe, &fast_path);
                    }
                }
            }
            tracing::debug!("health check stopped");
        });
        self.tasks.push((TaskKind::HealthCheck, handle));
    }

    /// 取消并等待全部后台任务退出
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        let tasks: Vec<_> = self.tasks.drain(..).collect();
        let kinds: Vec<_> = tasks.iter().map(|(k, _)| *k).collect();
        let results = join_all(tasks.into_iter().map(|(_, h)| h)).await;
        for (kind, result) in kinds.into_iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(task = kind.as_str(), error = %e, "background task ended abnormally");
            }
        }
        tracing::info!("background tasks stopped");
    }
}

fn apply_health(probe: &Result<(), CollaboratorError>, fast_path: &FastPathExecutor) {
    match probe {
        Ok(()) => {
            if !fast_path.is_healthy() {
                tracing::info!("accessibility healthy again");
            }
            fast_path.set_health_ok(true);
        }
        Err(CollaboratorError::PermissionDenied(msg)) => {
            tracing::warn!(error = %msg, "accessibility permission lost, disabling fast path");
            fast_path.set_health_ok(false);
        }
        Err(CollaboratorError::Cancelled) => {}
        Err(e) => tracing::warn!(error = %e, "accessibility health check failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MockAutomation, MockLocator};
    use crate::config::{CacheSection, FastPathSection, TimeoutsSection};
    use crate::core::RecoveryEngine;

    fn fast_path(locator: Arc<MockLocator>, cache: Arc<AccessibilityCache>) -> Arc<FastPathExecutor> {
        Arc::new(FastPathExecutor::new(
            cache,
            locator,
            Arc::new(MockAutomation::new()),
            Arc::new(RecoveryEngine::default()),
            &FastPathSection::default(),
            TimeoutsSection::default(),
            Duration::from_secs(30),
        ))
    }

    #[tokio::test]
    async fn test_health_check_toggles_fast_path() {
        let locator = Arc::new(MockLocator::default());
        locator.set_health(Err(CollaboratorError::PermissionDenied("AX".into())));
        let cache = Arc::new(AccessibilityCache::from_config(&CacheSection::default()));
        let fast = fast_path(locator.clone(), cache);

        let mut scheduler = TaskScheduler::new(CancellationToken::new());
        scheduler.spawn_health_check(
            locator.clone(),
            fast.clone(),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fast.is_enabled());

        locator.set_health(Ok(()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fast.is_enabled());

        let counters = scheduler.counters();
        scheduler.shutdown().await;
        assert!(scheduler.running().is_empty());
        assert!(counters.health_checks.load(Ordering::Relaxed) >= 2);
    }

    #[tokio::test]
    async fn test_sweep_runs_while_idle() {
        let cfg = CacheSection {
            connection_ttl_secs: 0,
            ..CacheSection::default()
        };
        let cache = Arc::new(AccessibilityCache::from_config(&cfg));
        cache.connections.put_connection("Finder", 7);

        let mut scheduler = TaskScheduler::new(CancellationToken::new());
        scheduler.spawn_cache_sweep(cache.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.connections.is_empty());
        assert_eq!(cache.stats().connections.expirations, 1);
        scheduler.shutdown().await;
        assert!(scheduler.counters().sweeps.load(Ordering::Relaxed) >= 1);
    }

    #[tokio::test]
    async fn test_healthy_probe_keeps_operator_disable() {
        let locator = Arc::new(MockLocator::default());
        let cache = Arc::new(AccessibilityCache::from_config(&CacheSection::default()));
        let fast = fast_path(locator.clone(), cache);
        fast.set_enabled(false);

        let mut scheduler = TaskScheduler::new(CancellationToken::new());
        scheduler.spawn_health_check(
            locator.clone(),
            fast.clone(),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(fast.is_healthy());
        assert!(!fast.is_enabled());
        scheduler.shutdown().await;

        fast.set_enabled(true);
        assert!(fast.is_enabled());
    }

    #[test]
    fn test_permission_loss_does_not_touch_operator_switch() {
        let locator = Arc::new(MockLocator::default());
        let cache = Arc::new(AccessibilityCache::from_config(&CacheSection::default()));
        let fast = fast_path(locator, cache);

        apply_health(&Err(CollaboratorError::PermissionDenied("AX".into())), &fast);
        assert!(!fast.is_enabled());
        // 操作员打开也无法绕过权限丢失
        fast.set_enabled(true);
        assert!(!fast.is_enabled());

        apply_health(&Ok(()), &fast);
        assert!(fast.is_enabled());
    }
}
