//! 性能监控：按操作的滚动统计、阈值告警、路径效果汇总与优化建议
//!
//! `track` 返回一个计时器，`finish(success)` 结束计时；未调用 finish 就被丢弃视为失败。
//! 告警通过注册的回调分发，回调 panic 只记日志，不影响指令执行。

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::AccessibilityCacheStats;
use crate::config::MonitorSection;
use crate::execution::ExecutionPath;

/// 指标附带的元数据（app_name、fallback_triggered ...）
pub type Metadata = HashMap<String, serde_json::Value>;

/// 元数据中标记本次是否发生回退的键
pub const FALLBACK_TRIGGERED: &str = "fallback_triggered";

/// 统计样本不足时不给建议
const MIN_SAMPLES: u64 = 10;

/// 单次操作的测量结果
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetric {
    pub operation: String,
    pub path: Option<ExecutionPath>,
    pub duration_ms: u64,
    pub success: bool,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceMetric {
    fn fallback_triggered(&self) -> bool {
        self.metadata
            .get(FALLBACK_TRIGGERED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceAlert {
    pub level: AlertLevel,
    pub operation: String,
    pub duration_ms: u64,
    pub threshold_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub type AlertCallback = Arc<dyn Fn(&PerformanceAlert) + Send + Sync>;

/// 单个操作的滚动统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStats {
    pub operation: String,
    pub count: u64,
    pub success_rate: f64,
    pub avg_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
}

/// 快速 / 慢速路径的效果汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PathSummary {
    /// 尝试过快速路径的指令数（含回退的）
    pub fast_attempts: u64,
    pub fast_successes: u64,
    pub fast_success_rate: f64,
    pub fallbacks: u64,
    pub fallback_rate: f64,
    pub slow_runs: u64,
    pub slow_success_rate: f64,
    pub informational: u64,
    pub avg_fast_ms: f64,
    pub avg_slow_ms: f64,
}

#[derive(Debug, Default)]
struct OperationWindow {
    count: u64,
    successes: u64,
    durations: VecDeque<Duration>,
}

impl OperationWindow {
    fn push(&mut self, duration: Duration, success: bool, window: usize) {
        self.count += 1;
        if success {
            self.successes += 1;
        }
        self.durations.push_back(duration);
        while self.durations.len() > window {
            self.durations.pop_front();
        }
    }

    fn stats(&self, operation: &str) -> OperationStats {
        let mut sorted: Vec<u64> = self
            .durations
            .iter()
            .map(|d| d.as_millis() as u64)
            .collect();
        sorted.sort_unstable();
        let avg_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };
        OperationStats {
            operation: operation.to_string(),
            count: self.count,
            success_rate: ratio(self.successes, self.count),
            avg_ms,
            p50_ms: percentile(&sorted, 50),
            p95_ms: percentile(&sorted, 95),
            max_ms: sorted.last().copied().unwrap_or(0),
        }
    }
}

#[derive(Debug, Default)]
struct PathCounters {
    fast_successes: u64,
    fast_total_ms: u64,
    fallbacks: u64,
    slow_runs: u64,
    slow_successes: u64,
    slow_total_ms: u64,
    informational: u64,
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// 最近邻取分位数；sorted 需已升序
fn percentile(sorted: &[u64], pct: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct PerformanceMonitor {
    warning: Duration,
    critical: Duration,
    window_size: usize,
    recent_limit: usize,
    operations: Mutex<HashMap<String, OperationWindow>>,
    recent: Mutex<VecDeque<PerformanceMetric>>,
    paths: Mutex<PathCounters>,
    callbacks: RwLock<Vec<AlertCallback>>,
    alerts_raised: AtomicU64,
}

impl PerformanceMonitor {
    pub fn new(cfg: &MonitorSection) -> Self {
        Self {
            warning: Duration::from_millis(cfg.warning_threshold_ms),
            critical: Duration::from_millis(cfg.critical_threshold_ms),
            window_size: cfg.window_size.max(1),
            recent_limit: cfg.recent_results,
            operations: Mutex::new(HashMap::new()),
            recent: Mutex::new(VecDeque::with_capacity(cfg.recent_results)),
            paths: Mutex::new(PathCounters::default()),
            callbacks: RwLock::new(Vec::new()),
            alerts_raised: AtomicU64::new(0),
        }
    }

    /// 注册告警回调
    pub fn on_alert(&self, callback: AlertCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    pub fn track(&self, operation: impl Into<String>, metadata: Metadata) -> OperationTracker<'_> {
        OperationTracker {
            monitor: self,
            operation: operation.into(),
            metadata,
            path: None,
            started: Instant::now(),
            finished: false,
        }
    }

    /// 直接记录一次已测量的操作，并做阈值检查
    pub fn record(
        &self,
        operation: &str,
        path: Option<ExecutionPath>,
        duration: Duration,
        success: bool,
        metadata: Metadata,
    ) {
        self.push_metric(operation, path, duration, success, metadata);
        self.check_thresholds(operation, duration);
    }

    /// 记录顶层操作内部的一个阶段（fast_path / slow_path）：只计入统计，不告警，
    /// 同一条指令的耗时只由顶层操作告警一次
    pub fn record_stage(&self, operation: &str, duration: Duration, success: bool) {
        self.push_metric(operation, None, duration, success, Metadata::new());
    }

    fn push_metric(
        &self,
        operation: &str,
        path: Option<ExecutionPath>,
        duration: Duration,
        success: bool,
        metadata: Metadata,
    ) {
        let metric = PerformanceMetric {
            operation: operation.to_string(),
            path,
            duration_ms: duration.as_millis() as u64,
            success,
            metadata,
            timestamp: Utc::now(),
        };
        tracing::debug!(
            operation,
            path = path.map(|p| p.as_str()),
            duration_ms = metric.duration_ms,
            success,
            "metric"
        );

        lock(&self.operations)
            .entry(operation.to_string())
            .or_default()
            .push(duration, success, self.window_size);

        if let Some(path) = path {
            self.record_path(path, &metric);
        }

        {
            let mut recent = lock(&self.recent);
            recent.push_back(metric);
            while recent.len() > self.recent_limit {
                recent.pop_front();
            }
        }
    }

    fn record_path(&self, path: ExecutionPath, metric: &PerformanceMetric) {
        let mut paths = lock(&self.paths);
        match path {
            ExecutionPath::Fast => {
                if metric.success {
                    paths.fast_successes += 1;
                    paths.fast_total_ms += metric.duration_ms;
                }
            }
            ExecutionPath::Slow => {
                paths.slow_runs += 1;
                paths.slow_total_ms += metric.duration_ms;
                if metric.success {
                    paths.slow_successes += 1;
                }
                if metric.fallback_triggered() {
                    paths.fallbacks += 1;
                }
            }
            ExecutionPath::Informational => paths.informational += 1,
        }
    }

    fn check_thresholds(&self, operation: &str, duration: Duration) {
        let (level, threshold) = if duration > self.critical {
            (AlertLevel::Critical, self.critical)
        } else if duration > self.warning {
            (AlertLevel::Warning, self.warning)
        } else {
            return;
        };

        let alert = PerformanceAlert {
            level,
            operation: operation.to_string(),
            duration_ms: duration.as_millis() as u64,
            threshold_ms: threshold.as_millis() as u64,
            timestamp: Utc::now(),
        };
        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
        match level {
            AlertLevel::Critical => tracing::error!(
                operation,
                duration_ms = alert.duration_ms,
                threshold_ms = alert.threshold_ms,
                "critical latency"
            ),
            AlertLevel::Warning => tracing::warn!(
                operation,
                duration_ms = alert.duration_ms,
                threshold_ms = alert.threshold_ms,
                "slow operation"
            ),
        }

        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&alert))).is_err() {
                tracing::warn!(operation, "alert callback panicked");
            }
        }
    }

    pub fn alerts_raised(&self) -> u64 {
        self.alerts_raised.load(Ordering::Relaxed)
    }

    pub fn stats(&self, operation: &str) -> Option<OperationStats> {
        lock(&self.operations)
            .get(operation)
            .map(|w| w.stats(operation))
    }

    /// 所有操作的统计，按名称排序
    pub fn all_stats(&self) -> Vec<OperationStats> {
        let mut all: Vec<_> = lock(&self.operations)
            .iter()
            .map(|(name, w)| w.stats(name))
            .collect();
        all.sort_by(|a, b| a.operation.cmp(&b.operation));
        all
    }

    /// 最近 n 条结果（新的在后）
    pub fn recent_results(&self, n: usize) -> Vec<PerformanceMetric> {
        let recent = lock(&self.recent);
        recent
            .iter()
            .skip(recent.len().saturating_sub(n))
            .cloned()
            .collect()
    }

    pub fn path_summary(&self) -> PathSummary {
        let p = lock(&self.paths);
        let fast_attempts = p.fast_successes + p.fallbacks;
        PathSummary {
            fast_attempts,
            fast_successes: p.fast_successes,
            fast_success_rate: ratio(p.fast_successes, fast_attempts),
            fallbacks: p.fallbacks,
            fallback_rate: ratio(p.fallbacks, fast_attempts),
            slow_runs: p.slow_runs,
            slow_success_rate: ratio(p.slow_successes, p.slow_runs),
            informational: p.informational,
            avg_fast_ms: if p.fast_successes == 0 {
                0.0
            } else {
                p.fast_total_ms as f64 / p.fast_successes as f64
            },
            avg_slow_ms: if p.slow_runs == 0 {
                0.0
            } else {
                p.slow_total_ms as f64 / p.slow_runs as f64
            },
        }
    }

    /// 根据路径汇总、缓存统计与各操作延迟给出优化建议
    pub fn recommendations(&self, cache: &AccessibilityCacheStats) -> Vec<String> {
        let mut out = Vec::new();
        let summary = self.path_summary();

        if summary.fast_attempts >= MIN_SAMPLES && summary.fallback_rate > 0.3 {
            out.push(format!(
                "{:.0}% of GUI commands fall back to the slow path; check accessibility permissions and locator coverage",
                summary.fallback_rate * 100.0
            ));
        }
        if summary.slow_runs >= MIN_SAMPLES && summary.slow_success_rate < 0.8 {
            out.push(format!(
                "slow path succeeds for only {:.0}% of commands; review vision and reasoning error history",
                summary.slow_success_rate * 100.0
            ));
        }
        if summary.fast_successes > 0
            && summary.slow_runs > 0
            && summary.avg_slow_ms > 0.0
            && summary.avg_fast_ms * 5.0 < summary.avg_slow_ms
            && summary.fallback_rate > 0.1
        {
            out.push(format!(
                "fast path is {:.0}x faster than the slow path; widening fast-path routing would cut latency",
                summary.avg_slow_ms / summary.avg_fast_ms.max(1.0)
            ));
        }

        let elements = &cache.elements;
        if elements.hits + elements.misses >= MIN_SAMPLES && elements.hit_rate < 0.5 {
            out.push(format!(
                "element cache hit rate is {:.0}%; consider a longer element TTL",
                elements.hit_rate * 100.0
            ));
        }
        if elements.capacity > 0 && elements.evictions as usize >= elements.capacity {
            out.push(format!(
                "element cache evicted {} entries at capacity {}; consider raising element_capacity",
                elements.evictions, elements.capacity
            ));
        }
        let connections = &cache.connections;
        if connections.capacity > 0 && connections.evictions as usize >= connections.capacity {
            out.push(format!(
                "connection pool evicted {} connections at capacity {}; consider raising connection_capacity",
                connections.evictions, connections.capacity
            ));
        }

        let warning_ms = self.warning.as_millis() as u64;
        for stats in self.all_stats() {
            if stats.count >= MIN_SAMPLES && stats.p95_ms > warning_ms {
                out.push(format!(
                    "{} p95 latency is {}ms (warning threshold {}ms)",
                    stats.operation, stats.p95_ms, warning_ms
                ));
            }
        }
        out
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(&MonitorSection::default())
    }
}

/// 进行中的一次测量；丢弃而未 finish 记为失败
pub struct OperationTracker<'a> {
    monitor: &'a PerformanceMonitor,
    operation: String,
    metadata: Metadata,
    path: Option<ExecutionPath>,
    started: Instant,
    finished: bool,
}

impl OperationTracker<'_> {
    pub fn set_path(&mut self, path: ExecutionPath) {
        self.path = Some(path);
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(mut self, success: bool) {
        self.complete(success);
    }

    fn complete(&mut self, success: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.monitor.record(
            &self.operation,
            self.path,
            self.started.elapsed(),
            success,
            std::mem::take(&mut self.metadata),
        );
    }
}

impl Drop for OperationTracker<'_> {
    fn drop(&mut self) {
        self.complete(false);
    }
}
