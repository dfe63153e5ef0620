//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PILOT__*` 覆盖（双下划线表示嵌套，如 `PILOT__FAST_PATH__ENABLED=false`）。
//! 所有字段都有可用的默认值，缺少配置文件不是错误。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::EvictionPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub router: RouterSection,
    pub fast_path: FastPathSection,
    pub cache: CacheSection,
    pub timeouts: TimeoutsSection,
    pub retry: RetrySection,
    pub monitor: MonitorSection,
    pub health: HealthSection,
}

/// [router] 段：指令长度上限与 GUI 置信度阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// 归一化前的原始指令最大字符数
    pub max_command_chars: usize,
    /// GUI 指令置信度高于此值才走快速路径
    pub gui_confidence_threshold: f32,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            max_command_chars: 500,
            gui_confidence_threshold: 0.6,
        }
    }
}

/// [fast_path] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FastPathSection {
    /// 全局开关；关闭时所有 GUI 指令直接回退慢速路径
    pub enabled: bool,
}

impl Default for FastPathSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// [cache] 段：连接池与元素缓存的容量、TTL、淘汰策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub connection_capacity: usize,
    pub connection_ttl_secs: u64,
    pub connection_eviction: EvictionPolicy,
    pub element_capacity: usize,
    pub element_ttl_secs: u64,
    pub element_eviction: EvictionPolicy,
    /// 后台过期清扫间隔（秒）
    pub sweep_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            connection_capacity: 10,
            connection_ttl_secs: 300,
            connection_eviction: EvictionPolicy::LeastRecentlyUsed,
            element_capacity: 200,
            element_ttl_secs: 30,
            element_eviction: EvictionPolicy::OldestInserted,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheSection {
    pub fn connection_ttl(&self) -> Duration {
        Duration::from_secs(self.connection_ttl_secs)
    }

    pub fn element_ttl(&self) -> Duration {
        Duration::from_secs(self.element_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// [timeouts] 段：每类外部协作者调用的截止时间（毫秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    pub accessibility_ms: u64,
    pub automation_ms: u64,
    pub vision_ms: u64,
    pub reasoning_ms: u64,
    pub feedback_ms: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            accessibility_ms: 2_000,
            automation_ms: 3_000,
            vision_ms: 20_000,
            reasoning_ms: 30_000,
            feedback_ms: 5_000,
        }
    }
}

impl TimeoutsSection {
    pub fn accessibility(&self) -> Duration {
        Duration::from_millis(self.accessibility_ms)
    }

    pub fn automation(&self) -> Duration {
        Duration::from_millis(self.automation_ms)
    }

    pub fn vision(&self) -> Duration {
        Duration::from_millis(self.vision_ms)
    }

    pub fn reasoning(&self) -> Duration {
        Duration::from_millis(self.reasoning_ms)
    }

    pub fn feedback(&self) -> Duration {
        Duration::from_millis(self.feedback_ms)
    }
}

/// [retry] 段：重试次数上限与退避时间单位
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    /// 退避公式中「1 秒」对应的实际时长（毫秒），测试中可调小
    pub delay_unit_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_unit_ms: 1_000,
        }
    }
}

/// [monitor] 段：告警阈值与滚动窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub warning_threshold_ms: u64,
    pub critical_threshold_ms: u64,
    /// 每个操作保留的最近耗时样本数
    pub window_size: usize,
    /// 最近结果缓存条数
    pub recent_results: usize,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            warning_threshold_ms: 2_000,
            critical_threshold_ms: 5_000,
            window_size: 100,
            recent_results: 50,
        }
    }
}

/// [health] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub interval_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl HealthSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// 从 config 目录加载配置，环境变量 PILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PILOT")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_usable() {
        let cfg = AppConfig::default();
        assert!(cfg.fast_path.enabled);
        assert_eq!(cfg.router.max_command_chars, 500);
        assert_eq!(cfg.cache.connection_eviction, EvictionPolicy::LeastRecentlyUsed);
        assert_eq!(cfg.cache.element_eviction, EvictionPolicy::OldestInserted);
        assert!(cfg.monitor.warning_threshold_ms < cfg.monitor.critical_threshold_ms);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[fast_path]
enabled = false

[cache]
element_capacity = 3
element_eviction = "least_recently_used"

[retry]
max_retries = 5
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert!(!cfg.fast_path.enabled);
        assert_eq!(cfg.cache.element_capacity, 3);
        assert_eq!(cfg.cache.element_eviction, EvictionPolicy::LeastRecentlyUsed);
        assert_eq!(cfg.retry.max_retries, 5);
        // 未写的字段保持默认
        assert_eq!(cfg.cache.connection_capacity, 10);
        assert_eq!(cfg.timeouts.automation_ms, 3_000);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = load_config(Some(PathBuf::from("/nonexistent/pilot.toml"))).unwrap();
        assert_eq!(cfg.health.interval_secs, 30);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[retry]\nmax_retries = \"three\"").unwrap();

        assert!(load_config(Some(file.path().to_path_buf())).is_err());
    }
}
