//! 编排器构建器：由应用根统一构造缓存、恢复引擎、执行器与监控，并注入协作者
//!
//! 所有依赖只构造一次、显式传递，不使用全局单例。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::AccessibilityCache;
use crate::collaborators::Collaborators;
use crate::config::AppConfig;
use crate::core::{HybridOrchestrator, RecoveryEngine};
use crate::execution::{FastPathExecutor, SlowPathExecutor};
use crate::monitor::{AlertCallback, PerformanceMonitor};

pub struct OrchestratorBuilder {
    config: AppConfig,
    collaborators: Option<Collaborators>,
    root: Option<CancellationToken>,
    alert_callbacks: Vec<AlertCallback>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            collaborators: None,
            root: None,
            alert_callbacks: Vec::new(),
        }
    }

    /// 注入协作者；未设置时使用 Mock（dry-run）
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    /// 挂在关闭 token 之下，关闭时连带取消正在执行的指令与后台任务
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.root = Some(token);
        self
    }

    pub fn with_alert_callback(mut self, callback: AlertCallback) -> Self {
        self.alert_callbacks.push(callback);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build(self) -> HybridOrchestrator {
        let cfg = self.config;
        let collaborators = self.collaborators.unwrap_or_else(|| {
            tracing::info!("No collaborators injected, using mocks");
            Collaborators::mock()
        });
        let root = self.root.unwrap_or_default();

        let cache = Arc::new(AccessibilityCache::from_config(&cfg.cache));
        let recovery = Arc::new(RecoveryEngine::from_config(&cfg.retry));
        let monitor = Arc::new(PerformanceMonitor::new(&cfg.monitor));
        for callback in self.alert_callbacks {
            monitor.on_alert(callback);
        }

        let fast_path = Arc::new(FastPathExecutor::new(
            cache.clone(),
            collaborators.locator.clone(),
            collaborators.automation.clone(),
            recovery.clone(),
            &cfg.fast_path,
            cfg.timeouts.clone(),
            cfg.cache.element_ttl(),
        ));
        let slow_path = Arc::new(SlowPathExecutor::new(
            collaborators.vision.clone(),
            collaborators.reasoning.clone(),
            collaborators.automation.clone(),
            recovery.clone(),
            cfg.timeouts.clone(),
        ));

        tracing::info!(
            fast_path = cfg.fast_path.enabled,
            element_capacity = cfg.cache.element_capacity,
            connection_capacity = cfg.cache.connection_capacity,
            "orchestrator built"
        );

        HybridOrchestrator::new(
            cfg,
            cache,
            recovery,
            collaborators.locator,
            fast_path,
            slow_path,
            monitor,
            collaborators.feedback,
            root,
        )
    }
}
