//! 混合执行编排器：主控流程
//!
//! 校验 → 路由 → 快速路径 → （失败时）回退 → 慢速路径。
//! 协作者错误在这里之前全部转为 ErrorInfo，调用方只会在指令未被受理（忙 / 非法）时拿到 Err。
//! 反馈（音效 / 播报）异步发出，不影响指令结果。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cache::{AccessibilityCache, AccessibilityCacheStats};
use crate::collaborators::{context_app_name, AccessibilityLocator, AppContext, FeedbackSink};
use crate::config::AppConfig;
use crate::core::router::{Command, CommandRouter, CommandType};
use crate::core::state::{ExecutionContext, ExecutionStatus, ExecutionStep};
use crate::core::{
    CollaboratorError, ErrorCategory, ErrorInfo, PilotError, RecoveryEngine, SessionSupervisor,
    TaskScheduler,
};
use crate::execution::{
    call_with_deadline, ExecutionPath, FallbackCoordinator, FastPathExecutor, SlowPathExecutor,
    SlowPathMode, SlowPathResult,
};
use crate::monitor::{Metadata, PathSummary, PerformanceMonitor, FALLBACK_TRIGGERED};

/// 成功时播放的音效名
pub const SUCCESS_SOUND: &str = "success";

/// 一条指令的执行报告
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub command: String,
    pub command_type: CommandType,
    pub confidence: f32,
    pub success: bool,
    pub status: ExecutionStatus,
    pub path: Option<ExecutionPath>,
    pub fallback_triggered: bool,
    /// 快速路径失败原因（element_not_found / permission_error ...）
    pub fast_path_failure: Option<String>,
    pub response: Option<String>,
    pub actions_executed: usize,
    pub error: Option<ErrorInfo>,
    pub user_message: Option<String>,
    pub duration_ms: u64,
    pub steps: Vec<ExecutionStep>,
}

/// 健康状况快照
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub fast_path_enabled: bool,
    /// 最近一次巡检是否正常（与操作员开关分开）
    pub fast_path_healthy: bool,
    pub busy: bool,
    pub cache: AccessibilityCacheStats,
    pub paths: PathSummary,
    pub recent_errors: Vec<ErrorInfo>,
    pub error_counts: Vec<(ErrorCategory, u64)>,
}

/// 各路径的执行结果汇总
struct Outcome {
    path: Option<ExecutionPath>,
    success: bool,
    fallback_triggered: bool,
    fast_path_failure: Option<String>,
    response: Option<String>,
    actions_executed: usize,
    error: Option<ErrorInfo>,
}

impl Outcome {
    fn from_slow(path: ExecutionPath, result: SlowPathResult) -> Self {
        Self {
            path: Some(path),
            success: result.success,
            fallback_triggered: false,
            fast_path_failure: None,
            response: result.response,
            actions_executed: result.actions_executed,
            error: result.error,
        }
    }
}

pub struct HybridOrchestrator {
    config: AppConfig,
    router: CommandRouter,
    cache: Arc<AccessibilityCache>,
    recovery: Arc<RecoveryEngine>,
    locator: Arc<dyn AccessibilityLocator>,
    fast_path: Arc<FastPathExecutor>,
    slow_path: Arc<SlowPathExecutor>,
    fallback: FallbackCoordinator,
    monitor: Arc<PerformanceMonitor>,
    feedback: Arc<dyn FeedbackSink>,
    supervisor: SessionSupervisor,
    scheduler: Mutex<TaskScheduler>,
}

impl HybridOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: AppConfig,
        cache: Arc<AccessibilityCache>,
        recovery: Arc<RecoveryEngine>,
        locator: Arc<dyn AccessibilityLocator>,
        fast_path: Arc<FastPathExecutor>,
        slow_path: Arc<SlowPathExecutor>,
        monitor: Arc<PerformanceMonitor>,
        feedback: Arc<dyn FeedbackSink>,
        root: CancellationToken,
    ) -> Self {
        Self {
            router: CommandRouter::new(&config.router),
            fallback: FallbackCoordinator::new(slow_path.clone()),
            supervisor: SessionSupervisor::with_root(root.clone()),
            scheduler: Mutex::new(TaskScheduler::new(root.child_token())),
            config,
            cache,
            recovery,
            locator,
            fast_path,
            slow_path,
            monitor,
            feedback,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }

    pub fn cache(&self) -> &Arc<AccessibilityCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> AccessibilityCacheStats {
        self.cache.stats()
    }

    pub fn fallbacks_triggered(&self) -> u64 {
        self.fallback.fallbacks_triggered()
    }

    pub fn is_fast_path_enabled(&self) -> bool {
        self.fast_path.is_enabled()
    }

    pub fn set_fast_path_enabled(&self, enabled: bool) {
        self.fast_path.set_enabled(enabled);
    }

    pub fn is_busy(&self) -> bool {
        self.supervisor.is_busy()
    }

    /// 取消正在执行的指令
    pub fn cancel(&self) -> bool {
        self.supervisor.cancel_current()
    }

    pub fn recommendations(&self) -> Vec<String> {
        self.monitor.recommendations(&self.cache.stats())
    }

    pub fn health(&self) -> HealthReport {
        let mut error_counts: Vec<_> = self.recovery.category_counts().into_iter().collect();
        error_counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.as_str().cmp(b.0.as_str())));
        HealthReport {
            fast_path_enabled: self.fast_path.is_enabled(),
            fast_path_healthy: self.fast_path.is_healthy(),
            busy: self.supervisor.is_busy(),
            cache: self.cache.stats(),
            paths: self.monitor.path_summary(),
            recent_errors: self.recovery.recent_errors(10),
            error_counts,
        }
    }

    /// 启动后台缓存清扫与健康巡检
    pub async fn start_background(&self) {
        let mut scheduler = self.scheduler.lock().await;
        scheduler.spawn_cache_sweep(self.cache.clone(), self.config.cache.sweep_interval());
        scheduler.spawn_health_check(
            self.locator.clone(),
            self.fast_path.clone(),
            self.config.health.interval(),
            self.config.timeouts.accessibility(),
        );
        tracing::info!(
            sweep_secs = self.config.cache.sweep_interval().as_secs(),
            health_secs = self.config.health.interval().as_secs(),
            "background tasks started"
        );
    }

    /// 取消当前指令并等待后台任务退出
    pub async fn shutdown(&self) {
        self.supervisor.cancel_current();
        self.scheduler.lock().await.shutdown().await;
    }

    /// 执行一条指令
    pub async fn execute_command(
        &self,
        raw: &str,
        app_context: AppContext,
    ) -> Result<ExecutionReport, PilotError> {
        let cmd = self.router.classify(raw).map_err(|e| {
            tracing::warn!(error = %e, "command rejected");
            PilotError::InvalidCommand(e)
        })?;

        let mut ctx = ExecutionContext::new(cmd.clone(), app_context);
        let guard = self.supervisor.begin(ctx.execution_id())?;
        let cancel = guard.token().clone();

        ctx.set_status(ExecutionStatus::Running);
        ctx.record_success(
            "validated",
            Some(format!("{} ({:.2})", cmd.command_type().as_str(), cmd.confidence())),
        );
        tracing::info!(
            execution_id = %ctx.execution_id(),
            command_type = cmd.command_type().as_str(),
            confidence = cmd.confidence(),
            "command accepted"
        );

        let mut metadata = Metadata::new();
        metadata.insert("app_name".into(), context_app_name(ctx.app_context()).into());
        metadata.insert("command_type".into(), cmd.command_type().as_str().into());
        let mut tracker = self.monitor.track("execute_command", metadata);

        let outcome = if self.router.is_gui_command(&cmd) {
            self.run_gui(&cmd, &mut ctx, &cancel).await
        } else {
            let (path, mode) = if cmd.command_type().is_informational() {
                (ExecutionPath::Informational, SlowPathMode::Informational)
            } else {
                (ExecutionPath::Slow, SlowPathMode::Full)
            };
            let result = self.slow_path.run_slow_path(&cmd, &mut ctx, mode, &cancel).await;
            self.monitor
                .record_stage("slow_path", result.execution_time, result.success);
            Outcome::from_slow(path, result)
        };

        if outcome.success {
            ctx.set_status(ExecutionStatus::Completed);
        } else {
            ctx.set_status(ExecutionStatus::Failed);
        }

        if let Some(path) = outcome.path {
            tracker.set_path(path);
        }
        tracker.insert(FALLBACK_TRIGGERED, outcome.fallback_triggered);
        tracker.finish(outcome.success);

        let user_message = outcome.error.as_ref().map(|e| e.user_message().to_string());
        self.send_feedback(&outcome, user_message.clone());

        let report = ExecutionReport {
            execution_id: ctx.execution_id().to_string(),
            command: cmd.raw().to_string(),
            command_type: cmd.command_type(),
            confidence: cmd.confidence(),
            success: outcome.success,
            status: ctx.status(),
            path: outcome.path,
            fallback_triggered: outcome.fallback_triggered,
            fast_path_failure: outcome.fast_path_failure,
            response: outcome.response,
            actions_executed: outcome.actions_executed,
            error: outcome.error,
            user_message,
            duration_ms: ctx.elapsed().as_millis() as u64,
            steps: ctx.steps().to_vec(),
        };
        tracing::info!(
            execution_id = %report.execution_id,
            success = report.success,
            path = report.path.map(|p| p.as_str()),
            fallback = report.fallback_triggered,
            duration_ms = report.duration_ms,
            "command finished"
        );
        drop(guard);
        Ok(report)
    }

    /// GUI 指令：快速路径，失败时回退
    async fn run_gui(
        &self,
        cmd: &Command,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Outcome {
        let fast = self.fast_path.attempt_fast_path(cmd, ctx, cancel).await;
        self.monitor
            .record_stage("fast_path", fast.execution_time, fast.success);

        if fast.success {
            return Outcome {
                path: Some(ExecutionPath::Fast),
                success: true,
                fallback_triggered: false,
                fast_path_failure: None,
                response: None,
                actions_executed: 1,
                error: None,
            };
        }

        let reason = fast.failure_reason();
        if cancel.is_cancelled() {
            let error = self.recovery.error_info(&CollaboratorError::Cancelled, "fast_path");
            ctx.record_failure("cancelled", error.clone());
            return Outcome {
                path: None,
                success: false,
                fallback_triggered: false,
                fast_path_failure: reason,
                response: None,
                actions_executed: 0,
                error: Some(error),
            };
        }

        let execution_id = ctx.execution_id().to_string();
        let result = self
            .fallback
            .handle_fallback(&execution_id, ctx, &fast, cmd, cancel)
            .await;
        self.monitor
            .record_stage("slow_path", result.execution_time, result.success);

        Outcome {
            fallback_triggered: true,
            fast_path_failure: reason,
            ..Outcome::from_slow(ExecutionPath::Slow, result)
        }
    }

    /// 尽力而为的反馈：不等待、失败只记日志
    fn send_feedback(&self, outcome: &Outcome, user_message: Option<String>) {
        let feedback = self.feedback.clone();
        let deadline = self.config.timeouts.feedback();
        let informational = outcome.path == Some(ExecutionPath::Informational);
        let (speech, sound) = match (outcome.success, informational) {
            (true, true) => (outcome.response.clone(), None),
            (true, false) => (None, Some(SUCCESS_SOUND)),
            (false, _) => (user_message, None),
        };

        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            if let Some(sound) = sound {
                if let Err(e) =
                    call_with_deadline("feedback_sound", deadline, &cancel, feedback.play_sound(sound)).await
                {
                    tracing::warn!(error = %e, "feedback sound failed");
                }
            }
            if let Some(message) = speech {
                if let Err(e) =
                    call_with_deadline("feedback_speech", deadline, &cancel, feedback.speak(&message)).await
                {
                    tracing::warn!(error = %e, "feedback speech failed");
                }
            }
        });
    }
}
