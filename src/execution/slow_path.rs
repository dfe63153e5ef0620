//! 慢速路径：截屏视觉分析 → 推理规划 → 按计划逐个执行动作
//!
//! 每个阶段通过 RecoveryEngine 按错误类别退避重试；推理始终收到原始指令文本。
//! 信息类指令（提问 / 寒暄）只生成回答，不执行任何界面动作。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::collaborators::{
    ActionPlan, ActionSpec, AutomationExecutor, ReasoningPlanner, ScreenAnalysis, VisionAnalyzer,
};
use crate::config::TimeoutsSection;
use crate::core::router::Command;
use crate::core::state::{ExecutionContext, ExecutionStatus};
use crate::core::{CollaboratorError, ErrorInfo, RecoveryEngine};
use crate::execution::call_with_deadline;

/// 慢速路径运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowPathMode {
    /// 规划并执行动作
    Full,
    /// 只回答，不执行动作
    Informational,
}

#[derive(Debug, Clone)]
pub struct SlowPathResult {
    pub success: bool,
    pub mode: SlowPathMode,
    pub actions_executed: usize,
    pub actions_failed: usize,
    /// 计划附带的回答（或屏幕描述）
    pub response: Option<String>,
    pub plan_confidence: Option<f32>,
    pub error: Option<ErrorInfo>,
    pub execution_time: Duration,
}

impl SlowPathResult {
    fn new(mode: SlowPathMode) -> Self {
        Self {
            success: false,
            mode,
            actions_executed: 0,
            actions_failed: 0,
            response: None,
            plan_confidence: None,
            error: None,
            execution_time: Duration::ZERO,
        }
    }

    /// 未进入流水线就失败（如执行 ID 不匹配）
    pub fn rejected(mode: SlowPathMode, error: ErrorInfo) -> Self {
        Self {
            error: Some(error),
            ..Self::new(mode)
        }
    }
}

pub struct SlowPathExecutor {
    vision: Arc<dyn VisionAnalyzer>,
    reasoning: Arc<dyn ReasoningPlanner>,
    automation: Arc<dyn AutomationExecutor>,
    recovery: Arc<RecoveryEngine>,
    timeouts: TimeoutsSection,
}

impl SlowPathExecutor {
    pub fn new(
        vision: Arc<dyn VisionAnalyzer>,
        reasoning: Arc<dyn ReasoningPlanner>,
        automation: Arc<dyn AutomationExecutor>,
        recovery: Arc<RecoveryEngine>,
        timeouts: TimeoutsSection,
    ) -> Self {
        Self {
            vision,
            reasoning,
            automation,
            recovery,
            timeouts,
        }
    }

    pub fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }

    async fn analyze_screen(&self, cancel: &CancellationToken) -> Result<ScreenAnalysis, ErrorInfo> {
        let vision = &self.vision;
        let deadline = self.timeouts.vision();
        self.recovery
            .retry("vision", cancel, || {
                call_with_deadline("vision", deadline, cancel, vision.describe_screen())
            })
            .await
    }

    async fn plan(
        &self,
        command: &str,
        screen: &ScreenAnalysis,
        cancel: &CancellationToken,
    ) -> Result<ActionPlan, ErrorInfo> {
        let reasoning = &self.reasoning;
        let deadline = self.timeouts.reasoning();
        let plan = self
            .recovery
            .retry("reasoning", cancel, || {
                call_with_deadline("reasoning", deadline, cancel, reasoning.get_action_plan(command, screen))
            })
            .await?;

        plan.validate().map_err(|e| {
            self.recovery
                .error_info(&CollaboratorError::InvalidAction(e.to_string()), "plan_validation")
        })?;
        Ok(plan)
    }

    async fn execute(&self, action: &ActionSpec, cancel: &CancellationToken) -> Result<(), ErrorInfo> {
        let automation = &self.automation;
        let deadline = self.timeouts.automation();
        let stage = format!("action_{}", action.kind());
        self.recovery
            .retry(&stage, cancel, || {
                call_with_deadline(&stage, deadline, cancel, automation.execute_action(action))
            })
            .await
    }

    fn fail(ctx: &mut ExecutionContext, step: &str, mut result: SlowPathResult, error: ErrorInfo, started: Instant) -> SlowPathResult {
        tracing::warn!(
            execution_id = %ctx.execution_id(),
            step,
            category = %error.category,
            error = %error.message,
            "slow path failed"
        );
        ctx.record_failure(step, error.clone());
        ctx.set_status(ExecutionStatus::Failed);
        result.success = false;
        result.error = Some(error);
        result.execution_time = started.elapsed();
        result
    }

    /// 运行慢速路径；每个上下文最多运行一次
    pub async fn run_slow_path(
        &self,
        cmd: &Command,
        ctx: &mut ExecutionContext,
        mode: SlowPathMode,
        cancel: &CancellationToken,
    ) -> SlowPathResult {
        let started = Instant::now();
        let mut result = SlowPathResult::new(mode);

        if !ctx.begin_slow_path() {
            tracing::warn!(execution_id = %ctx.execution_id(), "slow path already attempted");
            let error = self.recovery.error_info(
                &CollaboratorError::Other("slow path already attempted".to_string()),
                "slow_path",
            );
            result.error = Some(error);
            return result;
        }

        let screen = match self.analyze_screen(cancel).await {
            Ok(screen) => screen,
            Err(e) => return Self::fail(ctx, "screen_analysis", result, e, started),
        };
        ctx.record_success("screen_analysis", Some(screen.description.clone()));

        let plan = match self.plan(cmd.raw(), &screen, cancel).await {
            Ok(plan) => plan,
            Err(e) => return Self::fail(ctx, "action_plan", result, e, started),
        };
        ctx.record_success(
            "action_plan",
            Some(format!(
                "{} actions, confidence {:.2}",
                plan.actions.len(),
                plan.confidence
            )),
        );
        result.plan_confidence = Some(plan.confidence);

        if mode == SlowPathMode::Informational {
            result.response = plan
                .response
                .clone()
                .or_else(|| Some(screen.description.clone()));
            ctx.record_success("answer_ready", None);
            result.success = true;
            result.execution_time = started.elapsed();
            return result;
        }
        result.response = plan.response.clone();

        for (index, action) in plan.actions.iter().enumerate() {
            let step = format!("action_{}_{}", index + 1, action.kind());
            match self.execute(action, cancel).await {
                Ok(()) => {
                    result.actions_executed += 1;
                    ctx.record_success(step, None);
                }
                Err(e) if cancel.is_cancelled() || plan.stop_on_error => {
                    result.actions_failed += 1;
                    return Self::fail(ctx, &step, result, e, started);
                }
                Err(e) => {
                    result.actions_failed += 1;
                    tracing::warn!(step = %step, error = %e.message, "action failed, continuing plan");
                    ctx.record_failure(step, e);
                }
            }
            if matches!(action, ActionSpec::Finish { .. }) {
                break;
            }
        }

        result.success = true;
        result.execution_time = started.elapsed();
        tracing::info!(
            execution_id = %ctx.execution_id(),
            executed = result.actions_executed,
            failed = result.actions_failed,
            elapsed_ms = result.execution_time.as_millis() as u64,
            "slow path completed"
        );
        result
    }
}
