//! 回退协调：快速路径失败后转入慢速路径
//!
//! 同一执行 ID 只回退一次，重复调用返回第一次的结果；慢速路径总是拿到原始指令。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::router::Command;
use crate::core::state::{ExecutionContext, StepOutcome};
use crate::core::{ErrorCategory, ErrorInfo, RecoveryEngine};
use crate::execution::{FastPathResult, SlowPathExecutor, SlowPathMode, SlowPathResult};

pub struct FallbackCoordinator {
    slow_path: Arc<SlowPathExecutor>,
    triggered: AtomicU64,
}

impl FallbackCoordinator {
    pub fn new(slow_path: Arc<SlowPathExecutor>) -> Self {
        Self {
            slow_path,
            triggered: AtomicU64::new(0),
        }
    }

    /// 累计触发的回退次数
    pub fn fallbacks_triggered(&self) -> u64 {
        self.triggered.load(Ordering::Relaxed)
    }

    pub async fn handle_fallback(
        &self,
        execution_id: &str,
        ctx: &mut ExecutionContext,
        fast_result: &FastPathResult,
        cmd: &Command,
        cancel: &CancellationToken,
    ) -> SlowPathResult {
        if let Some(previous) = ctx.fallback_result() {
            tracing::debug!(execution_id, "fallback already handled");
            return previous.clone();
        }

        if ctx.execution_id() != execution_id {
            tracing::warn!(
                expected = %ctx.execution_id(),
                got = execution_id,
                "fallback rejected: execution id mismatch"
            );
            let error = ErrorInfo::new(
                ErrorCategory::Validation,
                RecoveryEngine::assess_severity(ErrorCategory::Validation),
                format!("execution id mismatch: {execution_id}"),
                0,
            )
            .with_stage("fallback");
            return SlowPathResult::rejected(SlowPathMode::Full, error);
        }

        // 以上下文中保存的原始指令为准
        let original = ctx.command().clone();
        if cmd.raw() != original.raw() {
            tracing::warn!(execution_id, "fallback command differs from original, using original");
        }

        let reason = fast_result
            .failure_reason()
            .unwrap_or_else(|| "unknown".to_string());
        tracing::info!(execution_id, reason = %reason, "falling back to slow path");
        ctx.record(
            "fallback_initiated",
            StepOutcome::Success,
            Some(reason),
            fast_result.error.clone(),
        );
        self.triggered.fetch_add(1, Ordering::Relaxed);

        let result = self
            .slow_path
            .run_slow_path(&original, ctx, SlowPathMode::Full, cancel)
            .await;
        ctx.set_fallback_result(result.clone());
        result
    }
}
