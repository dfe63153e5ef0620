//! 执行状态：ExecutionContext 与只追加的审计步骤
//!
//! 一个 ExecutionContext 对应一条指令，由编排器独占；每条指令最多一次快速路径尝试、最多一次慢速路径尝试。

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::collaborators::AppContext;
use crate::core::router::Command;
use crate::core::ErrorInfo;
use crate::execution::SlowPathResult;

/// 指令执行状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    FastPath,
    SlowPath,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// 步骤结果
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure,
    Skipped,
}

/// 审计步骤
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionStep {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: StepOutcome,
    pub detail: Option<String>,
    pub error: Option<ErrorInfo>,
}

/// 单条指令的执行上下文
#[derive(Debug)]
pub struct ExecutionContext {
    execution_id: String,
    command: Command,
    app_context: AppContext,
    started_at: DateTime<Utc>,
    started: Instant,
    steps: Vec<ExecutionStep>,
    status: ExecutionStatus,
    fast_path_attempted: bool,
    slow_path_attempted: bool,
    fallback_result: Option<SlowPathResult>,
}

impl ExecutionContext {
    pub fn new(command: Command, app_context: AppContext) -> Self {
        Self {
            execution_id: format!("exec_{}", uuid::Uuid::new_v4()),
            command,
            app_context,
            started_at: Utc::now(),
            started: Instant::now(),
            steps: Vec::new(),
            status: ExecutionStatus::Pending,
            fast_path_attempted: false,
            slow_path_attempted: false,
            fallback_result: None,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn app_context(&self) -> &AppContext {
        &self.app_context
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// 终态之后不再改变
    pub fn set_status(&mut self, status: ExecutionStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
    }

    pub fn record(
        &mut self,
        name: impl Into<String>,
        outcome: StepOutcome,
        detail: Option<String>,
        error: Option<ErrorInfo>,
    ) {
        self.steps.push(ExecutionStep {
            name: name.into(),
            timestamp: Utc::now(),
            outcome,
            detail,
            error,
        });
    }

    pub fn record_success(&mut self, name: impl Into<String>, detail: Option<String>) {
        self.record(name, StepOutcome::Success, detail, None);
    }

    pub fn record_failure(&mut self, name: impl Into<String>, error: ErrorInfo) {
        let detail = Some(error.message.clone());
        self.record(name, StepOutcome::Failure, detail, Some(error));
    }

    /// 占用快速路径名额；已尝试过则返回 false
    pub fn begin_fast_path(&mut self) -> bool {
        if self.fast_path_attempted {
            return false;
        }
        self.fast_path_attempted = true;
        self.set_status(ExecutionStatus::FastPath);
        true
    }

    /// 占用慢速路径名额；已尝试过则返回 false
    pub fn begin_slow_path(&mut self) -> bool {
        if self.slow_path_attempted {
            return false;
        }
        self.slow_path_attempted = true;
        self.set_status(ExecutionStatus::SlowPath);
        true
    }

    pub fn fast_path_attempted(&self) -> bool {
        self.fast_path_attempted
    }

    pub fn slow_path_attempted(&self) -> bool {
        self.slow_path_attempted
    }

    /// 回退是否已触发
    pub fn fallback_triggered(&self) -> bool {
        self.fallback_result.is_some()
    }

    pub fn fallback_result(&self) -> Option<&SlowPathResult> {
        self.fallback_result.as_ref()
    }

    pub(crate) fn set_fallback_result(&mut self, result: SlowPathResult) {
        self.fallback_result = Some(result);
    }

    /// 最后一条失败步骤携带的错误
    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.steps.iter().rev().find_map(|s| s.error.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::router::CommandRouter;
    use crate::core::{ErrorCategory, Severity};

    fn ctx() -> ExecutionContext {
        let cmd = CommandRouter::default().classify("click ok").unwrap();
        ExecutionContext::new(cmd, AppContext::new())
    }

    #[test]
    fn test_single_attempt_per_path() {
        let mut ctx = ctx();
        assert_eq!(ctx.status(), ExecutionStatus::Pending);
        assert!(ctx.begin_fast_path());
        assert!(!ctx.begin_fast_path());
        assert_eq!(ctx.status(), ExecutionStatus::FastPath);
        assert!(ctx.begin_slow_path());
        assert!(!ctx.begin_slow_path());
        assert_eq!(ctx.status(), ExecutionStatus::SlowPath);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut ctx = ctx();
        ctx.set_status(ExecutionStatus::Failed);
        ctx.set_status(ExecutionStatus::Completed);
        assert_eq!(ctx.status(), ExecutionStatus::Failed);
    }

    #[test]
    fn test_steps_are_ordered() {
        let mut ctx = ctx();
        ctx.record_success("validated", None);
        ctx.record_failure(
            "fast_path_attempt",
            ErrorInfo::new(ErrorCategory::Permission, Severity::Critical, "denied", 3),
        );
        ctx.record_success("fallback_initiated", Some("permission".into()));
        assert_eq!(
            ctx.step_names(),
            vec!["validated", "fast_path_attempt", "fallback_initiated"]
        );
        assert_eq!(ctx.last_error().unwrap().category, ErrorCategory::Permission);
        assert!(ctx.execution_id().starts_with("exec_"));
    }
}
