//! 快速路径：无障碍 API 直接定位元素并执行单个动作
//!
//! 不重试、不调用视觉与推理；任何失败都返回 fallback_required = true，由回退协调器转入慢速路径。
//! 元素先查缓存，未命中再调用定位器，结果按元素 TTL 写回缓存；动作执行失败时剔除该缓存项。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::cache::{AccessibilityCache, ElementKey};
use crate::collaborators::{
    context_app_name, context_pid, AccessibilityLocator, ActionOutcome, ActionSpec,
    AutomationExecutor, ElementDescriptor,
};
use crate::config::{FastPathSection, TimeoutsSection};
use crate::core::router::{Command, IntentFamily};
use crate::core::state::{ExecutionContext, StepOutcome};
use crate::core::{CollaboratorError, ErrorCategory, ErrorInfo, RecoveryEngine};
use crate::execution::call_with_deadline;

/// 快速路径失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPathFailure {
    Disabled,
    AlreadyAttempted,
    ElementNotFound,
    ElementDisabled,
    /// 定位本身出错（权限、API 不可用、超时 ...）
    LookupFailed(ErrorCategory),
    ExecutionError,
    Cancelled,
}

impl FastPathFailure {
    pub fn reason(&self) -> String {
        match self {
            FastPathFailure::Disabled => "fast_path_disabled".to_string(),
            FastPathFailure::AlreadyAttempted => "fast_path_already_attempted".to_string(),
            FastPathFailure::ElementNotFound => "element_not_found".to_string(),
            FastPathFailure::ElementDisabled => "element_disabled".to_string(),
            FastPathFailure::LookupFailed(category) => format!("{category}_error"),
            FastPathFailure::ExecutionError => "execution_error".to_string(),
            FastPathFailure::Cancelled => "cancelled".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FastPathResult {
    pub success: bool,
    pub fallback_required: bool,
    pub failure: Option<FastPathFailure>,
    pub element_found: Option<ElementDescriptor>,
    pub action_result: Option<ActionOutcome>,
    pub error: Option<ErrorInfo>,
    pub cache_hit: bool,
    pub execution_time: Duration,
}

impl FastPathResult {
    fn succeeded(element: ElementDescriptor, outcome: ActionOutcome, cache_hit: bool, started: Instant) -> Self {
        Self {
            success: true,
            fallback_required: false,
            failure: None,
            element_found: Some(element),
            action_result: Some(outcome),
            error: None,
            cache_hit,
            execution_time: started.elapsed(),
        }
    }

    fn failed(failure: FastPathFailure, started: Instant) -> Self {
        Self {
            success: false,
            fallback_required: true,
            failure: Some(failure),
            element_found: None,
            action_result: None,
            error: None,
            cache_hit: false,
            execution_time: started.elapsed(),
        }
    }

    fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    fn with_element(mut self, element: ElementDescriptor, cache_hit: bool) -> Self {
        self.element_found = Some(element);
        self.cache_hit = cache_hit;
        self
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.failure.map(|f| f.reason())
    }
}

pub struct FastPathExecutor {
    cache: Arc<AccessibilityCache>,
    locator: Arc<dyn AccessibilityLocator>,
    automation: Arc<dyn AutomationExecutor>,
    recovery: Arc<RecoveryEngine>,
    timeouts: TimeoutsSection,
    element_ttl: Duration,
    configured: bool,
    /// 操作员开关（:fast on|off）
    operator_enabled: AtomicBool,
    /// 后台巡检结果：权限丢失时为 false，巡检恢复后置回 true
    health_ok: AtomicBool,
}

impl FastPathExecutor {
    pub fn new(
        cache: Arc<AccessibilityCache>,
        locator: Arc<dyn AccessibilityLocator>,
        automation: Arc<dyn AutomationExecutor>,
        recovery: Arc<RecoveryEngine>,
        cfg: &FastPathSection,
        timeouts: TimeoutsSection,
        element_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            locator,
            automation,
            recovery,
            timeouts,
            element_ttl,
            configured: cfg.enabled,
            operator_enabled: AtomicBool::new(true),
            health_ok: AtomicBool::new(true),
        }
    }

    /// 配置、操作员开关、健康巡检三者都放行才走快速路径
    pub fn is_enabled(&self) -> bool {
        self.configured
            && self.operator_enabled.load(Ordering::SeqCst)
            && self.health_ok.load(Ordering::SeqCst)
    }

    /// 操作员开关；配置中关闭的快速路径不会被重新打开，巡检也不会改写它
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.operator_enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            tracing::info!(enabled, "fast path toggled by operator");
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health_ok.load(Ordering::SeqCst)
    }

    /// 巡检结果；只影响 health_ok
    pub fn set_health_ok(&self, healthy: bool) {
        let previous = self.health_ok.swap(healthy, Ordering::SeqCst);
        if previous != healthy {
            tracing::info!(healthy, "fast path health changed");
        }
    }

    pub fn cache(&self) -> &Arc<AccessibilityCache> {
        &self.cache
    }

    /// 快速路径动作：输入类指令键入文本，其余点击元素中心
    fn action_for(cmd: &Command, element: &ElementDescriptor) -> ActionSpec {
        match (cmd.intent(), cmd.text()) {
            (Some(IntentFamily::Input), Some(text)) => ActionSpec::Type {
                text: text.to_string(),
            },
            _ => ActionSpec::Click {
                x: element.center.x,
                y: element.center.y,
            },
        }
    }

    pub async fn attempt_fast_path(
        &self,
        cmd: &Command,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> FastPathResult {
        let started = Instant::now();

        if !self.is_enabled() {
            ctx.record(
                "fast_path_attempt",
                StepOutcome::Skipped,
                Some(FastPathFailure::Disabled.reason()),
                None,
            );
            return FastPathResult::failed(FastPathFailure::Disabled, started);
        }
        if !ctx.begin_fast_path() {
            tracing::warn!(execution_id = %ctx.execution_id(), "fast path already attempted");
            return FastPathResult::failed(FastPathFailure::AlreadyAttempted, started);
        }

        let app_name = context_app_name(ctx.app_context());
        let pid = context_pid(ctx.app_context());
        let connection = self.cache.connections.acquire(&app_name, pid);
        tracing::debug!(app = %app_name, pid, uses = connection.use_count, "accessibility connection");

        let key = ElementKey::new(&app_name, cmd.target().unwrap_or(cmd.normalized()));
        let (element, cache_hit) = match self.cache.elements.get_element(&key) {
            Some(element) => (element, true),
            None => {
                let lookup = call_with_deadline(
                    "accessibility_lookup",
                    self.timeouts.accessibility(),
                    cancel,
                    self.locator.find_element(cmd.normalized(), ctx.app_context()),
                )
                .await;
                match lookup {
                    Ok(Some(element)) => {
                        self.cache
                            .elements
                            .put_element(key.clone(), element.clone(), Some(self.element_ttl));
                        (element, false)
                    }
                    Ok(None) => {
                        ctx.record(
                            "element_lookup",
                            StepOutcome::Failure,
                            Some(FastPathFailure::ElementNotFound.reason()),
                            None,
                        );
                        return FastPathResult::failed(FastPathFailure::ElementNotFound, started);
                    }
                    Err(err) => {
                        let info = self.recovery.error_info(&err, "accessibility_lookup");
                        let failure = if err == CollaboratorError::Cancelled {
                            FastPathFailure::Cancelled
                        } else {
                            FastPathFailure::LookupFailed(info.category)
                        };
                        if info.category == ErrorCategory::Permission {
                            tracing::warn!(app = %app_name, "accessibility permission denied, falling back");
                        }
                        ctx.record_failure("element_lookup", info.clone());
                        return FastPathResult::failed(failure, started).with_error(info);
                    }
                }
            }
        };
        ctx.record_success(
            "element_lookup",
            Some(format!(
                "{} '{}'{}",
                element.role,
                element.title,
                if cache_hit { " (cached)" } else { "" }
            )),
        );

        if !element.enabled {
            ctx.record(
                "fast_path_action",
                StepOutcome::Skipped,
                Some(FastPathFailure::ElementDisabled.reason()),
                None,
            );
            return FastPathResult::failed(FastPathFailure::ElementDisabled, started)
                .with_element(element, cache_hit);
        }

        let action = Self::action_for(cmd, &element);
        let executed = call_with_deadline(
            "fast_path_action",
            self.timeouts.automation(),
            cancel,
            self.automation.execute_fast_path_action(&element, &action),
        )
        .await;

        match executed {
            Ok(outcome) => {
                ctx.record_success("fast_path_action", outcome.detail.clone());
                tracing::info!(
                    action = action.kind(),
                    cache_hit,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "fast path succeeded"
                );
                FastPathResult::succeeded(element, outcome, cache_hit, started)
            }
            Err(err) => {
                // 缓存的元素可能已失效（窗口移动、控件重建）
                self.cache.elements.invalidate(&key);
                let info = self.recovery.error_info(&err, "fast_path_action");
                let failure = if err == CollaboratorError::Cancelled {
                    FastPathFailure::Cancelled
                } else {
                    FastPathFailure::ExecutionError
                };
                ctx.record_failure("fast_path_action", info.clone());
                FastPathResult::failed(failure, started)
                    .with_element(element, cache_hit)
                    .with_error(info)
            }
        }
    }
}
