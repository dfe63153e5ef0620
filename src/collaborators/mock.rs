//! Mock 协作者（用于测试与 dry-run，无需系统权限或模型 API）
//!
//! 每个 Mock 都记录调用次数与入参，行为可在运行时替换，便于验证「快速路径不调用视觉 / 推理」等约束。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::collaborators::traits::{
    context_app_name, AccessibilityLocator, AppContext, AutomationExecutor, FeedbackSink,
    ReasoningPlanner, VisionAnalyzer,
};
use crate::collaborators::types::{
    ActionOutcome, ActionPlan, ActionSpec, Bounds, ElementDescriptor, ScreenAnalysis,
};
use crate::core::CollaboratorError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// 定位器脚本化行为
#[derive(Debug, Clone)]
pub enum LocatorBehavior {
    /// 返回固定元素
    Found(ElementDescriptor),
    /// 按指令文本生成一个按钮元素
    Echo,
    NotFound,
    Fail(CollaboratorError),
}

#[derive(Debug)]
pub struct MockLocator {
    behavior: Mutex<LocatorBehavior>,
    health: Mutex<Result<(), CollaboratorError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl MockLocator {
    pub fn new(behavior: LocatorBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            health: Mutex::new(Ok(())),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: LocatorBehavior) {
        *lock(&self.behavior) = behavior;
    }

    pub fn set_health(&self, health: Result<(), CollaboratorError>) {
        *lock(&self.health) = health;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }
}

impl Default for MockLocator {
    fn default() -> Self {
        Self::new(LocatorBehavior::Echo)
    }
}

#[async_trait]
impl AccessibilityLocator for MockLocator {
    async fn find_element(
        &self,
        command: &str,
        app_context: &AppContext,
    ) -> Result<Option<ElementDescriptor>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.commands).push(command.to_string());

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = lock(&self.behavior).clone();
        match behavior {
            LocatorBehavior::Found(el) => Ok(Some(el)),
            LocatorBehavior::Echo => Ok(Some(ElementDescriptor::new(
                "AXButton",
                command,
                Bounds { x: 100.0, y: 100.0, width: 120.0, height: 32.0 },
                context_app_name(app_context),
            ))),
            LocatorBehavior::NotFound => Ok(None),
            LocatorBehavior::Fail(e) => Err(e),
        }
    }

    async fn health_check(&self) -> Result<(), CollaboratorError> {
        lock(&self.health).clone()
    }
}

/// 自动化执行 Mock：按动作类型注入失败
#[derive(Debug, Default)]
pub struct MockAutomation {
    fast_path_failure: Mutex<Option<CollaboratorError>>,
    action_failures: Mutex<HashMap<&'static str, CollaboratorError>>,
    fast_path_calls: AtomicUsize,
    executed: Mutex<Vec<ActionSpec>>,
}

impl MockAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_fast_path(&self, err: Option<CollaboratorError>) {
        *lock(&self.fast_path_failure) = err;
    }

    /// 让某一类动作（click / type / ...）执行失败
    pub fn fail_action(&self, kind: &'static str, err: CollaboratorError) {
        lock(&self.action_failures).insert(kind, err);
    }

    pub fn fast_path_calls(&self) -> usize {
        self.fast_path_calls.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<ActionSpec> {
        lock(&self.executed).clone()
    }
}

#[async_trait]
impl AutomationExecutor for MockAutomation {
    async fn execute_fast_path_action(
        &self,
        descriptor: &ElementDescriptor,
        action: &ActionSpec,
    ) -> Result<ActionOutcome, CollaboratorError> {
        self.fast_path_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.fast_path_failure).clone() {
            return Err(err);
        }
        Ok(ActionOutcome {
            action: action.kind().to_string(),
            detail: Some(format!("{} '{}'", descriptor.role, descriptor.title)),
        })
    }

    async fn execute_action(&self, action: &ActionSpec) -> Result<(), CollaboratorError> {
        if let Some(err) = lock(&self.action_failures).get(action.kind()).cloned() {
            return Err(err);
        }
        lock(&self.executed).push(action.clone());
        Ok(())
    }
}

/// 视觉 Mock：可设置前 N 次失败、延迟
#[derive(Debug)]
pub struct MockVision {
    analysis: Mutex<ScreenAnalysis>,
    failure: Mutex<Option<CollaboratorError>>,
    failures_left: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl MockVision {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            analysis: Mutex::new(ScreenAnalysis {
                description: description.into(),
                elements: Vec::new(),
                screen_size: Some((1920, 1080)),
            }),
            failure: Mutex::new(None),
            failures_left: AtomicUsize::new(0),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// 接下来 times 次调用返回 err
    pub fn fail_times(&self, times: usize, err: CollaboratorError) {
        *lock(&self.failure) = Some(err);
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockVision {
    fn default() -> Self {
        Self::new("A desktop with a browser window")
    }
}

#[async_trait]
impl VisionAnalyzer for MockVision {
    async fn describe_screen(&self) -> Result<ScreenAnalysis, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            if let Some(err) = lock(&self.failure).clone() {
                return Err(err);
            }
        }
        Ok(lock(&self.analysis).clone())
    }
}

/// 推理 Mock：返回固定计划并记录收到的指令
#[derive(Debug)]
pub struct MockReasoning {
    plan: Mutex<Result<ActionPlan, CollaboratorError>>,
    calls: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl MockReasoning {
    pub fn new(plan: ActionPlan) -> Self {
        Self {
            plan: Mutex::new(Ok(plan)),
            calls: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn set_plan(&self, plan: Result<ActionPlan, CollaboratorError>) {
        *lock(&self.plan) = plan;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }
}

impl Default for MockReasoning {
    fn default() -> Self {
        Self::new(ActionPlan {
            actions: vec![
                ActionSpec::Click { x: 320.0, y: 240.0 },
                ActionSpec::Finish { summary: Some("done".to_string()) },
            ],
            confidence: 0.8,
            stop_on_error: true,
            response: Some("Done.".to_string()),
        })
    }
}

#[async_trait]
impl ReasoningPlanner for MockReasoning {
    async fn get_action_plan(
        &self,
        command: &str,
        _screen: &ScreenAnalysis,
    ) -> Result<ActionPlan, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.commands).push(command.to_string());
        lock(&self.plan).clone()
    }
}

/// 反馈 Mock：记录播报与音效
#[derive(Debug, Default)]
pub struct MockFeedback {
    spoken: Mutex<Vec<String>>,
    sounds: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl MockFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }

    pub fn sounds(&self) -> Vec<String> {
        lock(&self.sounds).clone()
    }
}

#[async_trait]
impl FeedbackSink for MockFeedback {
    async fn speak(&self, message: &str) -> Result<(), CollaboratorError> {
        if *lock(&self.fail) {
            return Err(CollaboratorError::Device("speaker unavailable".to_string()));
        }
        lock(&self.spoken).push(message.to_string());
        Ok(())
    }

    async fn play_sound(&self, name: &str) -> Result<(), CollaboratorError> {
        if *lock(&self.fail) {
            return Err(CollaboratorError::Device("speaker unavailable".to_string()));
        }
        lock(&self.sounds).push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_vision_fail_times() {
        let vision = MockVision::default();
        vision.fail_times(2, CollaboratorError::Network("reset".into()));
        assert!(vision.describe_screen().await.is_err());
        assert!(vision.describe_screen().await.is_err());
        assert!(vision.describe_screen().await.is_ok());
        assert_eq!(vision.calls(), 3);
    }

    #[tokio::test]
    async fn test_locator_echo_uses_app_name() {
        let locator = MockLocator::default();
        let mut ctx = AppContext::new();
        ctx.insert("app_name".into(), serde_json::json!("Mail"));
        let el = locator.find_element("click send", &ctx).await.unwrap().unwrap();
        assert_eq!(el.app_name, "Mail");
        assert_eq!(el.title, "click send");
    }
}
