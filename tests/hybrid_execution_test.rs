//! 混合执行集成测试：快速路径、回退、信息类分支、单飞与取消

use std::sync::Arc;
use std::time::Duration;

use bee_pilot::cache::{ConnectionPool, ElementCache, ElementKey, EvictionPolicy};
use bee_pilot::collaborators::{
    AppContext, Bounds, Collaborators, ElementDescriptor, LocatorBehavior, MockAutomation,
    MockFeedback, MockLocator, MockReasoning, MockVision,
};
use bee_pilot::config::{AppConfig, FastPathSection, RetrySection};
use bee_pilot::core::{
    CollaboratorError, ErrorCategory, ExecutionStatus, HybridOrchestrator, OrchestratorBuilder,
    PilotError, StepOutcome,
};
use bee_pilot::execution::ExecutionPath;

struct Harness {
    locator: Arc<MockLocator>,
    automation: Arc<MockAutomation>,
    vision: Arc<MockVision>,
    reasoning: Arc<MockReasoning>,
    feedback: Arc<MockFeedback>,
    orchestrator: Arc<HybridOrchestrator>,
}

fn test_config() -> AppConfig {
    AppConfig {
        retry: RetrySection {
            max_retries: 3,
            delay_unit_ms: 1,
        },
        ..AppConfig::default()
    }
}

fn harness_with(config: AppConfig) -> Harness {
    let locator = Arc::new(MockLocator::default());
    let automation = Arc::new(MockAutomation::new());
    let vision = Arc::new(MockVision::default());
    let reasoning = Arc::new(MockReasoning::default());
    let feedback = Arc::new(MockFeedback::new());
    let collaborators = Collaborators {
        locator: locator.clone(),
        automation: automation.clone(),
        vision: vision.clone(),
        reasoning: reasoning.clone(),
        feedback: feedback.clone(),
    };
    let orchestrator = Arc::new(
        OrchestratorBuilder::new(config)
            .with_collaborators(collaborators)
            .build(),
    );
    Harness {
        locator,
        automation,
        vision,
        reasoning,
        feedback,
        orchestrator,
    }
}

fn harness() -> Harness {
    harness_with(test_config())
}

fn safari() -> AppContext {
    let mut ctx = AppContext::new();
    ctx.insert("app_name".into(), serde_json::json!("Safari"));
    ctx.insert("pid".into(), serde_json::json!(812));
    ctx
}

/// 反馈是异步发出的，稍等片刻再检查
async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn test_fast_path_success_never_touches_vision_or_reasoning() {
    let h = harness();
    h.locator.set_behavior(LocatorBehavior::Found(ElementDescriptor::new(
        "AXButton",
        "Sign In",
        Bounds { x: 100.0, y: 200.0, width: 80.0, height: 20.0 },
        "Safari",
    )));

    let report = h
        .orchestrator
        .execute_command("click the sign in button", safari())
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.path, Some(ExecutionPath::Fast));
    assert_eq!(report.status, ExecutionStatus::Completed);
    assert!(!report.fallback_triggered);
    assert_eq!(h.vision.calls(), 0);
    assert_eq!(h.reasoning.calls(), 0);
    assert_eq!(h.automation.fast_path_calls(), 1);

    settle().await;
    assert_eq!(h.feedback.sounds(), vec!["success".to_string()]);
}

#[tokio::test]
async fn test_element_not_found_falls_back_once_with_original_command() {
    let h = harness();
    h.locator.set_behavior(LocatorBehavior::NotFound);

    let report = h
        .orchestrator
        .execute_command("Click the   Sign In button.", safari())
        .await
        .unwrap();

    assert!(report.success);
    assert!(report.fallback_triggered);
    assert_eq!(report.path, Some(ExecutionPath::Slow));
    assert_eq!(report.fast_path_failure.as_deref(), Some("element_not_found"));
    assert_eq!(h.vision.calls(), 1);
    assert_eq!(h.reasoning.calls(), 1);
    assert_eq!(
        h.reasoning.commands(),
        vec!["Click the   Sign In button.".to_string()]
    );
    assert_eq!(h.orchestrator.fallbacks_triggered(), 1);

    let names: Vec<_> = report.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names.iter().filter(|n| **n == "fallback_initiated").count(), 1);
    // 审计顺序：校验 → 快速路径 → 回退 → 慢速路径
    let pos = |name: &str| names.iter().position(|n| *n == name).unwrap();
    assert!(pos("validated") < pos("element_lookup"));
    assert!(pos("element_lookup") < pos("fallback_initiated"));
    assert!(pos("fallback_initiated") < pos("screen_analysis"));
}

#[tokio::test]
async fn test_permission_error_still_falls_back() {
    let h = harness();
    h.locator.set_behavior(LocatorBehavior::Fail(CollaboratorError::PermissionDenied(
        "accessibility access not granted".into(),
    )));

    let report = h
        .orchestrator
        .execute_command("click the sign in button", safari())
        .await
        .unwrap();

    assert!(report.fallback_triggered);
    assert_eq!(report.fast_path_failure.as_deref(), Some("permission_error"));
    assert!(report.success);

    let lookup = report
        .steps
        .iter()
        .find(|s| s.name == "element_lookup")
        .unwrap();
    assert_eq!(lookup.outcome, StepOutcome::Failure);
    let mut err = lookup.error.clone().unwrap();
    assert_eq!(err.category, ErrorCategory::Permission);
    assert!(!err.recoverable);
    assert!(!h.orchestrator.recovery().attempt_recovery(&mut err).await);
    assert_eq!(h.locator.calls(), 1);
}

#[tokio::test]
async fn test_question_is_answered_without_actions() {
    let h = harness();
    h.reasoning.set_plan(Ok(bee_pilot::collaborators::ActionPlan::answer(
        "Your browser shows the login page.",
    )));

    let report = h
        .orchestrator
        .execute_command("What is on my screen?", AppContext::new())
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.path, Some(ExecutionPath::Informational));
    assert_eq!(report.actions_executed, 0);
    assert_eq!(h.locator.calls(), 0);
    assert!(h.automation.executed().is_empty());

    settle().await;
    assert_eq!(
        h.feedback.spoken(),
        vec!["Your browser shows the login page.".to_string()]
    );
}

#[tokio::test]
async fn test_low_confidence_gui_goes_straight_to_slow_path() {
    let h = harness();
    let report = h
        .orchestrator
        .execute_command("maybe you could click something", AppContext::new())
        .await
        .unwrap();

    assert_eq!(report.path, Some(ExecutionPath::Slow));
    assert!(!report.fallback_triggered);
    assert_eq!(h.locator.calls(), 0);
    assert_eq!(h.automation.executed().len(), 2);
}

#[tokio::test]
async fn test_slow_path_failure_reports_user_message() {
    let h = harness();
    h.locator.set_behavior(LocatorBehavior::NotFound);
    h.vision
        .fail_times(10, CollaboratorError::Network("connection refused".into()));

    let report = h
        .orchestrator
        .execute_command("click submit", AppContext::new())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.status, ExecutionStatus::Failed);
    let err = report.error.unwrap();
    assert_eq!(err.category, ErrorCategory::Network);
    assert_eq!(err.retry_count, err.max_retries);
    assert_eq!(h.vision.calls(), 4);
    let message = report.user_message.unwrap();
    assert!(message.contains("network connectivity issues"));

    settle().await;
    assert_eq!(h.feedback.spoken(), vec![message]);
}

#[tokio::test]
async fn test_feedback_failure_does_not_affect_result() {
    let h = harness();
    h.feedback.set_failing(true);
    let report = h
        .orchestrator
        .execute_command("click submit", AppContext::new())
        .await
        .unwrap();
    assert!(report.success);
    settle().await;
    assert!(h.feedback.sounds().is_empty());
}

#[tokio::test]
async fn test_second_command_is_rejected_while_busy() {
    let h = harness();
    h.locator.set_delay(Some(Duration::from_millis(200)));

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move {
        orchestrator
            .execute_command("click submit", AppContext::new())
            .await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let second = h
        .orchestrator
        .execute_command("click cancel", AppContext::new())
        .await;
    assert!(matches!(second, Err(PilotError::Busy(_))));

    assert!(first.await.unwrap().unwrap().success);
    assert!(!h.orchestrator.is_busy());
}

#[tokio::test]
async fn test_cancel_marks_command_failed() {
    let h = harness();
    h.locator.set_delay(Some(Duration::from_secs(5)));

    let orchestrator = h.orchestrator.clone();
    let running = tokio::spawn(async move {
        orchestrator
            .execute_command("click submit", AppContext::new())
            .await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.orchestrator.cancel());

    let report = running.await.unwrap().unwrap();
    assert!(!report.success);
    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(!report.fallback_triggered);
    let err = report.error.unwrap();
    assert_eq!(err.category, ErrorCategory::Unknown);
    assert!(!err.recoverable);
    assert_eq!(h.vision.calls(), 0);
}

#[tokio::test]
async fn test_cancel_during_vision_marks_command_failed() {
    let h = harness();
    h.locator.set_behavior(LocatorBehavior::NotFound);
    h.vision.set_delay(Some(Duration::from_secs(5)));

    let orchestrator = h.orchestrator.clone();
    let running = tokio::spawn(async move {
        orchestrator
            .execute_command("click submit", AppContext::new())
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.orchestrator.cancel());

    let report = running.await.unwrap().unwrap();
    assert!(!report.success);
    assert_eq!(report.status, ExecutionStatus::Failed);
    let err = report.error.unwrap();
    assert_eq!(err.category, ErrorCategory::Unknown);
    assert!(!err.recoverable);
    assert_eq!(h.vision.calls(), 1);
    assert_eq!(h.reasoning.calls(), 0);
    assert!(h.automation.executed().is_empty());
    assert_eq!(h.automation.fast_path_calls(), 0);
}

#[tokio::test]
async fn test_cancel_during_retry_backoff_reports_cancellation() {
    // 网络错误退避 5 * 1s，取消发生在第一次退避期间
    let h = harness_with(AppConfig {
        retry: RetrySection {
            max_retries: 3,
            delay_unit_ms: 1000,
        },
        ..AppConfig::default()
    });
    h.locator.set_behavior(LocatorBehavior::NotFound);
    h.vision
        .fail_times(5, CollaboratorError::Network("reset".into()));

    let orchestrator = h.orchestrator.clone();
    let running = tokio::spawn(async move {
        orchestrator
            .execute_command("click submit", AppContext::new())
            .await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.orchestrator.cancel());

    let report = running.await.unwrap().unwrap();
    assert!(!report.success);
    assert_eq!(report.status, ExecutionStatus::Failed);
    let err = report.error.unwrap();
    assert_eq!(err.category, ErrorCategory::Unknown);
    assert!(!err.recoverable);
    assert_eq!(h.vision.calls(), 1);
    assert_eq!(h.reasoning.calls(), 0);
    assert!(h.automation.executed().is_empty());
    let message = report.user_message.unwrap();
    assert!(!message.contains("network"));
}

#[tokio::test]
async fn test_operator_disable_survives_healthy_probe() {
    let mut config = test_config();
    config.health.interval_secs = 1;
    let h = harness_with(config);
    h.orchestrator.start_background().await;

    h.orchestrator.set_fast_path_enabled(false);
    assert!(!h.orchestrator.is_fast_path_enabled());
    // 等过至少一次巡检
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(h.orchestrator.health().fast_path_healthy);
    assert!(!h.orchestrator.is_fast_path_enabled());

    let report = h
        .orchestrator
        .execute_command("click submit", safari())
        .await
        .unwrap();
    assert_eq!(report.fast_path_failure.as_deref(), Some("fast_path_disabled"));
    assert_eq!(h.locator.calls(), 0);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_invalid_commands_are_rejected() {
    let h = harness();
    assert!(matches!(
        h.orchestrator.execute_command("   ", AppContext::new()).await,
        Err(PilotError::InvalidCommand(_))
    ));
    let long = "click ".repeat(200);
    assert!(matches!(
        h.orchestrator.execute_command(&long, AppContext::new()).await,
        Err(PilotError::InvalidCommand(_))
    ));
    assert_eq!(h.locator.calls(), 0);
}

#[tokio::test]
async fn test_disabled_fast_path_yields_to_slow_path() {
    let h = harness_with(AppConfig {
        fast_path: FastPathSection { enabled: false },
        ..test_config()
    });

    let report = h
        .orchestrator
        .execute_command("click the sign in button", safari())
        .await
        .unwrap();

    assert!(report.fallback_triggered);
    assert_eq!(report.fast_path_failure.as_deref(), Some("fast_path_disabled"));
    assert_eq!(h.locator.calls(), 0);
    assert!(report.success);
}

#[tokio::test]
async fn test_repeated_command_hits_element_cache() {
    let h = harness();
    for _ in 0..3 {
        let report = h
            .orchestrator
            .execute_command("click the sign in button", safari())
            .await
            .unwrap();
        assert_eq!(report.path, Some(ExecutionPath::Fast));
    }
    assert_eq!(h.locator.calls(), 1);

    let stats = h.orchestrator.cache_stats();
    assert_eq!(stats.elements.hits, 2);
    assert_eq!(stats.elements.misses, 1);
    assert_eq!(stats.connections.size, 1);

    let summary = h.orchestrator.monitor().path_summary();
    assert_eq!(summary.fast_successes, 3);
    assert_eq!(summary.fallbacks, 0);
}

#[tokio::test]
async fn test_background_tasks_stop_on_shutdown() {
    let h = harness();
    h.orchestrator.start_background().await;
    tokio::time::timeout(Duration::from_secs(2), h.orchestrator.shutdown())
        .await
        .expect("shutdown should join background tasks");
}

#[test]
fn test_lru_eviction_scenario() {
    // 容量 3：插入 A、B、C，访问 A，再插入 D → 淘汰 B
    let pool = ConnectionPool::new(3, Duration::from_secs(300), EvictionPolicy::LeastRecentlyUsed);
    pool.put_connection("A", 1);
    pool.put_connection("B", 2);
    pool.put_connection("C", 3);
    assert!(pool.get_connection("A", 1).is_some());
    pool.put_connection("D", 4);

    let mut apps = pool.apps();
    apps.sort();
    assert_eq!(apps, vec!["A", "C", "D"]);
    assert_eq!(pool.stats().evictions, 1);

    let elements = ElementCache::new(3, Duration::from_secs(30), EvictionPolicy::LeastRecentlyUsed);
    let el = |title: &str| {
        ElementDescriptor::new(
            "AXButton",
            title,
            Bounds { x: 0.0, y: 0.0, width: 1.0, height: 1.0 },
            "Safari",
        )
    };
    for id in ["A", "B", "C"] {
        elements.put_element(ElementKey::new("Safari", id), el(id), None);
    }
    assert!(elements.get_element(&ElementKey::new("Safari", "A")).is_some());
    elements.put_element(ElementKey::new("Safari", "D"), el("D"), None);

    assert_eq!(elements.len(), 3);
    assert!(!elements.contains(&ElementKey::new("Safari", "B")));
    for id in ["A", "C", "D"] {
        assert!(elements.contains(&ElementKey::new("Safari", id)));
    }
}
