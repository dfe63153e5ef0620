//! 协作者层：trait 抽象、边界数据类型与 Mock 实现

pub mod mock;
pub mod traits;
pub mod types;

use std::sync::Arc;

pub use mock::{
    LocatorBehavior, MockAutomation, MockFeedback, MockLocator, MockReasoning, MockVision,
};
pub use traits::{
    context_app_name, context_pid, AccessibilityLocator, AppContext, AutomationExecutor,
    FeedbackSink, ReasoningPlanner, VisionAnalyzer, FRONTMOST_APP,
};
pub use types::{
    ActionOutcome, ActionPlan, ActionSpec, ActionValidationError, Bounds, ElementDescriptor,
    Point, ScreenAnalysis, ScrollDirection,
};

/// 编排器依赖的全部协作者，由应用根构造后注入
#[derive(Clone)]
pub struct Collaborators {
    pub locator: Arc<dyn AccessibilityLocator>,
    pub automation: Arc<dyn AutomationExecutor>,
    pub vision: Arc<dyn VisionAnalyzer>,
    pub reasoning: Arc<dyn ReasoningPlanner>,
    pub feedback: Arc<dyn FeedbackSink>,
}

impl Collaborators {
    /// 全部使用默认 Mock（dry-run）
    pub fn mock() -> Self {
        Self {
            locator: Arc::new(MockLocator::default()),
            automation: Arc::new(MockAutomation::default()),
            vision: Arc::new(MockVision::default()),
            reasoning: Arc::new(MockReasoning::default()),
            feedback: Arc::new(MockFeedback::default()),
        }
    }
}
