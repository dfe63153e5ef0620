//! 外部协作者抽象
//!
//! 编排器只依赖这些 trait：无障碍元素定位、自动化执行、视觉分析、推理规划、反馈输出。
//! 真实实现（系统 API、模型请求）由外层应用提供。

use std::collections::HashMap;

use async_trait::async_trait;

use crate::collaborators::types::{
    ActionOutcome, ActionPlan, ActionSpec, ElementDescriptor, ScreenAnalysis,
};
use crate::core::CollaboratorError;

/// 指令附带的应用上下文（如 app_name、pid）
pub type AppContext = HashMap<String, serde_json::Value>;

/// 未提供 app_name 时使用的占位名
pub const FRONTMOST_APP: &str = "frontmost";

/// 取上下文中的目标应用名
pub fn context_app_name(ctx: &AppContext) -> String {
    ctx.get("app_name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(FRONTMOST_APP)
        .to_string()
}

/// 取上下文中的进程号，缺省为 0
pub fn context_pid(ctx: &AppContext) -> u32 {
    ctx.get("pid")
        .and_then(|v| v.as_u64())
        .and_then(|pid| u32::try_from(pid).ok())
        .unwrap_or(0)
}

/// 无障碍元素定位：Ok(None) 表示没找到，Err 表示查找本身失败（权限、API 不可用、超时）
#[async_trait]
pub trait AccessibilityLocator: Send + Sync {
    async fn find_element(
        &self,
        command: &str,
        app_context: &AppContext,
    ) -> Result<Option<ElementDescriptor>, CollaboratorError>;

    /// 健康探测，后台巡检使用；默认总是可用
    async fn health_check(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// 自动化原语执行
#[async_trait]
pub trait AutomationExecutor: Send + Sync {
    /// 快速路径：针对已定位元素执行单个动作
    async fn execute_fast_path_action(
        &self,
        descriptor: &ElementDescriptor,
        action: &ActionSpec,
    ) -> Result<ActionOutcome, CollaboratorError>;

    /// 慢速路径：按计划顺序逐个执行
    async fn execute_action(&self, action: &ActionSpec) -> Result<(), CollaboratorError>;
}

/// 截屏 + 视觉描述
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn describe_screen(&self) -> Result<ScreenAnalysis, CollaboratorError>;
}

/// 推理规划：根据指令与屏幕描述给出动作计划
#[async_trait]
pub trait ReasoningPlanner: Send + Sync {
    async fn get_action_plan(
        &self,
        command: &str,
        screen: &ScreenAnalysis,
    ) -> Result<ActionPlan, CollaboratorError>;
}

/// 语音 / 音效反馈，尽力而为，失败只记日志
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn speak(&self, message: &str) -> Result<(), CollaboratorError>;

    async fn play_sound(&self, name: &str) -> Result<(), CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_helpers() {
        let mut ctx = AppContext::new();
        assert_eq!(context_app_name(&ctx), FRONTMOST_APP);
        assert_eq!(context_pid(&ctx), 0);

        ctx.insert("app_name".into(), serde_json::json!("Safari"));
        ctx.insert("pid".into(), serde_json::json!(4242));
        assert_eq!(context_app_name(&ctx), "Safari");
        assert_eq!(context_pid(&ctx), 4242);
    }
}
