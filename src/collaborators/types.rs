//! 协作者边界上的数据类型：元素描述、动作、屏幕分析、动作计划
//!
//! 动作使用带标签的枚举（click / type / scroll / speak / finish），在边界处一次性校验，
//! 之后各处无需再做字段存在性检查。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 屏幕坐标点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// 元素外接矩形
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }
}

/// 无障碍 API 返回的单个控件描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub role: String,
    pub title: String,
    pub bounds: Bounds,
    pub center: Point,
    pub enabled: bool,
    pub app_name: String,
}

impl ElementDescriptor {
    /// center 由 bounds 推出
    pub fn new(
        role: impl Into<String>,
        title: impl Into<String>,
        bounds: Bounds,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            title: title.into(),
            center: bounds.center(),
            bounds,
            enabled: true,
            app_name: app_name.into(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// 滚动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// 单个自动化动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionSpec {
    Click { x: f64, y: f64 },
    Type { text: String },
    Scroll { direction: ScrollDirection, amount: u32 },
    Speak { message: String },
    Finish { summary: Option<String> },
}

/// 动作校验失败原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionValidationError {
    #[error("click target ({x}, {y}) is off screen")]
    NegativeCoordinates { x: f64, y: f64 },
    #[error("type action has empty text")]
    EmptyText,
    #[error("scroll amount must be positive")]
    ZeroScroll,
    #[error("speak action has empty message")]
    EmptyMessage,
    #[error("plan contains no actions")]
    EmptyPlan,
    #[error("malformed action: {0}")]
    Malformed(String),
}

impl ActionSpec {
    /// 从模型输出的 JSON 解析并校验
    pub fn from_value(value: serde_json::Value) -> Result<Self, ActionValidationError> {
        let action: ActionSpec = serde_json::from_value(value)
            .map_err(|e| ActionValidationError::Malformed(e.to_string()))?;
        action.validate()?;
        Ok(action)
    }

    pub fn validate(&self) -> Result<(), ActionValidationError> {
        match self {
            ActionSpec::Click { x, y } if *x < 0.0 || *y < 0.0 => {
                Err(ActionValidationError::NegativeCoordinates { x: *x, y: *y })
            }
            ActionSpec::Type { text } if text.is_empty() => Err(ActionValidationError::EmptyText),
            ActionSpec::Scroll { amount: 0, .. } => Err(ActionValidationError::ZeroScroll),
            ActionSpec::Speak { message } if message.trim().is_empty() => {
                Err(ActionValidationError::EmptyMessage)
            }
            _ => Ok(()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ActionSpec::Click { .. } => "click",
            ActionSpec::Type { .. } => "type",
            ActionSpec::Scroll { .. } => "scroll",
            ActionSpec::Speak { .. } => "speak",
            ActionSpec::Finish { .. } => "finish",
        }
    }
}

/// 快速路径单动作的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: String,
    pub detail: Option<String>,
}

/// 视觉模型对当前屏幕的结构化描述
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenAnalysis {
    pub description: String,
    #[serde(default)]
    pub elements: Vec<String>,
    /// 截图尺寸（宽, 高）
    pub screen_size: Option<(u32, u32)>,
}

fn default_stop_on_error() -> bool {
    true
}

/// 推理模型给出的动作计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub actions: Vec<ActionSpec>,
    pub confidence: f32,
    /// 为 false 时单个动作失败不终止整个计划
    #[serde(default = "default_stop_on_error")]
    pub stop_on_error: bool,
    /// 信息类指令的回答文本
    #[serde(default)]
    pub response: Option<String>,
}

impl ActionPlan {
    pub fn new(actions: Vec<ActionSpec>) -> Self {
        Self {
            actions,
            confidence: 1.0,
            stop_on_error: true,
            response: None,
        }
    }

    pub fn answer(response: impl Into<String>) -> Self {
        Self {
            actions: Vec::new(),
            confidence: 1.0,
            stop_on_error: true,
            response: Some(response.into()),
        }
    }

    pub fn continue_on_error(mut self) -> Self {
        self.stop_on_error = false;
        self
    }

    /// 执行前整体校验；纯回答型计划允许无动作
    pub fn validate(&self) -> Result<(), ActionValidationError> {
        if self.actions.is_empty() && self.response.is_none() {
            return Err(ActionValidationError::EmptyPlan);
        }
        self.actions.iter().try_for_each(ActionSpec::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_from_bounds() {
        let el = ElementDescriptor::new(
            "AXButton",
            "Sign In",
            Bounds { x: 100.0, y: 200.0, width: 80.0, height: 20.0 },
            "Safari",
        );
        assert_eq!(el.center, Point { x: 140.0, y: 210.0 });
        assert!(el.enabled);
    }

    #[test]
    fn test_action_from_json() {
        let action = ActionSpec::from_value(serde_json::json!({
            "action": "click", "x": 10.0, "y": 20.0
        }))
        .unwrap();
        assert_eq!(action, ActionSpec::Click { x: 10.0, y: 20.0 });

        let err = ActionSpec::from_value(serde_json::json!({"action": "teleport"})).unwrap_err();
        assert!(matches!(err, ActionValidationError::Malformed(_)));
    }

    #[test]
    fn test_action_validation() {
        assert!(ActionSpec::Click { x: -1.0, y: 5.0 }.validate().is_err());
        assert_eq!(
            ActionSpec::Type { text: String::new() }.validate(),
            Err(ActionValidationError::EmptyText)
        );
        assert_eq!(
            ActionSpec::Scroll { direction: ScrollDirection::Down, amount: 0 }.validate(),
            Err(ActionValidationError::ZeroScroll)
        );
        assert!(ActionSpec::Finish { summary: None }.validate().is_ok());
    }

    #[test]
    fn test_plan_defaults_stop_on_error() {
        let plan: ActionPlan = serde_json::from_value(serde_json::json!({
            "actions": [{"action": "speak", "message": "hi"}],
            "confidence": 0.8
        }))
        .unwrap();
        assert!(plan.stop_on_error);
        assert!(plan.validate().is_ok());

        let empty = ActionPlan::new(Vec::new());
        assert_eq!(empty.validate(), Err(ActionValidationError::EmptyPlan));
        assert!(ActionPlan::answer("It is sunny").validate().is_ok());
    }
}
