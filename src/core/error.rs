//! 错误类型：协作者错误、错误分类 / 严重度、ErrorInfo 与编排器对外错误
//!
//! 与 RecoveryEngine 配合：协作者错误在编排器边界被分类为 ErrorInfo，原始错误不会逃逸到调用方。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::core::router::RouterError;

/// 外部协作者（无障碍、自动化、视觉、推理）调用可能返回的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("accessibility permission denied: {0}")]
    PermissionDenied(String),

    #[error("accessibility API unavailable: {0}")]
    ApiUnavailable(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout { stage: String, timeout_ms: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Api,
    Network,
    Validation,
    Hardware,
    Configuration,
    Processing,
    Timeout,
    Permission,
    Resource,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 10] = [
        ErrorCategory::Api,
        ErrorCategory::Network,
        ErrorCategory::Validation,
        ErrorCategory::Hardware,
        ErrorCategory::Configuration,
        ErrorCategory::Processing,
        ErrorCategory::Timeout,
        ErrorCategory::Permission,
        ErrorCategory::Resource,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Api => "api",
            ErrorCategory::Network => "network",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Hardware => "hardware",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Processing => "processing",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// 需要用户 / 运维介入，重试无意义
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ErrorCategory::Validation | ErrorCategory::Configuration | ErrorCategory::Permission
        )
    }

    /// 面向用户的提示语（可由外层播报或显示）
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::Api => "The AI service is not responding right now. Please try again in a moment.",
            ErrorCategory::Network => "I'm having network connectivity issues. Please check your connection.",
            ErrorCategory::Validation => "I couldn't understand that command. Could you rephrase it?",
            ErrorCategory::Hardware => "I'm having trouble with a device. Please check your hardware.",
            ErrorCategory::Configuration => "Something is misconfigured. Please check the assistant settings.",
            ErrorCategory::Processing => "I ran into a problem processing that request.",
            ErrorCategory::Timeout => "That took too long. Please try again.",
            ErrorCategory::Permission => "I don't have permission to do that. Please grant accessibility access.",
            ErrorCategory::Resource => "The system is running low on resources.",
            ErrorCategory::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 严重度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// 分类后的错误信息，挂在 ExecutionStep 上并随报告返回
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub id: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub recoverable: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    /// 出错阶段（accessibility_lookup / vision / reasoning ...）
    pub stage: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn new(
        category: ErrorCategory,
        severity: Severity,
        message: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: format!("err_{}", uuid::Uuid::new_v4()),
            category,
            severity,
            message: message.into(),
            recoverable: category.is_recoverable(),
            retry_count: 0,
            max_retries,
            stage: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn user_message(&self) -> &'static str {
        self.category.user_message()
    }
}

/// 编排器对调用方暴露的错误（仅限指令未被受理的情况）
#[derive(Error, Debug)]
pub enum PilotError {
    /// 单飞保护：已有指令在执行
    #[error("another command is already running ({0})")]
    Busy(String),

    #[error("invalid command: {0}")]
    InvalidCommand(#[from] RouterError),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}
