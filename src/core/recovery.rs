//! 错误分类与恢复引擎
//!
//! 将协作者错误归类为 ErrorCategory、评估严重度，并按类别给出退避重试策略：
//! API 约 2^n 秒（上限 10s）、网络 5*(n+1) 秒（上限 30s）、超时 3^n 秒（上限 15s）；
//! 校验 / 配置 / 权限错误需要用户介入，不重试。

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RetrySection;
use crate::core::{CollaboratorError, ErrorCategory, ErrorInfo, Severity};

const HISTORY_LIMIT: usize = 100;

/// 语义化错误恢复：分类、严重度、重试退避，并保留最近的错误记录
#[derive(Debug)]
pub struct RecoveryEngine {
    max_retries: u32,
    /// 退避公式中的「1 秒」
    delay_unit: Duration,
    history: Mutex<VecDeque<ErrorInfo>>,
    counts: Mutex<HashMap<ErrorCategory, u64>>,
}

impl RecoveryEngine {
    pub fn new(max_retries: u32, delay_unit: Duration) -> Self {
        Self {
            max_retries,
            delay_unit,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &RetrySection) -> Self {
        Self::new(cfg.max_retries, Duration::from_millis(cfg.delay_unit_ms))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// 先按错误的具体类型归类，Other 再按消息关键词归类
    pub fn classify(&self, err: &CollaboratorError) -> ErrorCategory {
        match err {
            CollaboratorError::PermissionDenied(_) => ErrorCategory::Permission,
            CollaboratorError::ApiUnavailable(_) => ErrorCategory::Api,
            CollaboratorError::ElementNotFound(_) => ErrorCategory::Processing,
            CollaboratorError::Timeout { .. } => ErrorCategory::Timeout,
            CollaboratorError::Network(_) => ErrorCategory::Network,
            CollaboratorError::Device(_) => ErrorCategory::Hardware,
            CollaboratorError::InvalidAction(_) => ErrorCategory::Validation,
            CollaboratorError::Cancelled => ErrorCategory::Unknown,
            CollaboratorError::Other(msg) => Self::classify_message(msg),
        }
    }

    /// 按消息中的关键词归类（整词匹配，"accessibility" 不会命中 "access"）
    pub fn classify_message(message: &str) -> ErrorCategory {
        let lower = message.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |candidates: &[&str]| words.iter().any(|w| candidates.contains(w));

        if has(&["timeout", "timed", "deadline"]) {
            ErrorCategory::Timeout
        } else if has(&["network", "connection", "connect", "socket", "dns", "unreachable", "offline"]) {
            ErrorCategory::Network
        } else if has(&["permission", "access", "denied", "unauthorized", "forbidden"]) {
            ErrorCategory::Permission
        } else if has(&["config", "configuration", "configured", "misconfigured"])
            || lower.contains("api key")
            || lower.contains("missing key")
        {
            ErrorCategory::Configuration
        } else if has(&["device", "hardware", "microphone", "camera", "display"]) {
            ErrorCategory::Hardware
        } else if has(&["memory", "disk", "resource", "resources", "space"]) {
            ErrorCategory::Resource
        } else if has(&["invalid", "validation", "malformed", "parse"]) {
            ErrorCategory::Validation
        } else if has(&["api", "rate", "quota", "status", "http", "server"]) {
            ErrorCategory::Api
        } else if has(&["processing", "decode", "encode"]) {
            ErrorCategory::Processing
        } else {
            ErrorCategory::Unknown
        }
    }

    pub fn assess_severity(category: ErrorCategory) -> Severity {
        match category {
            ErrorCategory::Configuration | ErrorCategory::Permission => Severity::Critical,
            ErrorCategory::Hardware | ErrorCategory::Resource => Severity::High,
            ErrorCategory::Api | ErrorCategory::Network | ErrorCategory::Timeout => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// 归类并生成 ErrorInfo，同时写入错误历史
    pub fn error_info(&self, err: &CollaboratorError, stage: &str) -> ErrorInfo {
        let category = self.classify(err);
        let mut info = ErrorInfo::new(
            category,
            Self::assess_severity(category),
            err.to_string(),
            self.max_retries,
        )
        .with_stage(stage);
        // 取消不是故障，不重试
        if matches!(err, CollaboratorError::Cancelled) {
            info.recoverable = false;
        }
        self.record(info.clone());
        info
    }

    fn record(&self, info: ErrorInfo) {
        *lock(&self.counts).entry(info.category).or_insert(0) += 1;
        let mut history = lock(&self.history);
        if history.len() >= HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(info);
    }

    /// 第 attempt 次重试前的等待时间；None 表示该类别不重试
    pub fn recovery_delay(&self, category: ErrorCategory, attempt: u32) -> Option<Duration> {
        let secs: u32 = match category {
            ErrorCategory::Api => 2u32.saturating_pow(attempt).min(10),
            ErrorCategory::Network => (5 * (attempt + 1)).min(30),
            ErrorCategory::Timeout => 3u32.saturating_pow(attempt).min(15),
            ErrorCategory::Hardware => (attempt + 1).min(5),
            ErrorCategory::Resource => (2 * (attempt + 1)).min(10),
            ErrorCategory::Processing | ErrorCategory::Unknown => 1,
            ErrorCategory::Validation | ErrorCategory::Configuration | ErrorCategory::Permission => {
                return None
            }
        };
        Some(self.delay_unit * secs)
    }

    /// 等待退避时间后返回 true 表示可以重试；retry_count 不会超过 max_retries
    pub async fn attempt_recovery(&self, info: &mut ErrorInfo) -> bool {
        if !info.recoverable || info.retries_exhausted() {
            return false;
        }
        let Some(delay) = self.recovery_delay(info.category, info.retry_count) else {
            return false;
        };

        tracing::info!(
            category = %info.category,
            attempt = info.retry_count + 1,
            max = info.max_retries,
            delay_ms = delay.as_millis() as u64,
            "recovery: waiting before retry"
        );
        tokio::time::sleep(delay).await;
        info.retry_count += 1;
        true
    }

    /// 执行 op，失败时按类别退避重试，直到成功、不可恢复、次数耗尽或被取消
    pub async fn retry<T, F, Fut>(
        &self,
        stage: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ErrorInfo>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let mut retry_count = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let mut info = self.error_info(&err, stage);
            info.retry_count = retry_count;
            if cancel.is_cancelled() {
                return Err(self.cancelled_info(stage, retry_count));
            }

            let recovered = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                ok = self.attempt_recovery(&mut info) => Some(ok),
            };
            match recovered {
                Some(true) => {}
                Some(false) => return Err(info),
                // 退避期间被取消：上报取消而不是上一次的失败
                None => return Err(self.cancelled_info(stage, retry_count)),
            }
            tracing::warn!(stage, attempt = info.retry_count, error = %info.message, "retrying");
            retry_count = info.retry_count;
        }
    }

    fn cancelled_info(&self, stage: &str, retry_count: u32) -> ErrorInfo {
        let mut info = self.error_info(&CollaboratorError::Cancelled, stage);
        info.retry_count = retry_count;
        info
    }

    /// 最近 n 条错误（新的在后）
    pub fn recent_errors(&self, n: usize) -> Vec<ErrorInfo> {
        let history = lock(&self.history);
        history.iter().skip(history.len().saturating_sub(n)).cloned().collect()
    }

    pub fn category_counts(&self) -> HashMap<ErrorCategory, u64> {
        lock(&self.counts).clone()
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::from_config(&RetrySection::default())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
