//! 执行层：快速路径、慢速路径与回退协调
//!
//! 所有外部协作者调用都经过 `call_with_deadline`：施加截止时间、响应取消，并输出一条结构化审计日志。

pub mod fallback;
pub mod fast_path;
pub mod slow_path;

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::CollaboratorError;

pub use fallback::FallbackCoordinator;
pub use fast_path::{FastPathExecutor, FastPathFailure, FastPathResult};
pub use slow_path::{SlowPathExecutor, SlowPathMode, SlowPathResult};

/// 指令最终完成于哪条路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Fast,
    Slow,
    /// 只回答、不执行动作的慢速路径
    Informational,
}

impl ExecutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPath::Fast => "fast",
            ExecutionPath::Slow => "slow",
            ExecutionPath::Informational => "informational",
        }
    }
}

/// 在截止时间内执行协作者调用；超时返回 Timeout，取消返回 Cancelled
pub async fn call_with_deadline<T, Fut>(
    stage: &str,
    deadline: Duration,
    cancel: &CancellationToken,
    fut: Fut,
) -> Result<T, CollaboratorError>
where
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let start = Instant::now();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
        r = tokio::time::timeout(deadline, fut) => match r {
            Ok(inner) => inner,
            Err(_) => Err(CollaboratorError::Timeout {
                stage: stage.to_string(),
                timeout_ms: deadline.as_millis() as u64,
            }),
        },
    };

    let outcome = match &result {
        Ok(_) => "ok",
        Err(CollaboratorError::Cancelled) => "cancelled",
        Err(CollaboratorError::Timeout { .. }) => "timeout",
        Err(_) => "error",
    };
    let audit = serde_json::json!({
        "event": "collaborator_audit",
        "stage": stage,
        "ok": result.is_ok(),
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
    });
    tracing::info!(audit = %audit, "collaborator");

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_times_out() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = call_with_deadline("vision", Duration::from_millis(10), &cancel, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(CollaboratorError::Timeout { ref stage, timeout_ms: 10 }) if stage == "vision"
        ));
    }

    #[tokio::test]
    async fn test_cancel_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<u8, _> =
            call_with_deadline("reasoning", Duration::from_secs(5), &cancel, async { Ok(1) }).await;
        assert_eq!(result, Err(CollaboratorError::Cancelled));
    }

    #[tokio::test]
    async fn test_passes_through_result() {
        let cancel = CancellationToken::new();
        let ok: Result<u8, _> =
            call_with_deadline("a11y", Duration::from_secs(1), &cancel, async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u8, _> = call_with_deadline("a11y", Duration::from_secs(1), &cancel, async {
            Err(CollaboratorError::Network("down".into()))
        })
        .await;
        assert_eq!(err, Err(CollaboratorError::Network("down".into())));
    }
}
