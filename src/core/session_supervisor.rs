//! 会话监管：单飞保护与指令级取消
//!
//! 同一时刻只允许一条指令执行；每条指令持有根 token 的子 token，
//! 调用方 cancel 只取消当前指令，关闭时取消根 token 会连带取消正在执行的指令。

use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::core::PilotError;

#[derive(Debug)]
struct ActiveCommand {
    execution_id: String,
    token: CancellationToken,
}

/// 单飞监管器
#[derive(Debug)]
pub struct SessionSupervisor {
    /// 关闭时触发
    root: CancellationToken,
    active: Mutex<Option<ActiveCommand>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::with_root(CancellationToken::new())
    }

    /// 挂在外部 token（如 ShutdownManager）之下
    pub fn with_root(root: CancellationToken) -> Self {
        Self {
            root,
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveCommand>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 占用执行槽；已有指令在执行时返回 Busy
    pub fn begin(&self, execution_id: &str) -> Result<CommandGuard<'_>, PilotError> {
        let mut active = self.active();
        if let Some(current) = active.as_ref() {
            tracing::warn!(running = %current.execution_id, rejected = execution_id, "busy");
            return Err(PilotError::Busy(current.execution_id.clone()));
        }
        let token = self.root.child_token();
        *active = Some(ActiveCommand {
            execution_id: execution_id.to_string(),
            token: token.clone(),
        });
        Ok(CommandGuard {
            supervisor: self,
            token,
        })
    }

    /// 取消当前指令；没有指令在执行时返回 false
    pub fn cancel_current(&self) -> bool {
        match self.active().as_ref() {
            Some(current) => {
                tracing::info!(execution_id = %current.execution_id, "cancel requested");
                current.token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消根 token（关闭）
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn is_busy(&self) -> bool {
        self.active().is_some()
    }

    pub fn current(&self) -> Option<String> {
        self.active().as_ref().map(|c| c.execution_id.clone())
    }

    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 执行槽占用凭证；drop 时释放
#[derive(Debug)]
pub struct CommandGuard<'a> {
    supervisor: &'a SessionSupervisor,
    token: CancellationToken,
}

impl CommandGuard<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        self.supervisor.active().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight() {
        let sup = SessionSupervisor::new();
        let guard = sup.begin("exec_1").unwrap();
        assert!(sup.is_busy());
        assert_eq!(sup.current().as_deref(), Some("exec_1"));

        match sup.begin("exec_2") {
            Err(PilotError::Busy(running)) => assert_eq!(running, "exec_1"),
            other => panic!("expected busy, got {other:?}"),
        }

        drop(guard);
        assert!(!sup.is_busy());
        assert!(sup.begin("exec_3").is_ok());
    }

    #[test]
    fn test_cancel_current_only_hits_running_command() {
        let sup = SessionSupervisor::new();
        assert!(!sup.cancel_current());

        let guard = sup.begin("exec_1").unwrap();
        assert!(sup.cancel_current());
        assert!(guard.token().is_cancelled());
        drop(guard);

        let next = sup.begin("exec_2").unwrap();
        assert!(!next.token().is_cancelled());
    }

    #[test]
    fn test_root_cancel_propagates() {
        let root = CancellationToken::new();
        let sup = SessionSupervisor::with_root(root.clone());
        let guard = sup.begin("exec_1").unwrap();
        root.cancel();
        assert!(guard.token().is_cancelled());
    }
}
