//! 核心编排层：错误与恢复、指令路由、执行状态、单飞监管、后台任务、关闭与主控流程

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod router;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;
pub mod task_scheduler;

pub use builder::OrchestratorBuilder;
pub use error::{CollaboratorError, ErrorCategory, ErrorInfo, PilotError, Severity};
pub use orchestrator::{ExecutionReport, HealthReport, HybridOrchestrator, SUCCESS_SOUND};
pub use recovery::RecoveryEngine;
pub use router::{Command, CommandRouter, CommandType, IntentFamily, RouterError};
pub use session_supervisor::{CommandGuard, SessionSupervisor};
pub use shutdown::{
    run_with_graceful_shutdown, OrchestratorCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
pub use state::{ExecutionContext, ExecutionStatus, ExecutionStep, StepOutcome};
pub use task_scheduler::{TaskKind, TaskScheduler};
