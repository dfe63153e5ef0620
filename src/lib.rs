//! Bee Pilot - 桌面自动化助手的混合执行核心
//!
//! 模块划分：
//! - **cache**: 无障碍连接池与元素缓存（容量上限 + TTL + 淘汰策略）
//! - **collaborators**: 外部协作者 trait、边界数据类型与 Mock
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 路由、错误分类与恢复、执行状态、单飞监管、后台任务、编排器
//! - **execution**: 快速路径、慢速路径、回退协调
//! - **monitor**: 性能监控与优化建议
//! - **observability**: 日志初始化

pub mod cache;
pub mod collaborators;
pub mod config;
pub mod core;
pub mod execution;
pub mod monitor;
pub mod observability;

pub use crate::core::{ExecutionReport, HybridOrchestrator, OrchestratorBuilder, PilotError};
