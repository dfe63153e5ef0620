//! Bee Pilot - dry-run 入口
//!
//! 从 stdin 逐行读取指令，交给接入 Mock 协作者的编排器执行，向 stdout 输出 JSON 报告。
//! 一行可以是纯文本指令，也可以是 `{"command": "...", "app_context": {...}}`。
//! 以冒号开头的行是控制命令：:health / :recommend / :fast on|off / :quit。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use bee_pilot::collaborators::AppContext;
use bee_pilot::core::{
    run_with_graceful_shutdown, OrchestratorBuilder, OrchestratorCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
use bee_pilot::HybridOrchestrator;

#[derive(Debug, Deserialize)]
struct CommandLine {
    command: String,
    #[serde(default)]
    app_context: AppContext,
}

fn parse_line(line: &str) -> CommandLine {
    if line.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str::<CommandLine>(line) {
            return parsed;
        }
    }
    CommandLine {
        command: line.to_string(),
        app_context: AppContext::new(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => tracing::error!(error = %e, "failed to serialize output"),
    }
}

/// 处理控制命令；返回 false 表示退出
fn handle_control(orchestrator: &HybridOrchestrator, line: &str) -> bool {
    match line.trim() {
        ":quit" | ":exit" => return false,
        ":health" => print_json(&orchestrator.health()),
        ":recommend" => print_json(&orchestrator.recommendations()),
        ":fast on" => orchestrator.set_fast_path_enabled(true),
        ":fast off" => orchestrator.set_fast_path_enabled(false),
        other => eprintln!("unknown control command: {}", other),
    }
    true
}

async fn repl(orchestrator: Arc<HybridOrchestrator>, shutdown: Arc<ShutdownManager>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with(':') {
            if !handle_control(&orchestrator, line) {
                break;
            }
            continue;
        }

        let input = parse_line(line);
        match orchestrator
            .execute_command(&input.command, input.app_context)
            .await
        {
            Ok(report) => print_json(&report),
            Err(e) => eprintln!("rejected: {}", e),
        }
    }
    shutdown.shutdown(ShutdownReason::UserInitiated);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bee_pilot::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = bee_pilot::config::load_config(config_path.clone()).with_context(|| match &config_path {
        Some(path) => format!("Failed to load config {}", path.display()),
        None => "Failed to load config".to_string(),
    })?;

    let shutdown = Arc::new(ShutdownManager::new());
    let orchestrator = Arc::new(
        OrchestratorBuilder::new(config)
            .with_shutdown_token(shutdown.token())
            .build(),
    );
    orchestrator.start_background().await;

    let mut coordinator = ShutdownCoordinator::new(shutdown.clone());
    coordinator.register(OrchestratorCleanup::new(orchestrator.clone()));

    run_with_graceful_shutdown(
        shutdown.clone(),
        repl(orchestrator, shutdown.clone()),
        || async move { coordinator.run_cleanup().await },
    )
    .await;

    Ok(())
}
