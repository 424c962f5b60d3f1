//! # EISv3 CLI
//!
//! 命令行入口。
//!
//! 提供：
//! - 节点配置校验与查看
//! - 基于内存协作者的模拟录像
//! - Ctrl-C 优雅退出

mod cli;
mod commands;
mod error;
mod simulation;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_simulate, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let metrics_port = match &cli.command {
        Commands::Simulate(args) if args.metrics_port != 0 => Some(args.metrics_port),
        _ => None,
    };
    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port,
        default_log_level: cli.log_level().to_string(),
    })?;

    info!(version = env!("CARGO_PKG_VERSION"), "EISv3 CLI starting");

    let result = match &cli.command {
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
        Commands::Simulate(args) => run_simulate(args).await,
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}
