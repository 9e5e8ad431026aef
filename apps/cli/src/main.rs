//! # iiwa CLI
//!
//! KUKA LBR iiwa JAVA 指令桥的命令行工具。
//!
//! ```bash
//! # 查看生效的参数表
//! iiwa-cli params
//! iiwa-cli --config lab.toml params
//!
//! # 以 200Hz 持续发送固定指令，直到 Ctrl-C
//! iiwa-cli run --rate 200 --joints 0,0.5,0,-1.2,0,0.8,0 --torques 0,0,0,0,0,0,0
//!
//! # 只发送 100 个周期
//! iiwa-cli run --ticks 100
//! ```
//!
//! 日志级别由 `RUST_LOG` 控制，默认 `iiwa_cli=info`。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{ParamsCommand, RunCommand};

/// iiwa CLI - KUKA iiwa 指令桥命令行工具
#[derive(Parser, Debug)]
#[command(name = "iiwa-cli")]
#[command(about = "Command-line interface for the KUKA iiwa JAVA command bridge", long_about = None)]
#[command(version)]
struct Cli {
    /// 参数表配置文件（TOML，缺失的键取默认值）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 以固定频率发送指令
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 打印生效的参数表
    Params {
        #[command(flatten)]
        args: ParamsCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("iiwa_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let params = commands::load_params(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { args } => args.execute(params),
        Commands::Params { args } => args.execute(&params),
    }
}
