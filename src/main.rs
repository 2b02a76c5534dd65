mod archive;
mod config;
mod discover;
mod domain;
mod extract;
mod probe;
mod scanner;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Args;
use crate::scanner::{output, Scanner};

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("waybacklister={}", default_level).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if !args.no_banner {
        output::banner();
    }

    let mode = args.mode().ok_or_else(|| anyhow!("必须指定 --domain、--file 或 --auto 之一"))?;
    let config = args.scan_config();

    println!("{}", format!("并发线程: {}", config.threads).cyan());
    println!("{}", format!("探测超时: {}秒", config.probe_timeout.as_secs()).cyan());
    println!("{}", format!("归档超时: {}秒", config.archive_timeout.as_secs()).cyan());
    if let Some(ref proxy) = config.proxy {
        println!("{}", format!("使用代理: {}", proxy).cyan());
    }
    if config.enumerator.is_some() {
        println!("{}", "子域名来源: 外部枚举工具".cyan());
    }
    if config.insecure {
        println!("{}", "已禁用SSL证书验证".yellow());
    }

    let scanner = Scanner::new(config).context("初始化扫描器失败")?;
    let report = scanner.run(&mode).await?;

    output::run_summary(&report);
    Ok(())
}
