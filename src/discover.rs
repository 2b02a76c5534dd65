use std::collections::BTreeSet;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::archive::ArchiveStore;
use crate::config::EnumeratorConfig;
use crate::domain::normalize_host;
use crate::extract::extract_subdomains;

/// 子域名发现失败，调用方按空集合处理
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("启动子域名枚举工具失败: {0}")]
    Spawn(#[source] io::Error),
    #[error("子域名枚举工具超时（{0:?}）")]
    Timeout(Duration),
    #[error("子域名枚举工具异常退出: {0}")]
    Exit(ExitStatus),
    #[error("子域名枚举命令为空")]
    EmptyCommand,
    #[error("读取归档数据失败: {0}")]
    Store(#[source] io::Error),
}

/// 子域名来源
#[async_trait]
pub trait SubdomainSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// 返回有序去重的子域名，不包含 `domain` 本身
    async fn enumerate(&self, domain: &str) -> Result<BTreeSet<String>, DiscoveryError>;
}

/// 直接从已拉取的归档数据中提取子域名
pub struct ArchiveSubdomains<'a> {
    store: &'a ArchiveStore,
}

impl<'a> ArchiveSubdomains<'a> {
    pub fn new(store: &'a ArchiveStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<'a> SubdomainSource for ArchiveSubdomains<'a> {
    fn name(&self) -> &'static str {
        "archive"
    }

    async fn enumerate(&self, domain: &str) -> Result<BTreeSet<String>, DiscoveryError> {
        let lines = self.store.lines().await.map_err(DiscoveryError::Store)?;
        extract_subdomains(lines, domain)
            .await
            .map_err(DiscoveryError::Store)
    }
}

/// 调用外部子域名枚举工具（默认 SubEvil），从标准输出逐行读取
pub struct ExternalEnumerator {
    config: EnumeratorConfig,
}

impl ExternalEnumerator {
    pub fn new(config: EnumeratorConfig) -> Self {
        Self { config }
    }

    fn command(&self, domain: &str) -> Result<Command, DiscoveryError> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or(DiscoveryError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args).arg("-d").arg(domain);
        if !self.config.ports.is_empty() {
            let ports: Vec<String> = self.config.ports.iter().map(u16::to_string).collect();
            cmd.arg("-p").arg(ports.join(","));
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl SubdomainSource for ExternalEnumerator {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn enumerate(&self, domain: &str) -> Result<BTreeSet<String>, DiscoveryError> {
        let domain = normalize_host(domain);
        let mut cmd = self.command(&domain)?;
        debug!(?cmd, "启动外部子域名枚举工具");

        let output = tokio::time::timeout(self.config.timeout, cmd.output())
            .await
            .map_err(|_| DiscoveryError::Timeout(self.config.timeout))?
            .map_err(DiscoveryError::Spawn)?;

        if !output.status.success() {
            return Err(DiscoveryError::Exit(output.status));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(filter_enumerated(&stdout, &domain))
    }
}

/// 只保留形如 `<label>.<domain>` 的行
pub fn filter_enumerated(output: &str, domain: &str) -> BTreeSet<String> {
    let pattern = format!(r"^[a-z0-9.-]+\.{}$", regex::escape(domain));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(_) => return BTreeSet::new(),
    };

    output
        .lines()
        .map(normalize_host)
        .filter(|line| re.is_match(line) && line != domain)
        .collect()
}
