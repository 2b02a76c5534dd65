use std::collections::BTreeSet;
use std::future::Future;

use anyhow::{anyhow, Result};
use futures::{pin_mut, Stream, StreamExt};
use rand::seq::SliceRandom;
use reqwest::{Client, Proxy, StatusCode};
use tracing::debug;

use crate::config::ScanConfig;

/// 目录列表页面特征，不区分大小写
pub const LISTING_SIGNATURES: &[&str] = &[
    "index of",
    "directory listing",
    "parent directory",
    "<title>index of",
];

/// 先 https 后 http，命中即停
const SCHEMES: [&str; 2] = ["https", "http"];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/91.0.864.59",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/95.0.4638.69 Safari/537.36 Edge/95.0.1020.40",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:94.0) Gecko/20100101 Firefox/94.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:45.0) Gecko/20100101 Firefox/45.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:100.0) Gecko/20100101 Firefox/100.0",
];

fn get_random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

pub fn looks_like_listing(body: &str) -> bool {
    let body = body.to_lowercase();
    LISTING_SIGNATURES.iter().any(|sig| body.contains(sig))
}

/// 以最多 `width` 个并发执行 `f`，按完成顺序产出结果
pub fn run_bounded<I, F, Fut>(items: I, width: usize, f: F) -> impl Stream<Item = Fut::Output>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future,
{
    futures::stream::iter(items).map(f).buffer_unordered(width.max(1))
}

/// 目录列表探测器
pub struct ListingProber {
    client: Client,
    width: usize,
    user_agent: Option<String>,
}

impl ListingProber {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let mut client_builder = Client::builder()
            .timeout(config.probe_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(get_random_user_agent())
            .danger_accept_invalid_certs(config.insecure);

        // 代理实现
        if let Some(ref proxy_url) = config.proxy {
            let proxy = Proxy::all(proxy_url).map_err(|e| anyhow!("代理设置错误: {}", e))?;
            client_builder = client_builder.proxy(proxy);
        }

        let client = client_builder
            .build()
            .map_err(|e| anyhow!("HTTP客户端创建失败: {}", e))?;

        Ok(Self {
            client,
            width: config.threads.max(1),
            user_agent: config.user_agent.clone(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn user_agent(&self) -> &str {
        self.user_agent
            .as_deref()
            .unwrap_or_else(|| get_random_user_agent())
    }

    /// 单次请求。200 且命中特征时返回 true，网络错误向上返回
    async fn attempt(&self, url: &str) -> reqwest::Result<bool> {
        let resp = self
            .client
            .get(url)
            .header("User-Agent", self.user_agent())
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Ok(false);
        }
        let content = resp.text().await?;
        Ok(looks_like_listing(&content))
    }

    /// 探测 `<scheme>://<host><path>`，返回第一个命中的 URL
    pub async fn probe(&self, host: &str, path: &str) -> Option<String> {
        self.probe_schemes(host, path, &SCHEMES).await
    }

    async fn probe_schemes(&self, host: &str, path: &str, schemes: &[&str]) -> Option<String> {
        for scheme in schemes {
            let url = format!("{}://{}{}", scheme, host, path);
            match self.attempt(&url).await {
                Ok(true) => return Some(url),
                Ok(false) => {}
                Err(e) => {
                    let reason = if e.is_timeout() {
                        "请求超时"
                    } else if e.is_connect() {
                        "连接失败"
                    } else {
                        "请求失败"
                    };
                    debug!(%url, error = %e, "{}", reason);
                }
            }
        }
        None
    }

    /// 并发探测 `host` 下的所有路径。
    /// 每发现一个就调用 `on_found`，最终结果按 URL 排序。
    pub async fn probe_all<F>(
        &self,
        host: &str,
        paths: &BTreeSet<String>,
        mut on_found: F,
    ) -> Vec<String>
    where
        F: FnMut(&str),
    {
        let results = run_bounded(paths, self.width, |path| self.probe(host, path));
        pin_mut!(results);

        let mut found = Vec::new();
        while let Some(result) = results.next().await {
            if let Some(url) = result {
                on_found(&url);
                found.push(url);
            }
        }
        found.sort();
        found
    }
}
