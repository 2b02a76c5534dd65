use std::io;
use std::path::Path;
use std::time::Duration;

use async_stream::try_stream;
use futures::{pin_mut, Stream, StreamExt};
use reqwest::{Client, Proxy, Response, StatusCode};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, warn};

use crate::config::ScanConfig;

const ARCHIVE_USER_AGENT: &str = concat!("waybacklister/", env!("CARGO_PKG_VERSION"));

/// 单行上限，超出的行视为畸形数据丢弃
const MAX_LINE_BYTES: usize = 64 * 1024;

/// 归档索引拉取失败
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("请求归档索引失败: {0}")]
    Request(#[from] reqwest::Error),
    #[error("归档索引超过 {0:?} 没有响应")]
    Timeout(Duration),
    #[error("归档索引返回异常状态码: {0}")]
    Status(StatusCode),
    #[error("写入临时归档文件失败: {0}")]
    Io(#[from] io::Error),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Timeout(_) => true,
            FetchError::Request(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// 查询归档索引，把结果逐行写入临时文件
pub struct ArchiveFetcher {
    client: Client,
    endpoint: String,
    idle_timeout: Duration,
}

impl ArchiveFetcher {
    pub fn new(config: &ScanConfig) -> anyhow::Result<Self> {
        // 不设整体超时：大归档可能持续传输很久，超时只作用于等待响应头和每次读取
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(ARCHIVE_USER_AGENT);

        if let Some(ref proxy_url) = config.proxy {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| anyhow::anyhow!("代理设置错误: {}", e))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| anyhow::anyhow!("HTTP客户端创建失败: {}", e))?;

        Ok(Self {
            client,
            endpoint: config.archive_url.clone(),
            idle_timeout: config.archive_timeout,
        })
    }

    fn query_url(&self, domain: &str) -> String {
        format!(
            "{}?url=*.{}/*&output=txt&fl=original&collapse=urlkey",
            self.endpoint, domain
        )
    }

    /// 拉取 `*.<domain>/*` 下的全部归档 URL。
    /// 响应按流读取，不在内存中整体缓存。
    pub async fn fetch(&self, domain: &str) -> Result<ArchiveStore, FetchError> {
        let url = self.query_url(domain);
        debug!(%url, "查询归档索引");

        let resp = tokio::time::timeout(self.idle_timeout, self.client.get(&url).send())
            .await
            .map_err(|_| FetchError::Timeout(self.idle_timeout))??;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let file = NamedTempFile::new()?;
        let mut writer = BufWriter::new(tokio::fs::File::from_std(file.reopen()?));
        let mut line_count = 0usize;

        let lines = response_lines(resp, self.idle_timeout);
        pin_mut!(lines);
        while let Some(line) = lines.next().await {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            line_count += 1;
        }
        writer.flush().await?;

        debug!(domain, line_count, path = %file.path().display(), "归档数据已写入临时文件");
        Ok(ArchiveStore { file, line_count })
    }
}

/// 把响应体拆成去除首尾空白的行。
/// 两次读取之间超过 `idle` 视为超时。
fn response_lines(resp: Response, idle: Duration) -> impl Stream<Item = Result<String, FetchError>> {
    try_stream! {
        let mut body = resp.bytes_stream();
        let mut splitter = LineSplitter::default();
        loop {
            let chunk = match tokio::time::timeout(idle, body.next()).await {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => break,
                Err(_) => Err::<_, FetchError>(FetchError::Timeout(idle))?,
            };
            for line in splitter.push(&chunk) {
                yield line;
            }
        }
        if let Some(line) = splitter.finish() {
            yield line;
        }
    }
}

#[derive(Default)]
struct LineSplitter {
    pending: Vec<u8>,
    overlong: bool,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for part in chunk.split_inclusive(|b| *b == b'\n') {
            if !self.overlong {
                self.pending.extend_from_slice(part);
                if self.pending.len() > MAX_LINE_BYTES {
                    debug!(limit = MAX_LINE_BYTES, "归档行过长，已丢弃");
                    self.pending.clear();
                    self.overlong = true;
                }
            }
            if part.ends_with(b"\n") {
                if !self.overlong {
                    lines.push(String::from_utf8_lossy(&self.pending).trim().to_string());
                }
                self.pending.clear();
                self.overlong = false;
            }
        }
        lines
    }

    fn finish(self) -> Option<String> {
        if self.overlong || self.pending.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&self.pending).trim().to_string())
    }
}

/// 单次拉取得到的临时归档文件，一行一个 URL。
/// 写入完成后只读；drop 时删除文件。
pub struct ArchiveStore {
    file: NamedTempFile,
    line_count: usize,
}

impl ArchiveStore {
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn is_empty(&self) -> bool {
        self.line_count == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// 从头读取所有行，可多次调用
    pub async fn lines(&self) -> io::Result<impl Stream<Item = io::Result<String>>> {
        let file = tokio::fs::File::open(self.path()).await?;
        Ok(LinesStream::new(BufReader::new(file).lines()))
    }

    /// 删除临时文件；失败只记录日志
    pub fn release(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            warn!(path = %path.display(), error = %e, "删除临时归档文件失败");
        }
    }

    #[cfg(test)]
    pub fn from_lines(lines: &[&str]) -> io::Result<Self> {
        use std::io::Write;

        let mut file = NamedTempFile::new()?;
        for line in lines {
            writeln!(file, "{}", line)?;
        }
        file.flush()?;
        Ok(Self {
            file,
            line_count: lines.len(),
        })
    }
}
