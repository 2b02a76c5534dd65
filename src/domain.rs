use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    #[error("域名格式无效: {0}（示例: example.com）")]
    Invalid(String),
}

static DOMAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Za-z0-9-]+\.)+[A-Za-z]{2,}$").expect("域名正则无效"));

/// 主机名规范化：转小写并去掉末尾的点。
/// 所有主机名比较都以这里的结果为准。
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// 校验域名格式，返回规范化后的域名
pub fn validate_domain(domain: &str) -> Result<String, DomainError> {
    let domain = domain.trim();
    if DOMAIN_RE.is_match(domain) {
        Ok(normalize_host(domain))
    } else {
        Err(DomainError::Invalid(domain.to_string()))
    }
}

/// 可注册后缀：取最后两段标签，如 foo.example.com -> example.com
pub fn registrable_suffix(domain: &str) -> String {
    let labels: Vec<&str> = domain.split('.').collect();
    let start = labels.len().saturating_sub(2);
    labels[start..].join(".")
}

/// 一条归档记录解析后的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedUrl {
    pub host: String,
    pub path: String,
}

impl ArchivedUrl {
    /// 解析失败或没有主机名的行返回 None
    pub fn parse(line: &str) -> Option<Self> {
        let url = Url::parse(line.trim()).ok()?;
        let host = normalize_host(url.host_str()?);
        if host.is_empty() {
            return None;
        }
        Some(Self {
            host,
            path: url.path().to_string(),
        })
    }
}
