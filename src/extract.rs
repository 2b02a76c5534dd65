use std::collections::BTreeSet;
use std::io;

use futures::{pin_mut, Stream, StreamExt};

use crate::domain::{normalize_host, registrable_suffix, ArchivedUrl};

/// 提取主机名与 `target` 完全相同的所有非根路径，结果有序去重
pub async fn extract_paths<S>(lines: S, target: &str) -> io::Result<BTreeSet<String>>
where
    S: Stream<Item = io::Result<String>>,
{
    let target = normalize_host(target);
    let mut paths = BTreeSet::new();

    pin_mut!(lines);
    while let Some(line) = lines.next().await {
        let Some(url) = ArchivedUrl::parse(&line?) else {
            continue;
        };
        if url.host == target && !url.path.is_empty() && url.path != "/" {
            paths.insert(url.path);
        }
    }
    Ok(paths)
}

/// 提取与 `domain` 同属一个可注册后缀的其他主机名
pub async fn extract_subdomains<S>(lines: S, domain: &str) -> io::Result<BTreeSet<String>>
where
    S: Stream<Item = io::Result<String>>,
{
    let domain = normalize_host(domain);
    let suffix = format!(".{}", registrable_suffix(&domain));
    let mut hosts = BTreeSet::new();

    pin_mut!(lines);
    while let Some(line) = lines.next().await {
        let Some(url) = ArchivedUrl::parse(&line?) else {
            continue;
        };
        if url.host.ends_with(&suffix) && url.host != domain {
            hosts.insert(url.host);
        }
    }
    Ok(hosts)
}
