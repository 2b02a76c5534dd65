use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::archive::{ArchiveFetcher, ArchiveStore};
use crate::config::{Mode, ScanConfig};
use crate::discover::{ArchiveSubdomains, ExternalEnumerator, SubdomainSource};
use crate::domain::validate_domain;
use crate::extract::extract_paths;
use crate::probe::ListingProber;

/// 单个域名的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Invalid(String),
    FetchFailed(String),
    /// 归档索引中没有该域名的记录
    NoArchive,
    NoPaths,
    Scanned(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainReport {
    pub domain: String,
    pub outcome: Outcome,
}

impl DomainReport {
    fn new(domain: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            domain: domain.into(),
            outcome,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub domains: Vec<DomainReport>,
}

impl RunReport {
    /// 所有发现的目录列表 URL，有序
    pub fn listings(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = self
            .domains
            .iter()
            .filter_map(|d| match &d.outcome {
                Outcome::Scanned(urls) => Some(urls),
                _ => None,
            })
            .flatten()
            .map(String::as_str)
            .collect();
        urls.sort_unstable();
        urls
    }

    fn push(&mut self, report: DomainReport) {
        output::domain_summary(&report);
        self.domains.push(report);
    }
}

/// 按模式依次处理每个域名：拉取 -> 提取 -> 探测 -> 汇总。
/// 域名之间串行，同一域名内的探测并发。
pub struct Scanner {
    config: ScanConfig,
    fetcher: ArchiveFetcher,
    prober: ListingProber,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Result<Self> {
        let fetcher = ArchiveFetcher::new(&config)?;
        let prober = ListingProber::new(&config)?;
        Ok(Self {
            config,
            fetcher,
            prober,
        })
    }

    pub async fn run(&self, mode: &Mode) -> Result<RunReport> {
        let report = match mode {
            Mode::Domain(domain) => {
                let mut report = RunReport::default();
                report.push(self.scan_domain(domain).await);
                report
            }
            Mode::File(path) => self.scan_file(path).await?,
            Mode::Auto(domain) => self.scan_auto(domain).await?,
        };

        if let Some(ref path) = self.config.results_output {
            output::write_lines(path, report.listings())?;
            output::info(format!("结果已保存到 {}", path.display()));
        }
        Ok(report)
    }

    /// 单域名流程，临时文件在返回前释放
    pub async fn scan_domain(&self, domain: &str) -> DomainReport {
        let domain = match validate_domain(domain) {
            Ok(domain) => domain,
            Err(e) => {
                warn!(domain, "{}", e);
                return DomainReport::new(domain, Outcome::Invalid(e.to_string()));
            }
        };

        let store = match self.fetch(&domain).await {
            Ok(store) => store,
            Err(report) => return report,
        };
        if store.is_empty() {
            store.release();
            return DomainReport::new(domain, Outcome::NoArchive);
        }
        let report = self.scan_target(&store, &domain).await;
        store.release();
        report
    }

    /// 读取域名文件，逐行处理；无效行只告警
    pub async fn scan_file(&self, path: &Path) -> Result<RunReport> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取域名文件失败: {}", path.display()))?;

        let domains: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        output::info(format!("从 {} 读取到 {} 个域名", path.display(), domains.len()));

        let mut report = RunReport::default();
        for domain in domains {
            output::info(format!("文件目标: {}", domain));
            report.push(self.scan_domain(domain).await);
        }
        Ok(report)
    }

    /// 自动模式：只拉取一次 apex 的归档，apex 与所有子域名共用
    pub async fn scan_auto(&self, apex: &str) -> Result<RunReport> {
        let mut report = RunReport::default();
        let apex = match validate_domain(apex) {
            Ok(domain) => domain,
            Err(e) => {
                warn!(domain = apex, "{}", e);
                report.push(DomainReport::new(apex, Outcome::Invalid(e.to_string())));
                return Ok(report);
            }
        };

        output::info(format!("自动模式: {}", apex));
        let store = match self.fetch(&apex).await {
            Ok(store) => store,
            Err(failed) => {
                report.push(failed);
                return Ok(report);
            }
        };
        // 外部枚举工具不依赖归档数据，归档为空时仍然执行
        if store.is_empty() && self.config.enumerator.is_none() {
            store.release();
            report.push(DomainReport::new(apex, Outcome::NoArchive));
            return Ok(report);
        }

        let result = self.scan_targets(&store, &apex, &mut report).await;
        store.release();
        result.map(|_| report)
    }

    async fn scan_targets(
        &self,
        store: &ArchiveStore,
        apex: &str,
        report: &mut RunReport,
    ) -> Result<()> {
        let subdomains = self.discover(store, apex).await;

        let targets: Vec<String> = std::iter::once(apex.to_string())
            .chain(subdomains)
            .collect();

        if let Some(ref path) = self.config.subdomain_output {
            output::write_lines(path, &targets)?;
            output::info(format!("子域名已保存到 {}", path.display()));
        }
        output::info(format!("目标: {} -> {}", targets.len(), targets.join(", ")));

        for target in &targets {
            report.push(self.scan_target(store, target).await);
        }
        Ok(())
    }

    /// 发现失败时返回空集合
    async fn discover(&self, store: &ArchiveStore, apex: &str) -> BTreeSet<String> {
        let source: Box<dyn SubdomainSource + '_> = match self.config.enumerator {
            Some(ref enumerator) => Box::new(ExternalEnumerator::new(enumerator.clone())),
            None => Box::new(ArchiveSubdomains::new(store)),
        };

        output::info(format!("使用 {} 来源发现 {} 的子域名", source.name(), apex));
        match source.enumerate(apex).await {
            Ok(subdomains) => {
                info!(
                    domain = apex,
                    source = source.name(),
                    count = subdomains.len(),
                    "子域名发现完成"
                );
                subdomains
            }
            Err(e) => {
                warn!(
                    domain = apex,
                    source = source.name(),
                    error = %e,
                    "子域名发现失败，仅探测主域名"
                );
                BTreeSet::new()
            }
        }
    }

    async fn fetch(&self, domain: &str) -> std::result::Result<ArchiveStore, DomainReport> {
        output::info(format!("正在查询 Wayback Machine: {}", domain));
        match self.fetcher.fetch(domain).await {
            Ok(store) => {
                output::info(format!("共获取 {} 条归档 URL", store.line_count()));
                Ok(store)
            }
            Err(e) if e.is_timeout() => {
                warn!(domain, error = %e, "归档索引请求超时，跳过该域名");
                Err(DomainReport::new(domain, Outcome::FetchFailed(e.to_string())))
            }
            Err(e) => {
                warn!(domain, error = %e, "归档数据拉取失败，跳过该域名");
                Err(DomainReport::new(domain, Outcome::FetchFailed(e.to_string())))
            }
        }
    }

    /// 从共享归档中提取 `target` 的路径并探测
    async fn scan_target(&self, store: &ArchiveStore, target: &str) -> DomainReport {
        let paths = match store.lines().await {
            Ok(lines) => extract_paths(lines, target).await,
            Err(e) => Err(e),
        };
        let paths = match paths {
            Ok(paths) => paths,
            Err(e) => {
                warn!(domain = target, error = %e, "读取临时归档文件失败");
                return DomainReport::new(target, Outcome::FetchFailed(e.to_string()));
            }
        };

        output::info(format!(
            "处理 {}，共 {} 个路径，并发 {}",
            target,
            paths.len(),
            self.prober.width()
        ));
        if paths.is_empty() {
            return DomainReport::new(target, Outcome::NoPaths);
        }

        let found = self.prober.probe_all(target, &paths, output::found).await;
        DomainReport::new(target, Outcome::Scanned(found))
    }
}

/// 终端输出与结果文件
pub mod output {
    use std::fs::File;
    use std::io::{BufWriter, Write};
    use std::path::Path;

    use anyhow::{Context, Result};
    use colored::*;

    use super::{DomainReport, Outcome, RunReport};

    const BANNER: &str = r"
 __          __         _                _    _      _     _
 \ \        / /        | |              | |  | |    (_)   | |
  \ \  /\  / /_ _ _   _| |__   __ _  ___| | _| |     _ ___| |_ ___ _ __
   \ \/  \/ / _` | | | | '_ \ / _` |/ __| |/ / |    | / __| __/ _ \ '__|
    \  /\  / (_| | |_| | |_) | (_| | (__|   <| |____| \__ \ ||  __/ |
     \/  \/ \__,_|\__, |_.__/ \__,_|\___|_|\_\______|_|___/\__\___|_|
                   __/ |
                  |___/
";

    pub fn banner() {
        println!("{}", BANNER.cyan());
        println!(
            "{}\n",
            format!("  waybacklister v{} - 基于历史归档探测目录列表", env!("CARGO_PKG_VERSION")).bold()
        );
    }

    pub fn info(message: impl AsRef<str>) {
        println!("{}", format!("[+] {}", message.as_ref()).cyan());
    }

    pub fn skip(message: impl AsRef<str>) {
        println!("{}", format!("[-] {}", message.as_ref()).yellow());
    }

    pub fn found(url: &str) {
        println!("{}", format!("[+] 发现目录列表: {}", url).green());
    }

    pub fn domain_summary(report: &DomainReport) {
        match &report.outcome {
            Outcome::Scanned(urls) if !urls.is_empty() => {
                println!("{}", format!("\n{} 的目录列表汇总:", report.domain).magenta());
                for url in urls {
                    println!("  - {}", url);
                }
            }
            Outcome::Scanned(_) => skip(format!("{} 未发现目录列表", report.domain)),
            Outcome::NoPaths => skip(format!("{} 没有可检查的路径", report.domain)),
            Outcome::NoArchive => skip(format!("{} 没有归档数据，已跳过", report.domain)),
            Outcome::FetchFailed(reason) => {
                skip(format!("{} 归档数据拉取失败，已跳过: {}", report.domain, reason))
            }
            Outcome::Invalid(reason) => skip(format!("跳过无效域名: {}", reason)),
        }
    }

    /// 最终汇总，每个域名一行
    pub fn run_summary(report: &RunReport) {
        println!("{}", "\n========== 扫描完成 ==========".green().bold());
        for domain in &report.domains {
            let line = match &domain.outcome {
                Outcome::Scanned(urls) if !urls.is_empty() => {
                    format!("{:<40} {} 个目录列表", domain.domain, urls.len()).red()
                }
                Outcome::Scanned(_) => format!("{:<40} 无", domain.domain).normal(),
                Outcome::NoPaths => format!("{:<40} 无路径", domain.domain).normal(),
                Outcome::NoArchive => format!("{:<40} 无归档数据", domain.domain).normal(),
                Outcome::FetchFailed(_) => format!("{:<40} 拉取失败", domain.domain).yellow(),
                Outcome::Invalid(_) => format!("{:<40} 格式无效", domain.domain).yellow(),
            };
            println!("{}", line);
        }
        for url in report.listings() {
            println!("{}", url.red());
        }
    }

    /// 一行一个写入文件，覆盖已有内容
    pub fn write_lines<I, S>(path: &Path, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let file = File::create(path)
            .with_context(|| format!("创建输出文件失败: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for line in lines {
            writeln!(writer, "{}", line.as_ref())
                .with_context(|| format!("写入结果到文件失败: {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("写入结果到文件失败: {}", path.display()))?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ScanConfig {
        ScanConfig {
            archive_url: format!("{}/cdx", server.uri()),
            archive_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            threads: 4,
            ..ScanConfig::default()
        }
    }

    async fn mount_archive(server: &MockServer, domain: &str, body: &str, expected: u64) {
        Mock::given(method("GET"))
            .and(path("/cdx"))
            .and(query_param("url", format!("*.{}/*", domain)))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_invalid_domain_is_reported() {
        let server = MockServer::start().await;
        let scanner = Scanner::new(config_for(&server)).unwrap();

        let report = scanner.scan_domain("not_a_domain").await;
        assert_eq!(report.domain, "not_a_domain");
        assert!(matches!(report.outcome, Outcome::Invalid(_)));
    }

    #[tokio::test]
    async fn test_file_mode_skips_malformed_entries() {
        let server = MockServer::start().await;
        mount_archive(&server, "a.example.test", "", 1).await;
        mount_archive(&server, "b.example.test", "https://b.example.test/", 1).await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a.example.test\n\n  not_a_domain  \nB.Example.test").unwrap();

        let scanner = Scanner::new(config_for(&server)).unwrap();
        let report = scanner.scan_file(file.path()).await.unwrap();

        assert_eq!(
            report.domains,
            vec![
                DomainReport::new("a.example.test", Outcome::NoArchive),
                DomainReport::new(
                    "not_a_domain",
                    Outcome::Invalid("域名格式无效: not_a_domain（示例: example.com）".to_string())
                ),
                DomainReport::new("b.example.test", Outcome::NoPaths),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let server = MockServer::start().await;
        let scanner = Scanner::new(config_for(&server)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(scanner.scan_file(&dir.path().join("missing.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_timeout_skips_to_next_domain() {
        let server = MockServer::start().await;
        Mock::given(query_param("url", "*.nonexistent-domain.test/*"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;
        mount_archive(&server, "ok.example.test", "", 1).await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "nonexistent-domain.test\nok.example.test").unwrap();

        let scanner = Scanner::new(config_for(&server)).unwrap();
        let report = scanner.scan_file(file.path()).await.unwrap();

        assert_eq!(report.domains.len(), 2);
        assert!(matches!(report.domains[0].outcome, Outcome::FetchFailed(_)));
        assert_eq!(report.domains[1].domain, "ok.example.test");
    }

    /// 把探测请求经由代理转发到 mock，主机名不需要真实解析
    fn proxied_config(server: &MockServer) -> ScanConfig {
        ScanConfig {
            proxy: Some(server.uri()),
            ..config_for(server)
        }
    }

    async fn mount_listing(server: &MockServer, page: &str) {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<title>Index of /</title>"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_scan_target_reports_found_listing() {
        let server = MockServer::start().await;
        mount_listing(&server, "/files/").await;

        let store = ArchiveStore::from_lines(&[
            "http://listing.test/files/",
            "http://listing.test/files/a.txt",
            "http://listing.test/",
            "http://other.test/files/",
        ])
        .unwrap();

        let scanner = Scanner::new(proxied_config(&server)).unwrap();
        let report = scanner.scan_target(&store, "listing.test").await;
        assert_eq!(
            report,
            DomainReport::new(
                "listing.test",
                Outcome::Scanned(vec!["http://listing.test/files/".to_string()])
            )
        );
        store.release();
    }

    #[tokio::test]
    async fn test_run_writes_sorted_results_file() {
        let server = MockServer::start().await;
        mount_archive(
            &server,
            "listing.test",
            "http://listing.test/files/\nhttp://a.listing.test/backup/\nhttp://listing.test/app/",
            1,
        )
        .await;
        mount_listing(&server, "/files/").await;
        mount_listing(&server, "/backup/").await;

        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("found.txt");
        std::fs::write(&results, "stale\n").unwrap();

        let scanner = Scanner::new(ScanConfig {
            results_output: Some(results.clone()),
            ..proxied_config(&server)
        })
        .unwrap();

        let report = scanner.run(&Mode::Auto("listing.test".into())).await.unwrap();
        assert_eq!(
            report.domains,
            vec![
                DomainReport::new(
                    "listing.test",
                    Outcome::Scanned(vec!["http://listing.test/files/".to_string()])
                ),
                DomainReport::new(
                    "a.listing.test",
                    Outcome::Scanned(vec!["http://a.listing.test/backup/".to_string()])
                ),
            ]
        );
        assert_eq!(
            std::fs::read_to_string(&results).unwrap(),
            "http://a.listing.test/backup/\nhttp://listing.test/files/\n"
        );
    }

    #[tokio::test]
    async fn test_scan_domain_reports_found_listing() {
        let server = MockServer::start().await;
        mount_archive(&server, "listing.test", "http://listing.test/pub/", 1).await;
        mount_listing(&server, "/pub/").await;

        let scanner = Scanner::new(proxied_config(&server)).unwrap();
        let report = scanner.scan_domain("Listing.test").await;
        assert_eq!(
            report.outcome,
            Outcome::Scanned(vec!["http://listing.test/pub/".to_string()])
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_auto_mode_runs_enumerator_on_empty_archive() {
        let server = MockServer::start().await;
        mount_archive(&server, "example.test", "", 1).await;

        let dir = tempfile::tempdir().unwrap();
        let subs = dir.path().join("subs.txt");
        let scanner = Scanner::new(ScanConfig {
            enumerator: Some(crate::config::EnumeratorConfig {
                command: vec![
                    "sh".into(),
                    "-c".into(),
                    r#"echo "www.$2"; echo "dev.$2""#.into(),
                    "enum".into(),
                ],
                ports: vec![],
                timeout: Duration::from_secs(10),
            }),
            subdomain_output: Some(subs.clone()),
            ..config_for(&server)
        })
        .unwrap();

        let report = scanner.scan_auto("example.test").await.unwrap();
        let domains: Vec<&str> = report.domains.iter().map(|d| d.domain.as_str()).collect();
        assert_eq!(domains, vec!["example.test", "dev.example.test", "www.example.test"]);
        assert!(report.domains.iter().all(|d| d.outcome == Outcome::NoPaths));
        assert_eq!(
            std::fs::read_to_string(&subs).unwrap(),
            "example.test\ndev.example.test\nwww.example.test\n"
        );
    }

    #[tokio::test]
    async fn test_auto_mode_empty_archive_without_enumerator() {
        let server = MockServer::start().await;
        mount_archive(&server, "example.test", "", 1).await;

        let dir = tempfile::tempdir().unwrap();
        let subs = dir.path().join("subs.txt");
        let scanner = Scanner::new(ScanConfig {
            subdomain_output: Some(subs.clone()),
            ..config_for(&server)
        })
        .unwrap();

        let report = scanner.scan_auto("example.test").await.unwrap();
        assert_eq!(
            report.domains,
            vec![DomainReport::new("example.test", Outcome::NoArchive)]
        );
        assert!(!subs.exists());
    }

    #[tokio::test]
    async fn test_auto_mode_fetches_once_and_saves_targets() {
        let server = MockServer::start().await;
        mount_archive(
            &server,
            "example.test",
            "https://example.test/\nhttps://sub.example.test/\nhttps://www.example.test\nhttps://other.test/x",
            1,
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let subs = dir.path().join("subs.txt");
        let scanner = Scanner::new(ScanConfig {
            subdomain_output: Some(subs.clone()),
            ..config_for(&server)
        })
        .unwrap();

        let report = scanner.run(&Mode::Auto("example.test".into())).await.unwrap();
        let domains: Vec<&str> = report.domains.iter().map(|d| d.domain.as_str()).collect();
        assert_eq!(domains, vec!["example.test", "sub.example.test", "www.example.test"]);
        assert!(report.domains.iter().all(|d| d.outcome == Outcome::NoPaths));
        assert_eq!(
            std::fs::read_to_string(&subs).unwrap(),
            "example.test\nsub.example.test\nwww.example.test\n"
        );
    }

    #[tokio::test]
    async fn test_auto_mode_enumerator_failure_falls_back_to_apex() {
        let server = MockServer::start().await;
        mount_archive(&server, "example.test", "https://sub.example.test/", 1).await;

        let scanner = Scanner::new(ScanConfig {
            enumerator: Some(crate::config::EnumeratorConfig {
                command: vec!["/nonexistent/subdomain-tool".into()],
                ports: vec![],
                timeout: Duration::from_secs(1),
            }),
            ..config_for(&server)
        })
        .unwrap();

        let report = scanner.scan_auto("example.test").await.unwrap();
        assert_eq!(
            report.domains,
            vec![DomainReport::new("example.test", Outcome::NoPaths)]
        );
    }

    #[test]
    fn test_listings_are_sorted_across_domains() {
        let report = RunReport {
            domains: vec![
                DomainReport::new("b.test", Outcome::Scanned(vec!["https://b.test/z/".into()])),
                DomainReport::new("c.test", Outcome::NoPaths),
                DomainReport::new("a.test", Outcome::Scanned(vec!["http://a.test/x/".into()])),
            ],
        };
        assert_eq!(report.listings(), vec!["http://a.test/x/", "https://b.test/z/"]);
    }
}
