use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Parser};

pub const DEFAULT_ARCHIVE_URL: &str = "https://web.archive.org/cdx/search/cdx";
pub const DEFAULT_ENUMERATOR_CMD: &str = "python3 SubEvil.py -ra";

/// 基于 Wayback Machine 历史数据的目录列表探测工具
#[derive(Parser, Debug)]
#[command(
    name = "waybacklister",
    version,
    about = "基于 Wayback Machine 历史数据的目录列表探测工具",
    long_about = "从 Wayback Machine 归档索引中提取目标域名的历史路径，\n\
                  并发探测这些路径是否开启了目录列表（Index of /）。\n\
                  特性：\n\
                  - 单域名 / 域名文件 / 自动发现子域名 三种模式\n\
                  - 可选外部子域名枚举工具\n\
                  - 支持多线程并发探测\n\
                  - 随机 User-Agent\n\
                  - 支持自定义代理\n\
                  - 彩色输出结果"
)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["domain", "file", "auto"]),
))]
pub struct Args {
    /// 单个目标域名（例如：example.com）
    #[arg(short, long)]
    pub domain: Option<String>,

    /// 域名列表文件，每行一个域名
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// 自动发现子域名并逐个探测
    #[arg(short, long)]
    pub auto: Option<String>,

    /// 并发探测的线程数
    #[arg(
        short = 't',
        long = "threads",
        default_value_t = 10,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub threads: u16,

    /// 使用外部子域名枚举工具代替归档数据
    #[arg(long = "use-enumerator", alias = "use-subevil")]
    pub use_enumerator: bool,

    /// 外部子域名枚举命令，域名以 -d 参数追加
    #[arg(long = "enumerator-cmd", default_value = DEFAULT_ENUMERATOR_CMD)]
    pub enumerator_cmd: String,

    /// 外部子域名枚举工具超时时间（秒）
    #[arg(long = "enumerator-timeout", default_value_t = 120)]
    pub enumerator_timeout: u64,

    /// 传给外部枚举工具的端口列表（例如：80,443）
    #[arg(short, long, value_delimiter = ',', requires = "use_enumerator")]
    pub ports: Vec<u16>,

    /// 自动模式下保存目标列表的文件
    #[arg(long = "out-sub")]
    pub out_sub: Option<PathBuf>,

    /// 保存发现的目录列表 URL 的文件
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// 单次探测请求超时时间（秒）
    #[arg(short = 'w', long, default_value_t = 7)]
    pub timeout: u64,

    /// 归档索引请求超时时间（秒）
    #[arg(long = "archive-timeout", default_value_t = 10)]
    pub archive_timeout: u64,

    /// 连接超时时间（秒）
    #[arg(short = 'c', long = "connect-timeout", default_value_t = 5)]
    pub connect_timeout: u64,

    /// 代理服务器地址（例如：socks5://127.0.0.1:1080）
    #[arg(long)]
    pub proxy: Option<String>,

    /// 禁用SSL证书验证
    #[arg(short = 'k', long)]
    pub insecure: bool,

    /// 固定探测请求的 User-Agent，默认每次随机
    #[arg(short = 'A', long = "user-agent")]
    pub user_agent: Option<String>,

    /// 归档索引（CDX）地址
    #[arg(long = "archive-url", default_value = DEFAULT_ARCHIVE_URL)]
    pub archive_url: String,

    /// 日志详细程度（-v, -vv, -vvv）
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// 不显示启动横幅
    #[arg(long = "no-banner")]
    pub no_banner: bool,
}

/// 运行模式，三选一
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Domain(String),
    File(PathBuf),
    Auto(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratorConfig {
    pub command: Vec<String>,
    pub ports: Vec<u16>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub threads: usize,
    pub probe_timeout: Duration,
    pub archive_timeout: Duration,
    pub connect_timeout: Duration,
    pub proxy: Option<String>,
    pub insecure: bool,
    pub user_agent: Option<String>,
    pub archive_url: String,
    /// 为 None 时从归档数据中提取子域名
    pub enumerator: Option<EnumeratorConfig>,
    pub subdomain_output: Option<PathBuf>,
    pub results_output: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threads: 10,
            probe_timeout: Duration::from_secs(7),
            archive_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            proxy: None,
            insecure: false,
            user_agent: None,
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            enumerator: None,
            subdomain_output: None,
            results_output: None,
        }
    }
}

impl Args {
    pub fn mode(&self) -> Option<Mode> {
        if let Some(ref domain) = self.domain {
            Some(Mode::Domain(domain.clone()))
        } else if let Some(ref file) = self.file {
            Some(Mode::File(file.clone()))
        } else {
            self.auto.clone().map(Mode::Auto)
        }
    }

    pub fn scan_config(&self) -> ScanConfig {
        let enumerator = self.use_enumerator.then(|| EnumeratorConfig {
            command: self
                .enumerator_cmd
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            ports: self.ports.clone(),
            timeout: Duration::from_secs(self.enumerator_timeout),
        });

        ScanConfig {
            threads: usize::from(self.threads),
            probe_timeout: Duration::from_secs(self.timeout),
            archive_timeout: Duration::from_secs(self.archive_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            proxy: self.proxy.clone(),
            insecure: self.insecure,
            user_agent: self.user_agent.clone(),
            archive_url: self.archive_url.clone(),
            enumerator,
            subdomain_output: self.out_sub.clone(),
            results_output: self.output.clone(),
        }
    }
}
