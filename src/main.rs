//! hf-fast 命令行入口：拉取元数据 → 筛选文件 → 并发下载（或 `--check` 校验本地文件）。

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use hf_fast::base_system::config::load_or_create;
use hf_fast::base_system::logging::{LogOptions, LogSystem};
use hf_fast::download::report::{discrepancy_lines, format_size, summary_lines};
use hf_fast::download::{
    DownloadCoordinator, FileSelector, ProgressReporter, RepoKind, RepoRef, aggregate_size,
    fetch_metadata, verify,
};
use hf_fast::network::Transport;
use hf_fast::{Config, StopSignal};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "hf-fast", version)]
#[command(about = "从 Hugging Face 兼容仓库并发下载文件，支持断点续传与镜像加速")]
#[command(after_help = "示例:
  hf-fast gpt2                              # 下载 gpt2 模型
  hf-fast -d squad                          # 下载 squad 数据集
  hf-fast -i '\\.bin$' -e '\\.md$' gpt2      # 只下载 .bin 文件，排除 .md 文件
  hf-fast -t $HF_TOKEN -j 8 llama-2         # 使用令牌下载，8 线程
  hf-fast --check gpt2                      # 检查本地文件")]
struct Cli {
    /// 仓库 ID（例如 gpt2 或 username/repo_name）
    repo_id: String,

    /// 包含与正则匹配的文件（可多次使用）
    #[arg(short, long)]
    include: Vec<String>,

    /// 排除与正则匹配的文件（可多次使用）
    #[arg(short, long)]
    exclude: Vec<String>,

    /// 访问私有仓库的令牌
    #[arg(short, long, env = "HF_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// 仓库修订/标签（默认取配置文件，初始为 main）
    #[arg(short, long)]
    revision: Option<String>,

    /// 下载数据集而不是模型
    #[arg(short, long, default_value_t = false)]
    dataset: bool,

    /// 并发下载数（默认取配置文件）
    #[arg(short, long)]
    jobs: Option<usize>,

    /// 输出目录（默认：仓库名最后一段）
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// API 端点（默认取配置文件）
    #[arg(long)]
    endpoint: Option<String>,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 只检查本地文件，不下载
    #[arg(long, default_value_t = false)]
    check: bool,

    /// 数据目录路径（存放 config.yml 与 logs）
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log = match init_logging(cli.debug, cli.data_dir.as_deref()) {
        Ok(log) => Some(log),
        Err(err) => {
            eprintln!("日志初始化失败: {err:#}");
            None
        }
    };

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!(target: "startup", "{err:#}");
            eprintln!("发生错误: {err:#}");
            ExitCode::FAILURE
        }
    };

    drop(log);
    code
}

fn run(cli: Cli) -> Result<ExitCode> {
    info!(target: "startup", "hf-fast v{VERSION}");

    let mut config: Config =
        load_or_create(cli.data_dir.as_deref()).context("加载配置文件失败")?;
    apply_overrides(&mut config, &cli);

    let stop = StopSignal::new();
    if let Err(err) = stop.install_ctrlc_handler() {
        warn!(target: "startup", error = %err, "无法注册中断信号处理");
    }

    let kind = if cli.dataset {
        RepoKind::Dataset
    } else {
        RepoKind::Model
    };
    let repo = RepoRef::new(cli.repo_id.trim(), config.revision.clone(), kind);
    let output_dir = resolve_output_dir(&config, &repo, cli.output.as_deref());
    let token = cli.token.as_deref().map(str::trim).filter(|t| !t.is_empty());

    let transport = Transport::new(&config, stop.clone()).context("初始化 HTTP 客户端")?;
    let metadata = fetch_metadata(&transport, config.endpoint_base(), &repo, token)
        .context("无法获取元数据")?;

    let selector = FileSelector::new(&cli.include, &cli.exclude).context("文件匹配模式无效")?;
    let files = selector.select(&metadata, &repo, config.endpoint_base());
    if files.is_empty() {
        println!("没有要下载的文件。");
        return Ok(ExitCode::FAILURE);
    }

    let total_size = aggregate_size(&metadata, &files);
    if total_size > 0 {
        println!("找到 {} 个文件，总大小: {}", files.len(), format_size(total_size));
    } else {
        println!("找到 {} 个文件，总大小未知", files.len());
    }

    if cli.check {
        let found = verify(&files, &output_dir).context("检查本地文件")?;
        for line in discrepancy_lines(&found) {
            println!("{line}");
        }
        return Ok(if found.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    info!(
        target: "startup",
        %repo,
        output = %output_dir.display(),
        jobs = config.max_workers,
        "开始下载"
    );
    let coordinator = DownloadCoordinator::new(&transport, &config, ProgressReporter::cli());
    let tally = coordinator.download_all(&files, &output_dir, token, config.max_workers, &stop);

    println!();
    for line in summary_lines(&tally) {
        println!("{line}");
    }

    if stop.is_stopped() {
        println!("用户中断下载，已保留部分文件，可重新运行以续传。");
    }

    Ok(if tally.all_succeeded() && !stop.is_stopped() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(endpoint) = cli.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
        config.endpoint = endpoint.trim().to_string();
    }
    if let Some(revision) = cli.revision.as_deref().filter(|r| !r.trim().is_empty()) {
        config.revision = revision.trim().to_string();
    }
    if let Some(jobs) = cli.jobs {
        config.max_workers = jobs;
    }
    config.max_workers = config.max_workers.max(1);
}

fn resolve_output_dir(config: &Config, repo: &RepoRef, output: Option<&Path>) -> PathBuf {
    match output {
        Some(dir) => dir.to_path_buf(),
        None => config.default_save_dir().join(repo.short_name()),
    }
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        ..LogOptions::default()
    };
    Ok(LogSystem::init_with_base(opts, base_dir)?)
}
