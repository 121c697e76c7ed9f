use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use thorium_uploader::{
    api::Origin,
    config::{AppConfig, DEFAULT_CONFIG_PATH},
    events::UploadEvent,
    logging,
    uploader::{format_bytes, BatchMetadata, BatchOrchestrator, FolderScanner, ScanOptions},
    PipelineSelection, ThoriumClient,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "thorium-upload",
    version,
    about = "批量上传样本到 Thorium 并为每个样本提交分析流水线"
)]
struct Cli {
    /// 配置文件路径
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 上传文件或文件夹
    Upload(UploadArgs),
    /// 写出默认配置文件
    InitConfig,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// 要上传的文件或文件夹
    #[arg(required = true)]
    paths: Vec<PathBuf>,
    /// 样本所属分组（可重复）
    #[arg(short, long = "group")]
    groups: Vec<String>,
    /// 标签 key=value（可重复）
    #[arg(short, long = "tag", value_parser = parse_tag)]
    tags: Vec<(String, String)>,
    /// 样本描述
    #[arg(short, long)]
    description: Option<String>,
    /// 上传后提交的流水线 name@group（可重复）
    #[arg(short, long = "pipeline")]
    pipelines: Vec<PipelineSelection>,
    /// 来源：下载地址
    #[arg(long, conflicts_with_all = ["origin_parent", "incident"])]
    origin_url: Option<String>,
    /// 来源：下载时的站点名
    #[arg(long, requires = "origin_url")]
    origin_name: Option<String>,
    /// 来源：解包前的父样本 sha256
    #[arg(long, conflicts_with = "incident")]
    origin_parent: Option<String>,
    /// 来源：解包工具
    #[arg(long, requires = "origin_parent")]
    origin_tool: Option<String>,
    /// 来源：安全事件编号
    #[arg(long)]
    incident: Option<String>,
    /// 最大并发上传数，覆盖配置文件
    #[arg(long)]
    concurrency: Option<usize>,
    /// 触发深度，覆盖配置文件
    #[arg(long)]
    trigger_depth: Option<u8>,
    /// 只上传名称匹配这些正则的文件（可重复）
    #[arg(long = "filter")]
    filters: Vec<String>,
    /// 跳过名称匹配这些正则的文件（可重复）
    #[arg(long = "skip")]
    skips: Vec<String>,
    /// 包含 / 跳过规则同样作用于文件夹
    #[arg(long)]
    filter_dirs: bool,
    /// 按目录层级依次作为这些 key 的标签值
    #[arg(long, value_delimiter = ',')]
    folder_tags: Vec<String>,
    /// 结束后对失败的上传和反应重试一轮
    #[arg(long)]
    retry: bool,
    /// Thorium 地址，覆盖配置文件
    #[arg(long, env = "THORIUM_HOST")]
    host: Option<String>,
    /// authorization 头的值，覆盖配置文件
    #[arg(long, env = "THORIUM_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

impl UploadArgs {
    fn origin(&self) -> Option<Origin> {
        if let Some(url) = &self.origin_url {
            return Some(Origin::Downloaded {
                url: url.clone(),
                name: self.origin_name.clone(),
            });
        }
        if let Some(parent) = &self.origin_parent {
            return Some(Origin::Unpacked {
                parent: parent.clone(),
                tool: self.origin_tool.clone(),
                flags: Vec::new(),
            });
        }
        self.incident.as_ref().map(|incident| Origin::Incident {
            incident: incident.clone(),
            cover_term: None,
            mission_team: None,
            network: None,
            machine: None,
            location: None,
        })
    }

    fn scan_options(&self, config: &AppConfig) -> anyhow::Result<ScanOptions> {
        let options = ScanOptions {
            filter_dirs: self.filter_dirs,
            folder_tags: self.folder_tags.clone(),
            ..ScanOptions::from(&config.upload)
        };
        options.with_patterns(&self.filters, &self.skips)
    }

    fn tags(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut tags: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (key, value) in &self.tags {
            tags.entry(key.clone()).or_default().insert(value.clone());
        }
        tags
    }
}

/// 解析 key=value 形式的标签
fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("标签格式应为 key=value: {}", raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 先加载配置，日志初始化后再报告加载结果
    let loaded = AppConfig::load_from_file(&cli.config).await;
    let config = loaded.as_ref().ok().cloned().unwrap_or_default();
    let _log_guard = logging::init_logging(&config.log);
    if let Err(e) = &loaded {
        warn!("配置文件加载失败，使用默认配置: {:#}", e);
    }

    match cli.command {
        Commands::Upload(args) => run_upload(config, args).await,
        Commands::InitConfig => config.save_to_file(&cli.config).await,
    }
}

async fn run_upload(mut config: AppConfig, args: UploadArgs) -> anyhow::Result<()> {
    if let Some(host) = &args.host {
        config.api.host = host.clone();
    }
    if let Some(token) = &args.token {
        config.api.token = token.clone();
    }
    if let Some(concurrency) = args.concurrency {
        config.upload.max_concurrent_uploads = concurrency;
    }
    if let Some(depth) = args.trigger_depth {
        config.upload.trigger_depth = depth;
    }
    config.validate().context("配置校验失败")?;

    let scanner = FolderScanner::with_options(args.scan_options(&config)?);
    let files = scanner.expand(&args.paths)?;
    info!(
        "待上传文件: {} 个，总大小 {}",
        files.len(),
        format_bytes(files.iter().map(|f| f.size).sum())
    );

    let client = Arc::new(ThoriumClient::new(&config.api)?);
    let orchestrator = BatchOrchestrator::new(client, config.upload.clone());
    let events = orchestrator.subscribe();

    let metadata = BatchMetadata {
        description: args.description.clone(),
        groups: args.groups.clone(),
        tags: args.tags(),
        origin: args.origin(),
        trigger_depth: config.upload.trigger_depth,
    };
    let batch_id = orchestrator.submit_batch(files, metadata, args.pipelines.clone())?;
    let printer = tokio::spawn(print_events(events, batch_id));

    let interrupted = tokio::select! {
        _ = orchestrator.wait_idle() => false,
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，取消批次...");
            orchestrator.cancel_batch()?;
            orchestrator.wait_idle().await;
            true
        }
    };

    if args.retry && !interrupted {
        let summary = orchestrator.compute_summary();
        if summary.files_failed > 0 || summary.reactions_failed > 0 {
            info!("重试失败的上传和反应");
            orchestrator.retry_all_failed_tasks()?;
            orchestrator.retry_all_failed_reactions()?;
            orchestrator.wait_idle().await;
        }
    }

    let summary = orchestrator.compute_summary();
    printer.abort();

    println!();
    println!(
        "文件: 成功 {} / 失败 {} / 取消 {} / 未完成 {}",
        summary.files_succeeded,
        summary.files_failed,
        summary.files_cancelled,
        summary.files_in_progress
    );
    println!(
        "反应: 成功 {} / 失败 {} / 待提交 {}",
        summary.reactions_succeeded, summary.reactions_failed, summary.reactions_pending
    );

    if summary.files_failed > 0 || summary.reactions_failed > 0 {
        anyhow::bail!("部分文件或反应提交失败");
    }
    Ok(())
}

/// 逐行打印本批次的关键事件
async fn print_events(mut events: broadcast::Receiver<UploadEvent>, batch_id: Uuid) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("事件消费过慢，跳过 {} 条", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        if event.batch_id() != batch_id {
            continue;
        }
        debug!("事件: {}, key={:?}", event.event_type_name(), event.key());
        match event {
            UploadEvent::Uploaded {
                key,
                sha256,
                already_exists: true,
                ..
            } => println!("= 已存在 {} -> {}", key, sha256),
            UploadEvent::Uploaded { key, sha256, .. } => println!("✓ 上传 {} -> {}", key, sha256),
            UploadEvent::UploadFailed { key, error, .. } => println!("✗ 上传 {}: {}", key, error),
            UploadEvent::Cancelled { key, .. } => println!("- 取消 {}", key),
            UploadEvent::ReactionSubmitted {
                key,
                pipeline,
                reaction_id,
                ..
            } => println!("  ✓ {} [{}] 反应 {}", key, pipeline, reaction_id),
            UploadEvent::ReactionFailed {
                key,
                pipeline,
                error,
                ..
            } => println!("  ✗ {} [{}]: {}", key, pipeline, error),
            _ => {}
        }
    }
}
