//! DICOM目录扫描程序

use anyhow::{bail, Context, Result};
use catalog_core::{OutputFormat, ScanConfig};
use catalog_dicom::{explore, CaseTree, DicomParser, ExploreEvent, ExploreStatus, TextFilter};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 命令行参数，优先级高于配置文件和环境变量
#[derive(Parser, Debug)]
#[command(name = "catalog-scan")]
#[command(about = "扫描目录树中的DICOM影像并按 患者/检查/序列 输出")]
struct Args {
    /// 扫描根目录
    root: Option<String>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别
    #[arg(short, long)]
    log_level: Option<String>,

    /// 以JSON输出
    #[arg(long)]
    json: bool,

    /// 患者ID过滤，逗号分隔，`-` 开头为排除
    #[arg(long)]
    case_filter: Option<String>,

    /// 检查描述过滤
    #[arg(long)]
    study_filter: Option<String>,

    /// 序列模态过滤
    #[arg(long)]
    series_filter: Option<String>,
}

impl Args {
    fn merge_into(self, config: &mut ScanConfig) {
        if let Some(root) = self.root {
            config.root = root;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        if self.json {
            config.output = OutputFormat::Json;
        }
        if let Some(filter) = self.case_filter {
            config.case_filter = filter;
        }
        if let Some(filter) = self.study_filter {
            config.study_filter = filter;
        }
        if let Some(filter) = self.series_filter {
            config.series_filter = filter;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ScanConfig::load(args.config.as_deref()).context("加载配置失败")?;
    args.merge_into(&mut config);

    // 初始化日志，RUST_LOG 优先
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    config.validate().context("配置无效")?;

    info!("扫描配置:");
    info!("  根目录: {}", config.root);
    info!("  输出格式: {:?}", config.output);

    let cancel = Arc::new(AtomicBool::new(false));
    let ctrl_c_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，停止扫描");
            ctrl_c_flag.store(true, Ordering::Relaxed);
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ExploreEvent::Searching { directory, found } => {
                    if found {
                        info!("Searching in '{}', found DICOM(s)", directory);
                    } else {
                        info!("Searching in '{}'", directory);
                    }
                }
                ExploreEvent::Errors(text) => warn!("{}", text),
            }
        }
    });

    let outcome = explore(PathBuf::from(&config.root), DicomParser::new(), cancel, tx).await?;
    progress.await.context("进度任务异常终止")?;

    let mut tree = CaseTree::from_catalog(&outcome.catalog);
    tree.apply_filters(
        &TextFilter::new(&config.case_filter),
        &TextFilter::new(&config.study_filter),
        &TextFilter::new(&config.series_filter),
    );

    match config.output {
        OutputFormat::Text => println!("{}", tree),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&tree).context("序列化病例树失败")?;
            println!("{}", json);
        }
    }

    match outcome.status {
        ExploreStatus::Success => info!("扫描完成"),
        ExploreStatus::PartialSuccess => warn!("扫描完成，部分文件无法读取"),
        ExploreStatus::Cancelled => warn!("扫描已取消，结果不完整"),
        ExploreStatus::Error(message) => {
            error!("扫描失败: {}", message);
            bail!("扫描失败: {}", message);
        }
    }

    Ok(())
}
