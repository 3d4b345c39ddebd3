//! 后台探索任务
//!
//! 在阻塞线程上把 [`Discovery`] 跑完，每一步通过通道上报进度，调用方可随时取消。

use catalog_core::{Catalog, CatalogError, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

use crate::discovery::{Discovery, Step};
use crate::reader::MetadataReader;

/// 探索进度事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExploreEvent {
    /// 已扫描一个目录
    Searching { directory: String, found: bool },
    /// 本目录产生的诊断信息
    Errors(String),
}

/// 探索结束状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExploreStatus {
    Success,
    /// 完成，但部分文件无法读取
    PartialSuccess,
    Cancelled,
    /// 某一步失败，目录只包含失败前的结果
    Error(String),
}

/// 探索结果
#[derive(Debug, Clone)]
pub struct ExploreOutcome {
    pub status: ExploreStatus,
    pub catalog: Catalog,
}

/// 同步执行探索，每步之前检查取消标志
pub fn run_exploration<R: MetadataReader>(
    root: PathBuf,
    reader: R,
    cancel: &AtomicBool,
    events: &UnboundedSender<ExploreEvent>,
) -> ExploreOutcome {
    info!("开始探索DICOM目录: {:?}", root);

    let mut discovery = Discovery::new(&root, reader);
    let mut status = ExploreStatus::Success;
    let mut directories = 0usize;

    loop {
        if cancel.load(Ordering::Relaxed) {
            info!("探索已取消: {:?}", root);
            status = ExploreStatus::Cancelled;
            break;
        }

        match discovery.step() {
            Ok(Step::Progress(report)) => {
                directories += 1;
                // 接收端关闭时继续扫描，只是不再上报
                let _ = events.send(ExploreEvent::Searching {
                    directory: report.directory,
                    found: report.found_image,
                });
                if !report.diagnostics.is_empty() {
                    status = ExploreStatus::PartialSuccess;
                    let _ = events.send(ExploreEvent::Errors(report.diagnostics));
                }
            }
            Ok(Step::Exhausted) => break,
            Err(e) => {
                error!("探索失败: {}", e);
                let _ = events.send(ExploreEvent::Errors(e.to_string()));
                status = ExploreStatus::Error(e.to_string());
                break;
            }
        }
    }

    let catalog = discovery.into_catalog();
    info!(
        "探索结束: 状态={:?}, 目录数={}, 患者数={}, 影像数={}",
        status,
        directories,
        catalog.patient_count(),
        catalog.len()
    );

    ExploreOutcome { status, catalog }
}

/// 在阻塞线程池上执行探索
pub async fn explore<R>(
    root: PathBuf,
    reader: R,
    cancel: Arc<AtomicBool>,
    events: UnboundedSender<ExploreEvent>,
) -> Result<ExploreOutcome>
where
    R: MetadataReader + Send + 'static,
{
    tokio::task::spawn_blocking(move || run_exploration(root, reader, &cancel, &events))
        .await
        .map_err(|e| CatalogError::Internal(format!("探索任务异常终止: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{Container, ExtractError, ImageAttributes};
    use std::fs;
    use std::path::Path;
    use tokio::sync::mpsc;

    /// `.img` 文件为影像，`.bad` 文件结构损坏
    struct ExtensionReader;

    impl MetadataReader for ExtensionReader {
        fn read(&self, path: &Path) -> std::result::Result<Container, ExtractError> {
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("img") => Ok(Container::Image(ImageAttributes {
                    patient_id: path.file_stem().map(|stem| stem.to_string_lossy().into_owned()),
                    instance_number: Some("1".to_string()),
                    ..Default::default()
                })),
                Some("bad") => Err(ExtractError::Structural("truncated".to_string())),
                _ => Err(ExtractError::NotAContainer),
            }
        }
    }

    #[tokio::test]
    async fn test_explore_success() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("series")).unwrap();
        fs::write(dir.path().join("series").join("12.img"), "").unwrap();
        fs::write(dir.path().join("series").join("3.img"), "").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = explore(dir.path().to_path_buf(), ExtensionReader, cancel, tx)
            .await
            .unwrap();

        assert_eq!(outcome.status, ExploreStatus::Success);
        assert_eq!(outcome.catalog.len(), 2);
        let ids: Vec<_> = outcome
            .catalog
            .list_patients()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["3", "12"]);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                ExploreEvent::Searching {
                    directory: String::new(),
                    found: false
                },
                ExploreEvent::Searching {
                    directory: "series".to_string(),
                    found: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_explore_partial_success() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1.img"), "").unwrap();
        fs::write(dir.path().join("2.bad"), "").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = explore(dir.path().to_path_buf(), ExtensionReader, cancel, tx)
            .await
            .unwrap();

        assert_eq!(outcome.status, ExploreStatus::PartialSuccess);
        assert_eq!(outcome.catalog.len(), 1);

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if let ExploreEvent::Errors(text) = event {
                saw_error = text.contains("2.bad");
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn test_cancelled_before_first_step() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1.img"), "").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = AtomicBool::new(true);
        let outcome = run_exploration(dir.path().to_path_buf(), ExtensionReader, &cancel, &tx);

        assert_eq!(outcome.status, ExploreStatus::Cancelled);
        assert!(outcome.catalog.is_empty());
    }

    #[test]
    fn test_dropped_receiver_does_not_stop_scan() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("5.img"), "").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let outcome = run_exploration(
            dir.path().to_path_buf(),
            ExtensionReader,
            &AtomicBool::new(false),
            &tx,
        );

        assert_eq!(outcome.status, ExploreStatus::Success);
        assert_eq!(outcome.catalog.len(), 1);
    }
}
