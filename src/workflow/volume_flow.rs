//! 单卷处理流程 - 流程层
//!
//! 核心职责：定义"一卷"的完整处理流程
//!
//! 流程顺序：
//! 1. 合并（超限时二分，阻塞 IO 放到 spawn_blocking）
//! 2. 逐个发送输出文件，带超时，失败重试一次
//! 3. 汇总为 `VolumeOutcome`

use crate::error::{DeliveryError, MergeError};
use crate::infrastructure::delivery::Deliverer;
use crate::infrastructure::notifier::{ProgressEvent, ProgressSink};
use crate::models::batch::VolumeOutcome;
use crate::models::chapter::ChapterNumber;
use crate::models::volume::{RangeLabel, Volume};
use crate::services::conversion_driver::ConvertedChapter;
use crate::services::volume_merger::{MergedDocument, VolumeMerger};
use crate::workflow::batch_ctx::BatchCtx;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// 发送的最大尝试次数（首次 + 一次重试）
const DELIVERY_ATTEMPTS: usize = 2;

/// 单卷处理流程
///
/// - 不持有队列，不决定哪些章节可以删除
/// - 单卷失败只影响本卷
pub struct VolumeFlow {
    merger: VolumeMerger,
    deliverer: Arc<dyn Deliverer>,
    delivery_timeout: Duration,
}

impl VolumeFlow {
    pub fn new(merger: VolumeMerger, deliverer: Arc<dyn Deliverer>, delivery_timeout: Duration) -> Self {
        Self {
            merger,
            deliverer,
            delivery_timeout,
        }
    }

    /// 处理一卷；`converted` 为本卷中转换成功的章节（升序）
    pub async fn run(
        &self,
        ctx: &BatchCtx,
        volume: &Volume,
        converted: &[ConvertedChapter],
        sink: &dyn ProgressSink,
    ) -> Vec<VolumeOutcome> {
        if converted.is_empty() {
            let reason = "本卷所有章节都转换失败，未生成文件".to_string();
            warn!("{} ⚠️ 卷 {} 没有可合并的章节，跳过", ctx, volume.label);
            sink.notify(
                ctx.user,
                ProgressEvent::VolumeFailed {
                    label: volume.label,
                    reason: reason.clone(),
                },
            )
            .await;
            return vec![VolumeOutcome::failed(volume.label, volume.numbers(), reason)];
        }

        // 转换失败的章节不在卷里，标签按实际合并的章节计算
        let numbers: Vec<ChapterNumber> = converted.iter().map(|c| c.number).collect();
        let label = RangeLabel::from_numbers(&numbers).unwrap_or(volume.label);

        info!("{} 📦 合并卷 {} ({} 话)", ctx, label, converted.len());
        sink.notify(
            ctx.user,
            ProgressEvent::VolumeMerging {
                label,
                chapters: converted.len(),
            },
        )
        .await;

        let documents = match self.merge(ctx, converted).await {
            Ok(documents) => documents,
            Err(e) => {
                error!("{} ❌ 卷 {} 合并失败: {}", ctx, label, e);
                let reason = "合并失败，章节仍在队列中".to_string();
                sink.notify(
                    ctx.user,
                    ProgressEvent::VolumeFailed {
                        label,
                        reason: reason.clone(),
                    },
                )
                .await;
                return vec![VolumeOutcome::failed(label, numbers, reason)];
            }
        };

        let mut outcomes = Vec::with_capacity(documents.len());
        for document in documents {
            outcomes.push(self.deliver(ctx, document, sink).await);
        }
        outcomes
    }

    async fn merge(
        &self,
        ctx: &BatchCtx,
        converted: &[ConvertedChapter],
    ) -> Result<Vec<MergedDocument>, MergeError> {
        let merger = self.merger.clone();
        let title = ctx.title.clone();
        let chapters = converted.to_vec();
        let out_dir = ctx.output_dir();

        tokio::task::spawn_blocking(move || merger.merge_bounded(&title, &chapters, &out_dir))
            .await
            .map_err(|e| MergeError::Task(e.to_string()))?
    }

    async fn deliver(
        &self,
        ctx: &BatchCtx,
        document: MergedDocument,
        sink: &dyn ProgressSink,
    ) -> VolumeOutcome {
        // 合并产物随批次临时目录删除，只记录文件名和渠道保留的位置
        let mut outcome = VolumeOutcome {
            label: document.label,
            chapters: document.chapters.clone(),
            document: document
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string()),
            output: None,
            size: document.size,
            oversized: document.oversized,
            delivered: false,
            error: None,
        };

        let event = match self.deliver_with_retry(ctx, &document.path, document.size).await {
            Ok(kept) => {
                info!("{} ✅ 卷 {} 已发送", ctx, document.label);
                outcome.delivered = true;
                outcome.output = kept;
                ProgressEvent::VolumeDelivered {
                    label: document.label,
                    size: document.size,
                    oversized: document.oversized,
                }
            }
            Err(e) => {
                error!("{} ❌ 卷 {} 发送失败: {}", ctx, document.label, e);
                let reason = e.user_message();
                outcome.error = Some(reason.clone());
                ProgressEvent::VolumeFailed {
                    label: document.label,
                    reason,
                }
            }
        };
        sink.notify(ctx.user, event).await;

        outcome
    }

    async fn deliver_with_retry(
        &self,
        ctx: &BatchCtx,
        path: &Path,
        size: u64,
    ) -> Result<Option<PathBuf>, DeliveryError> {
        let mut last_error = None;

        for attempt in 1..=DELIVERY_ATTEMPTS {
            let result = match tokio::time::timeout(
                self.delivery_timeout,
                self.deliverer.deliver(ctx.user, path, size),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout {
                    secs: self.delivery_timeout.as_secs(),
                }),
            };

            match result {
                Ok(kept) => return Ok(kept),
                // 没有邮箱时重试没有意义
                Err(e @ DeliveryError::NoMailbox { .. }) => return Err(e),
                Err(e) => {
                    warn!("{} ⚠️ 第 {} 次发送失败: {}", ctx, attempt, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(DeliveryError::Failed {
            diagnostics: "没有进行任何发送尝试".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chapter::{ChapterNumber, ChapterRecord, UserId};
    use async_trait::async_trait;
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// 前 `failures` 次调用失败
    struct FlakyDeliverer {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyDeliverer {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Deliverer for FlakyDeliverer {
        async fn deliver(
            &self,
            _user: UserId,
            _path: &Path,
            _size: u64,
        ) -> Result<Option<PathBuf>, DeliveryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(DeliveryError::Failed {
                    diagnostics: "smtp 421".to_string(),
                })
            } else {
                Ok(None)
            }
        }
    }

    struct SilentSink;

    #[async_trait]
    impl ProgressSink for SilentSink {
        async fn notify(&self, _user: UserId, _event: ProgressEvent) {}
    }

    #[derive(Default)]
    struct CollectingSink {
        events: std::sync::Mutex<Vec<ProgressEvent>>,
    }

    #[async_trait]
    impl ProgressSink for CollectingSink {
        async fn notify(&self, _user: UserId, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn converted(dir: &Path, n: u64) -> ConvertedChapter {
        let path = dir.join(format!("c{}.cbz", n));
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        writer.start_file("001.jpg", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"page").unwrap();
        writer.finish().unwrap();
        ConvertedChapter {
            number: ChapterNumber::whole(n),
            source: PathBuf::from(format!("/queue/{}.cbz", n)),
            size: std::fs::metadata(&path).unwrap().len(),
            path,
        }
    }

    fn volume(numbers: &[u64]) -> Volume {
        let chapters = numbers
            .iter()
            .map(|&n| {
                ChapterRecord::new(
                    UserId(1),
                    format!("{}.cbz", n),
                    format!("/queue/{}.cbz", n),
                    ChapterNumber::whole(n),
                    1,
                )
            })
            .collect();
        Volume::new("Title", 1, chapters).unwrap()
    }

    fn flow(deliverer: Arc<FlakyDeliverer>) -> VolumeFlow {
        VolumeFlow::new(
            VolumeMerger::new(1024 * 1024, None),
            deliverer,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_delivery_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BatchCtx::new(UserId(1), "Title", dir.path());
        let deliverer = Arc::new(FlakyDeliverer::new(1));
        let chapters = vec![converted(dir.path(), 1), converted(dir.path(), 2)];

        let outcomes = flow(deliverer.clone())
            .run(&ctx, &volume(&[1, 2]), &chapters, &SilentSink)
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].delivered);
        assert_eq!(outcomes[0].label.to_string(), "[1-2]");
        assert_eq!(deliverer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delivery_gives_up_after_retry() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BatchCtx::new(UserId(1), "Title", dir.path());
        let deliverer = Arc::new(FlakyDeliverer::new(usize::MAX));
        let chapters = vec![converted(dir.path(), 1)];

        let outcomes = flow(deliverer.clone())
            .run(&ctx, &volume(&[1]), &chapters, &SilentSink)
            .await;

        assert!(!outcomes[0].delivered);
        assert!(outcomes[0].error.is_some());
        assert_eq!(outcomes[0].document.as_deref(), Some("Title [1].cbz"));
        assert!(outcomes[0].output.is_none());
        assert_eq!(deliverer.calls.load(Ordering::SeqCst), DELIVERY_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_volume_without_converted_chapters_not_merged() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BatchCtx::new(UserId(1), "Title", dir.path());
        let deliverer = Arc::new(FlakyDeliverer::new(0));

        let outcomes = flow(deliverer.clone())
            .run(&ctx, &volume(&[3]), &[], &SilentSink)
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].delivered);
        assert!(outcomes[0].output.is_none());
        assert_eq!(deliverer.calls.load(Ordering::SeqCst), 0);
        assert!(!ctx.output_dir().exists());
    }

    #[tokio::test]
    async fn test_label_follows_converted_chapters() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BatchCtx::new(UserId(1), "Title", dir.path());
        let deliverer = Arc::new(FlakyDeliverer::new(0));
        let sink = CollectingSink::default();
        // 第 3 话转换失败
        let chapters = vec![converted(dir.path(), 1), converted(dir.path(), 2)];

        let outcomes = flow(deliverer)
            .run(&ctx, &volume(&[1, 2, 3]), &chapters, &sink)
            .await;

        assert_eq!(outcomes[0].label.to_string(), "[1-2]");
        let events = sink.events.lock().unwrap();
        assert!(matches!(
            &events[0],
            ProgressEvent::VolumeMerging { label, chapters: 2 } if label.to_string() == "[1-2]"
        ));
    }
}
