//! 批次编排器 - 编排层
//!
//! ## 职责
//!
//! 引擎对聊天端暴露的唯一入口：入队、查询状态、合并、清空。
//!
//! ## 批次状态机
//!
//! ```text
//! Idle → SnapshotTaken → Partitioning → Converting → Merging → Delivered → CleanedUp
//!                 └──────────────┴─────────────┴──────────┴──────────→ Failed
//! ```
//!
//! - 同一用户同时最多一个批次，第二个合并请求返回 `BatchInProgress`
//! - 只有整卷发送成功的章节才会出队并删除源文件
//! - 批次进行中的 /clear 延迟到批次结束，只作用于本批次快照中的章节

use crate::config::Config;
use crate::error::{BatchError, EnqueueError};
use crate::infrastructure::cleanup::{Cleaner, FsCleaner};
use crate::infrastructure::converter::{ConversionParams, Converter, KccConverter};
use crate::infrastructure::delivery::{CommandDeliverer, Deliverer, OutboxDeliverer};
use crate::infrastructure::notifier::{LogProgressSink, ProgressEvent, ProgressSink};
use crate::models::batch::{
    format_size, BatchFailure, BatchPhase, BatchResult, BatchStatus, ChapterOutcome,
};
use crate::models::chapter::{ChapterNumber, ChapterRecord, ChapterStatus, IncomingFile, UserId};
use crate::orchestrator::session::{BatchGuard, SessionRegistry};
use crate::services::chapter_identifier::{identify_chapter, is_supported_upload};
use crate::services::conversion_driver::{ConversionDriver, ConvertedChapter};
use crate::services::partitioner::partition;
use crate::services::queue_store::{QueueStatus, QueueStore};
use crate::services::report_writer::ReportWriter;
use crate::services::volume_merger::VolumeMerger;
use crate::utils::logging::{log_batch_complete, log_batch_start};
use crate::workflow::batch_ctx::BatchCtx;
use crate::workflow::volume_flow::VolumeFlow;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// 引擎依赖的外部能力
#[derive(Clone)]
pub struct Collaborators {
    pub converter: Arc<dyn Converter>,
    pub deliverer: Arc<dyn Deliverer>,
    pub cleaner: Arc<dyn Cleaner>,
    pub sink: Arc<dyn ProgressSink>,
}

impl Collaborators {
    /// 生产环境实现：KCC 转换、邮件命令（未配置时写 outbox）、本地文件清理、日志通知
    pub fn from_config(config: &Config) -> Self {
        let deliverer: Arc<dyn Deliverer> = match &config.delivery.command {
            Some(program) => Arc::new(CommandDeliverer::new(program.clone(), &config.delivery)),
            None => Arc::new(OutboxDeliverer::new(config.delivery.outbox_dir.clone())),
        };

        Self {
            converter: Arc::new(KccConverter::new(config.converter.program.clone())),
            deliverer,
            cleaner: Arc::new(FsCleaner::new()),
            sink: Arc::new(LogProgressSink),
        }
    }
}

/// 入队回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub number: ChapterNumber,
    pub size: u64,
    /// 入队后该用户队列中的章节数
    pub queued: usize,
}

/// 用户状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatus {
    pub queue: QueueStatus,
    /// 正在进行的批次阶段
    pub phase: Option<BatchPhase>,
}

impl UserStatus {
    pub fn message(&self) -> String {
        let queue = match (self.queue.first, self.queue.last) {
            (Some(first), Some(last)) if first == last => format!(
                "队列中有 1 话（第 {} 话），共 {}",
                first,
                format_size(self.queue.total_bytes)
            ),
            (Some(first), Some(last)) => format!(
                "队列中有 {} 话（第 {}-{} 话），共 {}",
                self.queue.count,
                first,
                last,
                format_size(self.queue.total_bytes)
            ),
            _ => "队列为空".to_string(),
        };

        match self.phase {
            Some(phase) => format!("{}；当前批次: {}", queue, phase),
            None => queue,
        }
    }
}

/// 清空请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// 已清空的章节数
    Cleared(usize),
    /// 批次进行中，结束后再清空
    Deferred,
}

impl ClearOutcome {
    pub fn message(&self) -> String {
        match self {
            ClearOutcome::Cleared(0) => "队列本来就是空的。".to_string(),
            ClearOutcome::Cleared(n) => format!("🗑️ 已清空 {} 话。", n),
            ClearOutcome::Deferred => {
                "当前批次还在处理中，结束后会清空本批次的章节。".to_string()
            }
        }
    }
}

/// 批次编排器
pub struct BatchOrchestrator {
    queue: QueueStore,
    sessions: SessionRegistry,
    driver: ConversionDriver,
    volume_flow: VolumeFlow,
    cleaner: Arc<dyn Cleaner>,
    sink: Arc<dyn ProgressSink>,
    report: Option<ReportWriter>,
    work_dir: PathBuf,
    ceiling: u64,
}

impl BatchOrchestrator {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let Collaborators {
            converter,
            deliverer,
            cleaner,
            sink,
        } = collaborators;

        let driver = ConversionDriver::new(
            converter,
            ConversionParams::from_config(&config.converter),
            config.conversion_timeout(),
            config.max_concurrent_conversions,
        );
        let volume_flow = VolumeFlow::new(
            VolumeMerger::new(config.max_volume_bytes(), config.cover_image.clone()),
            deliverer,
            config.delivery_timeout(),
        );

        Self {
            queue: QueueStore::new(cleaner.clone()),
            sessions: SessionRegistry::new(),
            driver,
            volume_flow,
            cleaner,
            sink,
            report: config.report_file.clone().map(ReportWriter::with_path),
            work_dir: config.work_dir.clone(),
            ceiling: config.max_volume_bytes(),
        }
    }

    /// 接收一个上传的章节文件
    ///
    /// 被拒绝的文件不会被删除，由调用方决定如何处理。
    pub async fn enqueue(&self, user: UserId, file: IncomingFile) -> Result<EnqueueReceipt, EnqueueError> {
        if !is_supported_upload(&file.filename) {
            return Err(EnqueueError::UnsupportedFormat {
                filename: file.filename,
            });
        }
        let number = identify_chapter(&file.filename)?;

        let size = tokio::fs::metadata(&file.path)
            .await
            .map_err(|source| EnqueueError::Unreadable {
                path: file.path.clone(),
                source,
            })?
            .len();
        if size == 0 {
            return Err(EnqueueError::EmptyFile {
                filename: file.filename,
            });
        }

        let record = ChapterRecord::new(user, file.filename, file.path, number, size);
        let queued = self.queue.enqueue(record)?;

        self.sink
            .notify(user, ProgressEvent::ChapterQueued { number, queued })
            .await;

        Ok(EnqueueReceipt {
            number,
            size,
            queued,
        })
    }

    pub fn status(&self, user: UserId) -> UserStatus {
        UserStatus {
            queue: self.queue.status(user),
            phase: self.sessions.session(user).phase(),
        }
    }

    /// 清空用户队列；批次进行中时延迟到批次结束
    pub async fn request_clear(&self, user: UserId) -> ClearOutcome {
        let session = self.sessions.session(user);
        match session.clear_or_defer(|| self.queue.drain(user)) {
            Some(removed) => {
                self.queue.delete_sources(&removed).await;
                info!("[用户 {}] 🗑️ 已清空队列: {} 话", user, removed.len());
                ClearOutcome::Cleared(removed.len())
            }
            None => {
                info!("[用户 {}] 批次进行中，清空请求已延迟", user);
                ClearOutcome::Deferred
            }
        }
    }

    /// 把用户的章节移出队列但保留源文件，返回移出的章节数
    pub fn release(&self, user: UserId) -> usize {
        self.queue.drain(user).len()
    }

    /// 合并当前队列中的全部章节并发送
    pub async fn request_merge(&self, user: UserId, title: &str) -> Result<BatchResult, BatchError> {
        let session = self.sessions.session(user);
        let mut guard = session
            .try_begin()
            .ok_or(BatchError::BatchInProgress { user })?;

        let ctx = BatchCtx::new(user, title, &self.work_dir);
        let started_at = Utc::now();

        let snapshot = self.queue.snapshot(user);
        guard.set_phase(BatchPhase::SnapshotTaken);
        log_batch_start(&ctx, snapshot.len());

        let mut result = if snapshot.is_empty() {
            guard.set_phase(BatchPhase::Failed);
            BatchResult {
                batch_id: ctx.batch_id,
                user,
                title: ctx.title.clone(),
                chapters: Vec::new(),
                volumes: Vec::new(),
                status: BatchStatus::Failed,
                failure: Some(BatchFailure::NoPendingChapters),
                started_at,
                finished_at: started_at,
            }
        } else {
            self.run_batch(&ctx, &snapshot, &guard, started_at).await
        };

        self.finish(&ctx, &snapshot, &mut guard).await;
        result.finished_at = Utc::now();

        log_batch_complete(&ctx, &result);
        if let Some(report) = &self.report {
            if let Err(e) = report.write(&result).await {
                warn!("{} ⚠️ 写入批次报告失败: {:#}", ctx, e);
            }
        }
        self.sink
            .notify(
                user,
                ProgressEvent::BatchFinished {
                    summary: result.summary(),
                },
            )
            .await;

        Ok(result)
    }

    async fn run_batch(
        &self,
        ctx: &BatchCtx,
        snapshot: &[ChapterRecord],
        guard: &BatchGuard,
        started_at: chrono::DateTime<Utc>,
    ) -> BatchResult {
        let user = ctx.user;

        guard.set_phase(BatchPhase::Partitioning);
        let volumes = partition(&ctx.title, snapshot, self.ceiling);
        info!("{} 📚 {} 话分为 {} 卷", ctx, snapshot.len(), volumes.len());

        guard.set_phase(BatchPhase::Converting);
        let outcomes = self
            .driver
            .convert_all(user, snapshot, &ctx.batch_dir, self.sink.as_ref())
            .await;

        let mut chapters = Vec::with_capacity(outcomes.len());
        let mut converted: BTreeMap<ChapterNumber, ConvertedChapter> = BTreeMap::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(chapter) => {
                    self.queue
                        .set_status(user, chapter.number, ChapterStatus::Converted);
                    let mut record = outcome.record;
                    record.status = ChapterStatus::Converted;
                    chapters.push(ChapterOutcome::from_record(&record));
                    converted.insert(chapter.number, chapter);
                }
                Err(e) => {
                    self.queue
                        .set_status(user, outcome.record.number, ChapterStatus::Failed);
                    chapters.push(ChapterOutcome::failed(
                        &outcome.record,
                        e.user_message(outcome.record.number),
                    ));
                }
            }
        }

        let mut volume_outcomes = Vec::new();
        if !converted.is_empty() {
            guard.set_phase(BatchPhase::Merging);
            for volume in &volumes {
                let members: Vec<ConvertedChapter> = volume
                    .chapters
                    .iter()
                    .filter_map(|c| converted.get(&c.number).cloned())
                    .collect();
                volume_outcomes.extend(self.volume_flow.run(ctx, volume, &members, self.sink.as_ref()).await);
            }
        }

        let delivered: BTreeSet<ChapterNumber> = volume_outcomes
            .iter()
            .filter(|v| v.delivered)
            .flat_map(|v| v.chapters.iter().copied())
            .collect();

        let (status, failure) = if converted.is_empty() {
            (BatchStatus::Failed, Some(BatchFailure::AllConversionsFailed))
        } else if delivered.is_empty() {
            (BatchStatus::Failed, Some(BatchFailure::NothingDelivered))
        } else if delivered.len() == snapshot.len() {
            (BatchStatus::Succeeded, None)
        } else {
            (BatchStatus::PartiallySucceeded, None)
        };

        if !delivered.is_empty() {
            guard.set_phase(BatchPhase::Delivered);
        }

        self.cleanup(ctx, snapshot, &delivered).await;
        guard.set_phase(if delivered.is_empty() {
            BatchPhase::Failed
        } else {
            BatchPhase::CleanedUp
        });

        BatchResult {
            batch_id: ctx.batch_id,
            user,
            title: ctx.title.clone(),
            chapters,
            volumes: volume_outcomes,
            status,
            failure,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// 删除批次临时目录，已发送章节出队并删除源文件；其余章节保留在队列中
    async fn cleanup(&self, ctx: &BatchCtx, snapshot: &[ChapterRecord], delivered: &BTreeSet<ChapterNumber>) {
        self.cleaner.delete_dir(&ctx.batch_dir).await;

        let paths: Vec<PathBuf> = snapshot
            .iter()
            .filter(|c| delivered.contains(&c.number))
            .map(|c| c.path.clone())
            .collect();
        let removed = self.queue.remove_processed(ctx.user, &paths);
        let deleted = self.queue.delete_sources(&removed).await;

        let kept = snapshot.len() - removed.len();
        info!(
            "{} 🗑️ 清理完成: 出队 {} 话，删除源文件 {} 个，保留 {} 话",
            ctx,
            removed.len(),
            deleted,
            kept
        );
    }

    /// 处理延迟的清空后释放批次；释放前再检查一次，清理期间到达的清空请求不会丢失
    async fn finish(&self, ctx: &BatchCtx, snapshot: &[ChapterRecord], guard: &mut BatchGuard) {
        loop {
            if guard.take_pending_clear() {
                let paths: Vec<PathBuf> = snapshot.iter().map(|c| c.path.clone()).collect();
                let removed = self.queue.remove_processed(ctx.user, &paths);
                self.queue.delete_sources(&removed).await;
                info!("{} 🗑️ 执行延迟的清空: {} 话", ctx, removed.len());
            }
            if guard.try_finish() {
                break;
            }
        }
    }
}
