//! 章节转换调度 - 业务能力层
//!
//! 在 `Converter` 之上加超时和并发上限，一次转换一个批次的全部章节。
//! 结果总是按章节号升序返回，与完成顺序无关。源文件不会被删除。

use crate::error::ConversionError;
use crate::infrastructure::converter::{ConversionParams, Converter};
use crate::infrastructure::notifier::{ProgressEvent, ProgressSink};
use crate::models::chapter::{ChapterNumber, ChapterRecord, UserId};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// 转换成功的章节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedChapter {
    pub number: ChapterNumber,
    /// 队列中的源文件
    pub source: PathBuf,
    /// 转换后的文档
    pub path: PathBuf,
    pub size: u64,
}

/// 单个章节的转换结果
#[derive(Debug)]
pub struct ConversionOutcome {
    pub record: ChapterRecord,
    pub result: Result<ConvertedChapter, ConversionError>,
}

pub struct ConversionDriver {
    converter: Arc<dyn Converter>,
    params: ConversionParams,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl ConversionDriver {
    pub fn new(
        converter: Arc<dyn Converter>,
        params: ConversionParams,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            converter,
            params,
            timeout,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// 转换全部章节，每个章节输出到 `<batch_dir>/converted/<序号>/`
    pub async fn convert_all(
        &self,
        user: UserId,
        chapters: &[ChapterRecord],
        batch_dir: &Path,
        sink: &dyn ProgressSink,
    ) -> Vec<ConversionOutcome> {
        let tasks = chapters.iter().enumerate().map(|(i, record)| {
            let output_dir = batch_dir.join("converted").join(format!("{:04}", i + 1));
            async move {
                let result = self.convert_one(user, record, &output_dir, sink).await;
                ConversionOutcome {
                    record: record.clone(),
                    result,
                }
            }
        });

        let mut outcomes = join_all(tasks).await;
        outcomes.sort_by(|a, b| a.record.cmp(&b.record));
        outcomes
    }

    async fn convert_one(
        &self,
        user: UserId,
        record: &ChapterRecord,
        output_dir: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<ConvertedChapter, ConversionError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ConversionError::Io(std::io::Error::other(e)))?;

        sink.notify(user, ProgressEvent::ChapterConverting { number: record.number })
            .await;

        let converted = match tokio::time::timeout(
            self.timeout,
            self.converter.convert(&record.path, output_dir, &self.params),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ConversionError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        };

        let result = match converted {
            Ok(path) => tokio::fs::metadata(&path)
                .await
                .map(|meta| ConvertedChapter {
                    number: record.number,
                    source: record.path.clone(),
                    path,
                    size: meta.len(),
                })
                .map_err(ConversionError::from),
            Err(e) => Err(e),
        };

        match &result {
            Ok(chapter) => {
                debug!("[用户 {}] 第 {} 话转换完成 ({} 字节)", user, record.number, chapter.size);
                sink.notify(user, ProgressEvent::ChapterConverted { number: record.number })
                    .await;
            }
            Err(e) => {
                warn!("[用户 {}] ❌ 第 {} 话转换失败: {}", user, record.number, e);
                sink.notify(
                    user,
                    ProgressEvent::ChapterFailed {
                        number: record.number,
                        reason: e.user_message(record.number),
                    },
                )
                .await;
            }
        }

        result
    }
}
