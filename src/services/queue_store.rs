//! 章节队列 - 业务能力层
//!
//! 每个用户一个独立分区，按章节号排序保存待合并的章节。
//! 不同用户的操作互不阻塞；同一用户的操作只锁自己的分区。

use crate::error::EnqueueError;
use crate::infrastructure::cleanup::Cleaner;
use crate::models::chapter::{ChapterNumber, ChapterRecord, ChapterStatus, UserId};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// 单个用户的队列，键为章节号
#[derive(Debug, Default)]
struct UserQueue {
    chapters: BTreeMap<ChapterNumber, ChapterRecord>,
}

/// 队列概况
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub count: usize,
    pub first: Option<ChapterNumber>,
    pub last: Option<ChapterNumber>,
    pub total_bytes: u64,
}

/// 章节队列
pub struct QueueStore {
    partitions: DashMap<UserId, UserQueue>,
    cleaner: Arc<dyn Cleaner>,
}

impl QueueStore {
    pub fn new(cleaner: Arc<dyn Cleaner>) -> Self {
        Self {
            partitions: DashMap::new(),
            cleaner,
        }
    }

    /// 加入队列，同一用户的章节号不能重复；返回入队后的章节数
    pub fn enqueue(&self, record: ChapterRecord) -> Result<usize, EnqueueError> {
        let mut queue = self.partitions.entry(record.user).or_default();

        if let Some(existing) = queue.chapters.get(&record.number) {
            return Err(EnqueueError::DuplicateChapter {
                number: record.number,
                existing: existing.filename.clone(),
            });
        }

        debug!("[用户 {}] 入队第 {} 话: {}", record.user, record.number, record.filename);
        queue.chapters.insert(record.number, record);
        Ok(queue.chapters.len())
    }

    /// 按章节号升序复制当前队列，不修改队列
    pub fn snapshot(&self, user: UserId) -> Vec<ChapterRecord> {
        self.partitions
            .get(&user)
            .map(|queue| queue.chapters.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn status(&self, user: UserId) -> QueueStatus {
        let Some(queue) = self.partitions.get(&user) else {
            return QueueStatus::default();
        };
        QueueStatus {
            count: queue.chapters.len(),
            first: queue.chapters.keys().next().copied(),
            last: queue.chapters.keys().next_back().copied(),
            total_bytes: queue.chapters.values().map(|c| c.size).sum(),
        }
    }

    /// 清空用户队列并删除对应的源文件，返回移除的章节数
    pub async fn clear(&self, user: UserId) -> usize {
        let removed = self.drain(user);
        self.delete_sources(&removed).await;
        removed.len()
    }

    /// 取出用户的全部章节，不删除文件
    pub fn drain(&self, user: UserId) -> Vec<ChapterRecord> {
        self.partitions
            .remove(&user)
            .map(|(_, queue)| queue.chapters.into_values().collect())
            .unwrap_or_default()
    }

    /// 删除已出队章节的源文件
    pub async fn delete_sources(&self, records: &[ChapterRecord]) -> usize {
        let paths: Vec<PathBuf> = records.iter().map(|c| c.path.clone()).collect();
        self.cleaner.delete_files(&paths).await
    }

    /// 只移除存储路径在 `paths` 中的章节，返回被移除的记录
    ///
    /// 批次开始后新入队的章节路径不在快照里，不会被移除。
    pub fn remove_processed(&self, user: UserId, paths: &[PathBuf]) -> Vec<ChapterRecord> {
        let targets: HashSet<&PathBuf> = paths.iter().collect();
        let Some(mut queue) = self.partitions.get_mut(&user) else {
            return Vec::new();
        };

        let numbers: Vec<ChapterNumber> = queue
            .chapters
            .values()
            .filter(|c| targets.contains(&c.path))
            .map(|c| c.number)
            .collect();

        numbers
            .into_iter()
            .filter_map(|n| queue.chapters.remove(&n))
            .collect()
    }

    /// 更新章节状态，章节不存在时返回 false
    pub fn set_status(&self, user: UserId, number: ChapterNumber, status: ChapterStatus) -> bool {
        self.partitions
            .get_mut(&user)
            .and_then(|mut queue| {
                queue.chapters.get_mut(&number).map(|record| {
                    record.status = status;
                })
            })
            .is_some()
    }
}
