//! 批次结果模型
//!
//! 一次合并请求结束后生成 `BatchResult`，交给聊天端汇报后即丢弃

use crate::models::chapter::{ChapterNumber, ChapterRecord, ChapterStatus, UserId};
use crate::models::volume::RangeLabel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// 批次状态机的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Idle,
    SnapshotTaken,
    Partitioning,
    Converting,
    Merging,
    Delivered,
    CleanedUp,
    Failed,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchPhase::Idle => "空闲",
            BatchPhase::SnapshotTaken => "已获取快照",
            BatchPhase::Partitioning => "分卷中",
            BatchPhase::Converting => "转换中",
            BatchPhase::Merging => "合并中",
            BatchPhase::Delivered => "已发送",
            BatchPhase::CleanedUp => "已清理",
            BatchPhase::Failed => "失败",
        };
        write!(f, "{}", name)
    }
}

/// 批次整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// 所有章节都已发送
    Succeeded,
    /// 部分章节或卷失败
    PartiallySucceeded,
    /// 没有任何卷发送成功
    Failed,
}

/// 批次级别的失败原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailure {
    /// 队列为空
    NoPendingChapters,
    /// 所有章节都转换失败
    AllConversionsFailed,
    /// 没有任何卷发送成功
    NothingDelivered,
}

impl BatchFailure {
    pub fn user_message(&self) -> String {
        match self {
            BatchFailure::NoPendingChapters => "没有待合并的章节，请先发送章节文件。".to_string(),
            BatchFailure::AllConversionsFailed => {
                "所有章节都转换失败，没有生成任何卷。章节仍在队列中，可以重新发送或 /clear。".to_string()
            }
            BatchFailure::NothingDelivered => {
                "没有任何卷发送成功。章节仍在队列中，稍后可以再次 /merge。".to_string()
            }
        }
    }
}

/// 单个章节的处理结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterOutcome {
    pub number: ChapterNumber,
    pub filename: String,
    pub status: ChapterStatus,
    /// 失败原因（面向用户）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChapterOutcome {
    pub fn from_record(record: &ChapterRecord) -> Self {
        Self {
            number: record.number,
            filename: record.filename.clone(),
            status: record.status,
            reason: None,
        }
    }

    pub fn failed(record: &ChapterRecord, reason: impl Into<String>) -> Self {
        Self {
            number: record.number,
            filename: record.filename.clone(),
            status: ChapterStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

/// 单个输出卷（或无法生成的卷）的结果
///
/// 合并产物在批次临时目录中，批次结束时随目录删除，
/// 所以 `output` 只记录发送渠道保留下来的位置（例如 outbox 中的副本）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeOutcome {
    pub label: RangeLabel,
    pub chapters: Vec<ChapterNumber>,
    /// 生成的卷文件名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    /// 发送后仍然存在的卷文件
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub size: u64,
    /// 单章超过体积上限，无法再拆分
    pub oversized: bool,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VolumeOutcome {
    /// 没有生成任何输出的失败卷
    pub fn failed(label: RangeLabel, chapters: Vec<ChapterNumber>, error: impl Into<String>) -> Self {
        Self {
            label,
            chapters,
            document: None,
            output: None,
            size: 0,
            oversized: false,
            delivered: false,
            error: Some(error.into()),
        }
    }
}

/// 一次合并请求的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub user: UserId,
    pub title: String,
    pub chapters: Vec<ChapterOutcome>,
    pub volumes: Vec<VolumeOutcome>,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<BatchFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchResult {
    pub fn delivered_volumes(&self) -> impl Iterator<Item = &VolumeOutcome> {
        self.volumes.iter().filter(|v| v.delivered)
    }

    /// 批次结束后仍然存在的卷文件
    pub fn output_paths(&self) -> Vec<&Path> {
        self.volumes
            .iter()
            .filter_map(|v| v.output.as_deref())
            .collect()
    }

    pub fn failed_chapters(&self) -> impl Iterator<Item = &ChapterOutcome> {
        self.chapters
            .iter()
            .filter(|c| c.status == ChapterStatus::Failed)
    }

    /// 面向用户的最终汇总
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        match self.status {
            BatchStatus::Succeeded => lines.push(format!("✅ 《{}》处理完成", self.title)),
            BatchStatus::PartiallySucceeded => {
                lines.push(format!("⚠️ 《{}》部分完成", self.title))
            }
            BatchStatus::Failed => lines.push(format!("❌ 《{}》处理失败", self.title)),
        }

        if let Some(failure) = &self.failure {
            lines.push(failure.user_message());
        }

        for volume in &self.volumes {
            if volume.delivered {
                let mut line = format!("卷 {} 已发送 ({})", volume.label, format_size(volume.size));
                if volume.oversized {
                    line.push_str("，单章超过体积上限");
                }
                lines.push(line);
            } else if let Some(err) = &volume.error {
                lines.push(format!("卷 {} 失败: {}", volume.label, err));
            }
        }

        for chapter in self.failed_chapters() {
            lines.push(format!(
                "第 {} 话: {}",
                chapter.number,
                chapter.reason.as_deref().unwrap_or("处理失败")
            ));
        }

        lines.join("\n")
    }
}

/// 字节数格式化为 MB
pub fn format_size(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(label: RangeLabel, output: Option<&str>, delivered: bool) -> VolumeOutcome {
        VolumeOutcome {
            label,
            chapters: Vec::new(),
            document: Some(format!("Title {}.cbz", label)),
            output: output.map(PathBuf::from),
            size: 1,
            oversized: false,
            delivered,
            error: (!delivered).then(|| "发送失败".to_string()),
        }
    }

    #[test]
    fn test_output_paths_skip_volumes_without_kept_file() {
        let one = ChapterNumber::whole(1);
        let two = ChapterNumber::whole(2);
        let three = ChapterNumber::whole(3);
        let result = BatchResult {
            batch_id: Uuid::new_v4(),
            user: UserId(1),
            title: "Title".to_string(),
            chapters: Vec::new(),
            volumes: vec![
                volume(RangeLabel::new(one, two), Some("/outbox/1/Title [1-2].cbz"), true),
                volume(RangeLabel::new(three, three), None, false),
            ],
            status: BatchStatus::PartiallySucceeded,
            failure: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        assert_eq!(result.output_paths(), vec![Path::new("/outbox/1/Title [1-2].cbz")]);
        assert_eq!(result.delivered_volumes().count(), 1);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(1536 * 1024), "1.5 MB");
    }
}
