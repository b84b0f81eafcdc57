//! 进度通知 - 基础设施层
//!
//! 引擎通过 `ProgressSink` 把进度推给聊天端，事件自带面向用户的文案。

use crate::models::batch::format_size;
use crate::models::chapter::{ChapterNumber, UserId};
use crate::models::volume::RangeLabel;
use async_trait::async_trait;
use tracing::{info, warn};

/// 进度事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// 章节已入队
    ChapterQueued {
        number: ChapterNumber,
        queued: usize,
    },
    /// 开始转换
    ChapterConverting { number: ChapterNumber },
    /// 转换完成
    ChapterConverted { number: ChapterNumber },
    /// 转换失败，章节已跳过
    ChapterFailed {
        number: ChapterNumber,
        reason: String,
    },
    /// 开始合并卷
    VolumeMerging { label: RangeLabel, chapters: usize },
    /// 卷已发送
    VolumeDelivered {
        label: RangeLabel,
        size: u64,
        oversized: bool,
    },
    /// 卷无法生成或发送
    VolumeFailed { label: RangeLabel, reason: String },
    /// 批次结束，附带汇总文本
    BatchFinished { summary: String },
}

impl ProgressEvent {
    /// 面向用户的文案
    pub fn message(&self) -> String {
        match self {
            ProgressEvent::ChapterQueued { number, queued } => {
                format!("📥 第 {} 话已加入队列（当前共 {} 话）", number, queued)
            }
            ProgressEvent::ChapterConverting { number } => format!("⚙️ 正在转换第 {} 话…", number),
            ProgressEvent::ChapterConverted { number } => format!("✓ 第 {} 话转换完成", number),
            ProgressEvent::ChapterFailed { reason, .. } => format!("❌ {}", reason),
            ProgressEvent::VolumeMerging { label, chapters } => {
                format!("📦 正在合并卷 {}（{} 话）…", label, chapters)
            }
            ProgressEvent::VolumeDelivered {
                label,
                size,
                oversized,
            } => {
                if *oversized {
                    format!(
                        "⚠️ 卷 {} 已发送 ({})，但单章已超过体积上限，可能无法通过邮件送达",
                        label,
                        format_size(*size)
                    )
                } else {
                    format!("📨 卷 {} 已发送 ({})", label, format_size(*size))
                }
            }
            ProgressEvent::VolumeFailed { label, reason } => {
                format!("❌ 卷 {} 失败: {}", label, reason)
            }
            ProgressEvent::BatchFinished { summary } => summary.clone(),
        }
    }

    fn is_warning(&self) -> bool {
        matches!(
            self,
            ProgressEvent::ChapterFailed { .. }
                | ProgressEvent::VolumeFailed { .. }
                | ProgressEvent::VolumeDelivered {
                    oversized: true,
                    ..
                }
        )
    }
}

/// 聊天端的进度接收能力
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn notify(&self, user: UserId, event: ProgressEvent);
}

/// 只写日志的进度接收者
#[derive(Debug, Default, Clone)]
pub struct LogProgressSink;

#[async_trait]
impl ProgressSink for LogProgressSink {
    async fn notify(&self, user: UserId, event: ProgressEvent) {
        if event.is_warning() {
            warn!("[用户 {}] {}", user, event.message());
        } else {
            info!("[用户 {}] {}", user, event.message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_specific() {
        let label = RangeLabel::new(ChapterNumber::whole(1), ChapterNumber::whole(2));

        let delivered = ProgressEvent::VolumeDelivered {
            label,
            size: 5 * 1024 * 1024,
            oversized: false,
        };
        assert_eq!(delivered.message(), "📨 卷 [1-2] 已发送 (5.0 MB)");

        let oversized = ProgressEvent::VolumeDelivered {
            label,
            size: 60 * 1024 * 1024,
            oversized: true,
        };
        assert!(oversized.message().contains("超过体积上限"));
        assert!(oversized.is_warning());

        let failed = ProgressEvent::ChapterFailed {
            number: ChapterNumber::whole(7),
            reason: "第 7 话无法转换，已跳过。".to_string(),
        };
        assert!(failed.message().contains("第 7 话"));
    }
}
