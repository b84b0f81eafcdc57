//! 批次报告写入服务 - 业务能力层
//!
//! 只负责把批次结果追加到报告文件（JSON Lines），不关心流程

use crate::models::batch::BatchResult;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// 批次报告写入服务
///
/// 每个批次一行 JSON，便于事后用 `jq` 排查失败章节。
pub struct ReportWriter {
    report_file_path: PathBuf,
}

impl ReportWriter {
    /// 使用自定义文件路径创建
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            report_file_path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.report_file_path
    }

    /// 追加一条批次结果
    pub async fn write(&self, result: &BatchResult) -> Result<()> {
        debug!(
            "写入批次报告: 用户 {} | 批次 {} | 卷数 {}",
            result.user,
            result.batch_id,
            result.volumes.len()
        );

        let mut line = serde_json::to_string(result).context("序列化批次结果失败")?;
        line.push('\n');

        if let Some(parent) = self.report_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.report_file_path)
            .await
            .with_context(|| format!("打开报告文件失败: {}", self.report_file_path.display()))?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

impl Default for ReportWriter {
    fn default() -> Self {
        Self::with_path("batch_report.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::batch::{BatchFailure, BatchStatus};
    use crate::models::chapter::UserId;
    use chrono::Utc;
    use uuid::Uuid;

    fn result(user: i64) -> BatchResult {
        BatchResult {
            batch_id: Uuid::new_v4(),
            user: UserId(user),
            title: "Title".to_string(),
            chapters: Vec::new(),
            volumes: Vec::new(),
            status: BatchStatus::Failed,
            failure: Some(BatchFailure::NoPendingChapters),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_appends_one_line_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::with_path(dir.path().join("reports").join("batch.jsonl"));

        writer.write(&result(1)).await.unwrap();
        writer.write(&result(2)).await.unwrap();

        let content = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: BatchResult = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.user, UserId(2));
        assert_eq!(parsed.failure, Some(BatchFailure::NoPendingChapters));
    }
}
