//! 文件清理 - 基础设施层
//!
//! 只暴露"删除文件"能力，不关心哪些文件该删

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 清理能力
#[async_trait]
pub trait Cleaner: Send + Sync {
    /// 删除一组文件，返回实际删除的数量
    async fn delete_files(&self, paths: &[PathBuf]) -> usize;

    /// 递归删除目录
    async fn delete_dir(&self, dir: &Path);
}

/// 基于本地文件系统的清理实现
///
/// 文件已不存在时静默跳过，其他错误只记录日志，不向上传播。
#[derive(Debug, Default, Clone)]
pub struct FsCleaner;

impl FsCleaner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Cleaner for FsCleaner {
    async fn delete_files(&self, paths: &[PathBuf]) -> usize {
        let mut removed = 0;
        for path in paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    debug!("🗑️ 已删除: {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("文件已不存在: {}", path.display());
                }
                Err(e) => warn!("⚠️ 删除文件失败 {}: {}", path.display(), e),
            }
        }
        removed
    }

    async fn delete_dir(&self, dir: &Path) {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => debug!("🗑️ 已删除目录: {}", dir.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("⚠️ 删除目录失败 {}: {}", dir.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_files_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.cbz");
        std::fs::write(&a, b"x").unwrap();
        let missing = dir.path().join("missing.cbz");

        let removed = FsCleaner::new().delete_files(&[a.clone(), missing]).await;
        assert_eq!(removed, 1);
        assert!(!a.exists());
    }

    #[tokio::test]
    async fn test_delete_dir_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("batch").join("converted");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("1.cbz"), b"x").unwrap();

        FsCleaner::new().delete_dir(&dir.path().join("batch")).await;
        assert!(!dir.path().join("batch").exists());

        // 再删一次不报错
        FsCleaner::new().delete_dir(&dir.path().join("batch")).await;
    }
}
