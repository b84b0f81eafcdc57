use crate::models::chapter::UserId;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 收件箱中的一个合并请求：某个用户的某部漫画的全部章节文件
#[derive(Debug, Clone)]
pub struct InboxRequest {
    pub user: UserId,
    pub title: String,
    pub files: Vec<PathBuf>,
}

/// 扫描收件箱目录，布局为 `<inbox>/<用户ID>/<漫画标题>/<章节文件>`
///
/// 用户目录名不是数字、或标题目录为空时跳过并记录警告。
/// 返回结果按用户 ID、标题排序，保证处理顺序稳定。
pub async fn load_inbox(inbox_dir: &Path) -> Result<Vec<InboxRequest>> {
    if !inbox_dir.exists() {
        anyhow::bail!("收件箱目录不存在: {}", inbox_dir.display());
    }

    let mut requests = Vec::new();
    let mut users = fs::read_dir(inbox_dir)
        .await
        .with_context(|| format!("无法读取收件箱目录: {}", inbox_dir.display()))?;

    while let Some(user_entry) = users.next_entry().await? {
        let user_path = user_entry.path();
        if !user_entry.file_type().await?.is_dir() {
            continue;
        }

        let dir_name = user_entry.file_name().to_string_lossy().to_string();
        let user: UserId = match dir_name.parse() {
            Ok(user) => user,
            Err(_) => {
                tracing::warn!("跳过无法识别的用户目录: {}", user_path.display());
                continue;
            }
        };

        let mut titles = fs::read_dir(&user_path)
            .await
            .with_context(|| format!("无法读取用户目录: {}", user_path.display()))?;

        while let Some(title_entry) = titles.next_entry().await? {
            if !title_entry.file_type().await?.is_dir() {
                continue;
            }
            let title_path = title_entry.path();
            let title = title_entry.file_name().to_string_lossy().to_string();
            let files = list_files(&title_path).await?;

            if files.is_empty() {
                tracing::warn!("[用户 {}] 《{}》目录为空，跳过", user, title);
                continue;
            }

            tracing::info!("[用户 {}] 《{}》发现 {} 个文件", user, title, files.len());
            requests.push(InboxRequest { user, title, files });
        }
    }

    requests.sort_by(|a, b| a.user.cmp(&b.user).then_with(|| a.title.cmp(&b.title)));
    Ok(requests)
}

async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("无法读取目录: {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}
