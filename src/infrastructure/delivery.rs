//! 发送 - 基础设施层
//!
//! 把生成好的卷文件交给外部投递渠道（邮件工具或本地 outbox 目录）。
//! 重试和超时由上层 `VolumeFlow` 负责。

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::infrastructure::converter::diagnostics_tail;
use crate::models::chapter::UserId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// 发送能力
///
/// 成功时返回渠道保留下来的文件位置；文件发出后不在本地保留时返回 None。
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(
        &self,
        user: UserId,
        document: &Path,
        size: u64,
    ) -> Result<Option<PathBuf>, DeliveryError>;
}

/// 邮件主题：AZW3 直接发送，其余格式让 Kindle 服务端转换
pub fn mail_subject(document: &Path) -> &'static str {
    let is_azw3 = document
        .extension()
        .map(|e| e.eq_ignore_ascii_case("azw3"))
        .unwrap_or(false);
    if is_azw3 {
        "Send"
    } else {
        "Convert"
    }
}

/// 调用外部邮件工具发送
#[derive(Debug, Clone)]
pub struct CommandDeliverer {
    program: String,
    args: Vec<String>,
    default_mailbox: Option<String>,
    mailboxes: BTreeMap<String, String>,
}

impl CommandDeliverer {
    pub fn new(program: impl Into<String>, config: &DeliveryConfig) -> Self {
        Self {
            program: program.into(),
            args: config.args.clone(),
            default_mailbox: config.default_mailbox.clone(),
            mailboxes: config.mailboxes.clone(),
        }
    }

    /// 查找用户的收件邮箱，没有单独配置时使用默认邮箱
    pub fn mailbox_for(&self, user: UserId) -> Option<&str> {
        self.mailboxes
            .get(&user.to_string())
            .or(self.default_mailbox.as_ref())
            .map(String::as_str)
    }

    /// 展开参数模板
    pub fn render_args(&self, mailbox: &str, document: &Path, size: u64) -> Vec<String> {
        let filename = document
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let path = document.to_string_lossy();
        let size = size.to_string();
        let subject = mail_subject(document);

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{path}", &path)
                    .replace("{filename}", &filename)
                    .replace("{mailbox}", mailbox)
                    .replace("{subject}", subject)
                    .replace("{size}", &size)
            })
            .collect()
    }
}

#[async_trait]
impl Deliverer for CommandDeliverer {
    async fn deliver(
        &self,
        user: UserId,
        document: &Path,
        size: u64,
    ) -> Result<Option<PathBuf>, DeliveryError> {
        let mailbox = self
            .mailbox_for(user)
            .ok_or(DeliveryError::NoMailbox { user })?;
        let args = self.render_args(mailbox, document, size);

        info!("[用户 {}] 📧 正在发送 {} 到 {}", user, document.display(), mailbox);

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            Ok(None)
        } else {
            Err(DeliveryError::Failed {
                diagnostics: diagnostics_tail(&output.stderr, &output.stdout),
            })
        }
    }
}

/// 把卷文件复制到 `<outbox>/<用户ID>/`，没有配置发送命令时使用
#[derive(Debug, Clone)]
pub struct OutboxDeliverer {
    root: PathBuf,
}

impl OutboxDeliverer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn user_dir(&self, user: UserId) -> PathBuf {
        self.root.join(user.to_string())
    }
}

#[async_trait]
impl Deliverer for OutboxDeliverer {
    async fn deliver(
        &self,
        user: UserId,
        document: &Path,
        _size: u64,
    ) -> Result<Option<PathBuf>, DeliveryError> {
        let dir = self.user_dir(user);
        tokio::fs::create_dir_all(&dir).await?;

        let filename = document.file_name().ok_or_else(|| DeliveryError::Failed {
            diagnostics: format!("无效的文件路径: {}", document.display()),
        })?;
        let target = dir.join(filename);
        tokio::fs::copy(document, &target).await?;

        info!("[用户 {}] 📦 已写入 outbox: {}", user, target.display());
        Ok(Some(target))
    }
}
