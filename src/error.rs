//! 错误类型
//!
//! 库内部的各个环节使用带类型的错误，每种错误都能映射为一条
//! 面向用户、可操作的提示（`user_message`），不会把内部错误原样抛给用户。
//! 应用层（main / App / loaders）统一使用 `anyhow::Result`。

use crate::models::chapter::{ChapterNumber, UserId};
use std::path::PathBuf;
use thiserror::Error;

/// 章节号识别错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifyError {
    /// 文件名中找不到章节号
    #[error("无法从文件名中识别章节号: {filename}")]
    NoChapterNumber { filename: String },
}

/// 入队错误
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// 不支持的文件格式
    #[error("不支持的文件格式: {filename}")]
    UnsupportedFormat { filename: String },

    /// 章节号识别失败
    #[error(transparent)]
    Parse(#[from] IdentifyError),

    /// 同一章节号已在队列中
    #[error("第 {number} 话已在队列中 (已有文件: {existing})")]
    DuplicateChapter {
        number: ChapterNumber,
        existing: String,
    },

    /// 读取上传文件失败
    #[error("无法读取上传文件 ({path}): {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 文件为空
    #[error("文件为空: {filename}")]
    EmptyFile { filename: String },
}

impl EnqueueError {
    pub fn user_message(&self) -> String {
        match self {
            EnqueueError::UnsupportedFormat { filename } => format!(
                "{} 不是支持的格式，请发送 CBZ / ZIP / CBR / CB7 / PDF 文件。",
                filename
            ),
            EnqueueError::Parse(IdentifyError::NoChapterNumber { filename }) => format!(
                "无法从 {} 中识别章节号，请重命名（例如 \"标题 Ch. 12.cbz\"）后重新发送。",
                filename
            ),
            EnqueueError::DuplicateChapter { number, existing } => format!(
                "第 {} 话已经在队列中（{}），本次文件已忽略。",
                number, existing
            ),
            EnqueueError::Unreadable { .. } => "文件接收失败，请重新发送。".to_string(),
            EnqueueError::EmptyFile { filename } => {
                format!("{} 是空文件，请重新发送。", filename)
            }
        }
    }
}

/// 转换失败
#[derive(Debug, Error)]
pub enum ConversionError {
    /// 无法启动转换工具
    #[error("无法启动转换工具 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// 转换超时
    #[error("转换超时 ({secs} 秒)")]
    Timeout { secs: u64 },

    /// 工具返回非零退出码
    #[error("转换工具退出码 {code:?}: {diagnostics}")]
    ToolFailed {
        code: Option<i32>,
        diagnostics: String,
    },

    /// 工具执行成功但没有生成输出文件
    #[error("转换工具没有生成输出文件: {expected}")]
    MissingOutput { expected: PathBuf },

    /// 准备输出目录等文件操作失败
    #[error("转换文件操作失败: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    pub fn user_message(&self, number: ChapterNumber) -> String {
        match self {
            ConversionError::Timeout { .. } => {
                format!("第 {} 话转换超时，已跳过。", number)
            }
            _ => format!("第 {} 话无法转换，已跳过。", number),
        }
    }
}

/// 卷合并错误
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("合并文件操作失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("读取或写入压缩包失败: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// 卷中没有可合并的章节
    #[error("卷中没有可合并的章节")]
    NoChapters,

    /// 后台合并任务异常退出
    #[error("合并任务异常: {0}")]
    Task(String),
}

/// 发送错误
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// 用户没有配置收件邮箱
    #[error("用户 {user} 没有配置收件邮箱")]
    NoMailbox { user: UserId },

    /// 发送超时
    #[error("发送超时 ({secs} 秒)")]
    Timeout { secs: u64 },

    /// 发送工具失败
    #[error("发送失败: {diagnostics}")]
    Failed { diagnostics: String },

    #[error("发送文件操作失败: {0}")]
    Io(#[from] std::io::Error),
}

impl DeliveryError {
    pub fn user_message(&self) -> String {
        match self {
            DeliveryError::NoMailbox { .. } => "没有配置收件邮箱，请联系管理员。".to_string(),
            DeliveryError::Timeout { .. } => "发送超时，已重试一次仍失败。".to_string(),
            DeliveryError::Failed { .. } | DeliveryError::Io(_) => {
                "发送失败，已重试一次仍失败。".to_string()
            }
        }
    }
}

/// 合并请求被拒绝
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// 该用户已有正在进行的批次
    #[error("用户 {user} 已有正在处理的批次")]
    BatchInProgress { user: UserId },
}

impl BatchError {
    pub fn user_message(&self) -> String {
        match self {
            BatchError::BatchInProgress { .. } => {
                "上一次合并还在进行中，请等待完成后再发送 /merge。".to_string()
            }
        }
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    /// 配置文件读取失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// 配置值不合法
    #[error("配置项 {field} 不合法: {reason}")]
    Invalid { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_name_the_chapter() {
        let err = ConversionError::ToolFailed {
            code: Some(1),
            diagnostics: "boom".to_string(),
        };
        let msg = err.user_message(ChapterNumber::whole(7));
        assert!(msg.contains("第 7 话"));
        assert!(msg.contains("跳过"));
        assert!(!msg.contains("boom"));
    }

    #[test]
    fn test_parse_error_asks_for_rename() {
        let err = EnqueueError::from(IdentifyError::NoChapterNumber {
            filename: "cover.cbz".to_string(),
        });
        assert!(err.user_message().contains("重命名"));
    }
}
