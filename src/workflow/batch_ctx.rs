//! 批次处理上下文
//!
//! 封装"我正在处理哪个用户的哪一个批次"这一信息

use crate::models::chapter::UserId;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// 批次处理上下文
#[derive(Debug, Clone)]
pub struct BatchCtx {
    pub user: UserId,

    pub batch_id: Uuid,

    /// 漫画标题
    pub title: String,

    /// 批次临时目录：`<work_dir>/<用户ID>/<批次ID>/`
    pub batch_dir: PathBuf,
}

impl BatchCtx {
    /// 创建新的批次上下文，分配新的批次 ID
    pub fn new(user: UserId, title: impl Into<String>, work_dir: &Path) -> Self {
        let batch_id = Uuid::new_v4();
        Self {
            user,
            batch_id,
            title: title.into(),
            batch_dir: work_dir.join(user.to_string()).join(batch_id.to_string()),
        }
    }

    /// 合并后的卷文件目录
    pub fn output_dir(&self) -> PathBuf {
        self.batch_dir.join("volumes")
    }

    fn short_id(&self) -> String {
        self.batch_id.simple().to_string().chars().take(8).collect()
    }
}

impl Display for BatchCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[用户 {} 批次 {}]", self.user, self.short_id())
    }
}
