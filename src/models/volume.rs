//! 卷数据模型

use crate::models::chapter::{ChapterNumber, ChapterRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 卷的章节范围标签，例如 `[1-3]`、`[7]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeLabel {
    pub first: ChapterNumber,
    pub last: ChapterNumber,
}

impl RangeLabel {
    pub fn new(first: ChapterNumber, last: ChapterNumber) -> Self {
        Self { first, last }
    }

    /// 根据有序章节号列表生成标签，列表为空时返回 None
    pub fn from_numbers(numbers: &[ChapterNumber]) -> Option<Self> {
        let first = *numbers.first()?;
        let last = *numbers.last()?;
        Some(Self::new(first, last))
    }
}

impl fmt::Display for RangeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "[{}]", self.first)
        } else {
            write!(f, "[{}-{}]", self.first, self.last)
        }
    }
}

/// 卷：一组按章节号升序排列的连续章节
#[derive(Debug, Clone)]
pub struct Volume {
    /// 漫画标题
    pub title: String,
    /// 卷序号（从 1 开始）
    pub index: usize,
    /// 章节（非空、升序）
    pub chapters: Vec<ChapterRecord>,
    pub label: RangeLabel,
}

impl Volume {
    /// 创建卷，章节为空时返回 None
    pub fn new(title: impl Into<String>, index: usize, chapters: Vec<ChapterRecord>) -> Option<Self> {
        let numbers: Vec<ChapterNumber> = chapters.iter().map(|c| c.number).collect();
        let label = RangeLabel::from_numbers(&numbers)?;
        Some(Self {
            title: title.into(),
            index,
            chapters,
            label,
        })
    }

    /// 源文件大小总和
    pub fn source_size(&self) -> u64 {
        self.chapters.iter().map(|c| c.size).sum()
    }

    pub fn numbers(&self) -> Vec<ChapterNumber> {
        self.chapters.iter().map(|c| c.number).collect()
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.title, self.label)
    }
}
