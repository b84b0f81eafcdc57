//! 章节数据模型
//!
//! 包含用户标识、章节号（精确小数）和排队中的章节记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 聊天用户 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

/// 小数部分最多保留的位数
const FRACTION_DIGITS: usize = 9;

/// 章节号
///
/// 用定点小数精确表示 `12`、`12.5`、`100.25` 这类编号，
/// 不走浮点数，避免 `12.1` 和 `12.10000001` 排序不稳定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ChapterNumber {
    whole: u64,
    nanos: u32,
}

impl ChapterNumber {
    /// 整数章节号
    pub const fn whole(n: u64) -> Self {
        Self { whole: n, nanos: 0 }
    }

    /// 解析 `\d+(\.\d+)?` 形式的数字，前导零会被忽略
    pub fn parse(token: &str) -> Option<Self> {
        let (whole_part, fraction_part) = match token.split_once('.') {
            Some((w, f)) => (w, Some(f)),
            None => (token, None),
        };

        if whole_part.is_empty() || !whole_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let whole = whole_part.parse::<u64>().ok()?;

        let nanos = match fraction_part {
            None => 0,
            Some(f) => {
                if f.is_empty() || f.len() > FRACTION_DIGITS || !f.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let padded = format!("{:0<width$}", f, width = FRACTION_DIGITS);
                padded.parse::<u32>().ok()?
            }
        };

        Some(Self { whole, nanos })
    }
}

impl fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return write!(f, "{}", self.whole);
        }
        let fraction = format!("{:09}", self.nanos);
        write!(f, "{}.{}", self.whole, fraction.trim_end_matches('0'))
    }
}

impl FromStr for ChapterNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.trim()).ok_or_else(|| format!("无效的章节号: {}", s))
    }
}

impl From<ChapterNumber> for String {
    fn from(n: ChapterNumber) -> Self {
        n.to_string()
    }
}

impl TryFrom<String> for ChapterNumber {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<u64> for ChapterNumber {
    fn from(n: u64) -> Self {
        Self::whole(n)
    }
}

/// 章节在批次中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    /// 等待处理
    #[default]
    Pending,
    /// 已转换
    Converted,
    /// 转换失败
    Failed,
}

impl fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChapterStatus::Pending => "等待中",
            ChapterStatus::Converted => "已转换",
            ChapterStatus::Failed => "失败",
        };
        write!(f, "{}", name)
    }
}

/// 用户上传的文件（由聊天端下载到本地后交给引擎）
#[derive(Debug, Clone)]
pub struct IncomingFile {
    /// 原始文件名
    pub filename: String,
    /// 本地存储路径
    pub path: PathBuf,
}

impl IncomingFile {
    pub fn new(filename: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            path: path.into(),
        }
    }

    /// 直接使用路径中的文件名
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        Self { filename, path }
    }
}

/// 排队中的章节记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub user: UserId,
    pub filename: String,
    pub path: PathBuf,
    pub number: ChapterNumber,
    pub size: u64,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ChapterStatus,
}

impl ChapterRecord {
    pub fn new(
        user: UserId,
        filename: impl Into<String>,
        path: impl Into<PathBuf>,
        number: ChapterNumber,
        size: u64,
    ) -> Self {
        Self {
            user,
            filename: filename.into(),
            path: path.into(),
            number,
            size,
            received_at: Utc::now(),
            status: ChapterStatus::Pending,
        }
    }
}

impl PartialEq for ChapterRecord {
    fn eq(&self, other: &Self) -> bool {
        self.user == other.user && self.number == other.number && self.path == other.path
    }
}

impl Eq for ChapterRecord {}

impl PartialOrd for ChapterRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChapterRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number
            .cmp(&other.number)
            .then_with(|| self.path.cmp(&other.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_decimal() {
        assert_eq!(ChapterNumber::parse("12"), Some(ChapterNumber::whole(12)));
        assert_eq!(ChapterNumber::parse("012"), Some(ChapterNumber::whole(12)));
        assert_eq!(ChapterNumber::parse("12.5").unwrap().to_string(), "12.5");
        assert_eq!(ChapterNumber::parse("12.50").unwrap().to_string(), "12.5");
        assert_eq!(ChapterNumber::parse("12.0").unwrap(), ChapterNumber::whole(12));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(ChapterNumber::parse(""), None);
        assert_eq!(ChapterNumber::parse("12."), None);
        assert_eq!(ChapterNumber::parse(".5"), None);
        assert_eq!(ChapterNumber::parse("1a"), None);
        assert_eq!(ChapterNumber::parse("1.1234567891"), None);
    }

    #[test]
    fn test_ordering_is_numeric() {
        let mut numbers: Vec<ChapterNumber> = ["10", "2", "2.5", "2.45", "1"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        numbers.sort();
        let shown: Vec<String> = numbers.iter().map(|n| n.to_string()).collect();
        assert_eq!(shown, vec!["1", "2", "2.45", "2.5", "10"]);
    }

    #[test]
    fn test_serde_as_string() {
        let n: ChapterNumber = "7.25".parse().unwrap();
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, "\"7.25\"");
        let back: ChapterNumber = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }
}
