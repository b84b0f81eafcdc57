//! 章节号识别 - 业务能力层
//!
//! 从文件名中解析章节号，是纯函数，不依赖任何外部资源。
//!
//! ## 识别规则（固定顺序）
//!
//! 1. 取文件名部分，`_` 替换为空格
//! 2. 去掉已知的文档扩展名（cbz / cbr / cb7 / zip / rar / 7z / pdf / epub）
//! 3. 去掉括号标签：`[...]`、`(...)`、`{...}`（汉化组、年份、`(v02)` 等）
//! 4. 去掉卷号 / 版本标记：`Vol. 4`、`Volume 4`、`Tome 4`、`v2`
//! 5. 有显式章节标记（`Chapter` / `Chap` / `Ch` / `Episode` / `Ep` / `c` / `#`）时取第一个标记后的数字
//! 6. 否则取剩余文本中最靠近扩展名的数字（即最后一个数字）
//!
//! 文件名排序错误是最隐蔽的 bug，规则改动必须同步更新下方的表驱动测试。

use crate::error::IdentifyError;
use crate::models::chapter::ChapterNumber;
use phf::phf_set;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// 可以识别并去掉的文档扩展名
static DOCUMENT_EXTENSIONS: phf::Set<&'static str> = phf_set! {
    "cbz", "cbr", "cb7", "zip", "rar", "7z", "pdf", "epub",
};

/// 转换工具能读取的上传格式
static UPLOAD_EXTENSIONS: phf::Set<&'static str> = phf_set! {
    "cbz", "zip", "cbr", "rar", "cb7", "7z", "pdf",
};

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)|\{[^}]*\}").expect("valid regex"));

static VOLUME_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:volume|vol|tome|v)\.?\s*\d+(?:\.\d+)?").expect("valid regex")
});

static CHAPTER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\b(?:chapter|chap|ch|episode|ep|c)\.?|#)\s*(\d+(?:\.\d+)?)")
        .expect("valid regex")
});

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"));

/// 从文件名中识别章节号
pub fn identify_chapter(filename: &str) -> Result<ChapterNumber, IdentifyError> {
    let not_found = || IdentifyError::NoChapterNumber {
        filename: filename.to_string(),
    };

    let cleaned = strip_noise(filename);

    let token = match CHAPTER_MARKER.captures(&cleaned) {
        Some(caps) => caps.get(1).map(|m| m.as_str()),
        None => NUMBER.find_iter(&cleaned).last().map(|m| m.as_str()),
    };

    token
        .and_then(ChapterNumber::parse)
        .ok_or_else(not_found)
}

/// 是否为支持的上传格式
pub fn is_supported_upload(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| UPLOAD_EXTENSIONS.contains(ext.as_str()))
        .unwrap_or(false)
}

/// 去掉扩展名、括号标签和卷号标记，返回用于识别的文本
fn strip_noise(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());

    let mut text = base.replace('_', " ");

    if let Some(ext) = extension_of(&text) {
        if DOCUMENT_EXTENSIONS.contains(ext.as_str()) {
            let cut = text.len() - ext.len() - 1;
            text.truncate(cut);
        }
    }

    let text = BRACKETED.replace_all(&text, " ");
    let text = VOLUME_MARKER.replace_all(&text, " ");
    text.into_owned()
}

fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || ext.contains(' ') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn n(s: &str) -> ChapterNumber {
        s.parse().unwrap()
    }

    #[test]
    fn test_identify_table() {
        let cases = [
            // 最简单的情况
            ("12.cbz", "12"),
            ("Chapter 12.cbz", "12"),
            ("Dandadan 001.cbz", "1"),
            ("One Piece 1000.5.cbz", "1000.5"),
            // 显式章节标记优先
            ("Anima Regia_Vol. 4, Ch. 23_ Extra.cbz", "23"),
            ("Berserk Vol.40 Ch.364.cbz", "364"),
            ("Title c012 (v02) [Group].cbz", "12"),
            ("Blue Lock - Episode 250.cbz", "250"),
            ("Frieren #120.cbz", "120"),
            ("Chainsaw Man Chapter 97.5.cbz", "97.5"),
            ("ch.7.zip", "7"),
            // 标题中带数字时取最靠近扩展名的数字
            ("86 - Eighty Six 012.cbz", "12"),
            ("Kaiju No. 8 - 100.cbz", "100"),
            ("Mob Psycho 100 - 45.cbz", "45"),
            // 括号里的年份、汉化组标签会被忽略
            ("Vinland Saga 200 (2023) [Scans].cbz", "200"),
            ("[Group] Oshi no Ko - 110 [1080p].cbz", "110"),
            ("Spy x Family {HQ} 88.cbz", "88"),
            // 卷号 / 版本标记会被忽略
            ("Jujutsu Kaisen v2 015.cbz", "15"),
            ("Sakamoto Days 150 v2.cbz", "150"),
            ("Vol 3 Tome 2 - 21.pdf", "21"),
            // 扩展名大小写、下划线
            ("Blame_042.CBZ", "42"),
            ("Homunculus_ch_15.cbr", "15"),
            // 路径只取文件名
            ("downloads/42/Title 3/Title 9.cbz", "9"),
        ];

        for (filename, expected) in cases {
            let got = identify_chapter(filename)
                .unwrap_or_else(|e| panic!("{} 识别失败: {}", filename, e));
            assert_eq!(got, n(expected), "文件名: {}", filename);
        }
    }

    #[test]
    fn test_identify_rejects_names_without_number() {
        for filename in ["cover.cbz", "Extra.cbz", "Title Vol. 3.cbz", "[2019].cbz", ""] {
            assert!(
                matches!(
                    identify_chapter(filename),
                    Err(IdentifyError::NoChapterNumber { .. })
                ),
                "应当拒绝: {}",
                filename
            );
        }
    }

    #[test]
    fn test_supported_uploads() {
        assert!(is_supported_upload("a 1.cbz"));
        assert!(is_supported_upload("a 1.PDF"));
        assert!(is_supported_upload("a 1.cb7"));
        assert!(!is_supported_upload("a 1.epub"));
        assert!(!is_supported_upload("a 1.jpg"));
        assert!(!is_supported_upload("noext"));
    }

    proptest! {
        #[test]
        fn prop_single_token_recovered(
            title in "[A-Za-z][A-Za-z ]{0,20}",
            whole in 0u64..100_000,
            frac in proptest::option::of(1u32..1000),
            sep in prop_oneof![Just(" "), Just(" - "), Just("_")],
            ext in prop_oneof![Just("cbz"), Just("zip"), Just("pdf")],
        ) {
            // 标题本身不能形成卷号 / 章节标记
            prop_assume!(!title.split_whitespace().any(|w| {
                let w = w.to_ascii_lowercase();
                ["v", "vol", "volume", "tome", "c", "ch", "chap", "chapter", "ep", "episode"].contains(&w.as_str())
            }));

            let token = match frac {
                Some(f) => format!("{}.{}", whole, f),
                None => whole.to_string(),
            };
            let filename = format!("{}{}{}.{}", title.trim_end(), sep, token, ext);
            let got = identify_chapter(&filename).unwrap();
            prop_assert_eq!(got, ChapterNumber::parse(&token).unwrap());
        }
    }
}
