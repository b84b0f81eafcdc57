//! 卷合并 - 业务能力层
//!
//! 把若干单章 CBZ 按顺序拼接成一个卷 CBZ：
//! - 页面原样复制（不重新压缩），章节放在 `NNNN Chapter <n>/` 目录下
//! - 卷开头可以插入一张封面，另附 `ComicInfo.xml`
//! - 合并后超过体积上限时，在最接近体积中点的章节边界二分，左右两半分别重新合并
//! - 单章仍然超限时保留并标记 `oversized`
//!
//! 全部是阻塞 IO，调用方需要放在 `spawn_blocking` 里执行。

use crate::error::MergeError;
use crate::models::chapter::ChapterNumber;
use crate::models::volume::RangeLabel;
use crate::services::conversion_driver::ConvertedChapter;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const COMIC_INFO: &str = "ComicInfo.xml";

/// 合并生成的卷文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedDocument {
    pub path: PathBuf,
    pub label: RangeLabel,
    pub chapters: Vec<ChapterNumber>,
    pub size: u64,
    /// 单章超过体积上限，无法再拆分
    pub oversized: bool,
}

#[derive(Debug, Clone)]
pub struct VolumeMerger {
    ceiling: u64,
    cover_image: Option<PathBuf>,
}

impl VolumeMerger {
    pub fn new(ceiling: u64, cover_image: Option<PathBuf>) -> Self {
        Self {
            ceiling,
            cover_image,
        }
    }

    /// 合并并保证每个输出不超过上限（单章除外），输出按章节顺序排列
    pub fn merge_bounded(
        &self,
        title: &str,
        chapters: &[ConvertedChapter],
        out_dir: &Path,
    ) -> Result<Vec<MergedDocument>, MergeError> {
        let merged = self.merge_one(title, chapters, out_dir)?;

        if merged.size <= self.ceiling {
            return Ok(vec![merged]);
        }

        if chapters.len() == 1 {
            warn!(
                "⚠️ {} {} 单章 {} 字节超过上限 {} 字节，保留并标记",
                title, merged.label, merged.size, self.ceiling
            );
            return Ok(vec![MergedDocument {
                oversized: true,
                ..merged
            }]);
        }

        std::fs::remove_file(&merged.path)?;
        let sizes: Vec<u64> = chapters.iter().map(|c| c.size).collect();
        let k = plan_split(&sizes);
        info!(
            "✂️ {} {} 合并后 {} 字节超过上限，拆分为 {} + {} 话",
            title,
            merged.label,
            merged.size,
            k,
            chapters.len() - k
        );

        let (left, right) = chapters.split_at(k);
        let mut documents = self.merge_bounded(title, left, out_dir)?;
        documents.extend(self.merge_bounded(title, right, out_dir)?);
        Ok(documents)
    }

    /// 不检查体积，直接合并为一个文件
    fn merge_one(
        &self,
        title: &str,
        chapters: &[ConvertedChapter],
        out_dir: &Path,
    ) -> Result<MergedDocument, MergeError> {
        let numbers: Vec<ChapterNumber> = chapters.iter().map(|c| c.number).collect();
        let label = RangeLabel::from_numbers(&numbers).ok_or(MergeError::NoChapters)?;

        std::fs::create_dir_all(out_dir)?;
        let path = out_dir.join(format!("{} {}.cbz", sanitize_title(title), label));
        let mut writer = ZipWriter::new(File::create(&path)?);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        writer.start_file(COMIC_INFO, options)?;
        writer.write_all(comic_info(title, &label, &numbers).as_bytes())?;

        if let Some(cover) = &self.cover_image {
            match std::fs::read(cover) {
                Ok(bytes) => {
                    let ext = cover
                        .extension()
                        .map(|e| e.to_string_lossy().to_ascii_lowercase())
                        .unwrap_or_else(|| "jpg".to_string());
                    writer.start_file(format!("0000 Cover/cover.{}", ext), options)?;
                    writer.write_all(&bytes)?;
                }
                Err(e) => warn!("⚠️ 读取封面失败 {}: {}", cover.display(), e),
            }
        }

        for (i, chapter) in chapters.iter().enumerate() {
            let folder = format!("{:04} Chapter {}", i + 1, chapter.number);
            let mut archive = ZipArchive::new(BufReader::new(File::open(&chapter.path)?))?;

            let mut pages: Vec<(String, usize)> = Vec::new();
            for index in 0..archive.len() {
                let entry = archive.by_index_raw(index)?;
                if entry.is_dir() || entry.name().eq_ignore_ascii_case(COMIC_INFO) {
                    continue;
                }
                pages.push((entry.name().to_string(), index));
            }
            pages.sort();

            for (name, index) in pages {
                let entry = archive.by_index_raw(index)?;
                writer.raw_copy_file_rename(entry, format!("{}/{}", folder, name))?;
            }
        }

        writer.finish()?;
        let size = std::fs::metadata(&path)?.len();
        debug!("合并完成: {} ({} 字节)", path.display(), size);

        Ok(MergedDocument {
            path,
            label,
            chapters: numbers,
            size,
            oversized: false,
        })
    }
}

/// 选择拆分位置 k（左半为前 k 话）：前缀体积最接近总体积一半，平局取较小的 k
///
/// 两章及以上时 `1 <= k < len`，保证左右都不为空；不足两章时返回 `len`。
pub fn plan_split(sizes: &[u64]) -> usize {
    if sizes.len() < 2 {
        return sizes.len();
    }

    let total: u128 = sizes.iter().map(|&s| s as u128).sum();
    let mut prefix: u128 = 0;
    let mut best = (u128::MAX, 1);

    for (k, &size) in sizes.iter().enumerate().take(sizes.len() - 1) {
        prefix += size as u128;
        let distance = (2 * prefix).abs_diff(total);
        if distance < best.0 {
            best = (distance, k + 1);
        }
    }
    best.1
}

/// 去掉文件名中不允许的字符
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = cleaned.trim().trim_end_matches('.').trim();
    if cleaned.is_empty() {
        "manga".to_string()
    } else {
        cleaned.to_string()
    }
}

fn comic_info(title: &str, label: &RangeLabel, numbers: &[ChapterNumber]) -> String {
    let chapters = numbers
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <ComicInfo xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n\
         \x20 <Series>{}</Series>\n\
         \x20 <Title>{} {}</Title>\n\
         \x20 <Summary>Chapters: {}</Summary>\n\
         \x20 <Manga>YesAndRightToLeft</Manga>\n\
         </ComicInfo>\n",
        xml_escape(title),
        xml_escape(title),
        label,
        chapters
    )
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
