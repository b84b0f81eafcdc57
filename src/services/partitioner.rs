//! 分卷 - 业务能力层
//!
//! 按章节号顺序贪心分组：累计源文件大小不超过上限时继续加入当前卷，
//! 否则开新卷。单章超过上限时独占一卷，最终以合并后的实际大小为准。
//! 章节号不连续不会导致分卷，`1, 2, 5` 的标签是 `[1-5]`。

use crate::models::chapter::ChapterRecord;
use crate::models::volume::Volume;

/// 把有序章节划分为若干卷，卷序号从 1 开始
pub fn partition(title: &str, chapters: &[ChapterRecord], ceiling: u64) -> Vec<Volume> {
    let mut groups: Vec<Vec<ChapterRecord>> = Vec::new();
    let mut current: Vec<ChapterRecord> = Vec::new();
    let mut current_size: u64 = 0;

    for chapter in chapters {
        let fits = current_size.saturating_add(chapter.size) <= ceiling;
        if !current.is_empty() && !fits {
            groups.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size = current_size.saturating_add(chapter.size);
        current.push(chapter.clone());
    }
    if !current.is_empty() {
        groups.push(current);
    }

    groups
        .into_iter()
        .enumerate()
        .filter_map(|(i, group)| Volume::new(title, i + 1, group))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chapter::{ChapterNumber, UserId};
    use proptest::prelude::*;

    const MB: u64 = 1024 * 1024;

    fn chapters(spec: &[(u64, u64)]) -> Vec<ChapterRecord> {
        spec.iter()
            .map(|&(n, size)| {
                ChapterRecord::new(
                    UserId(1),
                    format!("{}.cbz", n),
                    format!("/q/{}.cbz", n),
                    ChapterNumber::whole(n),
                    size,
                )
            })
            .collect()
    }

    fn labels(volumes: &[Volume]) -> Vec<String> {
        volumes.iter().map(|v| v.label.to_string()).collect()
    }

    #[test]
    fn test_four_chapters_two_volumes() {
        let input = chapters(&[(1, 5 * MB), (2, 5 * MB), (3, 5 * MB), (4, 5 * MB)]);
        let volumes = partition("Title", &input, 12 * MB);
        assert_eq!(labels(&volumes), vec!["[1-2]", "[3-4]"]);
        assert_eq!(volumes[0].index, 1);
        assert_eq!(volumes[1].index, 2);
    }

    #[test]
    fn test_oversized_chapter_gets_own_volume() {
        let input = chapters(&[(1, 2 * MB), (2, 20 * MB), (3, 2 * MB)]);
        let volumes = partition("Title", &input, 12 * MB);
        assert_eq!(labels(&volumes), vec!["[1]", "[2]", "[3]"]);
    }

    #[test]
    fn test_gap_does_not_split() {
        let input = chapters(&[(1, MB), (2, MB), (5, MB)]);
        let volumes = partition("Title", &input, 12 * MB);
        assert_eq!(labels(&volumes), vec!["[1-5]"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(partition("Title", &[], 12 * MB).is_empty());
    }

    proptest! {
        #[test]
        fn prop_volumes_within_ceiling_and_ordered(
            sizes in proptest::collection::vec(1u64..40, 0..30),
            ceiling in 1u64..60,
        ) {
            let spec: Vec<(u64, u64)> = sizes.iter().enumerate().map(|(i, &s)| (i as u64 + 1, s)).collect();
            let input = chapters(&spec);
            let volumes = partition("T", &input, ceiling);

            for v in &volumes {
                prop_assert!(v.source_size() <= ceiling || v.chapters.len() == 1);
            }

            let flattened: Vec<ChapterNumber> = volumes.iter().flat_map(|v| v.numbers()).collect();
            let expected: Vec<ChapterNumber> = input.iter().map(|c| c.number).collect();
            prop_assert_eq!(flattened, expected);
        }
    }
}
