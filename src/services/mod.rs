//! 业务能力层（Services Layer）
//!
//! 每个服务只提供一种能力，不关心批次流程：
//! - `chapter_identifier`：从文件名识别章节号（纯函数）
//! - `queue_store`：按用户分区的章节队列
//! - `partitioner`：按体积上限分卷（纯函数）
//! - `conversion_driver`：带超时和并发上限的章节转换
//! - `volume_merger`：拼接单章 CBZ，超限时二分
//! - `report_writer`：批次报告追加写入

pub mod chapter_identifier;
pub mod conversion_driver;
pub mod partitioner;
pub mod queue_store;
pub mod report_writer;
pub mod volume_merger;

pub use chapter_identifier::{identify_chapter, is_supported_upload};
pub use conversion_driver::{ConversionDriver, ConversionOutcome, ConvertedChapter};
pub use partitioner::partition;
pub use queue_store::{QueueStatus, QueueStore};
pub use report_writer::ReportWriter;
pub use volume_merger::{plan_split, MergedDocument, VolumeMerger};
