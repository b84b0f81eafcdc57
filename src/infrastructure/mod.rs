//! 基础设施层（Infrastructure Layer）
//!
//! 持有外部资源（转换进程、邮件工具、文件系统、聊天端），
//! 只暴露能力 trait，不包含任何批次流程。

pub mod cleanup;
pub mod converter;
pub mod delivery;
pub mod notifier;

pub use cleanup::{Cleaner, FsCleaner};
pub use converter::{ConversionParams, Converter, KccConverter};
pub use delivery::{CommandDeliverer, Deliverer, OutboxDeliverer};
pub use notifier::{LogProgressSink, ProgressEvent, ProgressSink};
