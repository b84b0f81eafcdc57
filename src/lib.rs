//! # Manga Volume Merge
//!
//! 把用户逐话上传的漫画章节排队，按体积上限分卷、转换、合并并发送到 Kindle。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部资源，只暴露能力 trait
//! - `Converter` / `KccConverter` - 单章转换（kcc-c2e）
//! - `Deliverer` / `CommandDeliverer` / `OutboxDeliverer` - 发送卷文件
//! - `Cleaner` / `FsCleaner` - 删除文件
//! - `ProgressSink` / `LogProgressSink` - 向聊天端推送进度
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不关心批次流程
//! - `identify_chapter` - 从文件名识别章节号
//! - `QueueStore` - 按用户分区的章节队列
//! - `partition` - 按体积上限分卷
//! - `ConversionDriver` - 带超时、限并发的批量转换
//! - `VolumeMerger` - 拼接 CBZ，超限时二分
//! - `ReportWriter` - 写批次报告
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一卷"的完整处理流程
//! - `BatchCtx` - 上下文封装（用户 + 批次 ID + 临时目录）
//! - `VolumeFlow` - 合并 → 发送（重试一次）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_orchestrator` - 引擎 API 和批次状态机
//! - `orchestrator/session` - 每用户一个批次、延迟清空
//! - `orchestrator/batch_processor` - 收件箱命令行入口
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{BatchError, ConversionError, DeliveryError, EnqueueError, IdentifyError, MergeError};
pub use models::{BatchPhase, BatchResult, BatchStatus, ChapterNumber, IncomingFile, UserId};
pub use orchestrator::{App, BatchOrchestrator, ClearOutcome, Collaborators, EnqueueReceipt, UserStatus};
pub use services::identify_chapter;
pub use workflow::{BatchCtx, VolumeFlow};
