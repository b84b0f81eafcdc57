//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批次调度和并发控制，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_orchestrator` - 批次编排器
//! - 引擎 API：enqueue / status / request_merge / request_clear
//! - 驱动批次状态机（快照 → 分卷 → 转换 → 合并 → 发送 → 清理）
//! - 决定哪些章节出队、哪些保留
//!
//! ### `session` - 用户会话
//! - 同一用户最多一个进行中的批次
//! - 批次进行中的清空请求延迟执行
//!
//! ### `batch_processor` - 收件箱批量处理器
//! - 命令行入口，扫描收件箱并按用户并发处理
//! - 输出全局统计信息
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<用户>)
//!     ↓
//! batch_orchestrator (处理一个批次)
//!     ↓
//! workflow::VolumeFlow (处理单个卷)
//!     ↓
//! services (能力层：识别 / 队列 / 分卷 / 转换 / 合并)
//!     ↓
//! infrastructure (基础设施：转换工具 / 发送 / 清理 / 通知)
//! ```

pub mod batch_orchestrator;
pub mod batch_processor;
pub mod session;

pub use batch_orchestrator::{
    BatchOrchestrator, ClearOutcome, Collaborators, EnqueueReceipt, UserStatus,
};
pub use batch_processor::App;
pub use session::{BatchGuard, SessionRegistry, UserSession};
