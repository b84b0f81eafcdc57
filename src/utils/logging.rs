//! 日志工具模块
//!
//! 提供日志初始化和格式化输出的辅助函数

use crate::config::Config;
use crate::models::batch::{format_size, BatchResult, BatchStatus};
use crate::workflow::batch_ctx::BatchCtx;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 初始化日志
///
/// 优先使用 `RUST_LOG`；未设置时默认 info，详细模式下为 debug。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 重复初始化（例如测试中）时忽略
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 漫画章节合并模式");
    info!("📁 收件箱: {}", config.inbox_dir.display());
    info!("📁 临时目录: {}", config.work_dir.display());
    info!("📏 单卷上限: {} MB", config.max_volume_mb);
    info!(
        "📊 最大并发: 用户 {} / 转换 {}",
        config.max_concurrent_users, config.max_concurrent_conversions
    );
    match &config.delivery.command {
        Some(command) => info!("📧 发送命令: {}", command),
        None => info!("📦 未配置发送命令，输出写入: {}", config.delivery.outbox_dir.display()),
    }
    info!("{}", "=".repeat(60));
}

/// 记录收件箱加载信息
pub fn log_requests_loaded(users: usize, titles: usize, max_concurrent: usize) {
    info!("✓ 找到 {} 个用户的 {} 部漫画", users, titles);
    info!("📋 最多同时处理 {} 个用户，同一用户的漫画依次处理\n", max_concurrent);
}

/// 记录批次开始信息
pub fn log_batch_start(ctx: &BatchCtx, chapters: usize) {
    info!("\n{}", "=".repeat(60));
    info!("{} 📦 开始合并《{}》", ctx, ctx.title);
    info!("{} 📄 快照章节数: {}", ctx, chapters);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(ctx: &BatchCtx, result: &BatchResult) {
    let delivered = result.delivered_volumes().count();
    let delivered_bytes: u64 = result.delivered_volumes().map(|v| v.size).sum();
    let failed_chapters = result.failed_chapters().count();

    info!("\n{}", "─".repeat(60));
    match result.status {
        BatchStatus::Succeeded => info!(
            "{} ✅ 完成: 发送 {} 卷 ({})",
            ctx,
            delivered,
            format_size(delivered_bytes)
        ),
        BatchStatus::PartiallySucceeded => warn!(
            "{} ⚠️ 部分完成: 发送 {} 卷 ({})，失败章节 {} 话",
            ctx,
            delivered,
            format_size(delivered_bytes),
            failed_chapters
        ),
        BatchStatus::Failed => warn!(
            "{} ❌ 失败: {}",
            ctx,
            result
                .failure
                .as_ref()
                .map(|f| f.user_message())
                .unwrap_or_default()
        ),
    }
    info!("{}", "─".repeat(60));
}

/// 处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStats {
    pub total: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub delivered_volumes: usize,
    pub rejected_files: usize,
}

impl ProcessingStats {
    pub fn record(&mut self, result: &BatchResult) {
        self.total += 1;
        self.delivered_volumes += result.delivered_volumes().count();
        match result.status {
            BatchStatus::Succeeded => self.succeeded += 1,
            BatchStatus::PartiallySucceeded => self.partial += 1,
            BatchStatus::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: ProcessingStats) {
        self.total += other.total;
        self.succeeded += other.succeeded;
        self.partial += other.partial;
        self.failed += other.failed;
        self.delivered_volumes += other.delivered_volumes;
        self.rejected_files += other.rejected_files;
    }
}

/// 打印最终统计信息
pub fn print_final_stats(stats: &ProcessingStats, config: &Config) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", stats.succeeded, stats.total);
    info!("⚠️ 部分成功: {}", stats.partial);
    info!("❌ 失败: {}", stats.failed);
    info!("📨 已发送卷数: {}", stats.delivered_volumes);
    if stats.rejected_files > 0 {
        info!("🚫 被拒绝的文件: {}", stats.rejected_files);
    }
    info!("{}", "=".repeat(60));
    if let Some(report) = &config.report_file {
        info!("\n批次报告已保存至: {}", report.display());
    }
}
