//! 收件箱批量处理器 - 编排层
//!
//! ## 职责
//!
//! 命令行入口：把收件箱目录当作聊天端，依次"上传"章节并发出合并请求。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：创建临时目录、构建引擎和外部能力
//! 2. **批量加载**：扫描 `<inbox>/<用户ID>/<漫画标题>/` 下的所有章节
//! 3. **并发控制**：使用 Semaphore 限制同时处理的用户数
//! 4. **顺序保证**：同一用户的漫画依次处理，每部漫画一个批次
//! 5. **全局统计**：汇总所有批次的处理结果
//!
//! 被拒绝或未能发送的章节文件保留在收件箱中，下次运行时重试。

use crate::config::Config;
use crate::models::chapter::{IncomingFile, UserId};
use crate::models::loaders::{load_inbox, InboxRequest};
use crate::orchestrator::batch_orchestrator::{BatchOrchestrator, Collaborators};
use crate::utils::logging::{log_requests_loaded, log_startup, print_final_stats, ProcessingStats};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// 应用主结构
pub struct App {
    config: Config,
    engine: Arc<BatchOrchestrator>,
}

impl App {
    /// 使用生产环境的外部能力初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config);
        Self::with_collaborators(config, collaborators).await
    }

    /// 使用指定的外部能力初始化应用
    pub async fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        log_startup(&config);

        tokio::fs::create_dir_all(&config.work_dir)
            .await
            .with_context(|| format!("无法创建临时目录: {}", config.work_dir.display()))?;

        let engine = Arc::new(BatchOrchestrator::new(&config, collaborators));
        Ok(Self { config, engine })
    }

    pub fn engine(&self) -> Arc<BatchOrchestrator> {
        Arc::clone(&self.engine)
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<ProcessingStats> {
        info!("\n📁 正在扫描收件箱...");
        let requests = load_inbox(&self.config.inbox_dir).await?;

        if requests.is_empty() {
            warn!("⚠️ 收件箱中没有待处理的章节，程序结束");
            return Ok(ProcessingStats::default());
        }

        let mut by_user: BTreeMap<UserId, Vec<InboxRequest>> = BTreeMap::new();
        for request in requests {
            by_user.entry(request.user).or_default().push(request);
        }
        let total_titles = by_user.values().map(Vec::len).sum();
        log_requests_loaded(by_user.len(), total_titles, self.config.max_concurrent_users);

        let stats = self.process_all_users(by_user).await?;
        print_final_stats(&stats, &self.config);
        Ok(stats)
    }

    /// 并发处理所有用户
    async fn process_all_users(
        &self,
        by_user: BTreeMap<UserId, Vec<InboxRequest>>,
    ) -> Result<ProcessingStats> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_users));
        let mut handles = Vec::new();

        for (user, requests) in by_user {
            let permit = semaphore.clone().acquire_owned().await?;
            let engine = Arc::clone(&self.engine);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                process_user(&engine, user, requests).await
            });
            handles.push((user, handle));
        }

        let mut stats = ProcessingStats::default();
        for (user, handle) in handles {
            match handle.await {
                Ok(user_stats) => stats.merge(user_stats),
                Err(e) => {
                    error!("[用户 {}] 任务执行失败: {}", user, e);
                    stats.failed += 1;
                    stats.total += 1;
                }
            }
        }

        Ok(stats)
    }
}

/// 依次处理一个用户的所有漫画
async fn process_user(
    engine: &BatchOrchestrator,
    user: UserId,
    requests: Vec<InboxRequest>,
) -> ProcessingStats {
    let mut stats = ProcessingStats::default();

    for request in requests {
        for path in request.files {
            let file = IncomingFile::from_path(path);
            if let Err(e) = engine.enqueue(user, file.clone()).await {
                warn!("[用户 {}] 🚫 {}: {}", user, file.filename, e.user_message());
                stats.rejected_files += 1;
            }
        }

        match engine.request_merge(user, &request.title).await {
            Ok(result) => {
                info!("[用户 {}]\n{}", user, result.summary());
                stats.record(&result);
            }
            Err(e) => {
                warn!("[用户 {}] {}", user, e.user_message());
                stats.failed += 1;
                stats.total += 1;
            }
        }

        // 未发送的章节留在收件箱，不带入下一部漫画的批次
        let left = engine.release(user);
        if left > 0 {
            info!("[用户 {}] 《{}》有 {} 话未发送，保留在收件箱中", user, request.title, left);
        }
    }

    stats
}
