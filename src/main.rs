use anyhow::{Context, Result};
use manga_volume_merge::utils::logging;
use manga_volume_merge::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load().context("加载配置失败")?;

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
