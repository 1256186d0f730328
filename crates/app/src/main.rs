use std::sync::Arc;

use anyhow::Context;
use kline_core::config::AppConfig;
use kline_feed::binance::BinanceProvider;
use kline_market::backfill::Backfill;
use kline_market::poller::{Poller, PollerConfig};
use kline_market::store::SeriesStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod settings;

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责加载配置、实例化数据源与存储，并串联回补、轮询与导出。
///
/// # Logic
/// 1. 初始化全局日志。
/// 2. 加载并校验配置，任何非法项在发起网络请求前即报错。
/// 3. 实例化基础设施层（Feed）与领域层（SeriesStore）。
/// 4. 执行历史回补，失败则直接退出。
/// 5. 启动后台轮询，挂起等待外部信号。
/// 6. 停止轮询，按需导出快照。
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 初始化日志，guard 需存活至进程结束
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(writer)
        .init();
    info!("Kline collector starting...");

    // 2. 配置
    let config: AppConfig = settings::load().context("failed to load configuration")?;
    let settings = config.validate().context("invalid configuration")?;
    info!(
        "Collecting {} from {} over {}",
        settings.key,
        settings.market_type,
        settings.range
    );

    // 3. 基础设施层与存储
    let feed = Arc::new(
        BinanceProvider::new(settings.market_type, settings.request_timeout, settings.retry)
            .context("failed to build HTTP client")?,
    );
    let store = Arc::new(SeriesStore::new(settings.key.clone()));

    // 4. 历史回补
    let report = Backfill::new(feed.clone(), store.clone(), settings.range)
        .with_page_pause(settings.page_pause)
        .run()
        .await
        .context("backfill failed")?;
    info!(
        "Backfill committed {} klines in {} pages",
        report.committed, report.pages
    );

    // 5. 增量轮询
    // 轮询超时需容纳数据源内部的全部重试
    let poller_config = PollerConfig::new(settings.poll_interval, settings.poll_timeout())?
        .with_failure_warn(settings.consecutive_failure_warn);
    let handle = Poller::new(feed, store.clone(), poller_config).spawn()?;

    info!("Poller running. Waiting for signals...");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping poller...");

    // 6. 停止并导出
    let stats = handle.shutdown().await;
    info!(
        "Poller stopped after {} cycles ({} merged, {} skipped, {} failed)",
        stats.cycles, stats.merged, stats.skipped, stats.failed
    );

    match &settings.export_path {
        Some(path) => {
            store
                .export(path)
                .with_context(|| format!("failed to export to {}", path.display()))?;
        }
        None => warn!("No export path configured, {} klines discarded", store.len()),
    }

    Ok(())
}
