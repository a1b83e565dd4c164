use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use taskforge::logging::init_logging;
use taskforge::shutdown::wait_for_signal;
use taskforge::{builtin, AppConfig, TaskEngine};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskforge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("后台任务执行引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/taskforge.toml、taskforge.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("min-workers")
                .long("min-workers")
                .value_name("N")
                .help("最小Worker数")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("max-workers")
                .long("max-workers")
                .value_name("N")
                .help("最大Worker数")
                .value_parser(clap::value_parser!(usize)),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).context("加载配置失败")?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
    if let Some(min) = matches.get_one::<usize>("min-workers") {
        config.manager.min_workers = *min;
    }
    if let Some(max) = matches.get_one::<usize>("max-workers") {
        config.manager.max_workers = *max;
    }
    config.validate().context("命令行参数与配置冲突")?;

    init_logging(&config.observability.log_level, &config.observability.log_format)?;
    info!("启动TaskForge后台任务执行引擎");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_bind_address
            .parse()
            .with_context(|| {
                format!("无效的指标监听地址: {}", config.observability.metrics_bind_address)
            })?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("启动Prometheus指标导出失败")?;
        info!("Prometheus指标导出已启动: http://{addr}/metrics");
    }

    let stats_interval = config.observability.stats_log_interval_seconds;
    let mut builder = TaskEngine::builder(config);
    for (name, handler) in builtin::all() {
        builder = builder.register(name, handler);
    }
    let engine = Arc::new(builder.build().await.context("启动任务引擎失败")?);

    let stats_handle = spawn_stats_logger(Arc::clone(&engine), stats_interval).await;

    wait_for_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    engine.shutdown(true).await.context("关闭任务引擎失败")?;
    if let Some(handle) = stats_handle {
        if let Err(e) = handle.await {
            warn!("统计日志循环异常退出: {e}");
        }
    }

    info!("TaskForge已退出");
    Ok(())
}

/// 定期输出队列与Worker池统计
async fn spawn_stats_logger(
    engine: Arc<TaskEngine>,
    interval_seconds: u64,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval_seconds == 0 {
        return None;
    }

    let mut shutdown_rx = engine.subscribe_shutdown().await;
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stats = engine.stats().await;
                    let pool = engine.worker_status().await;
                    info!(
                        "统计: 等待 {}，运行 {}，完成 {}，失败 {}，Worker {} (忙碌 {})",
                        stats.pending,
                        stats.running,
                        stats.completed,
                        stats.failed,
                        pool.total_workers,
                        pool.busy_workers
                    );
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }))
}
