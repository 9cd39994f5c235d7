//! 访问防护服务主入口

use chrono::Duration as ChronoDuration;
use lms_guard::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    db,
    handlers::health,
    middleware::AppState,
    monitor::TimeRange,
    routes, telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("lms-guard {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 按优先级加载：.env.local > .env
    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config.logging);
    telemetry::init_metrics();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.storage.backend,
        "lms-guard starting..."
    );

    // 3. 存储（postgres 后端含迁移）
    let stores = db::build_stores(&config).await?;

    // 4. 构建应用状态
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = Arc::new(AppState::new(config.clone(), stores, clock)?);

    // 5. 后台任务
    spawn_background_tasks(state.clone());

    // 6. 构建路由并启动服务器
    let app = routes::create_router(state.clone());
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
    .await?;

    // 退出前写出缓冲中的样本
    if let Err(e) = state.monitor.flush().await {
        tracing::warn!(error = %e, "Failed to flush metrics on shutdown");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 周期任务：采集与刷盘、汇总与清理
fn spawn_background_tasks(state: Arc<AppState>) {
    let perf = &state.config.performance;

    if perf.enabled {
        let collector = state.clone();
        let period = Duration::from_secs(perf.collection_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                collect_once(&collector).await;
            }
        });
    }

    let maintainer = state.clone();
    let period = Duration::from_secs(perf.cleanup_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 第一次 tick 立即返回，启动时不做清理
        interval.tick().await;
        loop {
            interval.tick().await;
            maintain_once(&maintainer).await;
        }
    });
}

async fn collect_once(state: &AppState) {
    let snapshot = state.monitor.monitor_memory_usage().await;
    tracing::debug!(
        current_bytes = snapshot.current_bytes,
        usage_percent = snapshot.usage_percent,
        "Memory sampled"
    );

    if let Err(e) = state.monitor.flush().await {
        tracing::error!(error = %e, "Periodic metrics flush failed");
    }

    if let Err(e) = state.monitor.evaluate_aggregate_alerts().await {
        tracing::error!(error = %e, "Aggregate alert evaluation failed");
    }

    if let Some(pool) = &state.db {
        db::record_pool_metrics(pool);
    }
}

async fn maintain_once(state: &AppState) {
    // 覆盖上一个完整小时和当前小时
    if let Err(e) = state.monitor.roll_up(TimeRange::from(ChronoDuration::hours(2))).await {
        tracing::error!(error = %e, "Performance roll-up failed");
    }

    if let Err(e) = state.monitor.cleanup().await {
        tracing::error!(error = %e, "Performance data cleanup failed");
    }

    match state.token_service.purge_expired().await {
        Ok(purged) if purged > 0 => tracing::info!(purged = purged, "Expired blacklist entries purged"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Blacklist purge failed"),
    }

    match state.limiter.cleanup().await {
        Ok(purged) if purged > 0 => tracing::info!(purged = purged, "Stale rate limit counters purged"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Rate limit counter cleanup failed"),
    }
}

/// 优雅关闭信号处理
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    // 超时后强制退出
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        std::process::exit(1);
    });
}

/// 打印帮助信息
fn print_help() {
    println!("lms-guard {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: lms-guard [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 LMS_ 前缀的环境变量完成，例如 LMS_DATABASE__URL");
    println!("  维护与报表请使用 perf-cli");
}
