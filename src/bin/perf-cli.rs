//! 性能监控命令行工具入口

use clap::Parser;
use lms_guard::{
    cli::{self, output, Cli},
    clock::{Clock, SystemClock},
    config::{AppConfig, LoggingConfig},
    db,
    monitor::PerformanceMonitor,
    store::StorageBackend,
    telemetry,
};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();

    match execute(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn execute(args: Cli) -> anyhow::Result<bool> {
    let config = AppConfig::from_env()?;

    // 日志只输出告警以上，避免干扰报表
    telemetry::init_telemetry(&LoggingConfig {
        level: "warn".to_string(),
        format: config.logging.format.clone(),
    });

    if config.storage.backend == StorageBackend::Memory {
        output::warning("storage.backend is memory; this process sees only its own data");
    }

    let stores = db::build_stores(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let monitor = PerformanceMonitor::new(stores.metrics, stores.counters, clock, &config.performance);

    Ok(cli::run(args.command, &monitor).await?)
}
