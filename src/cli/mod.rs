//! perf-cli：性能数据维护与报表

pub mod output;

use crate::monitor::report::{self, BenchmarkKind, ExportFormat};
use crate::monitor::{MetricType, PerformanceMonitor, TimeRange};
use crate::store::StoreError;
use chrono::Duration;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// 性能监控命令行工具
#[derive(Parser, Debug)]
#[command(name = "perf-cli")]
#[command(version, about = "Performance monitoring maintenance and reporting", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 监控状态
    Status,
    /// 指标汇总
    Metrics {
        #[arg(long, default_value = "1h")]
        range: TimeRange,
        #[arg(long = "type")]
        metric_type: Option<MetricType>,
    },
    /// 告警查看、解决与清理
    Alerts(AlertsArgs),
    /// 删除旧数据
    Cleanup {
        /// 默认使用配置中的样本保留天数
        #[arg(long)]
        days: Option<i64>,
        /// 不加此参数只预览
        #[arg(long)]
        confirm: bool,
    },
    /// 趋势分析与建议
    Analyze {
        #[arg(long, default_value = "24h")]
        range: TimeRange,
        /// 写出 JSON 报告
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// 健康检查，不健康时退出码为 1
    Healthcheck,
    /// 基准测试
    Benchmark {
        #[arg(long = "type", default_value = "all")]
        kind: BenchmarkKind,
        #[arg(long, default_value_t = 100)]
        iterations: u32,
    },
    /// 导出数据
    Export {
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        #[arg(long, default_value = "24h")]
        range: TimeRange,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// 存储优化
    Optimize,
    /// 实时监控
    Monitor {
        /// 刷新间隔（秒）
        #[arg(long, default_value_t = 5)]
        interval: u64,
        /// 打印指定次数后退出，默认一直运行
        #[arg(long)]
        count: Option<u32>,
    },
}

#[derive(Args, Debug)]
#[group(multiple = false)]
pub struct AlertsArgs {
    /// 列出未解决告警（默认）
    #[arg(long)]
    pub show: bool,
    /// 解决指定告警
    #[arg(long)]
    pub resolve: Option<i64>,
    /// 删除超过保留期的已解决告警
    #[arg(long)]
    pub cleanup: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Invalid(String),
}

const ALERT_LIST_LIMIT: i64 = 50;

/// 执行命令；返回 false 表示退出码应为 1
pub async fn run(command: Command, monitor: &PerformanceMonitor) -> Result<bool, CliError> {
    match command {
        Command::Status => {
            let report = report::status(monitor).await;
            output::print_status(&report);
            Ok(report.database_connected)
        }
        Command::Metrics { range, metric_type } => {
            let types: Vec<MetricType> = metric_type.into_iter().collect();
            let metrics = monitor.metrics(range, &types).await?;
            output::print_metrics(&metrics);
            Ok(true)
        }
        Command::Alerts(args) => alerts(args, monitor).await,
        Command::Cleanup { days, confirm } => {
            let days = days.unwrap_or(monitor.config().retention.metrics_days);
            cleanup(days, confirm, monitor).await
        }
        Command::Analyze { range, output: path } => {
            let report = report::analyze(monitor, range).await?;
            output::print_analysis(&report);
            if let Some(path) = path {
                let json = serde_json::to_string_pretty(&report).map_err(StoreError::from)?;
                tokio::fs::write(&path, json).await?;
                output::success(&format!("Report written to {}", path.display()));
            }
            Ok(true)
        }
        Command::Healthcheck => {
            let report = report::health_check(monitor).await;
            output::print_health(&report);
            Ok(report.is_healthy())
        }
        Command::Benchmark { kind, iterations } => {
            if iterations == 0 {
                return Err(CliError::Invalid("iterations must be positive".to_string()));
            }
            output::info(&format!("Running {} iterations", iterations));
            let results = report::benchmark(monitor, kind, iterations).await?;
            output::print_benchmark(&results);
            Ok(true)
        }
        Command::Export {
            format,
            range,
            output: path,
        } => {
            let data = report::export_data(monitor, range, format).await?;
            let rendered = data.render()?;
            let path = path.unwrap_or_else(|| default_export_path(monitor, format));
            tokio::fs::write(&path, rendered).await?;
            output::success(&format!(
                "Exported {} metric series and {} alerts to {}",
                data.metrics.len(),
                data.alerts.len(),
                path.display()
            ));
            Ok(true)
        }
        Command::Optimize => {
            output::info("Optimizing metric storage...");
            for step in monitor.store().optimize().await? {
                output::success(&step);
            }
            Ok(true)
        }
        Command::Monitor { interval, count } => live(monitor, interval, count).await,
    }
}

async fn alerts(args: AlertsArgs, monitor: &PerformanceMonitor) -> Result<bool, CliError> {
    if let Some(id) = args.resolve {
        return if monitor.resolve_alert(id).await? {
            output::success(&format!("Alert #{} resolved", id));
            Ok(true)
        } else {
            output::error(&format!("Alert #{} not found or already resolved", id));
            Ok(false)
        };
    }

    if args.cleanup {
        let deleted = monitor.cleanup_resolved_alerts().await?;
        output::success(&format!("Deleted {} resolved alerts", deleted));
        return Ok(true);
    }

    let alerts = monitor.alerts(false, ALERT_LIST_LIMIT).await?;
    output::print_alerts(&alerts);
    Ok(true)
}

async fn cleanup(days: i64, confirm: bool, monitor: &PerformanceMonitor) -> Result<bool, CliError> {
    if days <= 0 {
        return Err(CliError::Invalid("days must be positive".to_string()));
    }

    if !confirm {
        let cutoff = monitor.now() - Duration::days(days);
        let pending = monitor.store().count_samples_before(cutoff).await?;
        output::warning(&format!(
            "{} samples are older than {} days; rerun with --confirm to delete them",
            pending, days
        ));
        return Ok(true);
    }

    let report = monitor.cleanup_older_than(days).await?;
    output::print_cleanup(&report);
    Ok(true)
}

async fn live(monitor: &PerformanceMonitor, interval: u64, count: Option<u32>) -> Result<bool, CliError> {
    if interval == 0 {
        return Err(CliError::Invalid("interval must be positive".to_string()));
    }
    output::info(&format!("Refreshing every {}s, press Ctrl+C to stop", interval));

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval));
    let mut printed = 0u32;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = report::realtime(monitor).await?;
                output::print_realtime(&snapshot);
                printed += 1;
                if count.is_some_and(|limit| printed >= limit) {
                    return Ok(true);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                output::info("Monitoring stopped");
                return Ok(true);
            }
        }
    }
}

fn default_export_path(monitor: &PerformanceMonitor, format: ExportFormat) -> PathBuf {
    PathBuf::from(format!(
        "performance-export-{}.{}",
        monitor.now().format("%Y%m%d-%H%M%S"),
        format.extension()
    ))
}
