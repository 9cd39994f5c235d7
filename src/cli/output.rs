//! 终端输出：带颜色的状态行和报表打印

use crate::monitor::report::{
    AnalysisReport, BenchmarkResult, CheckStatus, HealthReport, OverallHealth, RealtimeSnapshot,
    StatusReport, TrendDirection,
};
use crate::monitor::{Alert, AlertLevel, CleanupReport, MetricSummary};
use std::fmt::Write;

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

fn paint(colour: &str, text: &str) -> String {
    format!("{}{}{}", colour, text, RESET)
}

pub fn info(message: &str) {
    println!("{} {}", paint(BLUE, "[INFO]"), message);
}

pub fn success(message: &str) {
    println!("{} {}", paint(GREEN, "[SUCCESS]"), message);
}

pub fn warning(message: &str) {
    println!("{} {}", paint(YELLOW, "[WARNING]"), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", paint(RED, "[ERROR]"), message);
}

fn header(title: &str) {
    println!();
    println!("{}", paint(BOLD, title));
    println!("{}", "=".repeat(title.chars().count()));
}

pub fn format_mb(bytes: u64) -> String {
    format!("{:.1}MB", bytes as f64 / BYTES_PER_MB)
}

fn format_optional(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}{}", v, unit))
}

/// 指标表中的一行
pub fn metric_row(m: &MetricSummary) -> String {
    format!(
        "{:<16} {:<28} {:>8} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2}  {}",
        m.metric_type.as_str(),
        m.metric_name,
        m.count,
        m.avg,
        m.min,
        m.max,
        m.p95,
        m.p99,
        m.unit
    )
}

pub fn alert_row(alert: &Alert) -> String {
    let level = match alert.level {
        AlertLevel::Critical => paint(RED, "CRITICAL"),
        AlertLevel::Warning => paint(YELLOW, "WARNING"),
        AlertLevel::Info => paint(BLUE, "INFO"),
    };
    let mut row = format!(
        "#{:<6} {} [{}] {}  ({})",
        alert.id,
        level,
        alert.alert_type,
        alert.message,
        alert.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(resolved_at) = alert.resolved_at {
        let _ = write!(row, " resolved {}", resolved_at.format("%Y-%m-%d %H:%M:%S"));
    }
    row
}

pub fn print_status(report: &StatusReport) {
    header("Performance Monitor Status");
    if report.database_connected {
        success("Metric store reachable");
    } else {
        error("Metric store unreachable");
    }
    if report.monitoring_enabled {
        info(&format!("Monitoring enabled, sample rate {:.0}%", report.sample_rate * 100.0));
    } else {
        warning("Monitoring disabled");
    }
    if let Some(samples) = report.recent_samples {
        info(&format!("Samples in the last hour: {}", samples));
    }
    if let Some(active) = report.active_alerts {
        if active > 0 {
            warning(&format!("Active alerts: {}", active));
        } else {
            success("No active alerts");
        }
    }
    info(&format!(
        "Process memory {} (peak {}), host memory {:.1}% used",
        format_mb(report.memory.current_bytes),
        format_mb(report.memory.peak_bytes),
        report.memory.usage_percent
    ));
}

pub fn print_metrics(metrics: &[MetricSummary]) {
    header("Metrics");
    if metrics.is_empty() {
        info("No metrics recorded in this range");
        return;
    }
    println!(
        "{:<16} {:<28} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10}  unit",
        "type", "name", "count", "avg", "min", "max", "p95", "p99"
    );
    for m in metrics {
        println!("{}", metric_row(m));
    }
}

pub fn print_alerts(alerts: &[Alert]) {
    header("Alerts");
    if alerts.is_empty() {
        success("No alerts");
        return;
    }
    for alert in alerts {
        println!("{}", alert_row(alert));
    }
}

pub fn print_cleanup(report: &CleanupReport) {
    success(&format!(
        "Deleted {} samples, {} alerts, {} summaries, {} resolved alerts",
        report.samples, report.alerts, report.summaries, report.resolved_alerts
    ));
}

pub fn print_health(report: &HealthReport) {
    header("Health Check");
    for check in &report.checks {
        let line = format!("{:<20} {}", check.name, check.message);
        match check.status {
            CheckStatus::Ok => success(&line),
            CheckStatus::Warning => warning(&line),
            CheckStatus::Critical => error(&line),
        }
    }
    println!();
    let overall = format!("Overall: {}", report.overall);
    match report.overall {
        OverallHealth::Healthy => success(&overall),
        OverallHealth::Warning => warning(&overall),
        OverallHealth::Critical => error(&overall),
    }
}

pub fn print_benchmark(results: &[BenchmarkResult]) {
    header("Benchmark");
    for r in results {
        let mut line = format!(
            "{:<12} {} iterations, total {:.2}ms, avg {:.4}ms",
            r.name, r.iterations, r.total_ms, r.avg_ms
        );
        if let Some(ops) = r.ops_per_sec {
            let _ = write!(line, ", {:.0} ops/s", ops);
        }
        if let Some(bytes) = r.bytes_allocated {
            let _ = write!(line, ", {} allocated", format_mb(bytes));
        }
        info(&line);
    }
}

pub fn print_analysis(report: &AnalysisReport) {
    header(&format!("Performance Analysis ({})", report.range));
    info(&format!(
        "Error rate: {}",
        format_optional(report.summary.error_rate, "%")
    ));
    info(&format!("Active alerts: {}", report.summary.active_alerts));

    if !report.trends.is_empty() {
        header("Trends");
        for trend in &report.trends {
            let arrow = match trend.direction {
                TrendDirection::Up => paint(RED, "up"),
                TrendDirection::Down => paint(GREEN, "down"),
                TrendDirection::Stable => "stable".to_string(),
                TrendDirection::New => paint(BLUE, "new"),
            };
            println!(
                "{:<16} {:<28} {:>10.2}{} {} {}",
                trend.metric_type.as_str(),
                trend.metric_name,
                trend.current_avg,
                trend.unit,
                arrow,
                format_optional(trend.change_percent, "%")
            );
        }
    }

    header("Recommendations");
    if report.recommendations.is_empty() {
        success("No issues found");
    }
    for recommendation in &report.recommendations {
        warning(recommendation);
    }
}

pub fn print_realtime(snapshot: &RealtimeSnapshot) {
    println!(
        "[{}] memory {:.1}MB | host {:.1}% | requests/h {} | avg {} | errors {} | alerts {}",
        snapshot.time.format("%H:%M:%S"),
        snapshot.memory_mb(),
        snapshot.memory.usage_percent,
        snapshot.requests_last_hour,
        format_optional(snapshot.avg_response_time_ms, "ms"),
        format_optional(snapshot.error_rate, "%"),
        snapshot.active_alerts
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MetricType;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_format_mb() {
        assert_eq!(format_mb(0), "0.0MB");
        assert_eq!(format_mb(3 * 1024 * 1024 + 512 * 1024), "3.5MB");
    }

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(None, "%"), "n/a");
        assert_eq!(format_optional(Some(1.234), "ms"), "1.23ms");
    }

    #[test]
    fn test_metric_row_contains_fields() {
        let row = metric_row(&MetricSummary {
            metric_type: MetricType::ApiRequest,
            metric_name: "response_time".to_string(),
            unit: "ms".to_string(),
            count: 12,
            min: 1.0,
            max: 9.0,
            avg: 4.5,
            p50: 4.0,
            p95: 8.0,
            p99: 9.0,
        });
        assert!(row.starts_with("api_request"));
        assert!(row.contains("response_time"));
        assert!(row.contains("4.50"));
        assert!(row.ends_with("ms"));
    }

    #[test]
    fn test_alert_row_marks_resolution() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let mut alert = Alert {
            id: 7,
            alert_type: "api_request".to_string(),
            level: AlertLevel::Critical,
            metric_name: "response_time".to_string(),
            message: "slow".to_string(),
            context: serde_json::json!({}),
            threshold_value: Some(3000.0),
            actual_value: Some(4200.0),
            is_resolved: false,
            resolved_at: None,
            created_at: created,
        };
        let row = alert_row(&alert);
        assert!(row.contains("#7"));
        assert!(row.contains("CRITICAL"));
        assert!(!row.contains("resolved"));

        alert.is_resolved = true;
        alert.resolved_at = Some(created);
        assert!(alert_row(&alert).contains("resolved 2026-03-01 10:00:00"));
    }
}
