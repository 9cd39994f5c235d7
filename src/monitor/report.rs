//! 运维报表：状态、健康检查、基准测试、导出、趋势分析
//! 只产出数据，展示由 CLI 负责

use super::model::{Alert, MetricSummary, MetricType, TimeRange};
use super::service::{MemorySnapshot, PerformanceMonitor, PerformanceSummary};
use crate::config::ThresholdConfig;
use crate::store::StoreError;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::hint::black_box;
use std::str::FromStr;
use std::time::Instant;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const EXPORT_ALERT_LIMIT: i64 = 1000;
/// 变化幅度在此百分比内视为平稳
const STABLE_BAND_PERCENT: f64 = 10.0;

// ---------------------------------------------------------------------------
// status

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub database_connected: bool,
    pub monitoring_enabled: bool,
    pub sample_rate: f64,
    /// 最近一小时的样本数，存储不可用时为 None
    pub recent_samples: Option<i64>,
    pub active_alerts: Option<i64>,
    pub memory: MemorySnapshot,
}

pub async fn status(monitor: &PerformanceMonitor) -> StatusReport {
    let store = monitor.store();
    let database_connected = match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Metric store ping failed");
            false
        }
    };

    let (recent_samples, active_alerts) = if database_connected {
        (
            store.count_samples_since(monitor.now() - Duration::hours(1)).await.ok(),
            store.count_active_alerts().await.ok(),
        )
    } else {
        (None, None)
    };

    StatusReport {
        database_connected,
        monitoring_enabled: monitor.config().enabled,
        sample_rate: monitor.config().sample_rate,
        recent_samples,
        active_alerts,
        memory: monitor.memory_snapshot(),
    }
}

// ---------------------------------------------------------------------------
// healthcheck

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Warning,
    Critical,
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverallHealth::Healthy => "healthy",
            OverallHealth::Warning => "warning",
            OverallHealth::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

impl HealthCheck {
    fn new(name: &'static str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name,
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: OverallHealth,
    pub checks: Vec<HealthCheck>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall == OverallHealth::Healthy
    }
}

fn grade(value: f64, warning: f64, critical: f64) -> CheckStatus {
    if value > critical {
        CheckStatus::Critical
    } else if value > warning {
        CheckStatus::Warning
    } else {
        CheckStatus::Ok
    }
}

pub fn check_memory(usage_percent: f64, thresholds: &ThresholdConfig) -> HealthCheck {
    let status = grade(
        usage_percent,
        thresholds.memory_warning_percent,
        thresholds.memory_critical_percent,
    );
    let message = match status {
        CheckStatus::Critical => format!("Memory usage critical: {:.1}%", usage_percent),
        CheckStatus::Warning => format!("Memory usage high: {:.1}%", usage_percent),
        CheckStatus::Ok => format!("Memory usage normal: {:.1}%", usage_percent),
    };
    HealthCheck::new("memory", status, message)
}

pub fn check_disk(usage_percent: Option<f64>, thresholds: &ThresholdConfig) -> HealthCheck {
    let Some(percent) = usage_percent else {
        return HealthCheck::new("disk_space", CheckStatus::Warning, "Disk information unavailable");
    };
    let status = grade(percent, thresholds.disk_warning_percent, thresholds.disk_critical_percent);
    let message = match status {
        CheckStatus::Critical => format!("Disk usage critical: {:.1}%", percent),
        CheckStatus::Warning => format!("Disk usage high: {:.1}%", percent),
        CheckStatus::Ok => "Disk space adequate".to_string(),
    };
    HealthCheck::new("disk_space", status, message)
}

pub fn check_metrics(summaries: &[MetricSummary]) -> HealthCheck {
    if summaries.is_empty() {
        return HealthCheck::new(
            "performance_metrics",
            CheckStatus::Warning,
            "No recent performance metrics",
        );
    }
    HealthCheck::new(
        "performance_metrics",
        CheckStatus::Ok,
        format!("{} metric series collected", summaries.len()),
    )
}

pub fn check_error_rate(error_rate: Option<f64>, thresholds: &ThresholdConfig) -> HealthCheck {
    let rate = error_rate.unwrap_or(0.0);
    let status = grade(
        rate,
        thresholds.error_rate_warning_percent,
        thresholds.error_rate_critical_percent,
    );
    let message = match status {
        CheckStatus::Critical => format!("Error rate critical: {:.2}%", rate),
        CheckStatus::Warning => format!("Error rate elevated: {:.2}%", rate),
        CheckStatus::Ok => format!("Error rate normal: {:.2}%", rate),
    };
    HealthCheck::new("error_rate", status, message)
}

/// 平均响应时间超过严重阈值时给出警告
pub fn check_response_times(summaries: &[MetricSummary], thresholds: &ThresholdConfig) -> HealthCheck {
    let slow = summaries.iter().find(|s| {
        s.metric_type == MetricType::ApiRequest
            && s.metric_name == "response_time"
            && s.avg > thresholds.response_time_critical_ms
    });
    match slow {
        Some(s) => HealthCheck::new(
            "response_times",
            CheckStatus::Warning,
            format!("Average response time high: {:.0}ms", s.avg),
        ),
        None => HealthCheck::new("response_times", CheckStatus::Ok, "Response times normal"),
    }
}

pub fn overall(checks: &[HealthCheck]) -> OverallHealth {
    match checks.iter().map(|c| c.status).max() {
        Some(CheckStatus::Critical) => OverallHealth::Critical,
        Some(CheckStatus::Warning) => OverallHealth::Warning,
        _ => OverallHealth::Healthy,
    }
}

/// 所有磁盘合计的使用率
pub fn disk_usage_percent() -> Option<f64> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let (total, available) = disks.list().iter().fold((0u64, 0u64), |(t, a), disk| {
        (t + disk.total_space(), a + disk.available_space())
    });
    if total == 0 {
        return None;
    }
    Some((total - available.min(total)) as f64 / total as f64 * 100.0)
}

pub async fn health_check(monitor: &PerformanceMonitor) -> HealthReport {
    let thresholds = &monitor.config().thresholds;
    let range = TimeRange::hours(1);
    let mut checks = Vec::with_capacity(6);

    checks.push(match monitor.store().ping().await {
        Ok(()) => HealthCheck::new("database", CheckStatus::Ok, "Database connection healthy"),
        Err(e) => {
            tracing::warn!(error = %e, "Metric store ping failed");
            HealthCheck::new("database", CheckStatus::Critical, "Database connection failed")
        }
    });
    checks.push(check_memory(monitor.memory_snapshot().usage_percent, thresholds));
    checks.push(check_disk(disk_usage_percent(), thresholds));

    match monitor.metrics(range, &[]).await {
        Ok(summaries) => {
            checks.push(check_metrics(&summaries));
            checks.push(check_error_rate(super::aggregate::error_rate(&summaries), thresholds));
            checks.push(check_response_times(&summaries, thresholds));
        }
        Err(e) => checks.push(HealthCheck::new(
            "performance_metrics",
            CheckStatus::Critical,
            format!("Failed to read metrics: {}", e),
        )),
    }

    HealthReport {
        overall: overall(&checks),
        checks,
        checked_at: monitor.now(),
    }
}

// ---------------------------------------------------------------------------
// benchmark

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchmarkKind {
    All,
    Database,
    Memory,
    Computation,
}

impl BenchmarkKind {
    fn includes(&self, other: BenchmarkKind) -> bool {
        *self == BenchmarkKind::All || *self == other
    }
}

impl FromStr for BenchmarkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(BenchmarkKind::All),
            "database" => Ok(BenchmarkKind::Database),
            "memory" => Ok(BenchmarkKind::Memory),
            "computation" => Ok(BenchmarkKind::Computation),
            other => Err(format!("unknown benchmark type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkResult {
    pub name: &'static str,
    pub iterations: u32,
    pub total_ms: f64,
    pub avg_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ops_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_allocated: Option<u64>,
}

impl BenchmarkResult {
    fn timed(name: &'static str, iterations: u32, started: Instant) -> Self {
        let total_ms = started.elapsed().as_secs_f64() * 1000.0;
        let n = iterations.max(1) as f64;
        Self {
            name,
            iterations,
            total_ms,
            avg_ms: total_ms / n,
            ops_per_sec: (total_ms > 0.0).then(|| n / (total_ms / 1000.0)),
            bytes_allocated: None,
        }
    }
}

pub async fn benchmark(
    monitor: &PerformanceMonitor,
    kind: BenchmarkKind,
    iterations: u32,
) -> Result<Vec<BenchmarkResult>, StoreError> {
    let mut results = Vec::new();

    if kind.includes(BenchmarkKind::Database) {
        let store = monitor.store();
        let started = Instant::now();
        for _ in 0..iterations {
            store.ping().await?;
        }
        results.push(BenchmarkResult::timed("database", iterations, started));
    }

    if kind.includes(BenchmarkKind::Memory) {
        let started = Instant::now();
        let blocks: Vec<String> = (0..iterations).map(|_| "x".repeat(1000)).collect();
        let allocated: usize = black_box(&blocks).iter().map(|b| b.capacity()).sum();
        let mut result = BenchmarkResult::timed("memory", iterations, started);
        result.bytes_allocated = Some(allocated as u64);
        results.push(result);
    }

    if kind.includes(BenchmarkKind::Computation) {
        let started = Instant::now();
        for _ in 0..iterations {
            let mut acc = 0.0f64;
            for j in 0..1000 {
                let x = black_box(j as f64);
                acc += x.sin() * x.cos();
            }
            black_box(acc);
        }
        results.push(BenchmarkResult::timed("computation", iterations, started));
    }

    Ok(results)
}

// ---------------------------------------------------------------------------
// export

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unknown export format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportMetadata {
    pub exported_at: DateTime<Utc>,
    pub time_range: TimeRange,
    pub format: ExportFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportData {
    pub metadata: ExportMetadata,
    pub metrics: Vec<MetricSummary>,
    pub alerts: Vec<Alert>,
    pub summary: PerformanceSummary,
}

pub async fn export_data(
    monitor: &PerformanceMonitor,
    range: TimeRange,
    format: ExportFormat,
) -> Result<ExportData, StoreError> {
    Ok(ExportData {
        metadata: ExportMetadata {
            exported_at: monitor.now(),
            time_range: range,
            format,
        },
        metrics: monitor.metrics(range, &[]).await?,
        alerts: monitor.alerts(false, EXPORT_ALERT_LIMIT).await?,
        summary: monitor.performance_summary(range).await?,
    })
}

impl ExportData {
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// 每个指标序列一行
    pub fn to_csv(&self) -> String {
        let mut out = String::from("type,name,unit,count,min,max,avg,p50,p95,p99\n");
        for m in &self.metrics {
            let row = [
                csv_field(m.metric_type.as_str()),
                csv_field(&m.metric_name),
                csv_field(&m.unit),
                m.count.to_string(),
                m.min.to_string(),
                m.max.to_string(),
                m.avg.to_string(),
                m.p50.to_string(),
                m.p95.to_string(),
                m.p99.to_string(),
            ];
            out.push_str(&row.join(","));
            out.push('\n');
        }
        out
    }

    pub fn render(&self) -> Result<String, StoreError> {
        match self.metadata.format {
            ExportFormat::Json => self.to_json(),
            ExportFormat::Csv => Ok(self.to_csv()),
        }
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// analyze

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
    /// 上一周期没有数据
    New,
}

#[derive(Debug, Clone, Serialize)]
pub struct Trend {
    pub metric_type: MetricType,
    pub metric_name: String,
    pub unit: String,
    pub current_avg: f64,
    pub previous_avg: Option<f64>,
    pub change_percent: Option<f64>,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub range: TimeRange,
    pub summary: PerformanceSummary,
    pub trends: Vec<Trend>,
    pub recommendations: Vec<String>,
}

/// 当前周期与上一周期按指标序列比较平均值
pub fn trends(current: &[MetricSummary], previous: &[MetricSummary]) -> Vec<Trend> {
    current
        .iter()
        .map(|cur| {
            let prev = previous.iter().find(|p| {
                p.metric_type == cur.metric_type && p.metric_name == cur.metric_name && p.unit == cur.unit
            });
            let previous_avg = prev.map(|p| p.avg);
            let change_percent = previous_avg
                .filter(|p| *p != 0.0)
                .map(|p| (cur.avg - p) / p * 100.0);

            let direction = match (previous_avg, change_percent) {
                (None, _) => TrendDirection::New,
                (Some(_), Some(c)) if c > STABLE_BAND_PERCENT => TrendDirection::Up,
                (Some(_), Some(c)) if c < -STABLE_BAND_PERCENT => TrendDirection::Down,
                (Some(p), None) if cur.avg > p => TrendDirection::Up,
                _ => TrendDirection::Stable,
            };

            Trend {
                metric_type: cur.metric_type,
                metric_name: cur.metric_name.clone(),
                unit: cur.unit.clone(),
                current_avg: cur.avg,
                previous_avg,
                change_percent,
                direction,
            }
        })
        .collect()
}

pub fn recommendations(
    summary: &PerformanceSummary,
    trends: &[Trend],
    thresholds: &ThresholdConfig,
) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(rate) = summary.error_rate {
        if rate > thresholds.error_rate_warning_percent {
            out.push(format!(
                "Error rate is {:.2}%; review the endpoints returning 4xx/5xx responses",
                rate
            ));
        }
    }

    if let Some(rt) = summary
        .api_performance
        .iter()
        .find(|s| s.metric_name == "response_time")
    {
        if rt.p95 > thresholds.response_time_warning_ms {
            out.push(format!(
                "p95 response time is {:.0}ms; profile the slowest endpoints",
                rt.p95
            ));
        }
    }

    if let Some(slowest) = summary.slow_queries.first() {
        out.push(format!(
            "{} slow queries recorded (slowest {:.0}ms, {}); check indexes and query plans",
            summary.slow_queries.len(),
            slowest.duration_ms,
            slowest.query_type
        ));
    }

    if let Some(last) = summary.memory_trend.last() {
        if last.memory_mb > thresholds.memory_warning_mb {
            out.push(format!(
                "Process memory is {:.1}MB; look for caches or buffers that grow without bound",
                last.memory_mb
            ));
        }
    }

    for trend in trends {
        if trend.metric_type == MetricType::ApiRequest
            && trend.metric_name == "response_time"
            && trend.direction == TrendDirection::Up
        {
            out.push(format!(
                "Average response time rose {:.0}% compared with the previous period",
                trend.change_percent.unwrap_or(0.0)
            ));
        }
    }

    if summary.active_alerts > 0 {
        out.push(format!(
            "{} active alerts awaiting resolution",
            summary.active_alerts
        ));
    }

    out
}

pub async fn analyze(monitor: &PerformanceMonitor, range: TimeRange) -> Result<AnalysisReport, StoreError> {
    let now = monitor.now();
    let span = range.duration();
    let until = now + Duration::seconds(1);
    let store = monitor.store();

    let current = store.summarize(now - span, until, &[]).await?;
    let previous = store.summarize(now - span - span, now - span, &[]).await?;
    let summary = monitor.performance_summary(range).await?;

    let trends = trends(&current, &previous);
    let recommendations = recommendations(&summary, &trends, &monitor.config().thresholds);

    Ok(AnalysisReport {
        range,
        summary,
        trends,
        recommendations,
    })
}

// ---------------------------------------------------------------------------
// monitor

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeSnapshot {
    pub time: DateTime<Utc>,
    pub memory: MemorySnapshot,
    pub error_rate: Option<f64>,
    pub requests_last_hour: i64,
    pub avg_response_time_ms: Option<f64>,
    pub active_alerts: i64,
}

impl RealtimeSnapshot {
    pub fn memory_mb(&self) -> f64 {
        self.memory.current_bytes as f64 / BYTES_PER_MB
    }
}

pub async fn realtime(monitor: &PerformanceMonitor) -> Result<RealtimeSnapshot, StoreError> {
    let summaries = monitor
        .metrics(TimeRange::hours(1), &[MetricType::ApiRequest, MetricType::ErrorRate])
        .await?;
    let requests_last_hour = summaries
        .iter()
        .find(|s| s.metric_type == MetricType::ApiRequest && s.metric_name == "response_time")
        .map_or(0, |s| s.count);

    Ok(RealtimeSnapshot {
        time: monitor.now(),
        memory: monitor.memory_snapshot(),
        error_rate: super::aggregate::error_rate(&summaries),
        requests_last_hour,
        avg_response_time_ms: super::aggregate::average_response_time(&summaries),
        active_alerts: monitor.store().count_active_alerts().await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::test_config;
    use crate::monitor::model::MetricSample;
    use crate::monitor::store::MemoryMetricStore;
    use crate::ratelimit::MemoryCounterStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn thresholds() -> ThresholdConfig {
        test_config().performance.thresholds
    }

    fn monitor() -> (Arc<PerformanceMonitor>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 8, 3, 14, 0, 0).unwrap());
        let monitor = Arc::new(PerformanceMonitor::new(
            Arc::new(MemoryMetricStore::new()),
            Arc::new(MemoryCounterStore::new()),
            Arc::new(clock.clone()),
            &test_config().performance,
        ));
        (monitor, clock)
    }

    fn summary(metric_type: MetricType, name: &str, avg: f64) -> MetricSummary {
        MetricSummary {
            metric_type,
            metric_name: name.to_string(),
            unit: "ms".to_string(),
            count: 4,
            min: avg,
            max: avg,
            avg,
            p50: avg,
            p95: avg,
            p99: avg,
        }
    }

    #[test]
    fn test_checks_grade_against_thresholds() {
        assert_eq!(check_memory(50.0, &thresholds()).status, CheckStatus::Ok);
        assert_eq!(check_memory(80.0, &thresholds()).status, CheckStatus::Warning);
        assert_eq!(check_memory(95.0, &thresholds()).status, CheckStatus::Critical);

        assert_eq!(check_disk(Some(85.0), &thresholds()).status, CheckStatus::Warning);
        assert_eq!(check_disk(None, &thresholds()).status, CheckStatus::Warning);

        assert_eq!(check_error_rate(None, &thresholds()).status, CheckStatus::Ok);
        assert_eq!(check_error_rate(Some(7.5), &thresholds()).status, CheckStatus::Warning);
        assert_eq!(check_error_rate(Some(12.0), &thresholds()).status, CheckStatus::Critical);

        let slow = [summary(MetricType::ApiRequest, "response_time", 3500.0)];
        assert_eq!(check_response_times(&slow, &thresholds()).status, CheckStatus::Warning);
        assert_eq!(check_response_times(&[], &thresholds()).status, CheckStatus::Ok);

        assert_eq!(check_metrics(&[]).status, CheckStatus::Warning);
    }

    #[test]
    fn test_overall_takes_worst_check() {
        let ok = HealthCheck::new("a", CheckStatus::Ok, "");
        let warn = HealthCheck::new("b", CheckStatus::Warning, "");
        let crit = HealthCheck::new("c", CheckStatus::Critical, "");

        assert_eq!(overall(&[ok.clone()]), OverallHealth::Healthy);
        assert_eq!(overall(&[ok.clone(), warn.clone()]), OverallHealth::Warning);
        assert_eq!(overall(&[warn, crit, ok]), OverallHealth::Critical);
        assert_eq!(overall(&[]), OverallHealth::Healthy);
    }

    #[test]
    fn test_trends() {
        let previous = vec![
            summary(MetricType::ApiRequest, "response_time", 100.0),
            summary(MetricType::DatabaseQuery, "execution_time", 10.0),
        ];
        let current = vec![
            summary(MetricType::ApiRequest, "response_time", 150.0),
            summary(MetricType::DatabaseQuery, "execution_time", 10.5),
            summary(MetricType::Timer, "render", 3.0),
        ];

        let trends = trends(&current, &previous);
        assert_eq!(trends[0].direction, TrendDirection::Up);
        assert_eq!(trends[0].change_percent, Some(50.0));
        assert_eq!(trends[1].direction, TrendDirection::Stable);
        assert_eq!(trends[2].direction, TrendDirection::New);
    }

    #[test]
    fn test_csv_escapes_fields() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[tokio::test]
    async fn test_status_and_realtime() {
        let (monitor, clock) = monitor();
        let scope = monitor.begin_request("/api/v1/courses");
        scope.monitor_api_request("/api/v1/courses", "GET", 200, 40.0);
        scope.monitor_api_request("/api/v1/courses", "GET", 500, 60.0);
        scope.finish().await;
        monitor.flush().await.unwrap();

        let report = status(&monitor).await;
        assert!(report.database_connected);
        assert_eq!(report.recent_samples, Some(6));

        let live = realtime(&monitor).await.unwrap();
        assert_eq!(live.requests_last_hour, 2);
        assert_eq!(live.error_rate, Some(50.0));
        assert_eq!(live.avg_response_time_ms, Some(50.0));
        assert_eq!(live.time, clock.now());
    }

    #[tokio::test]
    async fn test_health_check_flags_error_rate() {
        let (monitor, _clock) = monitor();
        let scope = monitor.begin_request("/x");
        for status in [200, 500, 503] {
            scope.monitor_api_request("/x", "GET", status, 10.0);
        }
        scope.finish().await;
        monitor.flush().await.unwrap();

        let report = health_check(&monitor).await;
        let error_rate = report.checks.iter().find(|c| c.name == "error_rate").unwrap();
        assert_eq!(error_rate.status, CheckStatus::Critical);
        assert_eq!(report.overall, OverallHealth::Critical);
        assert!(!report.is_healthy());
    }

    #[tokio::test]
    async fn test_export_csv() {
        let (monitor, clock) = monitor();
        monitor
            .ingest(vec![
                MetricSample::new(MetricType::Timer, "render", 4.0, "ms", clock.now()),
                MetricSample::new(MetricType::Timer, "render", 6.0, "ms", clock.now()),
            ])
            .await;
        monitor.flush().await.unwrap();

        let data = export_data(&monitor, TimeRange::hours(24), ExportFormat::Csv)
            .await
            .unwrap();
        let csv = data.render().unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("type,name,unit,count,min,max,avg,p50,p95,p99"));
        assert_eq!(lines.next(), Some("timer,render,ms,2,4,6,5,4,6,6"));

        let json: serde_json::Value = serde_json::from_str(&data.to_json().unwrap()).unwrap();
        assert_eq!(json["metadata"]["time_range"], "1d");
    }

    #[tokio::test]
    async fn test_analyze_compares_periods() {
        let (monitor, clock) = monitor();
        let earlier = clock.now() - Duration::minutes(90);
        monitor
            .ingest(vec![
                MetricSample::new(MetricType::ApiRequest, "response_time", 100.0, "ms", earlier),
                MetricSample::new(MetricType::ApiRequest, "response_time", 300.0, "ms", clock.now()),
            ])
            .await;
        monitor.flush().await.unwrap();

        let report = analyze(&monitor, TimeRange::hours(1)).await.unwrap();
        let rt = report
            .trends
            .iter()
            .find(|t| t.metric_name == "response_time")
            .unwrap();
        assert_eq!(rt.direction, TrendDirection::Up);
        assert_eq!(rt.previous_avg, Some(100.0));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("rose 200%")));
    }

    #[tokio::test]
    async fn test_benchmark_runs_selected_kinds() {
        let (monitor, _clock) = monitor();
        let all = benchmark(&monitor, BenchmarkKind::All, 5).await.unwrap();
        let names: Vec<&str> = all.iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["database", "memory", "computation"]);
        assert!(all[1].bytes_allocated.unwrap() >= 5000);

        let one = benchmark(&monitor, "computation".parse().unwrap(), 3).await.unwrap();
        assert_eq!(one.len(), 1);
        assert!("network".parse::<BenchmarkKind>().is_err());
    }
}
