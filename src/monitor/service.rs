//! 性能监控服务
//! 进程启动时创建一次，通过 AppState 共享

use super::aggregate::{self, hour_bucket};
use super::alerts::{evaluate_aggregates, evaluate_sample, AggregateSnapshot, AlertThrottle};
use super::model::{Alert, MetricSample, MetricSummary, MetricType, NewAlert, TimeRange};
use super::request::RequestMonitor;
use super::store::{MetricStore, SampleQuery};
use crate::clock::Clock;
use crate::config::PerformanceConfig;
use crate::ratelimit::CounterStore;
use crate::store::StoreError;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

const MEMORY_TREND_POINTS: i64 = 50;
const SLOW_QUERY_LIMIT: i64 = 10;

/// 进程与主机内存
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct MemorySnapshot {
    /// 进程常驻内存（字节）
    pub current_bytes: u64,
    /// 观测到的进程内存峰值（字节）
    pub peak_bytes: u64,
    pub host_total_bytes: u64,
    pub host_used_bytes: u64,
    /// 主机内存使用率（%）
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryTrendPoint {
    pub time: DateTime<Utc>,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlowQuery {
    pub duration_ms: f64,
    pub query_type: String,
    pub query_preview: String,
    pub recorded_at: DateTime<Utc>,
}

/// 仪表盘用的性能概览
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub range: TimeRange,
    pub api_performance: Vec<MetricSummary>,
    pub error_rate: Option<f64>,
    pub memory_trend: Vec<MemoryTrendPoint>,
    pub slow_queries: Vec<SlowQuery>,
    pub active_alerts: i64,
    pub generated_at: DateTime<Utc>,
}

/// 清理结果
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub samples: u64,
    pub alerts: u64,
    pub summaries: u64,
    pub resolved_alerts: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.samples + self.alerts + self.summaries + self.resolved_alerts
    }
}

pub struct PerformanceMonitor {
    store: Arc<dyn MetricStore>,
    throttle: AlertThrottle,
    clock: Arc<dyn Clock>,
    config: PerformanceConfig,
    buffer: Mutex<Vec<MetricSample>>,
    system: Mutex<System>,
    peak_memory: AtomicU64,
}

impl PerformanceMonitor {
    pub fn new(
        store: Arc<dyn MetricStore>,
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        config: &PerformanceConfig,
    ) -> Self {
        Self {
            store,
            throttle: AlertThrottle::new(counters, clock.clone(), &config.alerts),
            clock,
            config: config.clone(),
            buffer: Mutex::new(Vec::with_capacity(config.flush_batch_size)),
            system: Mutex::new(System::new()),
            peak_memory: AtomicU64::new(0),
        }
    }

    /// 为一个请求创建监控作用域，采样在此时决定一次
    pub fn begin_request(self: &Arc<Self>, endpoint: impl Into<String>) -> RequestMonitor {
        RequestMonitor::new(self.clone(), endpoint.into(), self.should_sample())
    }

    fn should_sample(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let rate = self.config.sample_rate.clamp(0.0, 1.0);
        rate >= 1.0 || (rate > 0.0 && rand::thread_rng().gen_bool(rate))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn MetricStore> {
        self.store.clone()
    }

    /// 样本进入缓冲，攒够一批后写库
    pub async fn ingest(&self, samples: Vec<MetricSample>) {
        if samples.is_empty() || !self.config.enabled {
            return;
        }

        let ready = {
            let mut buffer = self.buffer.lock();
            buffer.extend(samples);
            buffer.len() >= self.config.flush_batch_size
        };

        if ready {
            if let Err(e) = self.flush().await {
                tracing::error!(error = %e, "Failed to flush performance metrics");
            }
        }
    }

    /// 写出缓冲中的全部样本，并对写入的样本检查阈值
    pub async fn flush(&self) -> Result<u64, StoreError> {
        let batch = std::mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        let written = match self.store.insert_samples(&batch).await {
            Ok(written) => written,
            Err(e) => {
                tracing::warn!(dropped = batch.len(), "Dropping unflushed performance samples");
                return Err(e);
            }
        };
        tracing::debug!(written = written, "Flushed performance metrics");

        if self.config.alerts.enabled {
            for sample in &batch {
                for alert in evaluate_sample(sample, &self.config.thresholds) {
                    self.raise(alert).await;
                }
            }
        }

        Ok(written)
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// 节流后写入告警
    async fn raise(&self, alert: NewAlert) -> Option<Alert> {
        if !self.throttle.permit(&alert).await {
            return None;
        }

        match self.store.insert_alert(&alert, self.clock.now()).await {
            Ok(stored) => {
                tracing::error!(
                    alert_id = stored.id,
                    alert_type = %stored.alert_type,
                    level = %stored.level,
                    metric_name = %stored.metric_name,
                    threshold = ?stored.threshold_value,
                    actual = ?stored.actual_value,
                    "Performance alert: {}",
                    stored.message
                );
                Some(stored)
            }
            Err(e) => {
                tracing::error!(error = %e, message = %alert.message, "Failed to store performance alert");
                None
            }
        }
    }

    /// 读取进程与主机内存
    pub fn memory_snapshot(&self) -> MemorySnapshot {
        let pid = sysinfo::get_current_pid().ok();
        let mut system = self.system.lock();
        // 只刷新主机内存和当前进程
        system.refresh_memory();
        if let Some(pid) = pid {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                false,
                ProcessRefreshKind::new().with_memory(),
            );
        }

        let current_bytes = pid
            .and_then(|pid| system.process(pid))
            .map(|process| process.memory())
            .unwrap_or(0);
        let peak_bytes = self
            .peak_memory
            .fetch_max(current_bytes, Ordering::Relaxed)
            .max(current_bytes);

        let host_total_bytes = system.total_memory();
        let host_used_bytes = system.used_memory();
        let usage_percent = if host_total_bytes > 0 {
            host_used_bytes as f64 / host_total_bytes as f64 * 100.0
        } else {
            0.0
        };

        MemorySnapshot {
            current_bytes,
            peak_bytes,
            host_total_bytes,
            host_used_bytes,
            usage_percent,
        }
    }

    /// 记录 memory_usage 的 current、peak、usage_percent
    pub async fn monitor_memory_usage(&self) -> MemorySnapshot {
        let snapshot = self.memory_snapshot();
        let now = self.clock.now();
        self.ingest(vec![
            MetricSample::new(MetricType::MemoryUsage, "current", snapshot.current_bytes as f64, "bytes", now),
            MetricSample::new(MetricType::MemoryUsage, "peak", snapshot.peak_bytes as f64, "bytes", now),
            MetricSample::new(MetricType::MemoryUsage, "usage_percent", snapshot.usage_percent, "percent", now),
        ])
        .await;
        snapshot
    }

    /// (since, until) 覆盖到当前时刻，含当前秒
    fn span(&self, range: TimeRange) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = self.clock.now();
        (range.since(now), now + Duration::seconds(1))
    }

    /// 时间范围内的指标汇总；types 为空表示全部类型
    pub async fn metrics(
        &self,
        range: TimeRange,
        types: &[MetricType],
    ) -> Result<Vec<MetricSummary>, StoreError> {
        let (since, until) = self.span(range);
        self.store.summarize(since, until, types).await
    }

    /// 时间范围内的错误率（%），无请求时为 None
    pub async fn error_rate(&self, range: TimeRange) -> Result<Option<f64>, StoreError> {
        let summaries = self.metrics(range, &[MetricType::ErrorRate]).await?;
        Ok(aggregate::error_rate(&summaries))
    }

    pub async fn alerts(&self, resolved: bool, limit: i64) -> Result<Vec<Alert>, StoreError> {
        self.store.alerts(resolved, limit).await
    }

    pub async fn resolve_alert(&self, id: i64) -> Result<bool, StoreError> {
        let resolved = self.store.resolve_alert(id, self.clock.now()).await?;
        if resolved {
            tracing::info!(alert_id = id, "Performance alert resolved");
        }
        Ok(resolved)
    }

    pub async fn performance_summary(&self, range: TimeRange) -> Result<PerformanceSummary, StoreError> {
        let (since, _) = self.span(range);

        let api_performance = self.metrics(range, &[MetricType::ApiRequest]).await?;
        let error_rate = self.error_rate(range).await?;

        let memory_trend = self
            .store
            .minute_averages(MetricType::MemoryUsage, "current", since, MEMORY_TREND_POINTS)
            .await?
            .into_iter()
            .map(|point| MemoryTrendPoint {
                time: point.minute,
                memory_mb: (point.avg / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            })
            .collect();

        let slow_queries = self
            .store
            .samples(
                &SampleQuery::since(since)
                    .of(MetricType::DatabaseQuery, "slow_query")
                    .largest_first(SLOW_QUERY_LIMIT),
            )
            .await?
            .into_iter()
            .map(|sample| SlowQuery {
                duration_ms: sample.value,
                query_type: sample.tags.get("query_type").cloned().unwrap_or_else(|| "unknown".to_string()),
                query_preview: sample.tags.get("query_preview").cloned().unwrap_or_default(),
                recorded_at: sample.recorded_at,
            })
            .collect();

        Ok(PerformanceSummary {
            range,
            api_performance,
            error_rate,
            memory_trend,
            slow_queries,
            active_alerts: self.store.count_active_alerts().await?,
            generated_at: self.clock.now(),
        })
    }

    /// 检查错误率、平均响应时间和内存使用率
    pub async fn evaluate_aggregate_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        if !self.config.alerts.enabled {
            return Ok(Vec::new());
        }

        let window = TimeRange::from(Duration::minutes(self.config.thresholds.error_rate_window_minutes));
        let summaries = self
            .metrics(window, &[MetricType::ApiRequest, MetricType::ErrorRate])
            .await?;

        let snapshot = AggregateSnapshot {
            error_rate: aggregate::error_rate(&summaries),
            avg_response_time_ms: aggregate::average_response_time(&summaries),
            memory_percent: Some(self.memory_snapshot().usage_percent),
        };

        let mut raised = Vec::new();
        for alert in evaluate_aggregates(&snapshot, &self.config.thresholds) {
            if let Some(stored) = self.raise(alert).await {
                raised.push(stored);
            }
        }
        Ok(raised)
    }

    /// 把时间范围内的样本按小时汇总写入 performance_summary，可重复执行
    pub async fn roll_up(&self, range: TimeRange) -> Result<u64, StoreError> {
        let (since, until) = self.span(range);
        let hourly = self.store.hourly_summaries(hour_bucket(since), until).await?;
        let written = self.store.upsert_summaries(&hourly).await?;
        tracing::info!(buckets = written, range = %range, "Performance summaries rolled up");
        Ok(written)
    }

    /// 按保留策略删除旧数据
    pub async fn cleanup(&self) -> Result<CleanupReport, StoreError> {
        let now = self.clock.now();
        let retention = &self.config.retention;

        let report = CleanupReport {
            samples: self
                .store
                .purge_samples_before(now - Duration::days(retention.metrics_days))
                .await?,
            alerts: self
                .store
                .purge_alerts_before(now - Duration::days(retention.alerts_days))
                .await?,
            summaries: self
                .store
                .purge_summaries_before(now - Duration::days(retention.summary_days))
                .await?,
            resolved_alerts: self.cleanup_resolved_alerts().await?,
        };

        tracing::info!(
            samples = report.samples,
            alerts = report.alerts,
            summaries = report.summaries,
            resolved_alerts = report.resolved_alerts,
            "Performance data cleanup finished"
        );
        Ok(report)
    }

    /// 删除早于 days 天的样本、告警和汇总
    pub async fn cleanup_older_than(&self, days: i64) -> Result<CleanupReport, StoreError> {
        let cutoff = self.clock.now() - Duration::days(days);
        Ok(CleanupReport {
            samples: self.store.purge_samples_before(cutoff).await?,
            alerts: self.store.purge_alerts_before(cutoff).await?,
            summaries: self.store.purge_summaries_before(cutoff).await?,
            resolved_alerts: 0,
        })
    }

    /// 删除解决时间早于保留期的告警
    pub async fn cleanup_resolved_alerts(&self) -> Result<u64, StoreError> {
        let cutoff = self.clock.now() - Duration::days(self.config.retention.resolved_alert_days);
        self.store.delete_resolved_alerts_before(cutoff).await
    }
}
