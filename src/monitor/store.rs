//! 指标、告警与汇总存储

use super::aggregate::{self, hour_bucket};
use super::model::{Alert, HourlySummary, MetricSample, MetricSummary, MetricType, NewAlert};
use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// 样本排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleOrder {
    /// 按记录时间升序
    #[default]
    Oldest,
    /// 按数值降序
    Largest,
}

/// 样本查询条件
#[derive(Debug, Clone, Default)]
pub struct SampleQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub metric_type: Option<MetricType>,
    pub metric_name: Option<String>,
    pub order: SampleOrder,
    pub limit: Option<i64>,
}

impl SampleQuery {
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            ..Default::default()
        }
    }

    pub fn of(mut self, metric_type: MetricType, metric_name: impl Into<String>) -> Self {
        self.metric_type = Some(metric_type);
        self.metric_name = Some(metric_name.into());
        self
    }

    pub fn largest_first(mut self, limit: i64) -> Self {
        self.order = SampleOrder::Largest;
        self.limit = Some(limit);
        self
    }

    fn matches(&self, sample: &MetricSample) -> bool {
        self.since.map_or(true, |s| sample.recorded_at >= s)
            && self.until.map_or(true, |u| sample.recorded_at < u)
            && self.metric_type.map_or(true, |t| sample.metric_type == t)
            && self
                .metric_name
                .as_deref()
                .map_or(true, |n| sample.metric_name == n)
    }
}

/// 按分钟的平均值
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MinuteAverage {
    pub minute: DateTime<Utc>,
    pub avg: f64,
}

#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn insert_samples(&self, samples: &[MetricSample]) -> Result<u64, StoreError>;

    async fn samples(&self, query: &SampleQuery) -> Result<Vec<MetricSample>, StoreError>;

    /// [since, until) 内按 (类型, 名称, 单位) 汇总；types 为空表示全部类型
    async fn summarize(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        types: &[MetricType],
    ) -> Result<Vec<MetricSummary>, StoreError>;

    /// [since, until) 内按小时分桶汇总
    async fn hourly_summaries(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<HourlySummary>, StoreError>;

    /// 某个指标按分钟求平均，最多 limit 个点，按时间升序
    async fn minute_averages(
        &self,
        metric_type: MetricType,
        metric_name: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MinuteAverage>, StoreError>;

    async fn count_samples_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError>;

    async fn count_samples_before(&self, cutoff: DateTime<Utc>) -> Result<i64, StoreError>;

    /// 以 (bucket, 类型, 名称, 单位) 为键覆盖写入
    async fn upsert_summaries(&self, summaries: &[HourlySummary]) -> Result<u64, StoreError>;

    async fn summaries_since(&self, since: DateTime<Utc>) -> Result<Vec<HourlySummary>, StoreError>;

    async fn insert_alert(&self, alert: &NewAlert, created_at: DateTime<Utc>) -> Result<Alert, StoreError>;

    /// 按创建时间倒序
    async fn alerts(&self, resolved: bool, limit: i64) -> Result<Vec<Alert>, StoreError>;

    async fn count_active_alerts(&self) -> Result<i64, StoreError>;

    /// 返回 false 表示告警不存在或已解决
    async fn resolve_alert(&self, id: i64, resolved_at: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn delete_resolved_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn purge_samples_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn purge_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn purge_summaries_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// 整理存储，返回处理过的表名
    async fn optimize(&self) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

type SummaryKey = (DateTime<Utc>, MetricType, String, String);

/// 进程内指标存储
#[derive(Default)]
pub struct MemoryMetricStore {
    samples: RwLock<Vec<MetricSample>>,
    alerts: DashMap<i64, Alert>,
    next_alert_id: AtomicI64,
    summaries: RwLock<BTreeMap<SummaryKey, HourlySummary>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.read().len()
    }
}

#[async_trait]
impl MetricStore for MemoryMetricStore {
    async fn insert_samples(&self, samples: &[MetricSample]) -> Result<u64, StoreError> {
        self.samples.write().extend_from_slice(samples);
        Ok(samples.len() as u64)
    }

    async fn samples(&self, query: &SampleQuery) -> Result<Vec<MetricSample>, StoreError> {
        let mut found: Vec<MetricSample> = self
            .samples
            .read()
            .iter()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();

        match query.order {
            SampleOrder::Oldest => found.sort_by_key(|s| s.recorded_at),
            SampleOrder::Largest => found.sort_by(|a, b| b.value.total_cmp(&a.value)),
        }
        if let Some(limit) = query.limit {
            found.truncate(limit.max(0) as usize);
        }
        Ok(found)
    }

    async fn summarize(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        types: &[MetricType],
    ) -> Result<Vec<MetricSummary>, StoreError> {
        let samples = self.samples.read();
        Ok(aggregate::summarize(samples.iter().filter(|s| {
            s.recorded_at >= since
                && s.recorded_at < until
                && (types.is_empty() || types.contains(&s.metric_type))
        })))
    }

    async fn hourly_summaries(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<HourlySummary>, StoreError> {
        let samples = self.samples.read();
        Ok(aggregate::summarize_hourly(
            samples
                .iter()
                .filter(|s| s.recorded_at >= since && s.recorded_at < until),
        ))
    }

    async fn minute_averages(
        &self,
        metric_type: MetricType,
        metric_name: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MinuteAverage>, StoreError> {
        let mut minutes: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();
        for sample in self.samples.read().iter() {
            if sample.metric_type != metric_type
                || sample.metric_name != metric_name
                || sample.recorded_at < since
            {
                continue;
            }
            let minute = sample
                .recorded_at
                .duration_trunc(Duration::minutes(1))
                .unwrap_or(sample.recorded_at);
            let slot = minutes.entry(minute).or_insert((0.0, 0));
            slot.0 += sample.value;
            slot.1 += 1;
        }

        Ok(minutes
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(minute, (sum, n))| MinuteAverage {
                minute,
                avg: sum / n as f64,
            })
            .collect())
    }

    async fn count_samples_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        Ok(self
            .samples
            .read()
            .iter()
            .filter(|s| s.recorded_at >= since)
            .count() as i64)
    }

    async fn count_samples_before(&self, cutoff: DateTime<Utc>) -> Result<i64, StoreError> {
        Ok(self
            .samples
            .read()
            .iter()
            .filter(|s| s.recorded_at < cutoff)
            .count() as i64)
    }

    async fn upsert_summaries(&self, summaries: &[HourlySummary]) -> Result<u64, StoreError> {
        let mut stored = self.summaries.write();
        for hourly in summaries {
            let key = (
                hour_bucket(hourly.bucket_start),
                hourly.summary.metric_type,
                hourly.summary.metric_name.clone(),
                hourly.summary.unit.clone(),
            );
            stored.insert(key, hourly.clone());
        }
        Ok(summaries.len() as u64)
    }

    async fn summaries_since(&self, since: DateTime<Utc>) -> Result<Vec<HourlySummary>, StoreError> {
        Ok(self
            .summaries
            .read()
            .values()
            .filter(|h| h.bucket_start >= since)
            .cloned()
            .collect())
    }

    async fn insert_alert(&self, alert: &NewAlert, created_at: DateTime<Utc>) -> Result<Alert, StoreError> {
        let id = self.next_alert_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = Alert::from_new(id, alert, created_at);
        self.alerts.insert(id, stored.clone());
        Ok(stored)
    }

    async fn alerts(&self, resolved: bool, limit: i64) -> Result<Vec<Alert>, StoreError> {
        let mut found: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| a.is_resolved == resolved)
            .map(|a| a.value().clone())
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn count_active_alerts(&self) -> Result<i64, StoreError> {
        Ok(self.alerts.iter().filter(|a| !a.is_resolved).count() as i64)
    }

    async fn resolve_alert(&self, id: i64, resolved_at: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.alerts.get_mut(&id) {
            Some(mut alert) if !alert.is_resolved => {
                alert.is_resolved = true;
                alert.resolved_at = Some(resolved_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_resolved_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.alerts.len();
        self.alerts
            .retain(|_, a| !(a.is_resolved && a.resolved_at.map_or(false, |at| at < cutoff)));
        Ok(before.saturating_sub(self.alerts.len()) as u64)
    }

    async fn purge_samples_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut samples = self.samples.write();
        let before = samples.len();
        samples.retain(|s| s.recorded_at >= cutoff);
        Ok((before - samples.len()) as u64)
    }

    async fn purge_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.alerts.len();
        self.alerts.retain(|_, a| a.created_at >= cutoff);
        Ok(before.saturating_sub(self.alerts.len()) as u64)
    }

    async fn purge_summaries_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut summaries = self.summaries.write();
        let before = summaries.len();
        summaries.retain(|key, _| key.0 >= cutoff);
        Ok((before - summaries.len()) as u64)
    }

    async fn optimize(&self) -> Result<Vec<String>, StoreError> {
        self.samples.write().shrink_to_fit();
        self.alerts.shrink_to_fit();
        Ok(vec![
            "performance_metrics".to_string(),
            "performance_alerts".to_string(),
            "performance_summary".to_string(),
        ])
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
