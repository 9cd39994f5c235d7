//! 请求级监控作用域
//!
//! 每个请求一个作用域，放在请求扩展里；样本先攒在作用域内，请求结束时统一交给监控服务

use super::model::{MetricSample, MetricType, Tags};
use super::query;
use super::service::PerformanceMonitor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// 计时器句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct RunningTimer {
    name: String,
    started: Instant,
    tags: Tags,
}

#[derive(Default)]
struct ScopeState {
    next_timer: u64,
    timers: HashMap<TimerId, RunningTimer>,
    samples: Vec<MetricSample>,
}

struct RequestScope {
    monitor: Arc<PerformanceMonitor>,
    endpoint: String,
    sampled: bool,
    state: Mutex<ScopeState>,
}

#[derive(Clone)]
pub struct RequestMonitor {
    inner: Arc<RequestScope>,
}

impl RequestMonitor {
    pub(crate) fn new(monitor: Arc<PerformanceMonitor>, endpoint: String, sampled: bool) -> Self {
        Self {
            inner: Arc::new(RequestScope {
                monitor,
                endpoint,
                sampled,
                state: Mutex::new(ScopeState::default()),
            }),
        }
    }

    /// 本请求是否被采样
    pub fn is_sampled(&self) -> bool {
        self.inner.sampled
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn pending(&self) -> usize {
        self.inner.state.lock().samples.len()
    }

    fn push(&self, sample: MetricSample) {
        if self.inner.sampled {
            self.inner.state.lock().samples.push(sample);
        }
    }

    fn sample(&self, metric_type: MetricType, name: impl Into<String>, value: f64, unit: &str) -> MetricSample {
        MetricSample::new(metric_type, name, value, unit, self.inner.monitor.now())
    }

    /// 计时器总是运行，只有采样时才记录
    pub fn start_timer(&self, name: impl Into<String>, tags: Tags) -> TimerId {
        let mut state = self.inner.state.lock();
        state.next_timer += 1;
        let id = TimerId(state.next_timer);
        state.timers.insert(
            id,
            RunningTimer {
                name: name.into(),
                started: Instant::now(),
                tags,
            },
        );
        id
    }

    /// 返回耗时（毫秒），未知句柄返回 None
    pub fn stop_timer(&self, id: TimerId, tags: Tags) -> Option<f64> {
        let timer = self.inner.state.lock().timers.remove(&id)?;
        let elapsed_ms = timer.started.elapsed().as_secs_f64() * 1000.0;

        let mut all_tags = timer.tags;
        all_tags.extend(tags);
        self.push(
            self.sample(MetricType::Timer, timer.name, elapsed_ms, "ms")
                .with_tags(all_tags)
                .with_endpoint(Some(self.inner.endpoint.clone())),
        );
        Some(elapsed_ms)
    }

    pub fn record_custom_metric(&self, name: impl Into<String>, value: f64, unit: &str, tags: Tags) {
        self.push(self.sample(MetricType::Custom, name, value, unit).with_tags(tags));
    }

    pub fn record_counter(&self, name: impl Into<String>, increment: f64, tags: Tags) {
        self.push(self.sample(MetricType::Counter, name, increment, "count").with_tags(tags));
    }

    pub fn monitor_database_query(&self, sql: &str, duration_ms: f64, tags: Tags) {
        if !self.inner.sampled {
            return;
        }

        let query_type = query::query_type(sql);
        let mut query_tags = tags;
        query_tags.insert("query_type".to_string(), query_type.to_string());
        query_tags.insert("query_hash".to_string(), query::query_hash(sql));

        self.push(
            self.sample(MetricType::DatabaseQuery, "execution_time", duration_ms, "ms")
                .with_tags(query_tags.clone()),
        );
        self.push(
            self.sample(MetricType::DatabaseQuery, format!("{}_count", query_type), 1.0, "count")
                .with_tags(query_tags.clone()),
        );

        if duration_ms > self.inner.monitor.config().thresholds.slow_query_ms {
            query_tags.insert("query_preview".to_string(), query::preview(sql));
            self.push(
                self.sample(MetricType::DatabaseQuery, "slow_query", duration_ms, "ms")
                    .with_tags(query_tags),
            );
        }
    }

    pub fn monitor_api_request(&self, endpoint: &str, method: &str, status: u16, duration_ms: f64) {
        if !self.inner.sampled {
            return;
        }

        let mut tags = Tags::new();
        tags.insert("method".to_string(), method.to_string());
        tags.insert("status_code".to_string(), status.to_string());
        let endpoint = Some(endpoint.to_string());

        self.push(
            self.sample(MetricType::ApiRequest, "response_time", duration_ms, "ms")
                .with_tags(tags.clone())
                .with_endpoint(endpoint.clone()),
        );
        self.push(
            self.sample(MetricType::ApiRequest, format!("response_code_{}", status), 1.0, "count")
                .with_tags(tags.clone())
                .with_endpoint(endpoint.clone()),
        );

        let outcome = if status >= 400 { "api_error" } else { "api_success" };
        self.push(
            self.sample(MetricType::ErrorRate, outcome, 1.0, "count")
                .with_tags(tags)
                .with_endpoint(endpoint),
        );
    }

    /// 交出累积的样本，可多次调用
    pub async fn finish(&self) {
        let samples = std::mem::take(&mut self.inner.state.lock().samples);
        if !samples.is_empty() {
            self.inner.monitor.ingest(samples).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::test_config;
    use crate::monitor::store::MemoryMetricStore;
    use crate::ratelimit::MemoryCounterStore;
    use chrono::Utc;

    fn monitor(sample_rate: f64) -> Arc<PerformanceMonitor> {
        let mut config = test_config().performance;
        config.sample_rate = sample_rate;
        Arc::new(PerformanceMonitor::new(
            Arc::new(MemoryMetricStore::new()),
            Arc::new(MemoryCounterStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            &config,
        ))
    }

    #[test]
    fn test_timer_records_sample() {
        let scope = monitor(1.0).begin_request("/api/v1/courses");
        let id = scope.start_timer("render", Tags::new());
        let elapsed = scope.stop_timer(id, Tags::new()).unwrap();
        assert!(elapsed >= 0.0);
        assert_eq!(scope.pending(), 1);

        // 已停止的计时器
        assert!(scope.stop_timer(id, Tags::new()).is_none());
    }

    #[test]
    fn test_database_query_samples() {
        let scope = monitor(1.0).begin_request("/x");
        scope.monitor_database_query("select 1", 10.0, Tags::new());
        assert_eq!(scope.pending(), 2);

        scope.monitor_database_query("DELETE FROM lessons", 800.0, Tags::new());
        assert_eq!(scope.pending(), 5);

        let state = scope.inner.state.lock();
        let slow = state
            .samples
            .iter()
            .find(|s| s.metric_name == "slow_query")
            .unwrap();
        assert_eq!(slow.tags["query_type"], "DELETE");
        assert_eq!(slow.tags["query_preview"], "DELETE FROM lessons");
        assert!(state.samples.iter().any(|s| s.metric_name == "SELECT_count"));
    }

    #[test]
    fn test_api_request_outcome() {
        let scope = monitor(1.0).begin_request("/x");
        scope.monitor_api_request("/x", "POST", 503, 12.0);

        let state = scope.inner.state.lock();
        let names: Vec<&str> = state.samples.iter().map(|s| s.metric_name.as_str()).collect();
        assert_eq!(names, vec!["response_time", "response_code_503", "api_error"]);
    }

    #[tokio::test]
    async fn test_unsampled_scope_records_nothing() {
        let monitor = monitor(0.0);
        let scope = monitor.begin_request("/x");
        assert!(!scope.is_sampled());

        scope.monitor_api_request("/x", "GET", 200, 5.0);
        scope.record_custom_metric("cache_hits", 3.0, "count", Tags::new());
        let id = scope.start_timer("t", Tags::new());
        assert!(scope.stop_timer(id, Tags::new()).is_some());

        assert_eq!(scope.pending(), 0);
        scope.finish().await;
        assert_eq!(monitor.pending(), 0);
    }

    #[tokio::test]
    async fn test_finish_hands_samples_to_monitor() {
        let monitor = monitor(1.0);
        let scope = monitor.begin_request("/x");
        scope.record_counter("enrollments", 1.0, Tags::new());
        scope.finish().await;

        assert_eq!(scope.pending(), 0);
        assert_eq!(monitor.pending(), 1);
    }
}
