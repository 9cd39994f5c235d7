//! 阈值告警与告警节流

use super::model::{AlertLevel, MetricSample, MetricType, NewAlert};
use crate::clock::Clock;
use crate::config::{AlertConfig, ThresholdConfig};
use crate::ratelimit::{CounterKey, CounterStore, RateLimitPolicy};
use serde_json::json;
use std::sync::Arc;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// 对单条样本检查阈值
pub fn evaluate_sample(sample: &MetricSample, thresholds: &ThresholdConfig) -> Vec<NewAlert> {
    let mut alerts = Vec::new();
    let context = json!({
        "tags": sample.tags,
        "endpoint": sample.endpoint,
        "unit": sample.unit,
    });

    match (sample.metric_type, sample.metric_name.as_str()) {
        (MetricType::ApiRequest, "response_time") => {
            let value = sample.value;
            let hit = if value > thresholds.response_time_critical_ms {
                Some((AlertLevel::Critical, "Critical", thresholds.response_time_critical_ms))
            } else if value > thresholds.response_time_warning_ms {
                Some((AlertLevel::Warning, "Warning", thresholds.response_time_warning_ms))
            } else {
                None
            };
            if let Some((level, label, threshold)) = hit {
                alerts.push(NewAlert {
                    alert_type: sample.metric_type.as_str().to_string(),
                    level,
                    metric_name: sample.metric_name.clone(),
                    message: format!("{}: API response time {:.0}ms exceeds threshold", label, value),
                    context,
                    threshold_value: Some(threshold),
                    actual_value: Some(value),
                });
            }
        }
        (MetricType::MemoryUsage, "current") => {
            let value_mb = sample.value / BYTES_PER_MB;
            let hit = if value_mb > thresholds.memory_critical_mb {
                Some((AlertLevel::Critical, "Critical", thresholds.memory_critical_mb))
            } else if value_mb > thresholds.memory_warning_mb {
                Some((AlertLevel::Warning, "Warning", thresholds.memory_warning_mb))
            } else {
                None
            };
            if let Some((level, label, threshold)) = hit {
                alerts.push(NewAlert {
                    alert_type: sample.metric_type.as_str().to_string(),
                    level,
                    metric_name: sample.metric_name.clone(),
                    message: format!("{}: Memory usage {:.2}MB exceeds threshold", label, value_mb),
                    context,
                    threshold_value: Some(threshold),
                    actual_value: Some(value_mb),
                });
            }
        }
        (MetricType::DatabaseQuery, "slow_query") => {
            alerts.push(NewAlert {
                alert_type: sample.metric_type.as_str().to_string(),
                level: AlertLevel::Warning,
                metric_name: sample.metric_name.clone(),
                message: format!("Slow database query detected: {:.0}ms", sample.value),
                context,
                threshold_value: Some(thresholds.slow_query_ms),
                actual_value: Some(sample.value),
            });
        }
        _ => {}
    }

    alerts
}

/// 聚合指标的当前值
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateSnapshot {
    /// 错误率（%）
    pub error_rate: Option<f64>,
    /// 平均响应时间（毫秒）
    pub avg_response_time_ms: Option<f64>,
    /// 主机内存使用率（%）
    pub memory_percent: Option<f64>,
}

fn leveled(value: f64, warning: f64, critical: f64) -> Option<(AlertLevel, f64)> {
    if value > critical {
        Some((AlertLevel::Critical, critical))
    } else if value > warning {
        Some((AlertLevel::Warning, warning))
    } else {
        None
    }
}

/// 对聚合值检查阈值
pub fn evaluate_aggregates(snapshot: &AggregateSnapshot, thresholds: &ThresholdConfig) -> Vec<NewAlert> {
    let mut alerts = Vec::new();
    let window = thresholds.error_rate_window_minutes;

    if let Some(rate) = snapshot.error_rate {
        if let Some((level, threshold)) = leveled(
            rate,
            thresholds.error_rate_warning_percent,
            thresholds.error_rate_critical_percent,
        ) {
            alerts.push(NewAlert {
                alert_type: "aggregate_error_rate".to_string(),
                level,
                metric_name: "api_error_rate".to_string(),
                message: format!("Error rate {:.2}% over the last {} minutes exceeds threshold", rate, window),
                context: json!({ "window_minutes": window }),
                threshold_value: Some(threshold),
                actual_value: Some(rate),
            });
        }
    }

    if let Some(avg) = snapshot.avg_response_time_ms {
        if let Some((level, threshold)) = leveled(
            avg,
            thresholds.response_time_warning_ms,
            thresholds.response_time_critical_ms,
        ) {
            alerts.push(NewAlert {
                alert_type: "aggregate_response_time".to_string(),
                level,
                metric_name: "avg_response_time".to_string(),
                message: format!("Average response time {:.0}ms over the last {} minutes exceeds threshold", avg, window),
                context: json!({ "window_minutes": window }),
                threshold_value: Some(threshold),
                actual_value: Some(avg),
            });
        }
    }

    if let Some(percent) = snapshot.memory_percent {
        if let Some((level, threshold)) = leveled(
            percent,
            thresholds.memory_warning_percent,
            thresholds.memory_critical_percent,
        ) {
            alerts.push(NewAlert {
                alert_type: "aggregate_memory".to_string(),
                level,
                metric_name: "memory_usage_percent".to_string(),
                message: format!("Memory usage {:.1}% exceeds threshold", percent),
                context: json!({}),
                threshold_value: Some(threshold),
                actual_value: Some(percent),
            });
        }
    }

    alerts
}

const COOLDOWN_SCOPE: &str = "alert_cooldown";
const HOURLY_SCOPE: &str = "alert_hourly";
const HOURLY_IDENTIFIER: &str = "all_alerts";

/// 告警节流，计数复用限流计数存储
///
/// 相同键在冷却窗口内最多一条，所有告警每小时不超过上限
pub struct AlertThrottle {
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    cooldown: RateLimitPolicy,
    hourly: RateLimitPolicy,
}

impl AlertThrottle {
    pub fn new(counters: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, config: &AlertConfig) -> Self {
        Self {
            counters,
            clock,
            cooldown: RateLimitPolicy {
                max_requests: 1,
                window_secs: config.duplicate_cooldown_secs.max(1),
            },
            hourly: RateLimitPolicy {
                max_requests: config.max_alerts_per_hour,
                window_secs: 3600,
            },
        }
    }

    /// 是否允许发出该告警；计数存储出错时放行
    pub async fn permit(&self, alert: &NewAlert) -> bool {
        let now = self.clock.now();

        let cooldown_key = CounterKey::new(alert.dedup_key(), COOLDOWN_SCOPE, self.cooldown.window_start(now));
        match self.counters.try_increment(&cooldown_key, 1, now).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(key = %cooldown_key.identifier, "Duplicate alert suppressed");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Alert throttle store unavailable, emitting alert");
                return true;
            }
        }

        let hourly_key = CounterKey::new(HOURLY_IDENTIFIER, HOURLY_SCOPE, self.hourly.window_start(now));
        match self
            .counters
            .try_increment(&hourly_key, self.hourly.max_requests, now)
            .await
        {
            Ok(Some(_)) => true,
            Ok(None) => {
                tracing::warn!(
                    max_alerts_per_hour = self.hourly.max_requests,
                    "Hourly alert budget exhausted, alert dropped"
                );
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Alert throttle store unavailable, emitting alert");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::test_config;
    use crate::ratelimit::MemoryCounterStore;
    use chrono::{Duration, TimeZone, Utc};

    fn thresholds() -> ThresholdConfig {
        test_config().performance.thresholds
    }

    #[test]
    fn test_response_time_levels() {
        let at = Utc::now();
        let warn = MetricSample::new(MetricType::ApiRequest, "response_time", 1500.0, "ms", at);
        let crit = MetricSample::new(MetricType::ApiRequest, "response_time", 3500.0, "ms", at);
        let ok = MetricSample::new(MetricType::ApiRequest, "response_time", 20.0, "ms", at);

        let alerts = evaluate_sample(&warn, &thresholds());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        assert_eq!(alerts[0].threshold_value, Some(1000.0));

        assert_eq!(evaluate_sample(&crit, &thresholds())[0].level, AlertLevel::Critical);
        assert!(evaluate_sample(&ok, &thresholds()).is_empty());
    }

    #[test]
    fn test_memory_threshold_in_megabytes() {
        let sample = MetricSample::new(
            MetricType::MemoryUsage,
            "current",
            150.0 * BYTES_PER_MB,
            "bytes",
            Utc::now(),
        );
        let alerts = evaluate_sample(&sample, &thresholds());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        assert_eq!(alerts[0].actual_value, Some(150.0));
    }

    #[test]
    fn test_slow_query_always_warns() {
        let sample = MetricSample::new(MetricType::DatabaseQuery, "slow_query", 800.0, "ms", Utc::now());
        let alerts = evaluate_sample(&sample, &thresholds());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].threshold_value, Some(500.0));
    }

    #[test]
    fn test_aggregate_alerts() {
        let snapshot = AggregateSnapshot {
            error_rate: Some(12.0),
            avg_response_time_ms: Some(200.0),
            memory_percent: Some(80.0),
        };
        let alerts = evaluate_aggregates(&snapshot, &thresholds());
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].alert_type, "aggregate_error_rate");
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert_eq!(alerts[1].alert_type, "aggregate_memory");
        assert_eq!(alerts[1].level, AlertLevel::Warning);

        assert!(evaluate_aggregates(&AggregateSnapshot::default(), &thresholds()).is_empty());
    }

    #[tokio::test]
    async fn test_throttle_cooldown_and_hourly_budget() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap());
        let mut config = test_config().performance.alerts;
        config.max_alerts_per_hour = 2;
        let throttle = AlertThrottle::new(Arc::new(MemoryCounterStore::new()), Arc::new(clock.clone()), &config);

        let sample = MetricSample::new(MetricType::DatabaseQuery, "slow_query", 800.0, "ms", clock.now());
        let alert = evaluate_sample(&sample, &thresholds()).remove(0);

        assert!(throttle.permit(&alert).await);
        assert!(!throttle.permit(&alert).await);

        let mut other = alert.clone();
        other.metric_name = "other".to_string();
        assert!(throttle.permit(&other).await);

        let mut third = alert.clone();
        third.metric_name = "third".to_string();
        assert!(!throttle.permit(&third).await);

        clock.advance(Duration::hours(1));
        assert!(throttle.permit(&alert).await);
    }
}
