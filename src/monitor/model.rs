//! 性能监控数据模型

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 指标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    ApiRequest,
    DatabaseQuery,
    MemoryUsage,
    ErrorRate,
    Timer,
    Counter,
    Custom,
}

impl MetricType {
    pub const ALL: [MetricType; 7] = [
        MetricType::ApiRequest,
        MetricType::DatabaseQuery,
        MetricType::MemoryUsage,
        MetricType::ErrorRate,
        MetricType::Timer,
        MetricType::Counter,
        MetricType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::ApiRequest => "api_request",
            MetricType::DatabaseQuery => "database_query",
            MetricType::MemoryUsage => "memory_usage",
            MetricType::ErrorRate => "error_rate",
            MetricType::Timer => "timer",
            MetricType::Counter => "counter",
            MetricType::Custom => "custom",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown metric type: {}", s))
    }
}

pub type Tags = BTreeMap<String, String>;

/// 单条指标样本，写入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric_type: MetricType,
    pub metric_name: String,
    pub value: f64,
    pub unit: String,
    #[serde(default)]
    pub tags: Tags,
    pub endpoint: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(
        metric_type: MetricType,
        metric_name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            metric_type,
            metric_name: metric_name.into(),
            value,
            unit: unit.into(),
            tags: Tags::new(),
            endpoint: None,
            recorded_at,
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }
}

/// 按 (类型, 名称, 单位) 聚合的统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric_type: MetricType,
    pub metric_name: String,
    pub unit: String,
    pub count: i64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// 小时汇总，持久化到 performance_summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlySummary {
    pub bucket_start: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: MetricSummary,
}

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(AlertLevel::Info),
            "warning" => Ok(AlertLevel::Warning),
            "critical" => Ok(AlertLevel::Critical),
            other => Err(format!("unknown alert level: {}", other)),
        }
    }
}

/// 待写入的告警
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAlert {
    /// 指标类型或聚合检查名
    pub alert_type: String,
    pub level: AlertLevel,
    pub metric_name: String,
    pub message: String,
    pub context: serde_json::Value,
    pub threshold_value: Option<f64>,
    pub actual_value: Option<f64>,
}

impl NewAlert {
    /// 节流键：相同 (类型, 级别, 指标名) 视为重复
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.alert_type, self.level, self.metric_name)
    }
}

/// 已存储的告警，只有解决操作会修改它
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: i64,
    pub alert_type: String,
    pub level: AlertLevel,
    pub metric_name: String,
    pub message: String,
    pub context: serde_json::Value,
    pub threshold_value: Option<f64>,
    pub actual_value: Option<f64>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn from_new(id: i64, alert: &NewAlert, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            alert_type: alert.alert_type.clone(),
            level: alert.level,
            metric_name: alert.metric_name.clone(),
            message: alert.message.clone(),
            context: alert.context.clone(),
            threshold_value: alert.threshold_value,
            actual_value: alert.actual_value,
            is_resolved: false,
            resolved_at: None,
            created_at,
        }
    }
}

/// 时间范围，例如 "30m"、"1h"、"24h"、"7d"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange(Duration);

impl TimeRange {
    pub fn duration(&self) -> Duration {
        self.0
    }

    pub fn hours(hours: i64) -> Self {
        Self(Duration::hours(hours))
    }

    /// 范围起点
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.0
    }
}

impl From<Duration> for TimeRange {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::hours(1)
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("time range needs a unit (s, m, h, d, w): {}", s))?;
        let (amount, unit) = s.split_at(split);
        let amount: i64 = amount
            .parse()
            .map_err(|_| format!("invalid time range: {}", s))?;
        if amount <= 0 {
            return Err(format!("time range must be positive: {}", s));
        }

        let duration = match unit {
            "s" => Duration::seconds(amount),
            "m" => Duration::minutes(amount),
            "h" => Duration::hours(amount),
            "d" => Duration::days(amount),
            "w" => Duration::weeks(amount),
            _ => return Err(format!("unknown time range unit: {}", unit)),
        };
        Ok(Self(duration))
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.num_seconds();
        if secs % 604_800 == 0 {
            write!(f, "{}w", secs / 604_800)
        } else if secs % 86_400 == 0 {
            write!(f, "{}d", secs / 86_400)
        } else if secs % 3600 == 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

impl Serialize for TimeRange {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeRange {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_parse() {
        assert_eq!("30m".parse::<TimeRange>().unwrap().duration(), Duration::minutes(30));
        assert_eq!("24h".parse::<TimeRange>().unwrap().duration(), Duration::hours(24));
        assert_eq!("7d".parse::<TimeRange>().unwrap().duration(), Duration::days(7));
        assert!("7".parse::<TimeRange>().is_err());
        assert!("0h".parse::<TimeRange>().is_err());
        assert!("3y".parse::<TimeRange>().is_err());
        assert!("h".parse::<TimeRange>().is_err());
    }

    #[test]
    fn test_time_range_display() {
        assert_eq!("24h".parse::<TimeRange>().unwrap().to_string(), "1d");
        assert_eq!("90m".parse::<TimeRange>().unwrap().to_string(), "90m");
        assert_eq!(TimeRange::default().to_string(), "1h");
    }

    #[test]
    fn test_metric_type_names() {
        for t in MetricType::ALL {
            assert_eq!(t.as_str().parse::<MetricType>().unwrap(), t);
        }
        let json = serde_json::to_string(&MetricType::DatabaseQuery).unwrap();
        assert_eq!(json, "\"database_query\"");
    }

    #[test]
    fn test_alert_dedup_key() {
        let alert = NewAlert {
            alert_type: "api_request".to_string(),
            level: AlertLevel::Critical,
            metric_name: "response_time".to_string(),
            message: String::new(),
            context: serde_json::json!({}),
            threshold_value: None,
            actual_value: None,
        };
        assert_eq!(alert.dedup_key(), "api_request:critical:response_time");
    }
}
