//! 指标聚合
//! 纯函数：相同的样本集合总是得到相同的汇总

use super::model::{HourlySummary, MetricSample, MetricSummary, MetricType};
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::BTreeMap;

/// 最近秩百分位：排序后取第 ceil(p * n) 个值
///
/// 与 Postgres 的 percentile_disc 一致。sorted 为空时返回 0
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// 按 (类型, 名称, 单位) 分组汇总，结果按分组键排序
pub fn summarize<'a, I>(samples: I) -> Vec<MetricSummary>
where
    I: IntoIterator<Item = &'a MetricSample>,
{
    let mut groups: BTreeMap<(MetricType, &str, &str), Vec<f64>> = BTreeMap::new();
    for sample in samples {
        groups
            .entry((sample.metric_type, sample.metric_name.as_str(), sample.unit.as_str()))
            .or_default()
            .push(sample.value);
    }

    groups
        .into_iter()
        .map(|((metric_type, name, unit), mut values)| {
            values.sort_by(f64::total_cmp);
            let count = values.len();
            let sum: f64 = values.iter().sum();
            MetricSummary {
                metric_type,
                metric_name: name.to_string(),
                unit: unit.to_string(),
                count: count as i64,
                min: values[0],
                max: values[count - 1],
                avg: sum / count as f64,
                p50: percentile(&values, 0.50),
                p95: percentile(&values, 0.95),
                p99: percentile(&values, 0.99),
            }
        })
        .collect()
}

/// 时间戳所在整点
pub fn hour_bucket(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::hours(1)).unwrap_or(at)
}

/// 按小时分桶后汇总
pub fn summarize_hourly<'a, I>(samples: I) -> Vec<HourlySummary>
where
    I: IntoIterator<Item = &'a MetricSample>,
{
    let mut buckets: BTreeMap<DateTime<Utc>, Vec<&MetricSample>> = BTreeMap::new();
    for sample in samples {
        buckets.entry(hour_bucket(sample.recorded_at)).or_default().push(sample);
    }

    buckets
        .into_iter()
        .flat_map(|(bucket_start, members)| {
            summarize(members)
                .into_iter()
                .map(move |summary| HourlySummary {
                    bucket_start,
                    summary,
                })
        })
        .collect()
}

/// 错误率（%）：api_error 占 api_error + api_success 的比例
///
/// 区间内没有请求时返回 None
pub fn error_rate(summaries: &[MetricSummary]) -> Option<f64> {
    let count_of = |name: &str| {
        summaries
            .iter()
            .filter(|s| s.metric_type == MetricType::ErrorRate && s.metric_name == name)
            .map(|s| s.count)
            .sum::<i64>()
    };
    let errors = count_of("api_error");
    let total = errors + count_of("api_success");
    if total == 0 {
        None
    } else {
        Some(errors as f64 / total as f64 * 100.0)
    }
}

/// 平均响应时间（毫秒）
pub fn average_response_time(summaries: &[MetricSummary]) -> Option<f64> {
    summaries
        .iter()
        .find(|s| s.metric_type == MetricType::ApiRequest && s.metric_name == "response_time")
        .map(|s| s.avg)
}
