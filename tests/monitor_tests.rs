//! 性能监控集成测试

use chrono::Duration;
use lms_guard::{
    clock::ManualClock,
    monitor::{
        report, MemoryMetricStore, MetricSample, MetricStore, MetricType, PerformanceMonitor, Tags,
        TimeRange,
    },
    ratelimit::MemoryCounterStore,
};
use std::sync::Arc;

mod common;

struct Fixture {
    monitor: Arc<PerformanceMonitor>,
    store: Arc<MemoryMetricStore>,
    clock: Arc<ManualClock>,
}

fn fixture() -> Fixture {
    let config = common::create_test_config();
    let store = Arc::new(MemoryMetricStore::new());
    let clock = Arc::new(ManualClock::new(common::start_time()));
    let monitor = Arc::new(PerformanceMonitor::new(
        store.clone(),
        Arc::new(MemoryCounterStore::new()),
        clock.clone(),
        &config.performance,
    ));
    Fixture { monitor, store, clock }
}

#[tokio::test]
async fn test_request_scope_reaches_store() {
    let f = fixture();

    let scope = f.monitor.begin_request("/api/v1/courses");
    assert!(scope.is_sampled());
    scope.monitor_database_query("SELECT * FROM courses WHERE id = 1", 12.0, Tags::new());
    scope.monitor_api_request("/api/v1/courses", "GET", 200, 35.0);
    scope.finish().await;

    let summaries = f.monitor.metrics(TimeRange::hours(1), &[]).await.unwrap();
    assert!(summaries
        .iter()
        .any(|s| s.metric_type == MetricType::DatabaseQuery && s.metric_name == "SELECT_count"));
    assert!(summaries
        .iter()
        .any(|s| s.metric_type == MetricType::ApiRequest && s.metric_name == "response_time"));
    assert_eq!(f.monitor.pending(), 0);
}

#[tokio::test]
async fn test_percentiles_use_nearest_rank() {
    let f = fixture();
    let now = f.monitor.now();
    let samples: Vec<MetricSample> = (1..=100)
        .map(|v| MetricSample::new(MetricType::ApiRequest, "response_time", v as f64, "ms", now))
        .collect();
    f.store.insert_samples(&samples).await.unwrap();

    let summaries = f.monitor.metrics(TimeRange::hours(1), &[MetricType::ApiRequest]).await.unwrap();
    let rt = &summaries[0];
    assert_eq!(rt.count, 100);
    assert_eq!(rt.min, 1.0);
    assert_eq!(rt.max, 100.0);
    assert_eq!(rt.avg, 50.5);
    assert_eq!(rt.p50, 50.0);
    assert_eq!(rt.p95, 95.0);
    assert_eq!(rt.p99, 99.0);
}

#[tokio::test]
async fn test_roll_up_is_idempotent() {
    let f = fixture();
    let now = f.monitor.now();
    f.store
        .insert_samples(&[
            MetricSample::new(MetricType::ApiRequest, "response_time", 10.0, "ms", now - Duration::minutes(70)),
            MetricSample::new(MetricType::ApiRequest, "response_time", 30.0, "ms", now - Duration::minutes(65)),
            MetricSample::new(MetricType::ApiRequest, "response_time", 50.0, "ms", now - Duration::minutes(5)),
        ])
        .await
        .unwrap();

    f.monitor.roll_up(TimeRange::hours(2)).await.unwrap();
    let first = f.store.summaries_since(now - Duration::hours(3)).await.unwrap();
    f.monitor.roll_up(TimeRange::hours(2)).await.unwrap();
    let second = f.store.summaries_since(now - Duration::hours(3)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    let earlier = first.iter().find(|s| s.summary.count == 2).expect("two samples in one hour");
    assert_eq!(earlier.summary.avg, 20.0);
}

#[tokio::test]
async fn test_slow_response_raises_one_alert_per_cooldown() {
    let f = fixture();

    for _ in 0..3 {
        let scope = f.monitor.begin_request("/api/v1/reports");
        scope.monitor_api_request("/api/v1/reports", "GET", 200, 4500.0);
        scope.finish().await;
    }

    let alerts = f.monitor.alerts(false, 50).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metric_name, "response_time");
    assert_eq!(alerts[0].threshold_value, Some(3000.0));
    assert_eq!(alerts[0].actual_value, Some(4500.0));

    // 冷却期 300 秒后再次告警
    f.clock.advance(Duration::seconds(301));
    let scope = f.monitor.begin_request("/api/v1/reports");
    scope.monitor_api_request("/api/v1/reports", "GET", 200, 4500.0);
    scope.finish().await;
    assert_eq!(f.monitor.alerts(false, 50).await.unwrap().len(), 2);

    assert!(f.monitor.resolve_alert(alerts[0].id).await.unwrap());
    assert!(!f.monitor.resolve_alert(alerts[0].id).await.unwrap());
    assert_eq!(f.monitor.alerts(true, 50).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_retention_cleanup() {
    let f = fixture();
    let now = f.monitor.now();
    f.store
        .insert_samples(&[
            MetricSample::new(MetricType::Timer, "job", 1.0, "ms", now - Duration::days(31)),
            MetricSample::new(MetricType::Timer, "job", 1.0, "ms", now - Duration::days(1)),
        ])
        .await
        .unwrap();

    assert_eq!(f.store.count_samples_before(now - Duration::days(30)).await.unwrap(), 1);
    let report = f.monitor.cleanup().await.unwrap();
    assert_eq!(report.samples, 1);
    assert_eq!(f.store.sample_count(), 1);
}

#[tokio::test]
async fn test_export_and_analysis_reports() {
    let f = fixture();
    let now = f.monitor.now();
    f.store
        .insert_samples(&[
            MetricSample::new(MetricType::ApiRequest, "response_time", 100.0, "ms", now - Duration::hours(30)),
            MetricSample::new(MetricType::ApiRequest, "response_time", 300.0, "ms", now - Duration::hours(2)),
        ])
        .await
        .unwrap();

    let analysis = report::analyze(&f.monitor, TimeRange::hours(24)).await.unwrap();
    let trend = &analysis.trends[0];
    assert_eq!(trend.metric_name, "response_time");
    assert_eq!(trend.direction, report::TrendDirection::Up);
    assert_eq!(trend.change_percent, Some(200.0));

    let export = report::export_data(&f.monitor, TimeRange::hours(24), report::ExportFormat::Csv)
        .await
        .unwrap();
    let csv = export.render().unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("type,name,unit,count,min,max,avg,p50,p95,p99"));
    assert!(lines.next().unwrap().starts_with("api_request,response_time,ms,1,"));
}
