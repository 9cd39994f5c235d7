//! 性能监控管理接口（管理员）

use crate::{
    error::AppError,
    middleware::AppState,
    monitor::{Alert, MetricSummary, MetricType, PerformanceSummary, TimeRange},
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_ALERT_LIMIT: i64 = 50;
const MAX_ALERT_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub range: TimeRange,
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    #[serde(default)]
    pub range: TimeRange,
    #[serde(rename = "type")]
    pub metric_type: Option<MetricType>,
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub resolved: bool,
    pub limit: Option<i64>,
}

/// 性能概览
pub async fn summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<PerformanceSummary>, AppError> {
    let summary = state.monitor.performance_summary(query.range).await?;
    Ok(Json(summary))
}

/// 指标汇总，可按类型过滤
pub async fn metrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<Vec<MetricSummary>>, AppError> {
    let types: Vec<MetricType> = query.metric_type.into_iter().collect();
    let metrics = state.monitor.metrics(query.range, &types).await?;
    Ok(Json(metrics))
}

/// 告警列表
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<Alert>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ALERT_LIMIT)
        .clamp(1, MAX_ALERT_LIMIT);
    let alerts = state.monitor.alerts(query.resolved, limit).await?;
    Ok(Json(alerts))
}

/// 解决告警；不存在或已解决时返回 404
pub async fn resolve_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.monitor.resolve_alert(id).await? {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({"id": id, "resolved": true})))
}
