//! 性能指标相关表（performance_metrics / performance_alerts / performance_summary）

use crate::monitor::model::{Alert, AlertLevel, HourlySummary, MetricSample, MetricSummary, MetricType, NewAlert, Tags};
use crate::monitor::store::{MetricStore, MinuteAverage, SampleOrder, SampleQuery};
use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::str::FromStr;

/// 单条 INSERT 的最大行数，避免超过绑定参数上限
const INSERT_CHUNK: usize = 1000;

const TABLES: [&str; 3] = ["performance_metrics", "performance_alerts", "performance_summary"];

const SUMMARY_COLUMNS: &str = r#"
    metric_type,
    metric_name,
    unit,
    COUNT(*)::BIGINT AS count,
    MIN(value) AS min_value,
    MAX(value) AS max_value,
    AVG(value) AS avg_value,
    percentile_disc(0.5) WITHIN GROUP (ORDER BY value) AS p50_value,
    percentile_disc(0.95) WITHIN GROUP (ORDER BY value) AS p95_value,
    percentile_disc(0.99) WITHIN GROUP (ORDER BY value) AS p99_value
"#;

fn parse<T: FromStr<Err = String>>(raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(StoreError::InvalidData)
}

#[derive(sqlx::FromRow)]
struct SampleRow {
    metric_type: String,
    metric_name: String,
    value: f64,
    unit: String,
    tags: Json<Tags>,
    endpoint: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<SampleRow> for MetricSample {
    type Error = StoreError;

    fn try_from(row: SampleRow) -> Result<Self, Self::Error> {
        Ok(MetricSample {
            metric_type: parse(&row.metric_type)?,
            metric_name: row.metric_name,
            value: row.value,
            unit: row.unit,
            tags: row.tags.0,
            endpoint: row.endpoint,
            recorded_at: row.recorded_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    metric_type: String,
    metric_name: String,
    unit: String,
    count: i64,
    min_value: f64,
    max_value: f64,
    avg_value: f64,
    p50_value: f64,
    p95_value: f64,
    p99_value: f64,
}

impl TryFrom<SummaryRow> for MetricSummary {
    type Error = StoreError;

    fn try_from(row: SummaryRow) -> Result<Self, Self::Error> {
        Ok(MetricSummary {
            metric_type: parse(&row.metric_type)?,
            metric_name: row.metric_name,
            unit: row.unit,
            count: row.count,
            min: row.min_value,
            max: row.max_value,
            avg: row.avg_value,
            p50: row.p50_value,
            p95: row.p95_value,
            p99: row.p99_value,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HourlyRow {
    bucket_start: DateTime<Utc>,
    #[sqlx(flatten)]
    summary: SummaryRow,
}

impl TryFrom<HourlyRow> for HourlySummary {
    type Error = StoreError;

    fn try_from(row: HourlyRow) -> Result<Self, Self::Error> {
        Ok(HourlySummary {
            bucket_start: row.bucket_start,
            summary: row.summary.try_into()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: i64,
    alert_type: String,
    alert_level: String,
    metric_name: String,
    message: String,
    context: serde_json::Value,
    threshold_value: Option<f64>,
    actual_value: Option<f64>,
    is_resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Alert {
            id: row.id,
            alert_type: row.alert_type,
            level: parse::<AlertLevel>(&row.alert_level)?,
            metric_name: row.metric_name,
            message: row.message,
            context: row.context,
            threshold_value: row.threshold_value,
            actual_value: row.actual_value,
            is_resolved: row.is_resolved,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
        })
    }
}

fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// 与进程内存储保持一致的排序
fn sort_summaries(summaries: &mut [MetricSummary]) {
    summaries.sort_by(|a, b| {
        (a.metric_type, &a.metric_name, &a.unit).cmp(&(b.metric_type, &b.metric_name, &b.unit))
    });
}

pub struct PgMetricStore {
    db: PgPool,
}

impl PgMetricStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetricStore for PgMetricStore {
    async fn insert_samples(&self, samples: &[MetricSample]) -> Result<u64, StoreError> {
        let mut written = 0;
        for chunk in samples.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO performance_metrics (metric_type, metric_name, value, unit, tags, endpoint, recorded_at) ",
            );
            builder.push_values(chunk, |mut row, sample| {
                row.push_bind(sample.metric_type.as_str())
                    .push_bind(&sample.metric_name)
                    .push_bind(sample.value)
                    .push_bind(&sample.unit)
                    .push_bind(Json(&sample.tags))
                    .push_bind(&sample.endpoint)
                    .push_bind(sample.recorded_at);
            });
            written += builder.build().execute(&self.db).await?.rows_affected();
        }
        Ok(written)
    }

    async fn samples(&self, query: &SampleQuery) -> Result<Vec<MetricSample>, StoreError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT metric_type, metric_name, value, unit, tags, endpoint, recorded_at FROM performance_metrics WHERE TRUE",
        );
        if let Some(since) = query.since {
            builder.push(" AND recorded_at >= ").push_bind(since);
        }
        if let Some(until) = query.until {
            builder.push(" AND recorded_at < ").push_bind(until);
        }
        if let Some(metric_type) = query.metric_type {
            builder.push(" AND metric_type = ").push_bind(metric_type.as_str());
        }
        if let Some(name) = &query.metric_name {
            builder.push(" AND metric_name = ").push_bind(name);
        }
        builder.push(match query.order {
            SampleOrder::Oldest => " ORDER BY recorded_at ASC",
            SampleOrder::Largest => " ORDER BY value DESC",
        });
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit.max(0));
        }

        let rows = builder
            .build_query_as::<SampleRow>()
            .fetch_all(&self.db)
            .await?;
        convert(rows)
    }

    async fn summarize(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        types: &[MetricType],
    ) -> Result<Vec<MetricSummary>, StoreError> {
        let type_names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
        let sql = format!(
            r#"
            SELECT {SUMMARY_COLUMNS}
            FROM performance_metrics
            WHERE recorded_at >= $1 AND recorded_at < $2
              AND (cardinality($3::TEXT[]) = 0 OR metric_type = ANY($3))
            GROUP BY metric_type, metric_name, unit
            "#
        );

        let rows = sqlx::query_as::<_, SummaryRow>(&sql)
            .bind(since)
            .bind(until)
            .bind(&type_names)
            .fetch_all(&self.db)
            .await?;

        let mut summaries: Vec<MetricSummary> = convert(rows)?;
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn hourly_summaries(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<HourlySummary>, StoreError> {
        let sql = format!(
            r#"
            SELECT date_trunc('hour', recorded_at AT TIME ZONE 'UTC') AT TIME ZONE 'UTC' AS bucket_start,
                   {SUMMARY_COLUMNS}
            FROM performance_metrics
            WHERE recorded_at >= $1 AND recorded_at < $2
            GROUP BY bucket_start, metric_type, metric_name, unit
            ORDER BY bucket_start
            "#
        );

        let rows = sqlx::query_as::<_, HourlyRow>(&sql)
            .bind(since)
            .bind(until)
            .fetch_all(&self.db)
            .await?;
        convert(rows)
    }

    async fn minute_averages(
        &self,
        metric_type: MetricType,
        metric_name: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MinuteAverage>, StoreError> {
        let rows: Vec<(DateTime<Utc>, f64)> = sqlx::query_as(
            r#"
            SELECT date_trunc('minute', recorded_at AT TIME ZONE 'UTC') AT TIME ZONE 'UTC' AS minute,
                   AVG(value) AS avg
            FROM performance_metrics
            WHERE metric_type = $1 AND metric_name = $2 AND recorded_at >= $3
            GROUP BY minute
            ORDER BY minute
            LIMIT $4
            "#,
        )
        .bind(metric_type.as_str())
        .bind(metric_name)
        .bind(since)
        .bind(limit.max(0))
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(minute, avg)| MinuteAverage { minute, avg })
            .collect())
    }

    async fn count_samples_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM performance_metrics WHERE recorded_at >= $1")
            .bind(since)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    async fn count_samples_before(&self, cutoff: DateTime<Utc>) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM performance_metrics WHERE recorded_at < $1")
            .bind(cutoff)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    async fn upsert_summaries(&self, summaries: &[HourlySummary]) -> Result<u64, StoreError> {
        let mut written = 0;
        for chunk in summaries.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"INSERT INTO performance_summary
                   (bucket_start, metric_type, metric_name, unit, count,
                    min_value, max_value, avg_value, p50_value, p95_value, p99_value) "#,
            );
            builder.push_values(chunk, |mut row, hourly| {
                let s = &hourly.summary;
                row.push_bind(hourly.bucket_start)
                    .push_bind(s.metric_type.as_str())
                    .push_bind(&s.metric_name)
                    .push_bind(&s.unit)
                    .push_bind(s.count)
                    .push_bind(s.min)
                    .push_bind(s.max)
                    .push_bind(s.avg)
                    .push_bind(s.p50)
                    .push_bind(s.p95)
                    .push_bind(s.p99);
            });
            builder.push(
                r#" ON CONFLICT (bucket_start, metric_type, metric_name, unit) DO UPDATE SET
                    count = EXCLUDED.count,
                    min_value = EXCLUDED.min_value,
                    max_value = EXCLUDED.max_value,
                    avg_value = EXCLUDED.avg_value,
                    p50_value = EXCLUDED.p50_value,
                    p95_value = EXCLUDED.p95_value,
                    p99_value = EXCLUDED.p99_value"#,
            );
            written += builder.build().execute(&self.db).await?.rows_affected();
        }
        Ok(written)
    }

    async fn summaries_since(&self, since: DateTime<Utc>) -> Result<Vec<HourlySummary>, StoreError> {
        let rows = sqlx::query_as::<_, HourlyRow>(
            r#"
            SELECT bucket_start, metric_type, metric_name, unit, count,
                   min_value, max_value, avg_value, p50_value, p95_value, p99_value
            FROM performance_summary
            WHERE bucket_start >= $1
            ORDER BY bucket_start, metric_type, metric_name, unit
            "#,
        )
        .bind(since)
        .fetch_all(&self.db)
        .await?;
        convert(rows)
    }

    async fn insert_alert(&self, alert: &NewAlert, created_at: DateTime<Utc>) -> Result<Alert, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO performance_alerts
                (alert_type, alert_level, metric_name, message, context, threshold_value, actual_value, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&alert.alert_type)
        .bind(alert.level.as_str())
        .bind(&alert.metric_name)
        .bind(&alert.message)
        .bind(&alert.context)
        .bind(alert.threshold_value)
        .bind(alert.actual_value)
        .bind(created_at)
        .fetch_one(&self.db)
        .await?;

        Ok(Alert::from_new(id, alert, created_at))
    }

    async fn alerts(&self, resolved: bool, limit: i64) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, alert_type, alert_level, metric_name, message, context,
                   threshold_value, actual_value, is_resolved, resolved_at, created_at
            FROM performance_alerts
            WHERE is_resolved = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(resolved)
        .bind(limit.max(0))
        .fetch_all(&self.db)
        .await?;
        convert(rows)
    }

    async fn count_active_alerts(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM performance_alerts WHERE is_resolved = FALSE")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    async fn resolve_alert(&self, id: i64, resolved_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE performance_alerts SET is_resolved = TRUE, resolved_at = $2 WHERE id = $1 AND is_resolved = FALSE",
        )
        .bind(id)
        .bind(resolved_at)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_resolved_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM performance_alerts WHERE is_resolved = TRUE AND resolved_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_samples_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM performance_metrics WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM performance_alerts WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_summaries_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM performance_summary WHERE bucket_start < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn optimize(&self) -> Result<Vec<String>, StoreError> {
        let mut done = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            // VACUUM 不能在事务中执行，走简单查询协议
            sqlx::raw_sql(&format!("VACUUM ANALYZE {}", table))
                .execute(&self.db)
                .await?;
            tracing::info!(table = table, "Table vacuumed and analyzed");
            done.push(table.to_string());
        }
        Ok(done)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}
