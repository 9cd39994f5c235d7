//! 限流计数表（rate_limits）

use crate::ratelimit::{CounterKey, CounterStats, CounterStore};
use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct PgCounterStore {
    db: PgPool,
}

impl PgCounterStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn try_increment(
        &self,
        key: &CounterKey,
        max: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, StoreError> {
        if max == 0 {
            return Ok(None);
        }
        let max = i32::try_from(max).map_err(|_| {
            StoreError::InvalidData(format!("max_requests {} exceeds the counter column range", max))
        })?;

        // 冲突时仅在未达上限时加一；上限已满则 WHERE 不成立，不返回行
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limits (identifier, limit_type, window_start, request_count, last_request_at)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (identifier, limit_type, window_start) DO UPDATE
                SET request_count = rate_limits.request_count + 1,
                    last_request_at = EXCLUDED.last_request_at
                WHERE rate_limits.request_count < $5
            RETURNING request_count
            "#,
        )
        .bind(&key.identifier)
        .bind(&key.scope)
        .bind(key.window_start)
        .bind(now)
        .bind(max)
        .fetch_optional(&self.db)
        .await?;

        Ok(count.map(|c| c.max(0) as u32))
    }

    async fn current_count(&self, key: &CounterKey) -> Result<u32, StoreError> {
        let count: Option<i32> = sqlx::query_scalar(
            "SELECT request_count FROM rate_limits WHERE identifier = $1 AND limit_type = $2 AND window_start = $3",
        )
        .bind(&key.identifier)
        .bind(&key.scope)
        .bind(key.window_start)
        .fetch_optional(&self.db)
        .await?;

        Ok(count.unwrap_or(0).max(0) as u32)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE window_start < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    async fn statistics(&self, since: DateTime<Utc>) -> Result<Vec<CounterStats>, StoreError> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT limit_type,
                   COALESCE(SUM(request_count), 0)::BIGINT AS total_requests,
                   COUNT(DISTINCT identifier) AS unique_identifiers
            FROM rate_limits
            WHERE last_request_at >= $1
            GROUP BY limit_type
            ORDER BY limit_type
            "#,
        )
        .bind(since)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(scope, total_requests, unique_identifiers)| CounterStats {
                scope,
                total_requests,
                unique_identifiers,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_oversized_max_is_rejected_before_query() {
        // 惰性连接池：校验失败时不会触发连接
        let pool = PgPool::connect_lazy("postgresql://localhost/unused").unwrap();
        let store = PgCounterStore::new(pool);
        let key = CounterKey::new("user_1", "api_user", Utc::now());

        let result = store.try_increment(&key, i32::MAX as u32 + 1, Utc::now()).await;
        assert!(matches!(result, Err(StoreError::InvalidData(_))));
    }
}
