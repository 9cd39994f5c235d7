//! 数据库连接池与迁移管理
//! 提供 PostgreSQL 连接池、迁移执行、健康检查和存储后端装配

use crate::auth::{MemoryTokenBlacklist, TokenBlacklistStore};
use crate::config::{AppConfig, DatabaseConfig};
use crate::monitor::{MemoryMetricStore, MetricStore};
use crate::ratelimit::{CounterStore, MemoryCounterStore};
use crate::repository::{PgCounterStore, PgMetricStore, PgTokenBlacklist};
use crate::store::StorageBackend;
use secrecy::ExposeSecret;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;

/// 创建数据库连接池
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, DbError> {
    let db_url = config.url.expose_secret();

    tracing::debug!("Creating database connection pool...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .test_before_acquire(true)
        .connect(db_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create database pool: {}", e);
            DbError::ConnectionFailed(e.to_string())
        })?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database pool created successfully"
    );

    Ok(pool)
}

/// 运行数据库迁移
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    tracing::info!("Running database migrations...");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            tracing::error!("Migration failed: {}", e);
            DbError::MigrationFailed(e.to_string())
        })?;

    tracing::info!("Migrations completed successfully");
    Ok(())
}

/// 数据库健康检查
pub async fn health_check(pool: &PgPool) -> HealthStatus {
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => {
            tracing::debug!("Database health check: OK");
            HealthStatus::Healthy
        }
        Err(e) => {
            tracing::warn!("Database health check failed: {}", e);
            HealthStatus::Unhealthy(e.to_string())
        }
    }
}

/// 记录数据库连接池指标
pub fn record_pool_metrics(pool: &PgPool) {
    metrics::gauge!("db.pool.size").set(pool.size() as f64);
    metrics::gauge!("db.pool.idle").set(pool.num_idle() as f64);
}

/// 按配置选择的存储实现
#[derive(Clone)]
pub struct Stores {
    /// memory 后端时为 None
    pub pool: Option<PgPool>,
    pub counters: Arc<dyn CounterStore>,
    pub blacklist: Arc<dyn TokenBlacklistStore>,
    pub metrics: Arc<dyn MetricStore>,
}

impl Stores {
    /// 进程内存储
    pub fn in_memory() -> Self {
        Self {
            pool: None,
            counters: Arc::new(MemoryCounterStore::new()),
            blacklist: Arc::new(MemoryTokenBlacklist::new()),
            metrics: Arc::new(MemoryMetricStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            counters: Arc::new(PgCounterStore::new(pool.clone())),
            blacklist: Arc::new(PgTokenBlacklist::new(pool.clone())),
            metrics: Arc::new(PgMetricStore::new(pool.clone())),
            pool: Some(pool),
        }
    }
}

/// 按 storage.backend 建立存储；postgres 后端会先执行迁移
pub async fn build_stores(config: &AppConfig) -> Result<Stores, DbError> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-process storage, state is lost on restart");
            Ok(Stores::in_memory())
        }
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database).await?;
            run_migrations(&pool).await?;
            Ok(Stores::postgres(pool))
        }
    }
}

/// 数据库错误类型
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// 健康状态
#[derive(Debug, Clone)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}
