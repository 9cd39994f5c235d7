//! 限流服务
//! 固定窗口计数，检查与加一由存储层一条原子操作完成

use super::policy::{LimitTable, LimitType, RateLimitPolicy};
use super::store::{CounterKey, CounterStats, CounterStore};
use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::store::{FailurePolicy, StoreError};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;

/// 一次限流检查的结果
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub limit_type: LimitType,
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub window_secs: u64,
    /// 计数存储不可用，结果由故障策略决定
    pub degraded: bool,
}

impl RateLimitDecision {
    /// 距窗口重置的秒数，至少 1
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now).num_seconds().max(1) as u64
    }

    pub fn headers(&self) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: self.limit,
            remaining: self.remaining,
            reset: self.reset_at.timestamp(),
            window: self.window_secs,
        }
    }
}

/// X-RateLimit-* 响应头
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    /// 窗口重置时间（Unix 秒）
    pub reset: i64,
    pub window: u64,
}

impl RateLimitHeaders {
    pub fn to_pairs(&self) -> [(&'static str, String); 4] {
        [
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset.to_string()),
            ("x-ratelimit-window", self.window.to_string()),
        ]
    }
}

/// 限流器
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    limits: LimitTable,
    failure_policy: FailurePolicy,
    cleanup_probability: f64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            limits: LimitTable::new(&config.overrides),
            failure_policy: config.failure_policy,
            cleanup_probability: config.cleanup_probability.clamp(0.0, 1.0),
        }
    }

    /// 检查并计数
    pub async fn check(&self, identifier: &str, limit_type: LimitType) -> RateLimitDecision {
        let policy = self.limits.get(limit_type);
        let now = self.clock.now();
        let window_start = policy.window_start(now);
        let key = CounterKey::new(identifier, limit_type.as_str(), window_start);

        let mut decision = RateLimitDecision {
            limit_type,
            allowed: false,
            limit: policy.max_requests,
            remaining: 0,
            reset_at: policy.reset_at(now),
            window_secs: policy.window_secs,
            degraded: false,
        };

        match self.store.try_increment(&key, policy.max_requests, now).await {
            Ok(Some(count)) => {
                decision.allowed = true;
                decision.remaining = policy.max_requests.saturating_sub(count);
                metrics::counter!("rate_limit_decisions_total", "limit_type" => limit_type.as_str(), "outcome" => "allowed").increment(1);
                self.maybe_cleanup().await;
            }
            Ok(None) => {
                tracing::warn!(
                    identifier = %identifier,
                    limit_type = %limit_type,
                    limit = policy.max_requests,
                    window_secs = policy.window_secs,
                    retry_after_secs = decision.retry_after_secs(now),
                    "Rate limit exceeded"
                );
                metrics::counter!("rate_limit_decisions_total", "limit_type" => limit_type.as_str(), "outcome" => "blocked").increment(1);
            }
            Err(e) => {
                decision.degraded = true;
                decision.allowed = self.failure_policy.allows();
                if decision.allowed {
                    decision.remaining = policy.max_requests;
                }
                tracing::warn!(
                    identifier = %identifier,
                    limit_type = %limit_type,
                    policy = self.failure_policy.as_str(),
                    error = %e,
                    "Rate limit store unavailable, applying failure policy"
                );
                metrics::counter!("rate_limit_decisions_total", "limit_type" => limit_type.as_str(), "outcome" => "degraded").increment(1);
            }
        }

        decision
    }

    /// 检查并计数，仅返回是否放行
    pub async fn check_rate_limit(&self, identifier: &str, limit_type: LimitType) -> bool {
        self.check(identifier, limit_type).await.allowed
    }

    /// 已认证用户，按角色与端点选择限流类型
    pub async fn check_user(&self, user_id: i64, role: &str, endpoint: &str) -> RateLimitDecision {
        let limit_type = LimitType::for_user(role, endpoint);
        self.check(&format!("user_{}", user_id), limit_type).await
    }

    /// 匿名请求，按客户端 IP 限流
    pub async fn check_anonymous(&self, client_ip: &str, endpoint: &str) -> RateLimitDecision {
        let limit_type = LimitType::for_anonymous(endpoint);
        self.check(&format!("ip_{}", client_ip), limit_type).await
    }

    /// 当前窗口剩余额度，不计数，最小为 0
    pub async fn remaining_requests(&self, identifier: &str, limit_type: LimitType) -> u32 {
        let policy = self.limits.get(limit_type);
        let now = self.clock.now();
        let key = CounterKey::new(identifier, limit_type.as_str(), policy.window_start(now));

        match self.store.current_count(&key).await {
            Ok(count) => policy.max_requests.saturating_sub(count),
            Err(e) => {
                tracing::warn!(
                    identifier = %identifier,
                    limit_type = %limit_type,
                    error = %e,
                    "Failed to read rate limit counter"
                );
                if self.failure_policy.allows() {
                    policy.max_requests
                } else {
                    0
                }
            }
        }
    }

    /// 当前窗口的重置时间
    pub fn reset_at(&self, limit_type: LimitType) -> DateTime<Utc> {
        self.limits.get(limit_type).reset_at(self.clock.now())
    }

    /// 响应头数据，不计数
    pub async fn rate_limit_headers(&self, identifier: &str, limit_type: LimitType) -> RateLimitHeaders {
        let policy = self.limits.get(limit_type);
        let remaining = self.remaining_requests(identifier, limit_type).await;
        RateLimitHeaders {
            limit: policy.max_requests,
            remaining,
            reset: self.reset_at(limit_type).timestamp(),
            window: policy.window_secs,
        }
    }

    /// 运行时修改额度
    pub fn update_limit(&self, limit_type: LimitType, max_requests: u32, window_secs: u64) {
        self.limits.update(
            limit_type,
            RateLimitPolicy {
                max_requests,
                window_secs,
            },
        );
        tracing::info!(
            limit_type = %limit_type,
            max_requests = max_requests,
            window_secs = window_secs,
            "Rate limit updated"
        );
    }

    pub fn policy(&self, limit_type: LimitType) -> RateLimitPolicy {
        self.limits.get(limit_type)
    }

    pub fn limits(&self) -> Vec<(LimitType, RateLimitPolicy)> {
        self.limits.snapshot()
    }

    /// 最近 timeframe 内的请求统计
    pub async fn statistics(&self, timeframe: Duration) -> Result<Vec<CounterStats>, StoreError> {
        self.store.statistics(self.clock.now() - timeframe).await
    }

    /// 删除早于两倍最长窗口的记录
    pub async fn cleanup(&self) -> Result<u64, StoreError> {
        let keep = Duration::seconds(self.limits.longest_window_secs() as i64 * 2);
        let deleted = self.store.purge_before(self.clock.now() - keep).await?;
        if deleted > 0 {
            tracing::info!(deleted = deleted, "Cleaned up old rate limit records");
        }
        Ok(deleted)
    }

    async fn maybe_cleanup(&self) {
        if self.cleanup_probability <= 0.0 {
            return;
        }
        let roll = rand::thread_rng().gen_bool(self.cleanup_probability);
        if !roll {
            return;
        }
        if let Err(e) = self.cleanup().await {
            tracing::error!(error = %e, "Rate limit cleanup failed");
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
}
