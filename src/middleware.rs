//! HTTP 中间件
//! 请求追踪与性能采样、速率限制

use crate::{
    auth::AuthContext,
    clock::Clock,
    config::AppConfig,
    db::Stores,
    error::{AppError, RateLimitRejection},
    monitor::PerformanceMonitor,
    ratelimit::{RateLimitDecision, RateLimitHeaders, RateLimiter},
    services::TokenService,
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// 应用状态
///
/// 所有服务在启动时创建一次，通过 Arc 在请求间共享
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    /// memory 后端时为 None
    pub db: Option<sqlx::PgPool>,
    pub clock: Arc<dyn Clock>,
    pub limiter: Arc<RateLimiter>,
    pub token_service: Arc<TokenService>,
    pub monitor: Arc<PerformanceMonitor>,
}

impl AppState {
    /// 用已建立的存储组装服务
    pub fn new(config: AppConfig, stores: Stores, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        let jwt = Arc::new(crate::auth::JwtService::from_config(&config, clock.clone())?);
        let token_service = Arc::new(TokenService::new(
            jwt,
            stores.blacklist.clone(),
            clock.clone(),
            config.security.blacklist_failure_policy,
        ));
        let limiter = Arc::new(RateLimiter::new(
            stores.counters.clone(),
            clock.clone(),
            &config.rate_limit,
        ));
        let monitor = Arc::new(PerformanceMonitor::new(
            stores.metrics.clone(),
            stores.counters.clone(),
            clock.clone(),
            &config.performance,
        ));

        Ok(Self {
            config,
            db: stores.pool,
            clock,
            limiter,
            token_service,
            monitor,
        })
    }
}

/// 客户端 IP，由请求追踪中间件写入请求扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// 请求追踪中间件
/// 生成 trace_id/request_id，创建性能监控作用域，记录请求指标
pub async fn request_tracking_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let client_ip = client_ip(&req, state.config.security.trust_proxy);

    let scope = state.monitor.begin_request(path.clone());
    req.extensions_mut().insert(scope.clone());
    req.extensions_mut().insert(ClientIp(client_ip.clone()));

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        path = %path,
        client_ip = %client_ip,
    );

    async move {
        let start = Instant::now();

        let mut response = next.run(req).await;

        let elapsed = start.elapsed();
        let status = response.status().as_u16();

        scope.monitor_api_request(&path, &method, status, elapsed.as_secs_f64() * 1000.0);
        scope.finish().await;

        metrics::counter!(
            "http_requests_total",
            "method" => method.clone(),
            "status" => status.to_string()
        )
        .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
            sampled = scope.is_sampled(),
            "Request completed"
        );

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            headers.insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 已认证路由的限流：按用户 ID、角色和端点
///
/// 必须放在 JWT 认证中间件之后
pub async fn user_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.config.rate_limit.enabled {
        return Ok(next.run(req).await);
    }

    let (user_id, role) = req
        .extensions()
        .get::<AuthContext>()
        .map(|auth| (auth.user_id, auth.role.clone()))
        .ok_or(AppError::Unauthorized)?;
    let path = req.uri().path().to_string();
    let decision = state.limiter.check_user(user_id, &role, &path).await;

    let headers = enforce(&decision, state.clock.as_ref())?;
    Ok(with_rate_limit_headers(next.run(req).await, headers))
}

/// 公开路由的限流：按客户端 IP 和端点
pub async fn ip_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.config.rate_limit.enabled {
        return Ok(next.run(req).await);
    }

    let ip = match req.extensions().get::<ClientIp>() {
        Some(ClientIp(ip)) => ip.clone(),
        None => client_ip(&req, state.config.security.trust_proxy),
    };
    let path = req.uri().path().to_string();
    let decision = state.limiter.check_anonymous(&ip, &path).await;

    let headers = enforce(&decision, state.clock.as_ref())?;
    Ok(with_rate_limit_headers(next.run(req).await, headers))
}

/// 被拒绝时返回 429；存储故障且策略为拒绝时返回 503
fn enforce(decision: &RateLimitDecision, clock: &dyn Clock) -> Result<RateLimitHeaders, AppError> {
    if decision.allowed {
        return Ok(decision.headers());
    }
    if decision.degraded {
        return Err(AppError::ServiceUnavailable(
            "rate limit store unavailable".to_string(),
        ));
    }
    Err(AppError::RateLimitExceeded(Box::new(RateLimitRejection {
        limit_type: decision.limit_type.as_str().to_string(),
        headers: decision.headers(),
        retry_after_secs: decision.retry_after_secs(clock.now()),
    })))
}

fn with_rate_limit_headers(mut response: Response, headers: RateLimitHeaders) -> Response {
    let map = response.headers_mut();
    for (name, value) in headers.to_pairs() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            map.insert(name, value);
        }
    }
    response
}

/// 获取客户端 IP 地址
///
/// 信任代理时依次取 X-Forwarded-For 第一个地址、X-Real-IP，否则取连接地址
pub fn client_ip(req: &Request, trust_proxy: bool) -> String {
    let headers = req.headers();

    if trust_proxy {
        if let Some(first_ip) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return first_ip.to_string();
        }

        if let Some(real_ip) = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return real_ip.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::LimitType;
    use axum::body::Body;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_extract_or_generate_trace_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", "test-trace-123".parse().unwrap());

        let trace_id = extract_or_generate_trace_id(&headers);
        assert_eq!(trace_id, "test-trace-123");

        let headers = HeaderMap::new();
        let trace_id = extract_or_generate_trace_id(&headers);
        assert!(!trace_id.is_empty());
        assert_ne!(trace_id, "test-trace-123");
    }

    #[test]
    fn test_client_ip_sources() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, true), "203.0.113.7");
        assert_eq!(client_ip(&req, false), "unknown");

        let req = Request::builder()
            .header("x-real-ip", "198.51.100.4")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, true), "198.51.100.4");

        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_ip(&req, true), "192.0.2.1");
    }

    fn decision(allowed: bool, degraded: bool, reset_at: chrono::DateTime<Utc>) -> RateLimitDecision {
        RateLimitDecision {
            limit_type: LimitType::Upload,
            allowed,
            limit: 20,
            remaining: 0,
            reset_at,
            window_secs: 300,
            degraded,
        }
    }

    #[test]
    fn test_enforce_maps_decisions() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let clock = ManualClock::new(now);

        assert!(enforce(&decision(true, false, now + Duration::seconds(60)), &clock).is_ok());

        match enforce(&decision(false, false, now + Duration::seconds(42)), &clock) {
            Err(AppError::RateLimitExceeded(info)) => {
                assert_eq!(info.retry_after_secs, 42);
                assert_eq!(info.limit_type, "upload");
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert!(matches!(
            enforce(&decision(false, true, now), &clock),
            Err(AppError::ServiceUnavailable(_))
        ));
    }
}
