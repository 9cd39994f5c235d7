//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{
    auth::{jwt_auth_middleware, require_admin_middleware},
    handlers,
    middleware::{
        ip_rate_limit_middleware, request_tracking_middleware, user_rate_limit_middleware, AppState,
    },
};

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查），不限流
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 刷新令牌无需访问令牌，按 IP 限流
    let auth_routes = Router::new()
        .route("/api/v1/auth/refresh", post(handlers::auth::refresh_token))
        .route_layer(from_fn_with_state(state.clone(), ip_rate_limit_middleware));

    // 性能监控管理（管理员）
    let admin_routes = Router::new()
        .route(
            "/api/v1/admin/performance/summary",
            get(handlers::performance::summary),
        )
        .route(
            "/api/v1/admin/performance/metrics",
            get(handlers::performance::metrics),
        )
        .route(
            "/api/v1/admin/performance/alerts",
            get(handlers::performance::list_alerts),
        )
        .route(
            "/api/v1/admin/performance/alerts/{id}/resolve",
            post(handlers::performance::resolve_alert),
        )
        .route_layer(from_fn(require_admin_middleware));

    // 需要认证的路由：先验证令牌，再按用户限流
    let authenticated_routes = Router::new()
        .route("/api/v1/auth/me", get(handlers::auth::get_current_user))
        .route("/api/v1/auth/logout", post(handlers::auth::logout))
        .route("/api/v1/rate-limit", get(handlers::rate_limit::current_quota))
        .merge(admin_routes)
        .route_layer(from_fn_with_state(state.clone(), user_rate_limit_middleware))
        .route_layer(from_fn_with_state(
            state.token_service.clone(),
            jwt_auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(authenticated_routes)
        .layer(from_fn_with_state(state.clone(), request_tracking_middleware))
        .with_state(state)
}
