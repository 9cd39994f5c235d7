//! 限流额度查询

use crate::{
    auth::AuthContext,
    middleware::AppState,
    ratelimit::{LimitType, RateLimitHeaders},
};
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub identifier: String,
    pub limit_type: LimitType,
    #[serde(flatten)]
    pub quota: RateLimitHeaders,
}

/// 调用者在其限流类型下的当前额度，不计数
pub async fn current_quota(State(state): State<Arc<AppState>>, auth: AuthContext) -> Json<QuotaResponse> {
    let limit_type = LimitType::for_user(&auth.role, "/api/v1/rate-limit");
    let identifier = format!("user_{}", auth.user_id);
    let quota = state.limiter.rate_limit_headers(&identifier, limit_type).await;

    Json(QuotaResponse {
        identifier,
        limit_type,
        quota,
    })
}
