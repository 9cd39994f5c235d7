//! 认证相关的 HTTP 处理器

use crate::{
    auth::{AuthContext, RevocationMeta, TokenPair},
    error::AppError,
    middleware::{AppState, ClientIp},
};
use axum::{extract::State, http::HeaderMap, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct CurrentUserResponse {
    pub user_id: i64,
    pub role: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

fn revocation_meta(headers: &HeaderMap, ClientIp(ip): ClientIp) -> RevocationMeta {
    RevocationMeta {
        ip_address: Some(ip),
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
    }
}

/// 当前用户
pub async fn get_current_user(auth_context: AuthContext) -> Json<CurrentUserResponse> {
    Json(CurrentUserResponse {
        user_id: auth_context.user_id,
        role: auth_context.role,
        token_id: auth_context.jti,
        expires_at: auth_context.expires_at,
    })
}

/// 登出：把当前访问令牌加入黑名单
pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Extension(client_ip): Extension<ClientIp>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let meta = revocation_meta(&headers, client_ip);
    state
        .token_service
        .revoke(&auth_context.token, "logout", &meta)
        .await?;

    tracing::info!(user_id = auth_context.user_id, "User logged out");
    Ok(Json(json!({"message": "Logged out"})))
}

/// 刷新令牌（轮换）
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Extension(client_ip): Extension<ClientIp>,
    headers: HeaderMap,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<Json<TokenPair>, AppError> {
    let meta = revocation_meta(&headers, client_ip);
    let pair = state.token_service.refresh(&req.refresh_token, &meta).await?;
    Ok(Json(pair))
}
