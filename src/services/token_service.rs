//! 令牌服务：签发、校验、撤销、刷新轮换

use crate::{
    auth::{
        blacklist::{BlacklistedToken, RevocationMeta, TokenBlacklistStore},
        jwt::{Claims, JwtService, TokenPair, TokenRejection, TokenType},
    },
    clock::Clock,
    error::AppError,
    store::{FailurePolicy, StoreError},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct TokenService {
    jwt: Arc<JwtService>,
    blacklist: Arc<dyn TokenBlacklistStore>,
    clock: Arc<dyn Clock>,
    failure_policy: FailurePolicy,
}

impl TokenService {
    pub fn new(
        jwt: Arc<JwtService>,
        blacklist: Arc<dyn TokenBlacklistStore>,
        clock: Arc<dyn Clock>,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            jwt,
            blacklist,
            clock,
            failure_policy,
        }
    }

    /// 为用户签发访问令牌和刷新令牌
    pub fn issue_token_pair(&self, user_id: i64, role: &str) -> Result<TokenPair, AppError> {
        let pair = self.jwt.generate_token_pair(user_id, role)?;
        tracing::info!(user_id = user_id, role = %role, "Token pair issued");
        Ok(pair)
    }

    /// 签发单个令牌，同时返回其 claims
    pub fn issue(
        &self,
        user_id: i64,
        role: &str,
        token_type: TokenType,
    ) -> Result<(String, Claims), AppError> {
        self.jwt.issue(user_id, role, token_type)
    }

    /// 校验签名、签发者、过期时间和黑名单，不限令牌类型
    pub async fn validate(&self, token: &str) -> Result<Claims, TokenRejection> {
        let claims = self.jwt.validate_token(token)?;
        self.ensure_not_blacklisted(&claims).await?;
        Ok(claims)
    }

    /// 校验访问令牌
    pub async fn validate_access(&self, token: &str) -> Result<Claims, TokenRejection> {
        let claims = self.jwt.validate_access_token(token)?;
        self.ensure_not_blacklisted(&claims).await?;
        Ok(claims)
    }

    /// HTTP 边界使用：校验访问令牌，失败时记录原因并统一返回 401
    pub async fn authenticate(&self, token: &str) -> Result<Claims, AppError> {
        self.validate_access(token).await.map_err(|rejection| {
            record_rejection(&rejection);
            AppError::from(rejection)
        })
    }

    async fn ensure_not_blacklisted(&self, claims: &Claims) -> Result<(), TokenRejection> {
        match self.blacklist.is_blacklisted(&claims.jti).await {
            Ok(true) => Err(TokenRejection::Blacklisted),
            Ok(false) => Ok(()),
            Err(e) if self.failure_policy.allows() => {
                tracing::warn!(
                    jti = %claims.jti,
                    error = %e,
                    "Token blacklist unavailable, accepting token"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    jti = %claims.jti,
                    error = %e,
                    "Token blacklist unavailable, rejecting token"
                );
                Err(TokenRejection::StoreUnavailable)
            }
        }
    }

    /// 把 jti 加入黑名单，记录保留到令牌自身过期
    ///
    /// 返回 false 表示该 jti 已在黑名单中
    pub async fn blacklist(
        &self,
        jti: &str,
        user_id: i64,
        reason: &str,
        expires_at: DateTime<Utc>,
        meta: &RevocationMeta,
    ) -> Result<bool, StoreError> {
        let record = BlacklistedToken {
            token_jti: jti.to_string(),
            user_id,
            expires_at,
            blacklisted_at: self.clock.now(),
            reason: Some(reason.to_string()),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
        };

        let inserted = self.blacklist.insert(&record).await?;
        if inserted {
            tracing::info!(jti = %jti, user_id = user_id, reason = %reason, "Token blacklisted");
        } else {
            tracing::debug!(jti = %jti, "Token already blacklisted");
        }
        Ok(inserted)
    }

    /// 撤销令牌：签名必须有效，过期与否不影响
    pub async fn revoke(
        &self,
        token: &str,
        reason: &str,
        meta: &RevocationMeta,
    ) -> Result<Claims, AppError> {
        let claims = self.jwt.decode(token).map_err(|rejection| {
            record_rejection(&rejection);
            AppError::from(rejection)
        })?;
        let user_id = claims.user_id()?;

        self.blacklist(&claims.jti, user_id, reason, claims.expires_at(), meta)
            .await
            .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;

        Ok(claims)
    }

    /// 刷新令牌轮换：旧刷新令牌以 "rotated" 原因拉黑后签发新令牌对
    ///
    /// 同一刷新令牌只有一次轮换成功，并发重放者看到已存在的黑名单记录而被拒绝
    pub async fn refresh(
        &self,
        refresh_token: &str,
        meta: &RevocationMeta,
    ) -> Result<TokenPair, AppError> {
        let claims = match self.jwt.validate_refresh_token(refresh_token) {
            Ok(claims) => claims,
            Err(rejection) => {
                record_rejection(&rejection);
                return Err(rejection.into());
            }
        };
        if let Err(rejection) = self.ensure_not_blacklisted(&claims).await {
            record_rejection(&rejection);
            return Err(rejection.into());
        }
        let user_id = claims.user_id()?;

        let rotated = self
            .blacklist(&claims.jti, user_id, "rotated", claims.expires_at(), meta)
            .await
            .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
        if !rotated {
            record_rejection(&TokenRejection::Blacklisted);
            return Err(AppError::Unauthorized);
        }

        let pair = self.jwt.generate_token_pair(user_id, &claims.role)?;
        tracing::info!(user_id = user_id, old_jti = %claims.jti, "Refresh token rotated");
        Ok(pair)
    }

    /// 删除已过期的黑名单记录
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let deleted = self.blacklist.purge_expired(self.clock.now()).await?;
        if deleted > 0 {
            tracing::info!(deleted = deleted, "Purged expired blacklist entries");
        }
        Ok(deleted)
    }

    /// 某用户被拉黑的令牌
    pub async fn blacklisted_for_user(&self, user_id: i64) -> Result<Vec<BlacklistedToken>, StoreError> {
        self.blacklist.list_for_user(user_id).await
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }
}

fn record_rejection(rejection: &TokenRejection) {
    tracing::warn!(reason = rejection.reason(), "Token rejected: {}", rejection);
    metrics::counter!("token_rejections_total", "reason" => rejection.reason()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::blacklist::MemoryTokenBlacklist;
    use crate::clock::ManualClock;
    use crate::config::test_config;
    use async_trait::async_trait;
    use chrono::Duration;

    struct BrokenBlacklist;

    #[async_trait]
    impl TokenBlacklistStore for BrokenBlacklist {
        async fn insert(&self, _token: &BlacklistedToken) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn is_blacklisted(&self, _jti: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn list_for_user(&self, _user_id: i64) -> Result<Vec<BlacklistedToken>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    fn service(
        blacklist: Arc<dyn TokenBlacklistStore>,
        policy: FailurePolicy,
    ) -> (TokenService, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let jwt = Arc::new(JwtService::from_config(&test_config(), clock_arc.clone()).unwrap());
        (TokenService::new(jwt, blacklist, clock_arc, policy), clock)
    }

    #[tokio::test]
    async fn test_blacklisted_token_rejected() {
        let (service, _clock) = service(Arc::new(MemoryTokenBlacklist::new()), FailurePolicy::Closed);
        let (token, claims) = service.issue(7, "user", TokenType::Access).unwrap();

        assert!(service.validate(&token).await.is_ok());

        let inserted = service
            .blacklist(&claims.jti, 7, "logout", claims.expires_at(), &RevocationMeta::default())
            .await
            .unwrap();
        assert!(inserted);

        assert_eq!(service.validate(&token).await, Err(TokenRejection::Blacklisted));
        assert!(matches!(service.authenticate(&token).await, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_reblacklisting_is_noop() {
        let (service, _clock) = service(Arc::new(MemoryTokenBlacklist::new()), FailurePolicy::Closed);
        let (_, claims) = service.issue(7, "user", TokenType::Access).unwrap();
        let meta = RevocationMeta::default();

        assert!(service.blacklist(&claims.jti, 7, "logout", claims.expires_at(), &meta).await.unwrap());
        assert!(!service.blacklist(&claims.jti, 7, "admin", claims.expires_at(), &meta).await.unwrap());

        let records = service.blacklisted_for_user(7).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason.as_deref(), Some("logout"));
    }

    #[tokio::test]
    async fn test_revoke_accepts_expired_token() {
        let (service, clock) = service(Arc::new(MemoryTokenBlacklist::new()), FailurePolicy::Closed);
        let (token, claims) = service.issue(3, "user", TokenType::Access).unwrap();

        clock.advance(Duration::hours(2));
        assert_eq!(service.validate(&token).await, Err(TokenRejection::Expired));

        let meta = RevocationMeta {
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("curl/8".to_string()),
        };
        let revoked = service.revoke(&token, "admin_revoke", &meta).await.unwrap();
        assert_eq!(revoked.jti, claims.jti);

        let records = service.blacklisted_for_user(3).await.unwrap();
        assert_eq!(records[0].expires_at, claims.expires_at());
        assert_eq!(records[0].ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_refresh_rotates_once() {
        let (service, _clock) = service(Arc::new(MemoryTokenBlacklist::new()), FailurePolicy::Closed);
        let pair = service.issue_token_pair(9, "mentor").unwrap();
        let meta = RevocationMeta::default();

        let rotated = service.refresh(&pair.refresh_token, &meta).await.unwrap();
        let claims = service.validate_access(&rotated.access_token).await.unwrap();
        assert_eq!(claims.user_id().unwrap(), 9);
        assert_eq!(claims.role, "mentor");

        // 旧刷新令牌不能再用
        assert!(matches!(
            service.refresh(&pair.refresh_token, &meta).await,
            Err(AppError::Unauthorized)
        ));

        let records = service.blacklisted_for_user(9).await.unwrap();
        assert_eq!(records[0].reason.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let (service, _clock) = service(Arc::new(MemoryTokenBlacklist::new()), FailurePolicy::Closed);
        let pair = service.issue_token_pair(9, "user").unwrap();

        assert!(service.refresh(&pair.access_token, &RevocationMeta::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_blacklist_failure_policy() {
        let (closed, _) = service(Arc::new(BrokenBlacklist), FailurePolicy::Closed);
        let (token, _) = closed.issue(1, "user", TokenType::Access).unwrap();
        assert_eq!(closed.validate(&token).await, Err(TokenRejection::StoreUnavailable));

        let (open, _) = service(Arc::new(BrokenBlacklist), FailurePolicy::Open);
        let (token, _) = open.issue(1, "user", TokenType::Access).unwrap();
        assert!(open.validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = Arc::new(MemoryTokenBlacklist::new());
        let (service, clock) = service(store.clone(), FailurePolicy::Closed);
        let (_, claims) = service.issue(1, "user", TokenType::Access).unwrap();
        service
            .blacklist(&claims.jti, 1, "logout", claims.expires_at(), &RevocationMeta::default())
            .await
            .unwrap();

        assert_eq!(service.purge_expired().await.unwrap(), 0);
        clock.advance(Duration::hours(1));
        assert_eq!(service.purge_expired().await.unwrap(), 1);
        assert!(store.is_empty());
    }
}
