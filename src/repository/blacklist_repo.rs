//! 令牌黑名单表（token_blacklist）

use crate::auth::{BlacklistedToken, TokenBlacklistStore};
use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct PgTokenBlacklist {
    db: PgPool,
}

impl PgTokenBlacklist {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenBlacklistStore for PgTokenBlacklist {
    async fn insert(&self, token: &BlacklistedToken) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO token_blacklist
                (token_jti, user_id, expires_at, blacklisted_at, reason, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (token_jti) DO NOTHING
            "#,
        )
        .bind(&token.token_jti)
        .bind(token.user_id)
        .bind(token.expires_at)
        .bind(token.blacklisted_at)
        .bind(&token.reason)
        .bind(&token.ip_address)
        .bind(&token.user_agent)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM token_blacklist WHERE token_jti = $1)")
                .bind(jti)
                .fetch_one(&self.db)
                .await?;

        Ok(exists)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM token_blacklist WHERE expires_at < $1")
            .bind(now)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<BlacklistedToken>, StoreError> {
        let tokens = sqlx::query_as::<_, BlacklistedToken>(
            r#"
            SELECT token_jti, user_id, expires_at, blacklisted_at, reason, ip_address, user_agent
            FROM token_blacklist
            WHERE user_id = $1
            ORDER BY blacklisted_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(tokens)
    }
}
