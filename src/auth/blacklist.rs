//! 令牌黑名单存储
//! 记录携带令牌自身的过期时间，过期后可被物理删除

use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;

/// 黑名单记录
#[derive(Debug, Clone, Serialize, sqlx::FromRow, PartialEq)]
pub struct BlacklistedToken {
    pub token_jti: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
    pub blacklisted_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// 撤销请求的来源信息
#[derive(Debug, Clone, Default)]
pub struct RevocationMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[async_trait]
pub trait TokenBlacklistStore: Send + Sync {
    /// 写入记录；jti 已存在时不修改并返回 false
    async fn insert(&self, token: &BlacklistedToken) -> Result<bool, StoreError>;

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, StoreError>;

    /// 删除 expires_at 早于 now 的记录
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<BlacklistedToken>, StoreError>;
}

/// 进程内黑名单
#[derive(Default)]
pub struct MemoryTokenBlacklist {
    entries: DashMap<String, BlacklistedToken>,
}

impl MemoryTokenBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TokenBlacklistStore for MemoryTokenBlacklist {
    async fn insert(&self, token: &BlacklistedToken) -> Result<bool, StoreError> {
        match self.entries.entry(token.token_jti.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
                Ok(true)
            }
        }
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(jti))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, token| token.expires_at >= now);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<BlacklistedToken>, StoreError> {
        let mut tokens: Vec<BlacklistedToken> = self
            .entries
            .iter()
            .filter(|e| e.value().user_id == user_id)
            .map(|e| e.value().clone())
            .collect();
        tokens.sort_by(|a, b| b.blacklisted_at.cmp(&a.blacklisted_at));
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(jti: &str, user_id: i64, expires_at: DateTime<Utc>) -> BlacklistedToken {
        BlacklistedToken {
            token_jti: jti.to_string(),
            user_id,
            expires_at,
            blacklisted_at: Utc::now(),
            reason: Some("logout".to_string()),
            ip_address: None,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = MemoryTokenBlacklist::new();
        let exp = Utc::now() + Duration::hours(1);

        assert!(store.insert(&token("a", 1, exp)).await.unwrap());
        assert!(!store.insert(&token("a", 1, exp)).await.unwrap());
        assert!(store.is_blacklisted("a").await.unwrap());
        assert!(!store.is_blacklisted("b").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_entries() {
        let store = MemoryTokenBlacklist::new();
        let now = Utc::now();
        store.insert(&token("old", 1, now - Duration::minutes(1))).await.unwrap();
        store.insert(&token("live", 1, now + Duration::minutes(1))).await.unwrap();
        store.insert(&token("other", 2, now + Duration::minutes(1))).await.unwrap();

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(!store.is_blacklisted("old").await.unwrap());

        let for_user = store.list_for_user(1).await.unwrap();
        assert_eq!(for_user.len(), 1);
        assert_eq!(for_user[0].token_jti, "live");
    }
}
