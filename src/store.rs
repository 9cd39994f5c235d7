//! 存储层公共类型
//! 计数器、黑名单、指标存储共用的错误类型和故障策略

use serde::{Deserialize, Serialize};

/// 存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

/// 存储不可用时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 放行（记录告警日志）
    Open,
    /// 拒绝
    Closed,
}

impl FailurePolicy {
    pub fn allows(&self) -> bool {
        matches!(self, FailurePolicy::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Open => "open",
            FailurePolicy::Closed => "closed",
        }
    }
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_policy_deserialize() {
        let policy: FailurePolicy = serde_json::from_str("\"closed\"").unwrap();
        assert_eq!(policy, FailurePolicy::Closed);
        assert!(!policy.allows());
        assert!(FailurePolicy::Open.allows());
    }
}
