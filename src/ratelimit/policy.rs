//! 限流类型与额度表

use crate::config::LimitOverride;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 限流类型，每种对应一组 (最大请求数, 窗口秒数)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Default,
    Auth,
    Api,
    ApiStrict,
    ApiUser,
    ApiAdmin,
    Upload,
    Search,
    BulkOperation,
}

impl LimitType {
    pub const ALL: [LimitType; 9] = [
        LimitType::Default,
        LimitType::Auth,
        LimitType::Api,
        LimitType::ApiStrict,
        LimitType::ApiUser,
        LimitType::ApiAdmin,
        LimitType::Upload,
        LimitType::Search,
        LimitType::BulkOperation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Default => "default",
            LimitType::Auth => "auth",
            LimitType::Api => "api",
            LimitType::ApiStrict => "api_strict",
            LimitType::ApiUser => "api_user",
            LimitType::ApiAdmin => "api_admin",
            LimitType::Upload => "upload",
            LimitType::Search => "search",
            LimitType::BulkOperation => "bulk_operation",
        }
    }

    /// 内置默认额度
    pub fn default_policy(&self) -> RateLimitPolicy {
        let (max_requests, window_secs) = match self {
            LimitType::Default => (100, 3600),
            LimitType::Auth => (10, 600),
            LimitType::Api => (1000, 3600),
            LimitType::ApiStrict => (60, 60),
            LimitType::ApiUser => (500, 3600),
            LimitType::ApiAdmin => (2000, 3600),
            LimitType::Upload => (20, 300),
            LimitType::Search => (200, 3600),
            LimitType::BulkOperation => (10, 300),
        };
        RateLimitPolicy {
            max_requests,
            window_secs,
        }
    }

    /// 已认证用户：按角色和端点选择限流类型
    pub fn for_user(role: &str, endpoint: &str) -> Self {
        if role == "admin" {
            LimitType::ApiAdmin
        } else if endpoint.contains("upload") {
            LimitType::Upload
        } else if endpoint.contains("search") {
            LimitType::Search
        } else if endpoint.contains("bulk") {
            LimitType::BulkOperation
        } else {
            LimitType::ApiUser
        }
    }

    /// 匿名请求：按端点选择限流类型
    pub fn for_anonymous(endpoint: &str) -> Self {
        if endpoint.contains("auth") {
            LimitType::Auth
        } else if endpoint.contains("api") {
            LimitType::ApiStrict
        } else {
            LimitType::Default
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LimitType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown limit type: {}", s))
    }
}

/// 单个限流额度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimitPolicy {
    /// 当前窗口起点，按窗口长度对齐到 Unix 纪元
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window = self.window_secs.max(1) as i64;
        let offset = now.timestamp().rem_euclid(window);
        now - Duration::seconds(offset) - Duration::nanoseconds(now.timestamp_subsec_nanos() as i64)
    }

    /// 当前窗口结束时间，总是严格大于 now
    pub fn reset_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.window_start(now) + Duration::seconds(self.window_secs.max(1) as i64)
    }
}

/// 额度表，支持运行时修改
pub struct LimitTable {
    limits: RwLock<HashMap<LimitType, RateLimitPolicy>>,
}

impl LimitTable {
    /// 默认额度叠加配置中的覆盖项，未知名称在配置校验阶段已被拒绝
    pub fn new(overrides: &HashMap<String, LimitOverride>) -> Self {
        let mut limits: HashMap<LimitType, RateLimitPolicy> = LimitType::ALL
            .iter()
            .map(|t| (*t, t.default_policy()))
            .collect();

        for (name, limit) in overrides {
            if let Ok(limit_type) = name.parse::<LimitType>() {
                limits.insert(
                    limit_type,
                    RateLimitPolicy {
                        max_requests: limit.max_requests,
                        window_secs: limit.window_secs,
                    },
                );
            }
        }

        Self {
            limits: RwLock::new(limits),
        }
    }

    pub fn get(&self, limit_type: LimitType) -> RateLimitPolicy {
        self.limits
            .read()
            .get(&limit_type)
            .copied()
            .unwrap_or_else(|| limit_type.default_policy())
    }

    pub fn update(&self, limit_type: LimitType, policy: RateLimitPolicy) {
        self.limits.write().insert(limit_type, policy);
    }

    /// 最长窗口（秒），用于清理旧记录
    pub fn longest_window_secs(&self) -> u64 {
        self.limits
            .read()
            .values()
            .map(|p| p.window_secs)
            .max()
            .unwrap_or(3600)
    }

    pub fn snapshot(&self) -> Vec<(LimitType, RateLimitPolicy)> {
        let mut all: Vec<_> = self.limits.read().iter().map(|(t, p)| (*t, *p)).collect();
        all.sort_by_key(|(t, _)| *t);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_limit_type_roundtrip_names() {
        for t in LimitType::ALL {
            assert_eq!(t.as_str().parse::<LimitType>().unwrap(), t);
        }
        assert!("unknown".parse::<LimitType>().is_err());
    }

    #[test]
    fn test_tier_selection() {
        assert_eq!(LimitType::for_user("admin", "/api/v1/upload"), LimitType::ApiAdmin);
        assert_eq!(LimitType::for_user("user", "/api/v1/upload"), LimitType::Upload);
        assert_eq!(LimitType::for_user("user", "/api/v1/search?q=x"), LimitType::Search);
        assert_eq!(LimitType::for_user("mentor", "/api/v1/bulk/users"), LimitType::BulkOperation);
        assert_eq!(LimitType::for_user("user", "/api/v1/courses"), LimitType::ApiUser);

        assert_eq!(LimitType::for_anonymous("/api/v1/auth/refresh"), LimitType::Auth);
        assert_eq!(LimitType::for_anonymous("/api/v1/courses"), LimitType::ApiStrict);
        assert_eq!(LimitType::for_anonymous("/health"), LimitType::Default);
    }

    #[test]
    fn test_window_alignment() {
        let policy = LimitType::Upload.default_policy();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 7, 30).unwrap();

        let start = policy.window_start(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 10, 5, 0).unwrap());
        assert_eq!(policy.reset_at(now), Utc.with_ymd_and_hms(2026, 3, 1, 10, 10, 0).unwrap());
    }

    #[test]
    fn test_reset_strictly_after_now_on_boundary() {
        let policy = LimitType::ApiStrict.default_policy();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(policy.window_start(now), now);
        assert!(policy.reset_at(now) > now);
    }

    #[test]
    fn test_limit_table_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "upload".to_string(),
            LimitOverride {
                max_requests: 3,
                window_secs: 10,
            },
        );
        let table = LimitTable::new(&overrides);
        assert_eq!(table.get(LimitType::Upload).max_requests, 3);
        assert_eq!(table.get(LimitType::Api).max_requests, 1000);
        assert_eq!(table.longest_window_secs(), 3600);

        table.update(
            LimitType::Api,
            RateLimitPolicy {
                max_requests: 5,
                window_secs: 7200,
            },
        );
        assert_eq!(table.get(LimitType::Api).max_requests, 5);
        assert_eq!(table.longest_window_secs(), 7200);
    }
}
