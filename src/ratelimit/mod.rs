//! 限流模块
//! 按 (标识, 限流类型, 窗口) 计数，存储层提供原子的"未超限则加一"

pub mod limiter;
pub mod policy;
pub mod store;

pub use limiter::{RateLimitDecision, RateLimitHeaders, RateLimiter};
pub use policy::{LimitTable, LimitType, RateLimitPolicy};
pub use store::{CounterKey, CounterStats, CounterStore, MemoryCounterStore};
