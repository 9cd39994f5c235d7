//! 限流计数存储
//! 计数器存储只暴露"未达上限则原子加一"这一种写操作，不提供读后写

use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// 计数器主键：(标识, 作用域, 窗口起点)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub identifier: String,
    pub scope: String,
    pub window_start: DateTime<Utc>,
}

impl CounterKey {
    pub fn new(
        identifier: impl Into<String>,
        scope: impl Into<String>,
        window_start: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            scope: scope.into(),
            window_start,
        }
    }
}

/// 按作用域统计
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CounterStats {
    pub scope: String,
    pub total_requests: i64,
    pub unique_identifiers: i64,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// 计数未达 max 时原子加一（窗口内首个请求时创建记录）
    ///
    /// 返回 Some(加一后的计数)；已达上限返回 None，且不修改计数
    async fn try_increment(
        &self,
        key: &CounterKey,
        max: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, StoreError>;

    /// 当前窗口计数，不存在时为 0
    async fn current_count(&self, key: &CounterKey) -> Result<u32, StoreError>;

    /// 删除窗口起点早于 cutoff 的记录
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// 自 since 以来有请求的记录，按作用域汇总
    async fn statistics(&self, since: DateTime<Utc>) -> Result<Vec<CounterStats>, StoreError>;
}

#[derive(Debug, Clone, Copy)]
struct CounterRow {
    count: u32,
    last_request_at: DateTime<Utc>,
}

/// 进程内计数存储
///
/// DashMap 的 entry 在分片写锁下完成检查与加一
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<CounterKey, CounterRow>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn try_increment(
        &self,
        key: &CounterKey,
        max: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, StoreError> {
        let mut row = self.counters.entry(key.clone()).or_insert(CounterRow {
            count: 0,
            last_request_at: now,
        });

        if row.count >= max {
            return Ok(None);
        }

        row.count += 1;
        row.last_request_at = now;
        Ok(Some(row.count))
    }

    async fn current_count(&self, key: &CounterKey) -> Result<u32, StoreError> {
        Ok(self.counters.get(key).map(|row| row.count).unwrap_or(0))
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.counters.len();
        self.counters.retain(|key, _| key.window_start >= cutoff);
        Ok(before.saturating_sub(self.counters.len()) as u64)
    }

    async fn statistics(&self, since: DateTime<Utc>) -> Result<Vec<CounterStats>, StoreError> {
        let mut totals: HashMap<String, (i64, HashSet<String>)> = HashMap::new();

        for entry in self.counters.iter() {
            if entry.value().last_request_at <= since || entry.value().count == 0 {
                continue;
            }
            let slot = totals.entry(entry.key().scope.clone()).or_default();
            slot.0 += entry.value().count as i64;
            slot.1.insert(entry.key().identifier.clone());
        }

        let mut stats: Vec<CounterStats> = totals
            .into_iter()
            .map(|(scope, (total_requests, ids))| CounterStats {
                scope,
                total_requests,
                unique_identifiers: ids.len() as i64,
            })
            .collect();
        stats.sort_by(|a, b| b.total_requests.cmp(&a.total_requests).then(a.scope.cmp(&b.scope)));
        Ok(stats)
    }
}
