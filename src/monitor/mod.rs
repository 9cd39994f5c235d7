//! 性能监控模块
//! 请求级采样、批量写入、阈值告警、聚合汇总与运维报表

pub mod aggregate;
pub mod alerts;
pub mod model;
pub mod query;
pub mod report;
pub mod request;
pub mod service;
pub mod store;

pub use alerts::{AggregateSnapshot, AlertThrottle};
pub use model::{
    Alert, AlertLevel, HourlySummary, MetricSample, MetricSummary, MetricType, NewAlert, Tags, TimeRange,
};
pub use request::{RequestMonitor, TimerId};
pub use service::{CleanupReport, MemorySnapshot, PerformanceMonitor, PerformanceSummary};
pub use store::{MemoryMetricStore, MetricStore, MinuteAverage, SampleOrder, SampleQuery};
