//! Database repository layer

pub mod blacklist_repo;
pub mod metrics_repo;
pub mod rate_limit_repo;

pub use blacklist_repo::PgTokenBlacklist;
pub use metrics_repo::PgMetricStore;
pub use rate_limit_repo::PgCounterStore;
