//! 学习平台访问防护库
//! 限流、令牌黑名单与性能监控

pub mod auth;
pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod monitor;
pub mod ratelimit;
pub mod repository;
pub mod routes;
pub mod services;
pub mod store;
pub mod telemetry;
