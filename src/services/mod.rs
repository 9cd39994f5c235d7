//! Business logic services

pub mod token_service;

pub use token_service::TokenService;
