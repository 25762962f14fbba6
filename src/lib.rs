//! PurePrice Library
//!
//! Crypto price cache with tiered staleness and USDT to IRR/IRT conversion

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod oracle;
pub mod rates;
pub mod resolver;
pub mod scheduler;
pub mod types;
