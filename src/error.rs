//! Error taxonomy for the cache and price-resolution path

use thiserror::Error;

/// Errors surfaced by the tiered cache and the price resolver
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PriceError {
    #[error("invalid parameter '{param}': {reason}")]
    Validation { param: &'static str, reason: String },

    #[error("{what} not available")]
    NotAvailable { what: String },

    #[error("invalid fiat rate from {provider}: weighted mean {value}")]
    InvalidRate { provider: String, value: f64 },

    #[error("invalid price for {symbol} from {provider}: {reason}")]
    InvalidPrice {
        symbol: String,
        provider: String,
        reason: String,
    },

    #[error("{service} unavailable: {reason}")]
    UpstreamUnavailable { service: String, reason: String },
}

impl PriceError {
    pub fn validation(param: &'static str, reason: impl Into<String>) -> Self {
        PriceError::Validation {
            param,
            reason: reason.into(),
        }
    }

    pub fn not_available(what: impl Into<String>) -> Self {
        PriceError::NotAvailable { what: what.into() }
    }

    pub fn upstream(service: impl Into<String>, reason: impl ToString) -> Self {
        PriceError::UpstreamUnavailable {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the caller sent a bad request
    pub fn is_client_error(&self) -> bool {
        matches!(self, PriceError::Validation { .. })
    }
}
