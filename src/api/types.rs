//! Request and response shapes of the HTTP API

use serde::{Deserialize, Serialize};

/// Uniform response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// GET /price?base=BTC&source=binance&quote=IRR&fiatRateSource=nobitex
#[derive(Debug, Default, Deserialize)]
pub struct PriceParams {
    #[serde(alias = "symbol")]
    pub base: Option<String>,
    pub source: Option<String>,
    pub quote: Option<String>,
    #[serde(rename = "fiatRateSource")]
    pub fiat_rate_source: Option<String>,
}

/// GET /candles?symbol=BTCUSDT&limit=60
#[derive(Debug, Deserialize)]
pub struct CandleParams {
    pub symbol: Option<String>,
    pub limit: Option<usize>,
}
