//! Exchange client implementations (Binance, KuCoin)

mod binance;
mod kucoin;

pub use binance::{BinanceClient, BINANCE_REST_URL};
pub use kucoin::{KucoinClient, KUCOIN_REST_URL};

use anyhow::{Context, Result};
use std::time::Duration;

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}
