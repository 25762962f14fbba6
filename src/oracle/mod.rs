//! Oracle module - Exchange spot-price clients
//!
//! Pulls current USDT prices from Binance (bulk ticker endpoint) and KuCoin
//! (per-symbol level-1 book). Clients do I/O and parsing only; caching and
//! scheduling live elsewhere.

pub mod sources;

pub use sources::{BinanceClient, KucoinClient};

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;

use crate::types::{Exchange, ExchangeTicker};

/// Exchange market-data client
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Whether prices must be requested symbol by symbol
    fn requires_symbols(&self) -> bool {
        false
    }

    /// Fetch current prices.
    ///
    /// `symbols` is only consulted by clients that require it. An `Err`
    /// means nothing usable came back; per-symbol problems are reported in
    /// `PriceBatch::skipped` instead.
    async fn fetch_prices(&self, symbols: &[String]) -> Result<PriceBatch>;

    /// Current USDT price of a single base asset, for health checks
    async fn spot_price(&self, base: &str) -> Result<f64> {
        let pair = format!("{}USDT", base.to_uppercase());
        let batch = self.fetch_prices(&[base.to_string()]).await?;
        batch
            .prices
            .get(&pair)
            .copied()
            .with_context(|| format!("no {} price returned", pair))
    }
}

/// Symbol dropped from a fetch cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: String,
}

/// Result of one fetch cycle against one exchange
#[derive(Debug, Clone, Default)]
pub struct PriceBatch {
    pub prices: HashMap<String, f64>,
    pub skipped: Vec<SkippedSymbol>,
}

impl PriceBatch {
    pub fn insert(&mut self, ticker: ExchangeTicker) {
        self.prices.insert(ticker.symbol, ticker.price);
    }

    pub fn skip(&mut self, symbol: impl Into<String>, reason: impl ToString) {
        self.skipped.push(SkippedSymbol {
            symbol: symbol.into(),
            reason: reason.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }
}

/// Parse a decimal price string, rejecting non-finite and non-positive values
pub(crate) fn parse_price(raw: &str) -> Result<f64> {
    let price: f64 = raw
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("unparseable price '{}': {}", raw, e))?;
    if !price.is_finite() || price <= 0.0 {
        anyhow::bail!("non-positive price {}", price);
    }
    Ok(price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_price_rejects_garbage_and_non_positive() {
        assert_eq!(parse_price("65000.12").unwrap(), 65000.12);
        assert!(parse_price("abc").is_err());
        assert!(parse_price("0").is_err());
        assert!(parse_price("-1.5").is_err());
        assert!(parse_price("NaN").is_err());
    }

    #[test]
    fn batch_tracks_prices_and_skips() {
        let mut batch = PriceBatch::default();
        batch.insert(ExchangeTicker {
            symbol: "BTCUSDT".to_string(),
            price: 1.0,
        });
        batch.skip("ETHUSDT", "bad price");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.skipped[0].symbol, "ETHUSDT");
    }
}
