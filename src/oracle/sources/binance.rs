//! Binance REST client for spot prices and recent candles
//!
//! Price cycles use the bulk `ticker/price` endpoint, so one request covers
//! every listed symbol. Single-asset lookups pass `symbol=` to the same
//! endpoint and get one object back.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::http_client;
use crate::oracle::{parse_price, ExchangeClient, PriceBatch};
use crate::types::{Candle, Exchange, ExchangeTicker};

pub const BINANCE_REST_URL: &str = "https://api.binance.com";
const MAX_CANDLE_LIMIT: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
struct BinanceTicker {
    symbol: String,
    price: String,
}

#[derive(Debug, Clone)]
pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the last `limit` 1-minute klines for `symbol`
    pub async fn fetch_recent_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>> {
        if symbol.is_empty() {
            bail!("symbol cannot be empty");
        }
        if limit == 0 || limit > MAX_CANDLE_LIMIT {
            bail!("limit must be between 1 and {}, got {}", MAX_CANDLE_LIMIT, limit);
        }

        let url = format!(
            "{}/api/v3/klines?symbol={}&interval=1m&limit={}",
            self.base_url, symbol, limit
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to connect to Binance API for symbol {}", symbol))?;

        if !response.status().is_success() {
            bail!(
                "Binance API returned HTTP {} for symbol {}",
                response.status(),
                symbol
            );
        }

        // [[open_time, open, high, low, close, volume, close_time, quote_volume, trades, ...], ...]
        let klines: Vec<Vec<serde_json::Value>> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Binance klines for {}", symbol))?;

        if klines.is_empty() {
            bail!("Binance API returned no candle data for symbol {}", symbol);
        }

        let candles = parse_klines(klines);
        if candles.len() != limit {
            tracing::warn!(
                symbol = %symbol,
                expected = limit,
                got = candles.len(),
                "Fewer candles than requested"
            );
        }

        Ok(candles)
    }
}

fn parse_klines(klines: Vec<Vec<serde_json::Value>>) -> Vec<Candle> {
    klines
        .into_iter()
        .filter_map(|kline| {
            if kline.len() < 7 {
                return None;
            }

            Some(Candle {
                open_time: kline[0].as_i64()?,
                open: kline[1].as_str()?.parse().ok()?,
                high: kline[2].as_str()?.parse().ok()?,
                low: kline[3].as_str()?.parse().ok()?,
                close: kline[4].as_str()?.parse().ok()?,
                volume: kline[5].as_str()?.parse().ok()?,
                close_time: kline[6].as_i64()?,
                trades: kline.get(8).and_then(|t| t.as_u64()).unwrap_or(0),
            })
        })
        .collect()
}

fn collect_tickers(tickers: Vec<BinanceTicker>) -> PriceBatch {
    let mut batch = PriceBatch::default();
    for ticker in tickers {
        if ticker.symbol.is_empty() {
            continue;
        }
        match parse_price(&ticker.price) {
            Ok(price) => batch.insert(ExchangeTicker {
                symbol: ticker.symbol,
                price,
            }),
            Err(e) => batch.skip(ticker.symbol, e),
        }
    }
    batch
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn fetch_prices(&self, _symbols: &[String]) -> Result<PriceBatch> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to connect to Binance API")?;

        if !response.status().is_success() {
            bail!("Binance API returned HTTP {}", response.status());
        }

        let tickers: Vec<BinanceTicker> = response
            .json()
            .await
            .context("Failed to parse JSON response from Binance API")?;

        if tickers.is_empty() {
            bail!("Binance API returned empty ticker list");
        }

        let batch = collect_tickers(tickers);
        if batch.is_empty() {
            bail!("No valid prices found in Binance API response");
        }

        Ok(batch)
    }

    async fn spot_price(&self, base: &str) -> Result<f64> {
        let symbol = format!("{}USDT", base.to_uppercase());
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to connect to Binance API for symbol {}", symbol))?;

        if !response.status().is_success() {
            bail!(
                "Binance API returned HTTP {} for symbol {}",
                response.status(),
                symbol
            );
        }

        let ticker: BinanceTicker = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Binance ticker for {}", symbol))?;

        parse_price(&ticker.price)
    }
}
