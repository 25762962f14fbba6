//! KuCoin REST client
//!
//! KuCoin has no bulk ticker endpoint here, so each base symbol gets its own
//! level-1 order-book request. Requests fan out with bounded concurrency and
//! their results are merged into one map for the cycle.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;

use super::http_client;
use crate::oracle::{parse_price, ExchangeClient, PriceBatch};
use crate::types::{Exchange, ExchangeTicker};

pub const KUCOIN_REST_URL: &str = "https://api.kucoin.com";

#[derive(Debug, Clone, Deserialize)]
struct Level1Response {
    data: Option<Level1Data>,
}

#[derive(Debug, Clone, Deserialize)]
struct Level1Data {
    price: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KucoinClient {
    http: reqwest::Client,
    base_url: String,
    max_concurrency: usize,
}

impl KucoinClient {
    pub fn new(base_url: &str, timeout: Duration, max_concurrency: usize) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_concurrency: max_concurrency.max(1),
        })
    }

    async fn fetch_one(&self, base: &str) -> Result<ExchangeTicker> {
        let url = format!(
            "{}/api/v1/market/orderbook/level1?symbol={}-USDT",
            self.base_url, base
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", base))?;

        if !response.status().is_success() {
            bail!("failed to retrieve price for {}: HTTP {}", base, response.status());
        }

        let body: Level1Response = response
            .json()
            .await
            .with_context(|| format!("failed to decode response for {}", base))?;

        let raw = body
            .data
            .and_then(|d| d.price)
            .with_context(|| format!("no price in response for {}", base))?;

        Ok(ExchangeTicker {
            symbol: pair_symbol(base),
            price: parse_price(&raw)?,
        })
    }
}

/// Cache symbol for a KuCoin base asset (`BTC` -> `BTCUSDT`)
fn pair_symbol(base: &str) -> String {
    format!("{}USDT", base.to_uppercase())
}

#[async_trait]
impl ExchangeClient for KucoinClient {
    fn exchange(&self) -> Exchange {
        Exchange::Kucoin
    }

    fn requires_symbols(&self) -> bool {
        true
    }

    async fn spot_price(&self, base: &str) -> Result<f64> {
        Ok(self.fetch_one(base).await?.price)
    }

    async fn fetch_prices(&self, symbols: &[String]) -> Result<PriceBatch> {
        if symbols.is_empty() {
            bail!("No symbols configured for KuCoin");
        }

        // Shared only for the duration of this cycle
        let batch = Mutex::new(PriceBatch::default());

        stream::iter(symbols)
            .for_each_concurrent(self.max_concurrency, |base| {
                let batch = &batch;
                async move {
                    let result = self.fetch_one(base).await;
                    let mut batch = batch.lock().await;
                    match result {
                        Ok(ticker) => batch.insert(ticker),
                        Err(e) => batch.skip(pair_symbol(base), format!("{:#}", e)),
                    }
                }
            })
            .await;

        let batch = batch.into_inner();
        if batch.is_empty() {
            let first = batch
                .skipped
                .first()
                .map(|s| s.reason.clone())
                .unwrap_or_default();
            bail!(
                "all {} KuCoin requests failed, first error: {}",
                symbols.len(),
                first
            );
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_symbol_appends_usdt() {
        assert_eq!(pair_symbol("btc"), "BTCUSDT");
        assert_eq!(pair_symbol("PEPE"), "PEPEUSDT");
    }

    #[test]
    fn level1_without_data_decodes() {
        let body: Level1Response =
            serde_json::from_str(r#"{"code":"200000","data":null}"#).unwrap();
        assert!(body.data.is_none());

        let body: Level1Response =
            serde_json::from_str(r#"{"code":"200000","data":{"price":"3.21","size":"1"}}"#)
                .unwrap();
        assert_eq!(body.data.unwrap().price.as_deref(), Some("3.21"));
    }

    #[tokio::test]
    async fn empty_symbol_list_is_an_error() {
        let client = KucoinClient::new("http://127.0.0.1:9", Duration::from_secs(1), 4).unwrap();
        assert!(client.fetch_prices(&[]).await.is_err());
    }
}
