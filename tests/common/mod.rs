//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pureprice::cache::{CacheTtls, MemoryBackend, TieredCache};
use pureprice::clock::Clock;
use pureprice::config::{RatesConfig, ResolverConfig};
use pureprice::rates::{TradeQuery, TradeStore};
use pureprice::types::{Exchange, FiatRateSource, MarketTrade};

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn memory_cache(clock: Arc<dyn Clock>) -> Arc<TieredCache> {
    Arc::new(TieredCache::new(
        Arc::new(MemoryBackend::new(clock.clone())),
        clock,
        CacheTtls::default(),
        Duration::from_secs(1),
    ))
}

pub fn resolver_config() -> ResolverConfig {
    ResolverConfig {
        default_source: Exchange::Binance,
        default_fiat_source: FiatRateSource::Nobitex,
        stale_after_secs: 20,
    }
}

pub fn rates_config() -> RatesConfig {
    RatesConfig {
        enabled: true,
        interval_secs: 120,
        window_minutes: 30,
        min_amount: 50.0,
        limit: 100,
        source_timeout_ms: 5000,
    }
}

/// Trade store returning the same trades for every source
pub struct FixedTradeStore {
    pub trades: Vec<MarketTrade>,
    pub symbols: Vec<String>,
    pub queries: AtomicUsize,
}

impl FixedTradeStore {
    pub fn new(trades: Vec<MarketTrade>) -> Self {
        Self {
            trades,
            symbols: Vec::new(),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TradeStore for FixedTradeStore {
    async fn recent_trades(&self, _query: &TradeQuery) -> anyhow::Result<Vec<MarketTrade>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.trades.clone())
    }

    async fn exchange_symbols(&self, _exchange: Exchange) -> anyhow::Result<Vec<String>> {
        Ok(self.symbols.clone())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
