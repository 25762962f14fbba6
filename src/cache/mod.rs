//! Tiered price cache
//!
//! Every price is written twice: a short-horizon copy (20s by default) that
//! asserts the value is live, and a long-horizon copy (10min) that keeps a
//! usable value around through slow cycles and exchange outages. Each copy
//! has a sibling `:time` key holding the unix write time.
//!
//! Key layout:
//! - `{source}:{symbol}:short`, `{source}:{symbol}:short:time`
//! - `{source}:{symbol}:long`, `{source}:{symbol}:long:time`
//! - `usdtirr:{source}` (JSON `MarketSourceResult`)

mod memory;
mod redis_backend;

pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::PriceError;
use crate::types::MarketSourceResult;

/// Key-value store with per-key TTL and atomic multi-key writes
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Value of a key, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>, PriceError>;

    /// Set every entry in one transaction; all land or none do
    async fn set_atomic(&self, entries: &[CacheEntry]) -> Result<(), PriceError>;

    async fn ping(&self) -> Result<(), PriceError>;
}

/// A key to set with its own expiry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }
}

/// Cache horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Short,
    Long,
}

impl Tier {
    fn other(self) -> Tier {
        match self {
            Tier::Short => Tier::Long,
            Tier::Long => Tier::Short,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Short => write!(f, "short"),
            Tier::Long => write!(f, "long"),
        }
    }
}

/// Expiry of each key family
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub short: Duration,
    pub long: Duration,
    pub rate: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(20),
            long: Duration::from_secs(600),
            rate: Duration::from_secs(300),
        }
    }
}

/// Price read back from the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPrice {
    pub price: f64,
    pub written_at: DateTime<Utc>,
    /// Tier the price itself came from
    pub tier: Tier,
}

pub fn price_key(source: &str, symbol: &str, tier: Tier) -> String {
    format!("{}:{}:{}", source, symbol, tier)
}

pub fn time_key(source: &str, symbol: &str, tier: Tier) -> String {
    format!("{}:{}:{}:time", source, symbol, tier)
}

pub fn rate_key(source: &str) -> String {
    format!("usdtirr:{}", source)
}

/// Two-horizon cache protocol on top of a `CacheBackend`
pub struct TieredCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    ttls: CacheTtls,
    op_timeout: Duration,
}

impl TieredCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
        ttls: CacheTtls,
        op_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            clock,
            ttls,
            op_timeout,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Write one price into both tiers
    pub async fn write(
        &self,
        source: &str,
        symbol: &str,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<(), PriceError> {
        let mut entries = Vec::with_capacity(4);
        self.push_price_entries(&mut entries, source, symbol, price, now);
        self.with_timeout(self.backend.set_atomic(&entries)).await
    }

    /// Write a whole fetch cycle for one source as a single transaction.
    ///
    /// Returns the number of symbols written.
    pub async fn write_batch(
        &self,
        source: &str,
        prices: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Result<usize, PriceError> {
        let mut entries = Vec::with_capacity(prices.len() * 4);
        for (symbol, price) in prices {
            self.push_price_entries(&mut entries, source, symbol, *price, now);
        }
        self.with_timeout(self.backend.set_atomic(&entries)).await?;
        Ok(prices.len())
    }

    fn push_price_entries(
        &self,
        entries: &mut Vec<CacheEntry>,
        source: &str,
        symbol: &str,
        price: f64,
        now: DateTime<Utc>,
    ) {
        let price = price.to_string();
        let ts = now.timestamp().to_string();
        for (tier, ttl) in [(Tier::Short, self.ttls.short), (Tier::Long, self.ttls.long)] {
            entries.push(CacheEntry::new(
                price_key(source, symbol, tier),
                price.clone(),
                ttl,
            ));
            entries.push(CacheEntry::new(
                time_key(source, symbol, tier),
                ts.clone(),
                ttl,
            ));
        }
    }

    /// Read a price, preferring the short tier.
    ///
    /// The write time comes from the hit tier's time key, then the other
    /// tier's, and is taken as "now" when both time keys are gone.
    pub async fn read(&self, source: &str, symbol: &str) -> Result<CachedPrice, PriceError> {
        let mut hit = None;
        for tier in [Tier::Short, Tier::Long] {
            let key = price_key(source, symbol, tier);
            if let Some(raw) = self.with_timeout(self.backend.get(&key)).await? {
                hit = Some((tier, raw));
                break;
            }
        }

        let (tier, raw) = hit.ok_or_else(|| {
            PriceError::not_available(format!("price for {} from {}", symbol, source))
        })?;

        let price: f64 = raw.trim().parse().map_err(|_| PriceError::InvalidPrice {
            symbol: symbol.to_string(),
            provider: source.to_string(),
            reason: format!("unparseable cached value '{}'", raw),
        })?;

        let written_at = match self.read_time(source, symbol, tier).await? {
            Some(ts) => ts,
            None => match self.read_time(source, symbol, tier.other()).await? {
                Some(ts) => ts,
                None => {
                    tracing::debug!(
                        source = %source,
                        symbol = %symbol,
                        tier = %tier,
                        "Time keys missing, treating price as freshly written"
                    );
                    self.clock.now()
                }
            },
        };

        Ok(CachedPrice {
            price,
            written_at,
            tier,
        })
    }

    async fn read_time(
        &self,
        source: &str,
        symbol: &str,
        tier: Tier,
    ) -> Result<Option<DateTime<Utc>>, PriceError> {
        let raw = self
            .with_timeout(self.backend.get(&time_key(source, symbol, tier)))
            .await?;

        Ok(raw
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
    }

    /// Store a fiat rate, replacing any previous value
    pub async fn write_rate(&self, result: &MarketSourceResult) -> Result<(), PriceError> {
        let value = serde_json::to_string(result).map_err(|e| {
            tracing::warn!(source = %result.source, error = %e, "Failed to serialize fiat rate");
            PriceError::InvalidRate {
                provider: result.source.clone(),
                value: result.weighted_mean,
            }
        })?;

        let entry = CacheEntry::new(rate_key(&result.source), value, self.ttls.rate);
        self.with_timeout(self.backend.set_atomic(std::slice::from_ref(&entry)))
            .await
    }

    pub async fn read_rate(&self, source: &str) -> Result<MarketSourceResult, PriceError> {
        let raw = self
            .with_timeout(self.backend.get(&rate_key(source)))
            .await?
            .ok_or_else(|| PriceError::not_available(format!("fiat rate from {}", source)))?;

        let result: MarketSourceResult = serde_json::from_str(&raw).map_err(|e| {
            tracing::warn!(source = %source, error = %e, "Cached fiat rate is not decodable");
            PriceError::not_available(format!("fiat rate from {}", source))
        })?;

        if !(result.weighted_mean.is_finite() && result.weighted_mean > 0.0) {
            return Err(PriceError::InvalidRate {
                provider: source.to_string(),
                value: result.weighted_mean,
            });
        }

        Ok(result)
    }

    pub async fn ping(&self) -> Result<(), PriceError> {
        self.with_timeout(self.backend.ping()).await
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, PriceError>>,
    ) -> Result<T, PriceError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PriceError::upstream(
                self.backend.name(),
                format!("timed out after {}ms", self.op_timeout.as_millis()),
            )),
        }
    }
}
