//! Price resolution
//!
//! Answers a price query from the tiered cache. USDT quotes are a direct
//! read; IRR/IRT quotes go through the cached fiat rate of the requested
//! provider. Resolution never retries and never touches an exchange.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::cache::TieredCache;
use crate::clock::Clock;
use crate::config::ResolverConfig;
use crate::error::PriceError;
use crate::types::{Exchange, FiatRateSource, PriceQuote, QuoteCurrency};

pub const STALE_NOTE: &str = "Price may be outdated.";

const MAX_BASE_LEN: usize = 10;

/// Bases that are worth exactly one USDT for conversion purposes
const STABLECOINS: [&str; 2] = ["USDT", "USDC"];

/// Validated price query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRequest {
    /// Upper-cased base asset
    pub base: String,
    pub source: Exchange,
    pub quote: QuoteCurrency,
    pub fiat_source: FiatRateSource,
}

impl PriceRequest {
    /// Validate raw query parameters, filling in defaults for the optional ones
    pub fn parse(
        base: Option<&str>,
        source: Option<&str>,
        quote: Option<&str>,
        fiat_source: Option<&str>,
        defaults: &ResolverConfig,
    ) -> Result<Self, PriceError> {
        let base = base
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| PriceError::validation("base", "missing"))?;
        validate_base(base)?;

        let source = match non_empty(source) {
            Some(s) => s
                .parse::<Exchange>()
                .map_err(|e| PriceError::validation("source", e))?,
            None => defaults.default_source,
        };

        let quote = match non_empty(quote) {
            Some(q) => q
                .parse::<QuoteCurrency>()
                .map_err(|e| PriceError::validation("quote", e))?,
            None => QuoteCurrency::Usdt,
        };

        let fiat_source = match non_empty(fiat_source) {
            Some(f) => f
                .parse::<FiatRateSource>()
                .map_err(|e| PriceError::validation("fiatRateSource", e))?,
            None => defaults.default_fiat_source,
        };

        Ok(Self {
            base: base.to_uppercase(),
            source,
            quote,
            fiat_source,
        })
    }

    /// Pair symbol the answer is reported under, e.g. `BTCIRR`
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn validate_base(base: &str) -> Result<(), PriceError> {
    if base.len() > MAX_BASE_LEN {
        return Err(PriceError::validation(
            "base",
            format!("longer than {} characters", MAX_BASE_LEN),
        ));
    }
    if !base.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(PriceError::validation(
            "base",
            "only letters, digits and '_' are allowed",
        ));
    }
    Ok(())
}

pub struct PriceResolver {
    cache: Arc<TieredCache>,
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
}

impl PriceResolver {
    pub fn new(cache: Arc<TieredCache>, clock: Arc<dyn Clock>, config: ResolverConfig) -> Self {
        Self {
            cache,
            clock,
            config,
        }
    }

    pub fn defaults(&self) -> &ResolverConfig {
        &self.config
    }

    pub async fn resolve(&self, request: &PriceRequest) -> Result<PriceQuote, PriceError> {
        let (price, written_at, source) = if request.quote.is_fiat() {
            self.resolve_fiat(request).await?
        } else {
            let cached = self
                .cache
                .read(request.source.cache_prefix(), &usdt_symbol(&request.base))
                .await?;
            (
                cached.price,
                cached.written_at,
                request.source.cache_prefix().to_string(),
            )
        };

        if !price.is_finite() || price <= 0.0 {
            tracing::warn!(
                symbol = %request.symbol(),
                source = %source,
                price,
                "Rejecting non-positive price"
            );
            return Err(PriceError::InvalidPrice {
                symbol: request.symbol(),
                provider: source,
                reason: format!("computed price {} is not positive", price),
            });
        }

        let elapsed = elapsed_secs(self.clock.now(), written_at);
        let note = (elapsed > self.config.stale_after_secs as f64).then(|| STALE_NOTE.to_string());

        Ok(PriceQuote {
            symbol: request.symbol(),
            source,
            price,
            quote: request.quote,
            elapsed,
            note,
            timestamp: Some(written_at),
        })
    }

    /// Price in IRR/IRT. Stablecoins are the rate itself, timed "now";
    /// anything else carries the base price's write time.
    async fn resolve_fiat(
        &self,
        request: &PriceRequest,
    ) -> Result<(f64, DateTime<Utc>, String), PriceError> {
        let rate = self.cache.read_rate(request.fiat_source.as_str()).await?;

        if STABLECOINS.contains(&request.base.as_str()) {
            return Ok((
                rate.weighted_mean,
                self.clock.now(),
                request.fiat_source.as_str().to_string(),
            ));
        }

        let cached = self
            .cache
            .read(request.source.cache_prefix(), &usdt_symbol(&request.base))
            .await?;

        Ok((
            cached.price * rate.weighted_mean,
            cached.written_at,
            request.source.cache_prefix().to_string(),
        ))
    }
}

fn usdt_symbol(base: &str) -> String {
    format!("{}USDT", base)
}

fn elapsed_secs(now: DateTime<Utc>, written_at: DateTime<Utc>) -> f64 {
    let millis = (now - written_at).num_milliseconds().max(0);
    millis as f64 / 1000.0
}
