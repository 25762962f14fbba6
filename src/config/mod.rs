//! Configuration management for PurePrice
//!
//! Built-in defaults, then `config/default.*` and `config/local.*`, then
//! `PUREPRICE__*` environment variables (after loading `.env`).

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::cache::CacheTtls;
use crate::oracle::sources::{BINANCE_REST_URL, KUCOIN_REST_URL};
use crate::types::{Exchange, FiatRateSource};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub exchanges: ExchangesConfig,
    pub rates: RatesConfig,
    pub resolver: ResolverConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    pub port: u16,
    /// Allow any origin on the HTTP API
    pub cors_permissive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// "redis" or "memory"
    pub backend: CacheBackendKind,
    pub redis_url: String,
    /// Deadline for a single cache command
    pub op_timeout_ms: u64,
    pub short_ttl_secs: u64,
    pub long_ttl_secs: u64,
    pub rate_ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            short: Duration::from_secs(self.short_ttl_secs),
            long: Duration::from_secs(self.long_ttl_secs),
            rate: Duration::from_secs(self.rate_ttl_secs),
        }
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub mongo_uri: String,
    /// Database and collection holding the trade log
    pub trade_database: String,
    pub last_trade_collection: String,
    /// Database and collection listing per-exchange symbols
    pub market_database: String,
    pub config_collection: String,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangesConfig {
    pub binance_enabled: bool,
    pub binance_url: String,
    pub binance_interval_secs: u64,
    pub binance_timeout_ms: u64,
    pub kucoin_enabled: bool,
    pub kucoin_url: String,
    pub kucoin_interval_secs: u64,
    pub kucoin_timeout_ms: u64,
    /// Base symbols to poll on KuCoin; empty means "ask the market store"
    pub kucoin_symbols: Vec<String>,
    /// Concurrent requests per fan-out cycle
    pub max_concurrency: usize,
    /// Deadline for one exchange price cycle
    pub cycle_timeout_ms: u64,
}

impl ExchangesConfig {
    pub fn interval(&self, exchange: Exchange) -> Duration {
        Duration::from_secs(match exchange {
            Exchange::Binance => self.binance_interval_secs,
            Exchange::Kucoin => self.kucoin_interval_secs,
        })
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatesConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Trailing trade window in minutes
    pub window_minutes: i64,
    /// Trades at or below this amount are ignored
    pub min_amount: f64,
    /// Maximum trades per source and cycle
    pub limit: i64,
    /// Deadline for one source's trade query
    pub source_timeout_ms: u64,
}

impl RatesConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    pub default_source: Exchange,
    pub default_fiat_source: FiatRateSource,
    /// Age after which a price carries the staleness note
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("PUREPRICE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("exchanges.kucoin_symbols")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        Self::builder()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let empty: Vec<String> = Vec::new();
        Ok(Config::builder()
            // Server
            .set_default("server.port", 8080)?
            .set_default("server.cors_permissive", true)?
            // Cache
            .set_default("cache.backend", "redis")?
            .set_default("cache.redis_url", "redis://127.0.0.1:6379")?
            .set_default("cache.op_timeout_ms", 2000)?
            .set_default("cache.short_ttl_secs", 20)?
            .set_default("cache.long_ttl_secs", 600)?
            .set_default("cache.rate_ttl_secs", 300)?
            // Trade store
            .set_default("store.mongo_uri", "mongodb://127.0.0.1:27017")?
            .set_default("store.trade_database", "trades")?
            .set_default("store.last_trade_collection", "last_trades")?
            .set_default("store.market_database", "markets")?
            .set_default("store.config_collection", "market_config")?
            .set_default("store.max_pool_size", 10)?
            .set_default("store.min_pool_size", 2)?
            .set_default("store.timeout_ms", 10_000)?
            // Exchanges
            .set_default("exchanges.binance_enabled", true)?
            .set_default("exchanges.binance_url", BINANCE_REST_URL)?
            .set_default("exchanges.binance_interval_secs", 15)?
            .set_default("exchanges.binance_timeout_ms", 10_000)?
            .set_default("exchanges.kucoin_enabled", true)?
            .set_default("exchanges.kucoin_url", KUCOIN_REST_URL)?
            .set_default("exchanges.kucoin_interval_secs", 15)?
            .set_default("exchanges.kucoin_timeout_ms", 5000)?
            .set_default("exchanges.kucoin_symbols", empty)?
            .set_default("exchanges.max_concurrency", 16)?
            .set_default("exchanges.cycle_timeout_ms", 12_000)?
            // Fiat rate
            .set_default("rates.enabled", true)?
            .set_default("rates.interval_secs", 120)?
            .set_default("rates.window_minutes", 30)?
            .set_default("rates.min_amount", 50.0)?
            .set_default("rates.limit", 100)?
            .set_default("rates.source_timeout_ms", 10_000)?
            // Resolver
            .set_default("resolver.default_source", "binance")?
            .set_default("resolver.default_fiat_source", "nobitex")?
            .set_default("resolver.stale_after_secs", 20)?
            // Logging
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?)
    }

    /// Reject settings that would break the cache protocol
    pub fn validate(&self) -> Result<()> {
        if self.cache.short_ttl_secs == 0 || self.cache.long_ttl_secs == 0 {
            bail!("cache TTLs must be positive");
        }
        if self.cache.short_ttl_secs >= self.cache.long_ttl_secs {
            bail!(
                "cache.short_ttl_secs ({}) must be below cache.long_ttl_secs ({})",
                self.cache.short_ttl_secs,
                self.cache.long_ttl_secs
            );
        }
        if self.exchanges.binance_interval_secs == 0
            || self.exchanges.kucoin_interval_secs == 0
            || self.rates.interval_secs == 0
        {
            bail!("task intervals must be positive");
        }
        if self.exchanges.max_concurrency == 0 {
            bail!("exchanges.max_concurrency must be at least 1");
        }
        if self.rates.source_timeout_ms == 0 {
            bail!("rates.source_timeout_ms must be positive");
        }
        if self.rates.limit <= 0 {
            bail!("rates.limit must be positive");
        }
        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "port={} cache={:?} ttl={}s/{}s binance={} kucoin={} rates={} default_source={} default_fiat={}",
            self.server.port,
            self.cache.backend,
            self.cache.short_ttl_secs,
            self.cache.long_ttl_secs,
            self.exchanges.binance_enabled,
            self.exchanges.kucoin_enabled,
            self.rates.enabled,
            self.resolver.default_source.cache_prefix(),
            self.resolver.default_fiat_source,
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_cache_protocol() {
        let cfg = AppConfig::defaults().unwrap();
        assert_eq!(cfg.cache.short_ttl_secs, 20);
        assert_eq!(cfg.cache.long_ttl_secs, 600);
        assert_eq!(cfg.cache.rate_ttl_secs, 300);
        assert_eq!(cfg.cache.backend, CacheBackendKind::Redis);
        assert_eq!(cfg.exchanges.binance_interval_secs, 15);
        assert_eq!(cfg.rates.interval_secs, 120);
        assert_eq!(cfg.rates.window_minutes, 30);
        assert_eq!(cfg.rates.limit, 100);
        assert_eq!(cfg.rates.source_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.resolver.default_source, Exchange::Binance);
        assert_eq!(cfg.resolver.default_fiat_source, FiatRateSource::Nobitex);
        assert!(cfg.exchanges.kucoin_symbols.is_empty());
        cfg.validate().unwrap();
    }

    #[test]
    fn short_ttl_must_stay_below_long_ttl() {
        let mut cfg = AppConfig::defaults().unwrap();
        cfg.cache.short_ttl_secs = 600;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn digest_has_no_connection_strings() {
        let cfg = AppConfig::defaults().unwrap();
        let digest = cfg.digest();
        assert!(digest.contains("default_source=binance"));
        assert!(!digest.contains("mongodb://"));
        assert!(!digest.contains("redis://"));
    }
}
