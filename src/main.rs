//! PurePrice service
//!
//! Wires the cache, trade store, exchange clients, ingestion scheduler and
//! HTTP API together, then runs until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pureprice::api::{self, AppState};
use pureprice::cache::{CacheBackend, MemoryBackend, RedisBackend, TieredCache};
use pureprice::clock::{Clock, SystemClock};
use pureprice::config::{AppConfig, CacheBackendKind, LoggingConfig};
use pureprice::health::HealthChecker;
use pureprice::oracle::{BinanceClient, ExchangeClient, KucoinClient};
use pureprice::rates::{FiatRateAggregator, MongoTradeStore, TradeStore};
use pureprice::resolver::PriceResolver;
use pureprice::scheduler::IngestionScheduler;
use pureprice::types::Exchange;

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pureprice={0},{0}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting PurePrice");
    info!(config = %config, "Configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let backend: Arc<dyn CacheBackend> = match config.cache.backend {
        CacheBackendKind::Redis => Arc::new(
            RedisBackend::new(&config.cache.redis_url).context("Invalid Redis URL")?,
        ),
        CacheBackendKind::Memory => Arc::new(MemoryBackend::new(clock.clone())),
    };
    let cache = Arc::new(TieredCache::new(
        backend,
        clock.clone(),
        config.cache.ttls(),
        config.cache.op_timeout(),
    ));

    let store: Arc<dyn TradeStore> = Arc::new(MongoTradeStore::new(config.store.clone()));

    // Exchange clients
    let mut exchanges: Vec<Arc<dyn ExchangeClient>> = Vec::new();
    let mut binance = None;

    if config.exchanges.binance_enabled {
        let client = Arc::new(BinanceClient::new(
            &config.exchanges.binance_url,
            Duration::from_millis(config.exchanges.binance_timeout_ms),
        )?);
        binance = Some(client.clone());
        exchanges.push(client);
    }

    if config.exchanges.kucoin_enabled {
        exchanges.push(Arc::new(KucoinClient::new(
            &config.exchanges.kucoin_url,
            Duration::from_millis(config.exchanges.kucoin_timeout_ms),
            config.exchanges.max_concurrency,
        )?));
    }

    // Scheduler
    let mut scheduler = IngestionScheduler::new(
        cache.clone(),
        clock.clone(),
        store.clone(),
        config.exchanges.cycle_timeout(),
    );
    for client in &exchanges {
        let exchange = client.exchange();
        let symbols = match exchange {
            Exchange::Kucoin => config.exchanges.kucoin_symbols.clone(),
            Exchange::Binance => Vec::new(),
        };
        scheduler = scheduler.with_exchange(client.clone(), config.exchanges.interval(exchange), symbols);
    }
    if config.rates.enabled {
        let aggregator = Arc::new(FiatRateAggregator::new(store.clone(), config.rates.clone()));
        scheduler = scheduler.with_fiat_rates(aggregator, Duration::from_secs(config.rates.interval_secs));
    }

    let shutdown = CancellationToken::new();
    let scheduler_handle = Arc::new(scheduler).start(&shutdown);

    // HTTP API
    let state = AppState {
        resolver: Arc::new(PriceResolver::new(
            cache.clone(),
            clock.clone(),
            config.resolver.clone(),
        )),
        health: Arc::new(HealthChecker::new(cache, store, exchanges)),
        binance,
    };
    let mut server = tokio::spawn(api::start_server(
        state,
        config.server.port,
        config.server.cors_permissive,
        shutdown.clone(),
    ));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutdown signal received");
        }
        result = &mut server => {
            match result {
                Ok(Ok(())) => info!("HTTP API exited"),
                Ok(Err(e)) => error!(error = %format!("{:#}", e), "HTTP API failed"),
                Err(e) => error!(error = %e, "HTTP API task panicked"),
            }
        }
    }

    shutdown.cancel();
    scheduler_handle.shutdown().await;
    if !server.is_finished() {
        if let Err(e) = server.await {
            error!(error = %e, "HTTP API task ended abnormally");
        }
    }

    info!("PurePrice stopped");
    Ok(())
}
