//! Ingestion scheduler end to end: local exchange stand-ins, in-memory cache

mod common;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{memory_cache, rates_config, resolver_config, spawn_server, FixedTradeStore};
use pureprice::clock::{Clock, ManualClock, SystemClock};
use pureprice::oracle::{BinanceClient, KucoinClient};
use pureprice::rates::FiatRateAggregator;
use pureprice::resolver::{PriceRequest, PriceResolver, STALE_NOTE};
use pureprice::scheduler::IngestionScheduler;
use pureprice::types::MarketTrade;

async fn failing_binance() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/api/v3/ticker/price",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::INTERNAL_SERVER_ERROR
            }),
        )
        .with_state(hits.clone());
    (spawn_server(router).await, hits)
}

async fn healthy_kucoin() -> String {
    let router = Router::new().route(
        "/api/v1/market/orderbook/level1",
        get(|| async { Json(json!({"code": "200000", "data": {"price": "150.5"}})) }),
    );
    spawn_server(router).await
}

fn usdt_trades() -> Vec<MarketTrade> {
    vec![
        MarketTrade {
            price: 60000.0,
            amount: 100.0,
        },
        MarketTrade {
            price: 61000.0,
            amount: 300.0,
        },
    ]
}

// ============================================================================
// Task isolation
// ============================================================================

#[tokio::test]
async fn test_http_500_exchange_does_not_block_rate_or_other_ticks() {
    let (binance_url, binance_hits) = failing_binance().await;
    let kucoin_url = healthy_kucoin().await;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = memory_cache(clock.clone());
    let store = Arc::new(FixedTradeStore::new(usdt_trades()));
    let aggregator = Arc::new(FiatRateAggregator::new(store.clone(), rates_config()));

    let scheduler = IngestionScheduler::new(cache.clone(), clock, store.clone(), Duration::from_secs(2))
        .with_exchange(
            Arc::new(BinanceClient::new(&binance_url, Duration::from_secs(1)).unwrap()),
            Duration::from_millis(150),
            Vec::new(),
        )
        .with_exchange(
            Arc::new(KucoinClient::new(&kucoin_url, Duration::from_secs(1), 4).unwrap()),
            Duration::from_millis(150),
            vec!["SOL".to_string()],
        )
        .with_fiat_rates(aggregator, Duration::from_millis(150));

    let shutdown = CancellationToken::new();
    let handle = Arc::new(scheduler).start(&shutdown);

    tokio::time::sleep(Duration::from_millis(700)).await;
    handle.shutdown().await;

    // Every Binance tick still ran after the first one failed
    assert!(binance_hits.load(Ordering::SeqCst) >= 3);
    // The rate task ran several times alongside the failing exchange
    assert!(store.query_count() >= 8);

    let rate = cache.read_rate("nobitex").await.unwrap();
    assert!((rate.weighted_mean - 60750.0).abs() < 1e-9);
    assert_eq!(rate.sum_amounts, 400.0);
    assert_eq!(cache.read("kucoin", "SOLUSDT").await.unwrap().price, 150.5);
    assert!(cache.read("binance", "BTCUSDT").await.is_err());
}

// ============================================================================
// Outage tolerance
// ============================================================================

#[tokio::test]
async fn test_failed_cycles_keep_serving_last_price_with_note() {
    let (binance_url, _) = failing_binance().await;

    let manual = Arc::new(ManualClock::at_unix(1_700_000_000));
    let clock: Arc<dyn Clock> = manual.clone();
    let cache = memory_cache(clock.clone());
    cache
        .write("binance", "BTCUSDT", 64000.0, clock.now())
        .await
        .unwrap();

    let scheduler = IngestionScheduler::new(
        cache.clone(),
        clock.clone(),
        Arc::new(FixedTradeStore::new(Vec::new())),
        Duration::from_secs(2),
    )
    .with_exchange(
        Arc::new(BinanceClient::new(&binance_url, Duration::from_secs(1)).unwrap()),
        Duration::from_secs(15),
        Vec::new(),
    );

    for _ in 0..4 {
        manual.advance(Duration::from_secs(15));
        assert!(scheduler.run_price_cycle(&scheduler.price_jobs()[0]).await.is_err());
    }

    let resolver = PriceResolver::new(cache, clock, resolver_config());
    let request = PriceRequest::parse(Some("BTC"), None, None, None, &resolver_config()).unwrap();
    let quote = resolver.resolve(&request).await.unwrap();

    assert_eq!(quote.price, 64000.0);
    assert_eq!(quote.elapsed, 60.0);
    assert_eq!(quote.note.as_deref(), Some(STALE_NOTE));
}

#[tokio::test]
async fn test_rate_cycle_skips_sources_without_trades() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_unix(1_700_000_000));
    let cache = memory_cache(clock.clone());
    let store = Arc::new(FixedTradeStore::new(Vec::new()));
    let aggregator = FiatRateAggregator::new(store.clone(), rates_config());

    let scheduler = IngestionScheduler::new(cache.clone(), clock, store, Duration::from_secs(2));
    let published = scheduler.run_rate_cycle(&aggregator).await;

    assert_eq!(published, 0);
    assert!(cache.read_rate("wallex").await.is_err());
}
