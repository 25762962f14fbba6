//! Price queries through the HTTP router after a real ingestion cycle

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::{extract::Query, routing::get, Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use common::{memory_cache, rates_config, resolver_config, spawn_server, FixedTradeStore};
use pureprice::api::{create_router, AppState};
use pureprice::cache::TieredCache;
use pureprice::clock::{Clock, ManualClock};
use pureprice::health::HealthChecker;
use pureprice::oracle::{BinanceClient, ExchangeClient};
use pureprice::rates::FiatRateAggregator;
use pureprice::resolver::PriceResolver;
use pureprice::scheduler::IngestionScheduler;
use pureprice::types::MarketTrade;

struct Service {
    clock: Arc<ManualClock>,
    cache: Arc<TieredCache>,
    scheduler: IngestionScheduler,
    aggregator: FiatRateAggregator,
    router: Router,
}

async fn service() -> Service {
    let exchange = Router::new()
        .route(
            "/api/v3/ticker/price",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                match params.get("symbol") {
                    Some(symbol) => Json(json!({"symbol": symbol, "price": "65000.00"})),
                    None => Json(json!([
                        {"symbol": "BTCUSDT", "price": "65000.00"},
                        {"symbol": "ETHUSDT", "price": "3000.00"}
                    ])),
                }
            }),
        )
        .route(
            "/api/v3/klines",
            get(|| async {
                Json(json!([[1700000000000i64, "1", "2", "0.5", "1.5", "9", 1700000059999i64, "13", 3]]))
            }),
        );
    let url = spawn_server(exchange).await;
    let binance = Arc::new(BinanceClient::new(&url, Duration::from_secs(2)).unwrap());

    let manual = Arc::new(ManualClock::at_unix(1_700_000_000));
    let clock: Arc<dyn Clock> = manual.clone();
    let cache = memory_cache(clock.clone());
    let store = Arc::new(FixedTradeStore::new(vec![MarketTrade {
        price: 60000.0,
        amount: 500.0,
    }]));

    let scheduler = IngestionScheduler::new(cache.clone(), clock.clone(), store.clone(), Duration::from_secs(2))
        .with_exchange(binance.clone(), Duration::from_secs(15), Vec::new());
    let aggregator = FiatRateAggregator::new(store.clone(), rates_config());

    let state = AppState {
        resolver: Arc::new(PriceResolver::new(cache.clone(), clock, resolver_config())),
        health: Arc::new(HealthChecker::new(cache.clone(), store, vec![binance.clone() as Arc<dyn ExchangeClient>])),
        binance: Some(binance),
    };

    Service {
        clock: manual,
        cache,
        scheduler,
        aggregator,
        router: create_router(state, false),
    }
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ============================================================================
// Price queries
// ============================================================================

#[tokio::test]
async fn test_usdt_and_fiat_quotes_after_ingestion() {
    let svc = service().await;
    svc.scheduler
        .run_price_cycle(&svc.scheduler.price_jobs()[0])
        .await
        .unwrap();
    svc.clock.advance(Duration::from_secs(4));
    assert_eq!(svc.scheduler.run_rate_cycle(&svc.aggregator).await, 4);
    svc.clock.advance(Duration::from_secs(1));

    let (status, body) = get_json(&svc.router, "/price?base=BTC&quote=USDT&source=binance").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["price"], 65000.0);
    assert_eq!(body["data"]["elapsed"], 5.0);
    assert!(body["data"].get("note").is_none());

    let (_, body) = get_json(&svc.router, "/price?base=ETH&quote=IRR").await;
    assert_eq!(body["data"]["price"], 3000.0 * 60000.0);
    assert_eq!(body["data"]["elapsed"], 5.0);

    let (_, body) = get_json(&svc.router, "/price?base=usdt&quote=IRR&fiatRateSource=nobitex").await;
    assert_eq!(body["data"]["price"], 60000.0);
    assert_eq!(body["data"]["elapsed"], 0.0);
}

#[tokio::test]
async fn test_stale_price_is_success_with_note() {
    let svc = service().await;
    svc.scheduler
        .run_price_cycle(&svc.scheduler.price_jobs()[0])
        .await
        .unwrap();
    svc.clock.advance(Duration::from_secs(25));

    let (status, body) = get_json(&svc.router, "/price?base=ETH").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["note"], "Price may be outdated.");

    svc.clock.advance(Duration::from_secs(600));
    let (status, body) = get_json(&svc.router, "/price?base=ETH").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_fiat_quote_without_rate_names_the_provider() {
    let svc = service().await;
    svc.cache
        .write("binance", "BTCUSDT", 65000.0, svc.clock.now())
        .await
        .unwrap();

    let (status, body) = get_json(&svc.router, "/price?base=BTC&quote=IRT&fiatRateSource=bitpin").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("bitpin"));
}

// ============================================================================
// Candles and health
// ============================================================================

#[tokio::test]
async fn test_candles_are_proxied_and_validated() {
    let svc = service().await;

    let (status, body) = get_json(&svc.router, "/candles?symbol=btcusdt&limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["close"], 1.5);
    assert_eq!(body["data"][0]["trades"], 3);

    let (status, _) = get_json(&svc.router, "/candles?symbol=BTCUSDT&limit=5000").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(&svc.router, "/candles").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_report_lists_every_component() {
    let svc = service().await;

    let (status, body) = get_json(&svc.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    let names: Vec<_> = body["components"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["cache:memory", "trade_store", "exchange:binance"]);
}
