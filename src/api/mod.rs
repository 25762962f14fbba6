//! HTTP API
//!
//! Price queries, recent candles and health probes.

pub mod types;

pub use types::{ApiResponse, CandleParams, PriceParams};

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::PriceError;
use crate::health::{HealthChecker, HealthStatus};
use crate::oracle::BinanceClient;
use crate::resolver::{PriceRequest, PriceResolver};
use crate::types::{Candle, PriceQuote};

const DEFAULT_CANDLE_LIMIT: usize = 60;
const MAX_CANDLE_LIMIT: usize = 1000;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<PriceResolver>,
    pub health: Arc<HealthChecker>,
    /// Candle source; `None` when Binance is disabled
    pub binance: Option<Arc<BinanceClient>>,
}

/// Create the API router
pub fn create_router(state: AppState, cors_permissive: bool) -> Router {
    let router = Router::new()
        .route("/price", get(get_price))
        .route("/candles", get(get_candles))
        .route("/health", get(get_health))
        .route("/health/live", get(get_liveness))
        .route("/health/ready", get(get_readiness))
        .with_state(state);

    if cors_permissive {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    }
}

fn error_status(err: &PriceError) -> StatusCode {
    match err {
        PriceError::Validation { .. } => StatusCode::BAD_REQUEST,
        PriceError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PriceError::NotAvailable { .. }
        | PriceError::InvalidRate { .. }
        | PriceError::InvalidPrice { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response<T: serde::Serialize>(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<T>::error(msg))).into_response()
}

/// Malformed query strings get the same envelope as every other error
fn rejection_response<T: serde::Serialize>(rejection: QueryRejection) -> Response {
    tracing::debug!(error = %rejection.body_text(), "Rejected query string");
    error_response::<T>(rejection.status(), rejection.body_text())
}

// ─────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────

/// GET /price
async fn get_price(
    State(state): State<AppState>,
    params: Result<Query<PriceParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return rejection_response::<PriceQuote>(rejection),
    };

    let request = match PriceRequest::parse(
        params.base.as_deref(),
        params.source.as_deref(),
        params.quote.as_deref(),
        params.fiat_rate_source.as_deref(),
        state.resolver.defaults(),
    ) {
        Ok(request) => request,
        Err(e) => return error_response::<PriceQuote>(error_status(&e), e.to_string()),
    };

    match state.resolver.resolve(&request).await {
        Ok(quote) => Json(ApiResponse::success(quote)).into_response(),
        Err(e) => {
            tracing::warn!(
                base = %request.base,
                source = %request.source.cache_prefix(),
                quote = %request.quote,
                fiat_source = %request.fiat_source,
                error = %e,
                "Price query failed"
            );
            let msg = format!(
                "{} (base={}, source={}, quote={}, fiatRateSource={})",
                e,
                request.base,
                request.source.cache_prefix(),
                request.quote,
                request.fiat_source
            );
            error_response::<PriceQuote>(error_status(&e), msg)
        }
    }
}

/// GET /candles
async fn get_candles(
    State(state): State<AppState>,
    params: Result<Query<CandleParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return rejection_response::<Vec<Candle>>(rejection),
    };

    let Some(binance) = state.binance.as_ref() else {
        return error_response::<Vec<Candle>>(StatusCode::SERVICE_UNAVAILABLE, "candles are not enabled");
    };

    let symbol = match params.symbol.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_uppercase(),
        _ => return error_response::<Vec<Candle>>(StatusCode::BAD_REQUEST, "symbol is required"),
    };

    let limit = params.limit.unwrap_or(DEFAULT_CANDLE_LIMIT);
    if limit == 0 || limit > MAX_CANDLE_LIMIT {
        return error_response::<Vec<Candle>>(
            StatusCode::BAD_REQUEST,
            format!("limit must be between 1 and {}", MAX_CANDLE_LIMIT),
        );
    }

    match binance.fetch_recent_candles(&symbol, limit).await {
        Ok(candles) => Json(ApiResponse::success(candles)).into_response(),
        Err(e) => {
            tracing::warn!(symbol = %symbol, error = %format!("{:#}", e), "Candle fetch failed");
            error_response::<Vec<Candle>>(StatusCode::BAD_GATEWAY, format!("{:#}", e))
        }
    }
}

/// GET /health - Full component report
async fn get_health(State(state): State<AppState>) -> Response {
    let report = state.health.report().await;
    let status = if report.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report)).into_response()
}

/// GET /health/live
async fn get_liveness(State(state): State<AppState>) -> Response {
    Json(state.health.liveness()).into_response()
}

/// GET /health/ready
async fn get_readiness(State(state): State<AppState>) -> Response {
    let readiness = state.health.readiness().await;
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness)).into_response()
}

/// Serve the API until `shutdown` is cancelled
pub async fn start_server(
    state: AppState,
    port: u16,
    cors_permissive: bool,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state, cors_permissive);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("HTTP API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("HTTP API stopped");
    Ok(())
}
