//! Fiat conversion rate (USDT -> IRR/IRT)
//!
//! For each local exchange, loads the recent large USDT trades from the
//! trade store and summarises them with amount-weighted statistics.

pub mod statistics;
mod store;

pub use statistics::{compute, TradeStats};
pub use store::{bson_to_f64, MongoTradeStore, TradeQuery, TradeStore};

#[cfg(test)]
pub use store::MockTradeStore;

use anyhow::Context;
use chrono::{Duration, NaiveDateTime};
use std::sync::Arc;

use crate::config::RatesConfig;
use crate::types::{FiatRateSource, MarketSourceResult};

/// Extra shift applied to the window of sources whose trade times are
/// recorded in a different zone upstream
pub const TIMEZONE_OFFSET_MINUTES: i64 = 210;

const TRADE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Start of the trailing trade window for `source`, from local wall time
pub fn window_start(source: FiatRateSource, now_local: NaiveDateTime, window_minutes: i64) -> NaiveDateTime {
    let mut start = now_local - Duration::minutes(window_minutes);
    if source.has_timezone_offset() {
        start -= Duration::minutes(TIMEZONE_OFFSET_MINUTES);
    }
    start
}

/// Computes one `MarketSourceResult` per fiat-rate source
pub struct FiatRateAggregator {
    store: Arc<dyn TradeStore>,
    config: RatesConfig,
}

impl FiatRateAggregator {
    pub fn new(store: Arc<dyn TradeStore>, config: RatesConfig) -> Self {
        Self { store, config }
    }

    pub fn query_for(&self, source: FiatRateSource, now_local: NaiveDateTime) -> TradeQuery {
        let since = window_start(source, now_local, self.config.window_minutes);
        TradeQuery {
            market_name: source.market_name().to_string(),
            source: source.as_str().to_string(),
            since: since.format(TRADE_TIME_FORMAT).to_string(),
            min_amount: self.config.min_amount,
            limit: self.config.limit,
        }
    }

    /// Aggregate one source. The store query runs under the per-source
    /// deadline, so a hung source fails on its own.
    pub async fn aggregate_source(
        &self,
        source: FiatRateSource,
        now_local: NaiveDateTime,
    ) -> anyhow::Result<MarketSourceResult> {
        let query = self.query_for(source, now_local);
        let deadline = self.config.source_timeout();
        let trades = tokio::time::timeout(deadline, self.store.recent_trades(&query))
            .await
            .with_context(|| format!("{} trade query exceeded {}ms", source, deadline.as_millis()))??;
        let stats = compute(&trades);

        tracing::debug!(
            source = %source,
            trades = trades.len(),
            weighted_mean = stats.weighted_mean,
            std_dev = stats.std_dev,
            "Fiat rate computed"
        );

        Ok(MarketSourceResult {
            market_name: query.market_name,
            source: query.source,
            median: stats.median,
            weighted_mean: stats.weighted_mean,
            std_dev: stats.std_dev,
            sum_amounts: stats.sum_amounts,
        })
    }
}
