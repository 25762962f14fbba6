//! Ingestion scheduler
//!
//! One periodic task per exchange plus one for the fiat rate. Each task has
//! its own interval and its own child cancellation token; a failing or slow
//! task only loses its own cycle. A failed cycle is not retried inline, the
//! next tick is the retry, and the cache's long tier covers the gap.

use anyhow::{bail, Context, Result};
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::TieredCache;
use crate::clock::Clock;
use crate::oracle::ExchangeClient;
use crate::rates::{FiatRateAggregator, TradeStore};
use crate::types::FiatRateSource;

/// Periodic price fetch for one exchange
pub struct PriceJob {
    pub client: Arc<dyn ExchangeClient>,
    pub interval: Duration,
    /// Fixed symbol list for clients that need one; empty means "ask the store"
    pub symbols: Vec<String>,
}

struct RateJob {
    aggregator: Arc<FiatRateAggregator>,
    interval: Duration,
}

/// What a successful price cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceCycleReport {
    pub written: usize,
    pub skipped: usize,
}

pub struct IngestionScheduler {
    cache: Arc<TieredCache>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn TradeStore>,
    price_jobs: Vec<PriceJob>,
    rate_job: Option<RateJob>,
    cycle_timeout: Duration,
}

impl IngestionScheduler {
    pub fn new(
        cache: Arc<TieredCache>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn TradeStore>,
        cycle_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            clock,
            store,
            price_jobs: Vec::new(),
            rate_job: None,
            cycle_timeout,
        }
    }

    pub fn with_exchange(
        mut self,
        client: Arc<dyn ExchangeClient>,
        interval: Duration,
        symbols: Vec<String>,
    ) -> Self {
        self.price_jobs.push(PriceJob {
            client,
            interval,
            symbols,
        });
        self
    }

    pub fn with_fiat_rates(mut self, aggregator: Arc<FiatRateAggregator>, interval: Duration) -> Self {
        self.rate_job = Some(RateJob {
            aggregator,
            interval,
        });
        self
    }

    pub fn price_jobs(&self) -> &[PriceJob] {
        &self.price_jobs
    }

    /// Spawn every task. Cancelling `shutdown` stops them all.
    pub fn start(self: Arc<Self>, shutdown: &CancellationToken) -> SchedulerHandle {
        let mut tasks = JoinSet::new();

        for index in 0..self.price_jobs.len() {
            let scheduler = Arc::clone(&self);
            let token = shutdown.child_token();
            tasks.spawn(async move { scheduler.price_loop(index, token).await });
        }

        if self.rate_job.is_some() {
            let scheduler = Arc::clone(&self);
            let token = shutdown.child_token();
            tasks.spawn(async move { scheduler.rate_loop(token).await });
        }

        tracing::info!(
            price_tasks = self.price_jobs.len(),
            rate_task = self.rate_job.is_some(),
            "Ingestion scheduler started"
        );

        SchedulerHandle {
            shutdown: shutdown.clone(),
            tasks,
        }
    }

    async fn price_loop(&self, index: usize, token: CancellationToken) {
        let job = &self.price_jobs[index];
        let exchange = job.client.exchange();
        let mut ticker = tokio::time::interval(job.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = token.cancelled() => break,
                result = self.run_price_cycle(job) => match result {
                    Ok(report) => tracing::debug!(
                        source = %exchange,
                        written = report.written,
                        skipped = report.skipped,
                        "Price cycle complete"
                    ),
                    Err(e) => tracing::error!(
                        source = %exchange,
                        error = %format!("{:#}", e),
                        "Price cycle failed, cache left untouched"
                    ),
                },
            }
        }

        tracing::info!(source = %exchange, "Price task stopped");
    }

    async fn rate_loop(&self, token: CancellationToken) {
        let Some(job) = &self.rate_job else {
            return;
        };
        let mut ticker = tokio::time::interval(job.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = token.cancelled() => break,
                published = self.run_rate_cycle(&job.aggregator) => {
                    tracing::debug!(published, "Fiat rate cycle complete");
                }
            }
        }

        tracing::info!("Fiat rate task stopped");
    }

    /// Fetch one exchange and write everything it returned as one batch
    pub async fn run_price_cycle(&self, job: &PriceJob) -> Result<PriceCycleReport> {
        let cycle = async {
            let exchange = job.client.exchange();
            let symbols = self.symbols_for(job).await?;

            let batch = job
                .client
                .fetch_prices(&symbols)
                .await
                .with_context(|| format!("Error fetching {} prices", exchange))?;

            for skipped in &batch.skipped {
                tracing::warn!(
                    source = %exchange,
                    symbol = %skipped.symbol,
                    reason = %skipped.reason,
                    "Skipping symbol"
                );
            }

            let written = self
                .cache
                .write_batch(exchange.cache_prefix(), &batch.prices, self.clock.now())
                .await
                .with_context(|| format!("Error storing {} prices", exchange))?;

            Ok(PriceCycleReport {
                written,
                skipped: batch.skipped.len(),
            })
        };

        tokio::time::timeout(self.cycle_timeout, cycle)
            .await
            .with_context(|| {
                format!(
                    "{} price cycle exceeded {}ms",
                    job.client.exchange(),
                    self.cycle_timeout.as_millis()
                )
            })?
    }

    async fn symbols_for(&self, job: &PriceJob) -> Result<Vec<String>> {
        if !job.client.requires_symbols() || !job.symbols.is_empty() {
            return Ok(job.symbols.clone());
        }

        let exchange = job.client.exchange();
        let symbols = self
            .store
            .exchange_symbols(exchange)
            .await
            .with_context(|| format!("Error fetching {} symbols from store", exchange))?;
        if symbols.is_empty() {
            bail!("No {} symbols configured in the market store", exchange);
        }
        Ok(symbols)
    }

    /// Aggregate every fiat-rate source in turn, publishing each usable
    /// result as soon as it is computed.
    ///
    /// Every source query carries its own deadline, so a hung or failing
    /// source is logged and skipped without costing the others their
    /// results. Results backed by no trades are not published, and the
    /// previous rate stays readable until its TTL runs out. Returns the
    /// number published.
    pub async fn run_rate_cycle(&self, aggregator: &FiatRateAggregator) -> usize {
        let now_local = self.clock.now().with_timezone(&Local).naive_local();
        let mut published = 0;

        for source in FiatRateSource::ALL {
            let result = match aggregator.aggregate_source(source, now_local).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(
                        source = %source,
                        market = %source.market_name(),
                        error = %format!("{:#}", e),
                        "Skipping fiat rate source"
                    );
                    continue;
                }
            };

            if result.sum_amounts <= 0.0 {
                tracing::warn!(
                    source = %result.source,
                    market = %result.market_name,
                    "No qualifying trades, keeping previous rate"
                );
                continue;
            }

            match self.cache.write_rate(&result).await {
                Ok(()) => published += 1,
                Err(e) => tracing::error!(
                    source = %result.source,
                    error = %e,
                    "Failed to store fiat rate"
                ),
            }
        }

        published
    }
}

/// Running scheduler tasks
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
}

impl SchedulerHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel every task and wait for them to finish
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Scheduler task ended abnormally");
            }
        }
        tracing::info!("Ingestion scheduler stopped");
    }
}
