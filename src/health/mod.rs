//! Liveness, readiness and the full health report

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::TieredCache;
use crate::oracle::ExchangeClient;
use crate::rates::TradeStore;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Probes slower than this report `degraded`
const SLOW_PROBE: Duration = Duration::from_secs(2);
const PROBE_SYMBOL: &str = "BTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub components: Vec<ComponentHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub checked_at: DateTime<Utc>,
    pub components: Vec<ComponentHealth>,
}

pub struct HealthChecker {
    cache: Arc<TieredCache>,
    store: Arc<dyn TradeStore>,
    exchanges: Vec<Arc<dyn ExchangeClient>>,
    started: Instant,
}

impl HealthChecker {
    pub fn new(
        cache: Arc<TieredCache>,
        store: Arc<dyn TradeStore>,
        exchanges: Vec<Arc<dyn ExchangeClient>>,
    ) -> Self {
        Self {
            cache,
            store,
            exchanges,
            started: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn liveness(&self) -> Liveness {
        Liveness {
            status: "alive",
            uptime_secs: self.uptime_secs(),
        }
    }

    /// Ready when both the cache backend and the trade store answer
    pub async fn readiness(&self) -> Readiness {
        let (cache, store) = tokio::join!(self.check_cache(), self.check_store());
        let ready = cache.status != HealthStatus::Unhealthy && store.status != HealthStatus::Unhealthy;
        Readiness {
            ready,
            components: vec![cache, store],
        }
    }

    pub async fn report(&self) -> HealthReport {
        let (cache, store, exchanges) = tokio::join!(
            self.check_cache(),
            self.check_store(),
            join_all(self.exchanges.iter().map(|client| self.check_exchange(client.as_ref())))
        );

        let mut components = vec![cache, store];
        components.extend(exchanges);

        let status = components
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        if status != HealthStatus::Healthy {
            tracing::warn!(status = ?status, "Health check reported problems");
        }

        HealthReport {
            status,
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.uptime_secs(),
            checked_at: Utc::now(),
            components,
        }
    }

    async fn check_cache(&self) -> ComponentHealth {
        let name = format!("cache:{}", self.cache.backend_name());
        probe(name, HealthStatus::Unhealthy, self.cache.ping()).await
    }

    async fn check_store(&self) -> ComponentHealth {
        probe(
            "trade_store".to_string(),
            HealthStatus::Unhealthy,
            self.store.ping(),
        )
        .await
    }

    /// One single-asset price lookup per exchange. A failing exchange only
    /// degrades the service; cached prices keep being served.
    async fn check_exchange(&self, client: &dyn ExchangeClient) -> ComponentHealth {
        let fetch = async { client.spot_price(PROBE_SYMBOL).await.map(|_| ()) };
        probe(
            format!("exchange:{}", client.exchange().cache_prefix()),
            HealthStatus::Degraded,
            fetch,
        )
        .await
    }
}

async fn probe<E: Display>(
    name: String,
    on_failure: HealthStatus,
    check: impl Future<Output = Result<(), E>>,
) -> ComponentHealth {
    let started = Instant::now();
    let outcome = tokio::time::timeout(PROBE_TIMEOUT, check).await;
    let elapsed = started.elapsed();

    let (status, message) = match outcome {
        Ok(Ok(())) if elapsed > SLOW_PROBE => (
            HealthStatus::Degraded,
            Some(format!("slow response ({}ms)", elapsed.as_millis())),
        ),
        Ok(Ok(())) => (HealthStatus::Healthy, None),
        Ok(Err(e)) => (on_failure, Some(e.to_string())),
        Err(_) => (
            on_failure,
            Some(format!("no response within {}s", PROBE_TIMEOUT.as_secs())),
        ),
    };

    ComponentHealth {
        name,
        status,
        message,
        response_time_ms: elapsed.as_millis() as u64,
    }
}
