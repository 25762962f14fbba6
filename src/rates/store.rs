//! Trade store access
//!
//! The upstream trade log lives in MongoDB and is owned by another service.
//! Numeric fields arrive as doubles, ints or strings depending on the
//! writer; they are normalised to `f64` here, before anything downstream
//! sees them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::Client;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::StoreConfig;
use crate::types::{Exchange, MarketTrade};

/// Query for recent large trades of one market on one source
#[derive(Debug, Clone, PartialEq)]
pub struct TradeQuery {
    pub market_name: String,
    pub source: String,
    /// Inclusive lower bound, `YYYY-MM-DDTHH:MM:SS`
    pub since: String,
    /// Exclusive lower bound on trade amount
    pub min_amount: f64,
    pub limit: i64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn recent_trades(&self, query: &TradeQuery) -> Result<Vec<MarketTrade>>;

    /// Base symbols an exchange should be polled for
    async fn exchange_symbols(&self, exchange: Exchange) -> Result<Vec<String>>;

    async fn ping(&self) -> Result<()>;
}

/// Coerce a numeric-ish BSON value to `f64`
pub fn bson_to_f64(value: &Bson) -> Option<f64> {
    let n = match value {
        Bson::Double(v) => *v,
        Bson::Int32(v) => *v as f64,
        Bson::Int64(v) => *v as f64,
        Bson::String(s) => s.trim().parse().ok()?,
        Bson::Decimal128(d) => d.to_string().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn document_to_trade(doc: &Document) -> Option<MarketTrade> {
    Some(MarketTrade {
        price: bson_to_f64(doc.get("price")?)?,
        amount: bson_to_f64(doc.get("amount")?)?,
    })
}

/// Field in the market-config collection that lists an exchange's symbols
fn symbol_field(exchange: Exchange) -> &'static str {
    match exchange {
        Exchange::Binance => "binance_symbol",
        Exchange::Kucoin => "kucoin_symbol",
    }
}

pub struct MongoTradeStore {
    config: StoreConfig,
    client: OnceCell<Client>,
}

impl MongoTradeStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                let mut options = ClientOptions::parse(&self.config.mongo_uri)
                    .await
                    .context("Invalid MongoDB URI")?;
                options.app_name = Some("pureprice".to_string());
                options.max_pool_size = Some(self.config.max_pool_size);
                options.min_pool_size = Some(self.config.min_pool_size);
                options.max_idle_time = Some(Duration::from_secs(30 * 60));
                options.server_selection_timeout = Some(Duration::from_secs(5));
                options.connect_timeout = Some(self.timeout());

                let client = Client::with_options(options).context("Failed to build MongoDB client")?;
                tracing::info!(
                    max_pool = self.config.max_pool_size,
                    "MongoDB connection pool initialized"
                );
                Ok(client)
            })
            .await
    }
}

#[async_trait]
impl TradeStore for MongoTradeStore {
    async fn recent_trades(&self, query: &TradeQuery) -> Result<Vec<MarketTrade>> {
        let collection = self
            .client()
            .await?
            .database(&self.config.trade_database)
            .collection::<Document>(&self.config.last_trade_collection);

        let filter = doc! {
            "market_name": query.market_name.as_str(),
            "source": query.source.as_str(),
            "time": { "$gte": query.since.as_str() },
            "amount": { "$gt": query.min_amount },
        };

        let fetch = async {
            let cursor = collection
                .find(filter)
                .sort(doc! { "time": -1 })
                .limit(query.limit)
                .await?;
            cursor.try_collect::<Vec<Document>>().await
        };

        let docs = tokio::time::timeout(self.timeout(), fetch)
            .await
            .with_context(|| format!("trade query for {}:{} timed out", query.market_name, query.source))?
            .with_context(|| format!("failed to query trades for {}:{}", query.market_name, query.source))?;

        let total = docs.len();
        let trades: Vec<MarketTrade> = docs.iter().filter_map(document_to_trade).collect();
        if trades.len() < total {
            tracing::debug!(
                market = %query.market_name,
                source = %query.source,
                dropped = total - trades.len(),
                "Dropped trades with non-numeric price or amount"
            );
        }

        Ok(trades)
    }

    async fn exchange_symbols(&self, exchange: Exchange) -> Result<Vec<String>> {
        let collection = self
            .client()
            .await?
            .database(&self.config.market_database)
            .collection::<Document>(&self.config.config_collection);

        let fetch = async {
            let cursor = collection.find(doc! {}).await?;
            cursor.try_collect::<Vec<Document>>().await
        };

        let docs = tokio::time::timeout(self.timeout(), fetch)
            .await
            .context("symbol query timed out")?
            .context("failed to load exchange symbols")?;

        let field = symbol_field(exchange);
        Ok(docs
            .iter()
            .filter_map(|d| d.get_str(field).ok())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        let admin = self.client().await?.database("admin");
        let ping = async { admin.run_command(doc! { "ping": 1 }).await };

        tokio::time::timeout(self.timeout(), ping)
            .await
            .context("MongoDB ping timed out")?
            .context("MongoDB ping failed")?;
        Ok(())
    }
}
