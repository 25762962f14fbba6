//! Redis cache backend
//!
//! A single multiplexed `ConnectionManager` is shared by every task and
//! request. It is created lazily on first use behind a `OnceCell`, so the
//! service can start (and report not-ready) while Redis is down.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;

use super::{CacheBackend, CacheEntry};
use crate::error::PriceError;

pub struct RedisBackend {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
}

impl RedisBackend {
    /// Parse the URL; no connection is made until the first command
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, PriceError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone()).await?;
                tracing::info!("Redis connection manager initialized");
                Ok::<_, redis::RedisError>(manager)
            })
            .await
            .map_err(|e| PriceError::upstream("redis", e))?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PriceError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| PriceError::upstream("redis", e))?;
        Ok(value)
    }

    async fn set_atomic(&self, entries: &[CacheEntry]) -> Result<(), PriceError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for entry in entries {
            pipe.set_ex(&entry.key, &entry.value, entry.ttl.as_secs().max(1))
                .ignore();
        }

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| PriceError::upstream("redis", e))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), PriceError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| PriceError::upstream("redis", e))?;
        Ok(())
    }
}
