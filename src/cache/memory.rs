//! In-process cache backend
//!
//! Expires entries against an injected clock. Used for local runs without
//! Redis (`cache.backend = "memory"`) and throughout the tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{CacheBackend, CacheEntry};
use crate::clock::Clock;
use crate::error::PriceError;

pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (String, i64)>>,
    clock: Arc<dyn Clock>,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate the backend going away (every call fails while set)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop one key regardless of its TTL
    pub async fn remove(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    /// Number of keys that have not expired yet
    pub async fn live_keys(&self) -> usize {
        let now = self.clock.now().timestamp_millis();
        self.entries
            .lock()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    fn check_online(&self) -> Result<(), PriceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PriceError::upstream("memory cache", "backend offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PriceError> {
        self.check_online()?;
        let now = self.clock.now().timestamp_millis();
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_atomic(&self, batch: &[CacheEntry]) -> Result<(), PriceError> {
        self.check_online()?;
        let now = self.clock.now().timestamp_millis();
        // One lock for the whole batch: readers see all of it or none of it
        let mut entries = self.entries.lock().await;
        for entry in batch {
            let expires_at = now + entry.ttl.as_millis() as i64;
            entries.insert(entry.key.clone(), (entry.value.clone(), expires_at));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), PriceError> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let clock = Arc::new(ManualClock::at_unix(1_000));
        let backend = MemoryBackend::new(clock.clone());
        backend
            .set_atomic(&[CacheEntry::new("k", "v", Duration::from_secs(10))])
            .await
            .unwrap();

        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
        clock.advance(Duration::from_secs(10));
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert_eq!(backend.live_keys().await, 0);
    }

    #[tokio::test]
    async fn offline_backend_fails_every_call() {
        let backend = MemoryBackend::new(Arc::new(ManualClock::at_unix(0)));
        backend.set_offline(true);
        assert!(backend.ping().await.is_err());
        assert!(backend.get("k").await.is_err());
    }
}
