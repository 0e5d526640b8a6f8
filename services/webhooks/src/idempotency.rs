use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use payhook_common::{AppError, RedisService};

const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Tracks which webhook event ids have already been taken for processing.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Atomically records `event_id`. Returns `false` if it was already recorded
    /// and has not expired yet.
    async fn try_claim(&self, event_id: &str) -> Result<bool, AppError>;

    /// Forgets `event_id` so a redelivery can be processed again.
    async fn release(&self, event_id: &str) -> Result<(), AppError>;
}

/// In-process store. Entries vanish on restart and are not shared between replicas.
pub struct MemoryProcessedEventStore {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, Instant>>>,
}

impl MemoryProcessedEventStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_seconds.min(MAX_TTL_SECONDS)),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ProcessedEventStore for MemoryProcessedEventStore {
    async fn try_claim(&self, event_id: &str) -> Result<bool, AppError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, expires_at| *expires_at > now);

        if entries.contains_key(event_id) {
            return Ok(false);
        }
        let expires_at = now.checked_add(self.ttl).ok_or_else(|| {
            AppError::Internal(format!("Processed-event TTL {:?} out of range", self.ttl))
        })?;
        entries.insert(event_id.to_string(), expires_at);
        Ok(true)
    }

    async fn release(&self, event_id: &str) -> Result<(), AppError> {
        self.entries.write().await.remove(event_id);
        Ok(())
    }
}

/// Redis-backed store, shared by every replica pointing at the same database.
pub struct RedisProcessedEventStore {
    redis: RedisService,
    ttl_seconds: u64,
    key_prefix: String,
}

impl RedisProcessedEventStore {
    pub fn new(redis: RedisService, ttl_seconds: u64) -> Self {
        Self {
            redis,
            ttl_seconds: ttl_seconds.max(1),
            key_prefix: "payhook:paypal:processed".to_string(),
        }
    }

    fn key(&self, event_id: &str) -> String {
        format!("{}:{}", self.key_prefix, event_id)
    }
}

#[async_trait]
impl ProcessedEventStore for RedisProcessedEventStore {
    async fn try_claim(&self, event_id: &str) -> Result<bool, AppError> {
        self.redis
            .set_if_absent(&self.key(event_id), "1", self.ttl_seconds)
            .await
    }

    async fn release(&self, event_id: &str) -> Result<(), AppError> {
        self.redis.delete(&self.key(event_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_claim_is_rejected() {
        let store = MemoryProcessedEventStore::new(60);

        assert!(store.try_claim("WH-1").await.unwrap());
        assert!(!store.try_claim("WH-1").await.unwrap());
        assert!(store.try_claim("WH-2").await.unwrap());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_release_allows_reclaim() {
        let store = MemoryProcessedEventStore::new(60);

        assert!(store.try_claim("WH-1").await.unwrap());
        store.release("WH-1").await.unwrap();
        assert!(store.try_claim("WH-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entries_are_purged() {
        let store = MemoryProcessedEventStore::new(0);

        assert!(store.try_claim("WH-1").await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(store.try_claim("WH-1").await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_clamped() {
        let store = MemoryProcessedEventStore::new(u64::MAX);

        assert!(store.try_claim("WH-1").await.unwrap());
        assert!(!store.try_claim("WH-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_claims_admit_one() {
        let store = Arc::new(MemoryProcessedEventStore::new(60));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.try_claim("WH-RACE").await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
