use redis::{aio::ConnectionManager, Client};
use crate::{AppError, RedisConfig};

#[derive(Clone)]
pub struct RedisService {
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &RedisConfig) -> Result<Self, AppError> {
        let client = Client::open(config.connection_string())?;
        let manager = ConnectionManager::new(client).await?;

        let service = Self { manager };
        service.health_check().await?;

        tracing::info!(host = %config.host, port = config.port, "Redis connection established");

        Ok(service)
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(AppError::Internal(format!("Unexpected PING reply: {}", pong)));
        }
        Ok(())
    }

    /// Sets `key` only if it does not exist yet, expiring after `ttl_seconds`.
    ///
    /// Returns `true` when this call created the key.
    pub async fn set_if_absent(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    pub async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}
