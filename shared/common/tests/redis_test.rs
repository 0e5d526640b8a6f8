use payhook_common::{RedisConfig, RedisService};

#[tokio::test]
async fn test_set_if_absent_and_delete() {
    // Skip test if no Redis is available
    if std::env::var("REDIS_HOST").is_err() {
        println!("Skipping Redis test - Redis not configured");
        return;
    }

    let config = RedisConfig {
        host: std::env::var("REDIS_HOST").unwrap(),
        port: 6379,
        password: None,
        database: 1, // Use database 1 for testing
    };

    let redis = RedisService::new(&config).await.expect("Failed to connect to Redis");
    redis.health_check().await.expect("Health check failed");

    let key = "payhook:test:processed:WH-REDIS-1";
    redis.delete(key).await.expect("Failed to clear key");

    assert!(redis.set_if_absent(key, "1", 60).await.expect("first claim"));
    assert!(!redis.set_if_absent(key, "1", 60).await.expect("second claim"));

    redis.delete(key).await.expect("Failed to delete key");
    assert!(redis.set_if_absent(key, "1", 60).await.expect("claim after delete"));

    redis.delete(key).await.expect("cleanup");
}
