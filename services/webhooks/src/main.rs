use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payhook_common::RedisService;
use payhook_receiver::{
    bookings::InMemoryBookingRepository,
    config::{IdempotencyBackend, WebhookConfig},
    gateways::PayPalClient,
    idempotency::{MemoryProcessedEventStore, ProcessedEventStore, RedisProcessedEventStore},
    notifications::LoggingNotifier,
    routes,
    webhooks::WebhookProcessor,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payhook_receiver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = WebhookConfig::from_env().context("invalid configuration")?;

    if config.paypal.credentials().is_none() {
        tracing::error!("PAYPAL_CLIENT_ID / PAYPAL_CLIENT_SECRET not set; webhooks will be rejected with 500");
    }
    if config.paypal.webhook_id.is_none() {
        if config.production_mode {
            tracing::error!("PAYPAL_WEBHOOK_ID not set in production mode; webhooks will be rejected with 500");
        } else {
            tracing::warn!("PAYPAL_WEBHOOK_ID not set; signature verification is disabled");
        }
    }

    // Create PayPal client
    let paypal_client = PayPalClient::new(&config.paypal).context("failed to create PayPal client")?;

    // Create processed-event store
    let processed: Arc<dyn ProcessedEventStore> = match config.idempotency.backend {
        IdempotencyBackend::Memory => {
            Arc::new(MemoryProcessedEventStore::new(config.idempotency.ttl_seconds))
        }
        IdempotencyBackend::Redis => {
            let redis = RedisService::new(&config.idempotency.redis)
                .await
                .context("failed to connect to Redis")?;
            Arc::new(RedisProcessedEventStore::new(redis, config.idempotency.ttl_seconds))
        }
    };

    // Booking persistence and email delivery are not wired to real backends yet
    let processor = WebhookProcessor::new(
        Arc::new(InMemoryBookingRepository::new()),
        Arc::new(LoggingNotifier),
        processed,
    );

    // Build application state
    let app_state = AppState {
        config: Arc::new(config.clone()),
        verifier: Arc::new(paypal_client),
        processor,
    };

    let app = routes::create_app(app_state);

    // Start the server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(
        environment = config.paypal.environment.as_str(),
        production_mode = config.production_mode,
        idempotency = config.idempotency.backend.as_str(),
        "PayPal webhook receiver listening on {}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
