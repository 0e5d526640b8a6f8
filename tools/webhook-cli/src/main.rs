use clap::{Parser, Subcommand};
use payhook_common::{RedisConfig, RedisService};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "webhook-cli")]
#[command(about = "PayPal webhook receiver CLI Tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Post a sample capture event to a running receiver
    Send {
        /// Receiver endpoint
        #[arg(long, default_value = "http://localhost:3000/api/webhooks/paypal")]
        url: String,
        /// Event type to send
        #[arg(long, default_value = "PAYMENT.CAPTURE.COMPLETED")]
        event_type: String,
        /// Order id placed in supplementary_data.related_ids
        #[arg(long, default_value = "ORDER-123")]
        order_id: String,
        /// Capture amount
        #[arg(long, default_value = "10.00")]
        amount: String,
        /// Fixed event id, to exercise redelivery handling
        #[arg(long)]
        event_id: Option<String>,
        /// Attach placeholder PayPal signature headers
        #[arg(long)]
        with_signature_headers: bool,
    },
    /// Test the Redis connection used for processed-event tracking
    CheckRedis {
        /// Redis host override
        #[arg(long)]
        host: Option<String>,
        /// Redis port override
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Send {
            url,
            event_type,
            order_id,
            amount,
            event_id,
            with_signature_headers,
        } => {
            let event_id = event_id.unwrap_or_else(|| format!("WH-{}", uuid::Uuid::new_v4()));
            let event = sample_event(&event_id, &event_type, &order_id, &amount);

            let mut request = reqwest::Client::new().post(&url).json(&event);
            if with_signature_headers {
                for (name, value) in placeholder_signature_headers() {
                    request = request.header(name, value);
                }
            }

            tracing::info!(%url, %event_id, %event_type, "Sending sample webhook");
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;

            println!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or(""));
            match serde_json::from_str::<Value>(&body) {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("{}", body),
            }
        }
        Commands::CheckRedis { host, port } => {
            let mut config = RedisConfig::from_env();
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }

            let redis = RedisService::new(&config).await?;
            redis.health_check().await?;
            println!("✅ Redis connection successful");

            let probe = format!("payhook:cli:probe:{}", uuid::Uuid::new_v4());
            let first = redis.set_if_absent(&probe, "1", 30).await?;
            let second = redis.set_if_absent(&probe, "1", 30).await?;
            redis.delete(&probe).await?;

            if first && !second {
                println!("✅ SET NX claims working");
            } else {
                println!("❌ SET NX claims not behaving atomically");
            }
        }
    }

    Ok(())
}

fn sample_event(event_id: &str, event_type: &str, order_id: &str, amount: &str) -> Value {
    json!({
        "id": event_id,
        "event_version": "1.0",
        "create_time": chrono::Utc::now().to_rfc3339(),
        "resource_type": "capture",
        "event_type": event_type,
        "summary": format!("Sample {} event", event_type),
        "resource": {
            "id": format!("CAPTURE-{}", event_id.trim_start_matches("WH-").chars().take(8).collect::<String>()),
            "status": "COMPLETED",
            "amount": { "value": amount, "currency_code": "USD" },
            "final_capture": true,
            "payer": { "email_address": "buyer@example.com" },
            "supplementary_data": { "related_ids": { "order_id": order_id } }
        }
    })
}

// Shaped like PayPal's headers; real verification rejects them.
fn placeholder_signature_headers() -> [(&'static str, String); 5] {
    [
        ("paypal-auth-algo", "SHA256withRSA".to_string()),
        ("paypal-cert-url", "https://api.sandbox.paypal.com/v1/notifications/certs/CERT-placeholder".to_string()),
        ("paypal-transmission-id", uuid::Uuid::new_v4().to_string()),
        ("paypal-transmission-sig", "placeholder-signature".to_string()),
        ("paypal-transmission-time", chrono::Utc::now().to_rfc3339()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_event_carries_order_correlation() {
        let event = sample_event("WH-abc", "PAYMENT.CAPTURE.COMPLETED", "ORDER-9", "12.50");

        assert_eq!(event["id"], "WH-abc");
        assert_eq!(event["event_type"], "PAYMENT.CAPTURE.COMPLETED");
        assert_eq!(event["resource"]["amount"]["value"], "12.50");
        assert_eq!(event["resource"]["supplementary_data"]["related_ids"]["order_id"], "ORDER-9");
    }

    #[test]
    fn test_placeholder_headers_cover_all_signature_fields() {
        let names: Vec<_> = placeholder_signature_headers().iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            [
                "paypal-auth-algo",
                "paypal-cert-url",
                "paypal-transmission-id",
                "paypal-transmission-sig",
                "paypal-transmission-time"
            ]
        );
    }
}
