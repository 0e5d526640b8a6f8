use std::fmt;

use payhook_common::{optional_env, AppError, RedisConfig, ServerConfig};
use serde::{Deserialize, Serialize};

const SANDBOX_API_BASE: &str = "https://api.sandbox.paypal.com/v1";
const PRODUCTION_API_BASE: &str = "https://api.paypal.com/v1";

// PayPal retries undelivered webhooks for up to three days.
const DEFAULT_IDEMPOTENCY_TTL_SECONDS: u64 = 3 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub server: ServerConfig,
    pub paypal: PayPalConfig,
    /// Production mode makes a missing webhook id fatal instead of skipping verification.
    pub production_mode: bool,
    pub idempotency: IdempotencyConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayPalEnvironment {
    Sandbox,
    Production,
}

impl PayPalEnvironment {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            PayPalEnvironment::Production
        } else {
            PayPalEnvironment::Sandbox
        }
    }

    pub fn api_base(&self) -> &'static str {
        match self {
            PayPalEnvironment::Sandbox => SANDBOX_API_BASE,
            PayPalEnvironment::Production => PRODUCTION_API_BASE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayPalEnvironment::Sandbox => "sandbox",
            PayPalEnvironment::Production => "production",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PayPalConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub webhook_id: Option<String>,
    pub environment: PayPalEnvironment,
    /// Replaces the environment's API base, e.g. to point at a local mock.
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
}

impl PayPalConfig {
    pub fn credentials(&self) -> Option<PayPalCredentials> {
        match (&self.client_id, &self.client_secret) {
            (Some(client_id), Some(client_secret)) => Some(PayPalCredentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => None,
        }
    }

    pub fn api_base(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.api_base())
            .trim_end_matches('/')
            .to_string()
    }
}

impl fmt::Debug for PayPalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayPalConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[redacted]"))
            .field("webhook_id", &self.webhook_id)
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct PayPalCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for PayPalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayPalCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyBackend {
    Memory,
    Redis,
}

impl IdempotencyBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyBackend::Memory => "memory",
            IdempotencyBackend::Redis => "redis",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    pub backend: IdempotencyBackend,
    pub ttl_seconds: u64,
    pub redis: RedisConfig,
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let backend = match optional_env("IDEMPOTENCY_BACKEND")
            .unwrap_or_else(|| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => IdempotencyBackend::Memory,
            "redis" => IdempotencyBackend::Redis,
            other => {
                return Err(AppError::Configuration(format!(
                    "Unknown IDEMPOTENCY_BACKEND '{}', expected 'memory' or 'redis'",
                    other
                )))
            }
        };

        Ok(Self {
            server: ServerConfig {
                host: std::env::var("WEBHOOK_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("WEBHOOK_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
                cors_origins: std::env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "*".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            paypal: PayPalConfig {
                client_id: optional_env("PAYPAL_CLIENT_ID"),
                client_secret: optional_env("PAYPAL_CLIENT_SECRET"),
                webhook_id: optional_env("PAYPAL_WEBHOOK_ID"),
                environment: PayPalEnvironment::parse(
                    &optional_env("PAYPAL_ENV").unwrap_or_else(|| "sandbox".to_string()),
                ),
                base_url: optional_env("PAYPAL_API_BASE_URL"),
                timeout_seconds: std::env::var("PAYPAL_HTTP_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            production_mode: optional_env("APP_ENV")
                .map(|env| env.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
            idempotency: IdempotencyConfig {
                backend,
                ttl_seconds: std::env::var("IDEMPOTENCY_TTL_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_IDEMPOTENCY_TTL_SECONDS),
                redis: RedisConfig::from_env(),
            },
        })
    }
}
