pub mod paypal;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;
use thiserror::Error;

pub use self::paypal::{AccessToken, PayPalClient};

/// Errors raised while talking to the PayPal REST API.
#[derive(Debug, Error)]
pub enum PayPalApiError {
    #[error("PayPal credentials not configured")]
    MissingCredentials,

    #[error("token endpoint rejected credentials with status {status}: {body}")]
    CredentialsRejected { status: u16, body: String },

    #[error("verification endpoint returned status {status}: {body}")]
    VerificationRejected { status: u16, body: String },

    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: &'static str },

    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed response from {endpoint}: {detail}")]
    MalformedResponse { endpoint: &'static str, detail: String },
}

impl PayPalApiError {
    pub fn from_reqwest(endpoint: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            PayPalApiError::Timeout { endpoint }
        } else {
            PayPalApiError::Transport { endpoint, source }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PayPalApiError::Timeout { .. })
    }
}

/// Why a delivery was not trusted. Logged, never returned to the sender.
#[derive(Debug, Error)]
pub enum VerificationFailure {
    #[error("missing signature header {0}")]
    MissingHeader(&'static str),

    #[error("could not obtain access token: {0}")]
    TokenUnavailable(#[source] PayPalApiError),

    #[error("verification call failed: {0}")]
    Upstream(#[source] PayPalApiError),

    #[error("verification status was {}", .0.as_deref().unwrap_or("absent"))]
    NotVerified(Option<String>),
}

impl VerificationFailure {
    /// Stable tag for log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            VerificationFailure::MissingHeader(_) => "missing_header",
            VerificationFailure::TokenUnavailable(err) if err.is_timeout() => "token_timeout",
            VerificationFailure::TokenUnavailable(_) => "token_unavailable",
            VerificationFailure::Upstream(err) if err.is_timeout() => "upstream_timeout",
            VerificationFailure::Upstream(_) => "upstream_error",
            VerificationFailure::NotVerified(_) => "not_verified",
        }
    }
}

/// Decides whether an inbound webhook really came from the payment processor.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(
        &self,
        headers: &HeaderMap,
        event: &Value,
        webhook_id: &str,
    ) -> Result<(), VerificationFailure>;

    /// Fail-closed trust decision. The failure reason only reaches the logs.
    async fn is_authentic(&self, headers: &HeaderMap, event: &Value, webhook_id: &str) -> bool {
        match self.verify(headers, event, webhook_id).await {
            Ok(()) => true,
            Err(failure) => {
                tracing::warn!(
                    reason = failure.reason(),
                    error = %failure,
                    "Webhook signature verification failed"
                );
                false
            }
        }
    }
}
