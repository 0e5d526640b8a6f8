use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use payhook_common::AppError;
use crate::{
    config::{PayPalConfig, PayPalCredentials},
    models::SignatureHeaders,
};

use super::{PayPalApiError, SignatureVerifier, VerificationFailure};

const TOKEN_ENDPOINT: &str = "oauth2/token";
const VERIFY_ENDPOINT: &str = "notifications/verify-webhook-signature";
const VERIFICATION_SUCCESS: &str = "SUCCESS";
const MAX_LOGGED_BODY: usize = 512;

/// Short-lived bearer token from the PayPal OAuth endpoint.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([redacted])")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
struct VerifySignatureRequest<'a> {
    auth_algo: &'a str,
    cert_url: &'a str,
    transmission_id: &'a str,
    transmission_sig: &'a str,
    transmission_time: &'a str,
    webhook_id: &'a str,
    webhook_event: &'a Value,
}

#[derive(Debug, Deserialize)]
struct VerifySignatureResponse {
    #[serde(default)]
    verification_status: Option<String>,
}

#[derive(Clone)]
pub struct PayPalClient {
    client: Client,
    api_base: String,
    credentials: Option<PayPalCredentials>,
}

impl PayPalClient {
    pub fn new(config: &PayPalConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build PayPal HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base(),
            credentials: config.credentials(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.api_base, endpoint)
    }

    fn get_auth_header(credentials: &PayPalCredentials) -> String {
        let raw = format!("{}:{}", credentials.client_id, credentials.client_secret);
        let encoded = general_purpose::STANDARD.encode(raw.as_bytes());
        format!("Basic {}", encoded)
    }

    /// Exchanges the client credentials for a bearer token. One round-trip, no retry.
    pub async fn fetch_access_token(&self) -> Result<AccessToken, PayPalApiError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(PayPalApiError::MissingCredentials)?;

        let response = self
            .client
            .post(self.url(TOKEN_ENDPOINT))
            .header(header::AUTHORIZATION, Self::get_auth_header(credentials))
            .header(header::ACCEPT, "application/json")
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| PayPalApiError::from_reqwest(TOKEN_ENDPOINT, e))?;

        if !response.status().is_success() {
            let (status, body) = read_failure(TOKEN_ENDPOINT, response).await;
            return Err(PayPalApiError::CredentialsRejected { status, body });
        }

        let body = response
            .text()
            .await
            .map_err(|e| PayPalApiError::from_reqwest(TOKEN_ENDPOINT, e))?;
        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            PayPalApiError::MalformedResponse {
                endpoint: TOKEN_ENDPOINT,
                detail: e.to_string(),
            }
        })?;

        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PayPalApiError::MalformedResponse {
                endpoint: TOKEN_ENDPOINT,
                detail: "access_token missing".to_string(),
            })?;

        tracing::debug!(expires_in = ?token.expires_in, "Obtained PayPal access token");
        Ok(AccessToken(access_token))
    }

    /// Asks PayPal to check a delivery's signature; returns the reported `verification_status`.
    pub async fn verify_webhook_signature(
        &self,
        token: &AccessToken,
        signature: &SignatureHeaders,
        webhook_id: &str,
        event: &Value,
    ) -> Result<Option<String>, PayPalApiError> {
        let payload = VerifySignatureRequest {
            auth_algo: &signature.auth_algo,
            cert_url: &signature.cert_url,
            transmission_id: &signature.transmission_id,
            transmission_sig: &signature.transmission_sig,
            transmission_time: &signature.transmission_time,
            webhook_id,
            webhook_event: event,
        };

        let response = self
            .client
            .post(self.url(VERIFY_ENDPOINT))
            .bearer_auth(token.as_str())
            .json(&payload)
            .send()
            .await
            .map_err(|e| PayPalApiError::from_reqwest(VERIFY_ENDPOINT, e))?;

        if !response.status().is_success() {
            let (status, body) = read_failure(VERIFY_ENDPOINT, response).await;
            return Err(PayPalApiError::VerificationRejected { status, body });
        }

        let body = response
            .text()
            .await
            .map_err(|e| PayPalApiError::from_reqwest(VERIFY_ENDPOINT, e))?;
        let parsed: VerifySignatureResponse = serde_json::from_str(&body).map_err(|e| {
            PayPalApiError::MalformedResponse {
                endpoint: VERIFY_ENDPOINT,
                detail: e.to_string(),
            }
        })?;

        Ok(parsed.verification_status)
    }
}

async fn read_failure(endpoint: &'static str, response: Response) -> (u16, String) {
    let status = response.status().as_u16();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_LOGGED_BODY {
        let mut cut = MAX_LOGGED_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    tracing::debug!(endpoint, status, body = %body, "PayPal API call failed");
    (status, body)
}

#[async_trait]
impl SignatureVerifier for PayPalClient {
    async fn verify(
        &self,
        headers: &HeaderMap,
        event: &Value,
        webhook_id: &str,
    ) -> Result<(), VerificationFailure> {
        let signature =
            SignatureHeaders::from_headers(headers).map_err(VerificationFailure::MissingHeader)?;

        let token = self
            .fetch_access_token()
            .await
            .map_err(VerificationFailure::TokenUnavailable)?;

        let status = self
            .verify_webhook_signature(&token, &signature, webhook_id, event)
            .await
            .map_err(VerificationFailure::Upstream)?;

        match status.as_deref() {
            Some(VERIFICATION_SUCCESS) => {
                tracing::debug!(
                    transmission_id = %signature.transmission_id,
                    "PayPal reported signature verification success"
                );
                Ok(())
            }
            _ => Err(VerificationFailure::NotVerified(status)),
        }
    }
}
