//! PayPal webhook receiver.
//!
//! Accepts `PAYMENT.CAPTURE.*` notifications, confirms them with PayPal's
//! verify-webhook-signature API and settles the correlated booking.

pub mod bookings;
pub mod config;
pub mod gateways;
pub mod handlers;
pub mod idempotency;
pub mod models;
pub mod notifications;
pub mod routes;
pub mod webhooks;

use std::sync::Arc;

use crate::config::WebhookConfig;
use crate::gateways::SignatureVerifier;
use crate::webhooks::WebhookProcessor;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WebhookConfig>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub processor: WebhookProcessor,
}
