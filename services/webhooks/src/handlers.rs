use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method},
    response::Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use payhook_common::{ApiResponse, AppError};
use crate::{
    models::{HealthStatus, Resource, WebhookAck, WebhookEvent},
    webhooks::DispatchOutcome,
    AppState,
};

const MISSING_EVENT_TYPE: &str = "Missing event_type";

// Webhook endpoint
pub async fn handle_paypal_webhook(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let delivery_id = Uuid::new_v4();
    let span = tracing::info_span!("paypal_webhook", %delivery_id);

    receive_paypal_webhook(state, method, headers, body)
        .instrument(span)
        .await
        .map(Json)
}

async fn receive_paypal_webhook(
    state: AppState,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<WebhookAck, AppError> {
    if method != Method::POST {
        return Err(AppError::MethodNotAllowed { allowed: &["POST"] });
    }

    let paypal = &state.config.paypal;
    if paypal.credentials().is_none() {
        tracing::error!("Missing PayPal Client ID or Secret");
        return Err(AppError::Configuration("PayPal credentials not configured".to_string()));
    }

    let webhook_id = paypal.webhook_id.as_deref();
    if webhook_id.is_none() {
        if state.config.production_mode {
            tracing::error!("PAYPAL_WEBHOOK_ID not set in production mode");
            return Err(AppError::Configuration("Webhook ID not configured".to_string()));
        }
        tracing::warn!("PAYPAL_WEBHOOK_ID not set - skipping signature verification");
    }

    let payload = parse_payload(&body)?;
    let event = decode_event(&payload)?;

    match webhook_id {
        Some(webhook_id) => {
            if !state.verifier.is_authentic(&headers, &payload, webhook_id).await {
                tracing::error!(
                    event_id = event.id_or_placeholder(),
                    event_type = %event.event_type,
                    "Invalid webhook signature"
                );
                return Err(AppError::Authentication(
                    "Webhook signature verification failed".to_string(),
                ));
            }
            tracing::info!(event_id = event.id_or_placeholder(), "Webhook signature verified");
        }
        None => {
            tracing::warn!(
                event_id = event.id_or_placeholder(),
                "Webhook signature verification skipped (webhook ID not configured)"
            );
        }
    }

    let outcome = state
        .processor
        .process_event(&event)
        .await
        .map_err(|err| {
            tracing::error!(
                event_id = event.id_or_placeholder(),
                event_type = %event.event_type,
                error = %err,
                "Webhook processing error"
            );
            into_processing_error(err)
        })?;

    match &outcome {
        DispatchOutcome::Handled(kind) => {
            tracing::info!(event_id = event.id_or_placeholder(), event_type = %kind, "Webhook event handled")
        }
        DispatchOutcome::Duplicate => {
            tracing::info!(event_id = event.id_or_placeholder(), "Duplicate webhook delivery acknowledged")
        }
        DispatchOutcome::Ignored(event_type) => {
            tracing::info!(event_id = event.id_or_placeholder(), event_type = %event_type, "Webhook event acknowledged without handler")
        }
    }

    Ok(WebhookAck {
        received: true,
        event_id: event.id.clone(),
        event_type: event.event_type.clone(),
    })
}

/// Parses the request body into a JSON object carrying a string `event_type`.
/// A body that is itself a JSON string is decoded once more.
fn parse_payload(body: &[u8]) -> Result<Value, AppError> {
    let malformed = || AppError::MalformedRequest(MISSING_EVENT_TYPE.to_string());

    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(malformed());
    }

    let payload = match serde_json::from_slice::<Value>(body).map_err(|_| malformed())? {
        Value::String(inner) => serde_json::from_str::<Value>(&inner).map_err(|_| malformed())?,
        other => other,
    };

    let has_event_type = payload
        .get("event_type")
        .and_then(Value::as_str)
        .map(|t| !t.is_empty())
        .unwrap_or(false);

    if !has_event_type {
        return Err(malformed());
    }
    Ok(payload)
}

/// Decodes the typed event field by field, so one mistyped field only loses
/// that field. Scalar ids are kept as text.
fn decode_event(payload: &Value) -> Result<WebhookEvent, AppError> {
    let event_type = payload
        .get("event_type")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::MalformedRequest(MISSING_EVENT_TYPE.to_string()))?;
    let text = |key: &str| payload.get(key).and_then(scalar_text);

    let resource = payload
        .get("resource")
        .filter(|r| !r.is_null())
        .map(|r| decode_resource(r, event_type));

    Ok(WebhookEvent {
        id: text("id"),
        event_type: event_type.to_string(),
        event_version: text("event_version"),
        create_time: text("create_time"),
        resource_type: text("resource_type"),
        summary: text("summary"),
        resource,
    })
}

fn decode_resource(resource: &Value, event_type: &str) -> Resource {
    match serde_json::from_value::<Resource>(resource.clone()) {
        Ok(resource) => resource,
        Err(err) => {
            tracing::warn!(error = %err, event_type, "Webhook resource did not match the capture schema");
            let text = |key: &str| resource.get(key).and_then(scalar_text);
            Resource {
                id: text("id"),
                status: text("status"),
                amount: field(resource, "amount"),
                final_capture: resource.get("final_capture").and_then(Value::as_bool),
                reason_code: text("reason_code"),
                status_details: field(resource, "status_details"),
                payer: field(resource, "payer"),
                supplementary_data: field(resource, "supplementary_data"),
            }
        }
    }
}

fn field<T: DeserializeOwned>(value: &Value, key: &str) -> Option<T> {
    value
        .get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn into_processing_error(err: AppError) -> AppError {
    match err {
        AppError::Processing(msg) | AppError::Internal(msg) => AppError::Processing(msg),
        other => AppError::Processing(other.to_string()),
    }
}

// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::success(HealthStatus {
        status: "ok".to_string(),
        paypal_environment: state.config.paypal.environment.as_str().to_string(),
        signature_verification: state.config.paypal.webhook_id.is_some(),
        idempotency_backend: state.config.idempotency.backend.as_str().to_string(),
    }))
}
