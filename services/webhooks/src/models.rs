use std::fmt;
use std::str::FromStr;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// Signature headers sent by PayPal with every webhook delivery
pub const HEADER_AUTH_ALGO: &str = "paypal-auth-algo";
pub const HEADER_CERT_URL: &str = "paypal-cert-url";
pub const HEADER_TRANSMISSION_ID: &str = "paypal-transmission-id";
pub const HEADER_TRANSMISSION_SIG: &str = "paypal-transmission-sig";
pub const HEADER_TRANSMISSION_TIME: &str = "paypal-transmission-time";

// Webhook Models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub event_version: Option<String>,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub resource: Option<Resource>,
}

impl WebhookEvent {
    pub fn kind(&self) -> EventType {
        EventType::parse(&self.event_type)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.create_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Event id for log fields; deliveries without one are logged as `-`.
    pub fn id_or_placeholder(&self) -> &str {
        self.id.as_deref().unwrap_or("-")
    }
}

/// Capture resource attached to `PAYMENT.CAPTURE.*` events. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub final_capture: Option<bool>,
    #[serde(default)]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub status_details: Option<StatusDetails>,
    #[serde(default)]
    pub payer: Option<Payer>,
    #[serde(default)]
    pub supplementary_data: Option<SupplementaryData>,
}

impl Resource {
    pub fn order_id(&self) -> Option<&str> {
        self.supplementary_data
            .as_ref()
            .and_then(|s| s.related_ids.as_ref())
            .and_then(|r| r.order_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason_code
            .as_deref()
            .or_else(|| self.status_details.as_ref().and_then(|d| d.reason.as_deref()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub value: String,
    pub currency_code: String,
}

impl Money {
    pub fn as_decimal(&self) -> Option<Decimal> {
        Decimal::from_str(self.value.trim()).ok()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusDetails {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplementaryData {
    #[serde(default)]
    pub related_ids: Option<RelatedIds>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelatedIds {
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payer {
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub payer_id: Option<String>,
    #[serde(default)]
    pub name: Option<PayerName>,
}

impl Payer {
    /// Best human-facing identifier: email, then full name.
    pub fn display(&self) -> Option<String> {
        if let Some(email) = &self.email_address {
            return Some(email.clone());
        }
        let name = self.name.as_ref()?;
        let parts: Vec<&str> = [name.given_name.as_deref(), name.surname.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayerName {
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    CaptureCompleted,
    CaptureDenied,
    CaptureRefunded,
    CapturePending,
    CaptureReversed,
    Unknown(String),
}

impl EventType {
    pub fn parse(value: &str) -> Self {
        match value {
            "PAYMENT.CAPTURE.COMPLETED" => EventType::CaptureCompleted,
            "PAYMENT.CAPTURE.DENIED" => EventType::CaptureDenied,
            "PAYMENT.CAPTURE.REFUNDED" => EventType::CaptureRefunded,
            "PAYMENT.CAPTURE.PENDING" => EventType::CapturePending,
            "PAYMENT.CAPTURE.REVERSED" => EventType::CaptureReversed,
            other => EventType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventType::CaptureCompleted => "PAYMENT.CAPTURE.COMPLETED",
            EventType::CaptureDenied => "PAYMENT.CAPTURE.DENIED",
            EventType::CaptureRefunded => "PAYMENT.CAPTURE.REFUNDED",
            EventType::CapturePending => "PAYMENT.CAPTURE.PENDING",
            EventType::CaptureReversed => "PAYMENT.CAPTURE.REVERSED",
            EventType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Failed,
    Refunded,
    Pending,
    Reversed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Failed => "failed",
            BookingStatus::Refunded => "refunded",
            BookingStatus::Pending => "pending",
            BookingStatus::Reversed => "reversed",
        }
    }
}

/// Details stored alongside a booking status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMetadata {
    pub event_id: Option<String>,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub reason: Option<String>,
    pub payer: Option<String>,
    pub capture_status: Option<String>,
    pub final_capture: Option<bool>,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of an order status upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Changed { previous: Option<BookingStatus> },
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationDetails {
    pub transaction_id: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub payer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub auth_algo: String,
    pub cert_url: String,
    pub transmission_id: String,
    pub transmission_sig: String,
    pub transmission_time: String,
}

impl SignatureHeaders {
    /// Reads all five signature headers, returning the name of the first missing one.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, &'static str> {
        let read = |name: &'static str| -> Result<String, &'static str> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(name)
        };

        Ok(Self {
            auth_algo: read(HEADER_AUTH_ALGO)?,
            cert_url: read(HEADER_CERT_URL)?,
            transmission_id: read(HEADER_TRANSMISSION_ID)?,
            transmission_sig: read(HEADER_TRANSMISSION_SIG)?,
            transmission_time: read(HEADER_TRANSMISSION_TIME)?,
        })
    }
}

// Response Models
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub event_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub paypal_environment: String,
    pub signature_verification: bool,
    pub idempotency_backend: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_event_type_round_trip_and_unknown() {
        assert_eq!(EventType::parse("PAYMENT.CAPTURE.COMPLETED"), EventType::CaptureCompleted);
        assert_eq!(EventType::parse("PAYMENT.CAPTURE.REVERSED").as_str(), "PAYMENT.CAPTURE.REVERSED");

        let unknown = EventType::parse("CHECKOUT.ORDER.APPROVED");
        assert_eq!(unknown, EventType::Unknown("CHECKOUT.ORDER.APPROVED".to_string()));
        assert_eq!(unknown.to_string(), "CHECKOUT.ORDER.APPROVED");

        // Matching is exact, not case-insensitive
        assert!(matches!(EventType::parse("payment.capture.completed"), EventType::Unknown(_)));
    }

    #[test]
    fn test_parse_capture_event() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "id": "WH-1",
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "create_time": "2024-03-01T10:00:00Z",
            "resource": {
                "id": "TX-1",
                "status": "COMPLETED",
                "amount": { "value": "0.05", "currency_code": "USD" },
                "final_capture": true,
                "seller_protection": { "status": "ELIGIBLE" },
                "payer": { "name": { "given_name": "Ada", "surname": "Lovelace" } },
                "supplementary_data": { "related_ids": { "order_id": "ORD-1" } }
            }
        }))
        .unwrap();

        assert_eq!(event.kind(), EventType::CaptureCompleted);
        assert!(event.created_at().is_some());

        let resource = event.resource.unwrap();
        assert_eq!(resource.order_id(), Some("ORD-1"));
        assert_eq!(resource.amount.as_ref().unwrap().as_decimal(), Some(Decimal::new(5, 2)));
        assert_eq!(resource.payer.unwrap().display().as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_reason_falls_back_to_status_details() {
        let resource: Resource = serde_json::from_value(json!({
            "status_details": { "reason": "PENDING_REVIEW" }
        }))
        .unwrap();
        assert_eq!(resource.reason(), Some("PENDING_REVIEW"));
        assert_eq!(resource.order_id(), None);
    }

    #[test]
    fn test_signature_headers_report_missing_name() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_AUTH_ALGO, HeaderValue::from_static("SHA256withRSA"));
        headers.insert(HEADER_CERT_URL, HeaderValue::from_static("https://example.test/cert"));
        headers.insert(HEADER_TRANSMISSION_ID, HeaderValue::from_static("tx-id"));
        headers.insert(HEADER_TRANSMISSION_SIG, HeaderValue::from_static("sig"));

        assert_eq!(SignatureHeaders::from_headers(&headers), Err(HEADER_TRANSMISSION_TIME));

        headers.insert(HEADER_TRANSMISSION_TIME, HeaderValue::from_static("2024-03-01T10:00:00Z"));
        let parsed = SignatureHeaders::from_headers(&headers).unwrap();
        assert_eq!(parsed.transmission_id, "tx-id");
    }

    #[test]
    fn test_ack_serializes_camel_case() {
        let ack = WebhookAck {
            received: true,
            event_id: Some("WH-1".to_string()),
            event_type: "PAYMENT.CAPTURE.COMPLETED".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            json!({ "received": true, "eventId": "WH-1", "eventType": "PAYMENT.CAPTURE.COMPLETED" })
        );
    }
}
