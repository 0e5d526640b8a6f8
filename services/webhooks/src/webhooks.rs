use std::sync::Arc;

use chrono::Utc;

use payhook_common::AppError;
use crate::{
    bookings::BookingRepository,
    idempotency::ProcessedEventStore,
    models::{
        BookingStatus, ConfirmationDetails, EventType, Resource, StatusChange, StatusMetadata,
        WebhookEvent,
    },
    notifications::ConfirmationNotifier,
};

/// What happened to a verified event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled(EventType),
    /// The event id was already processed within the de-duplication window.
    Duplicate,
    /// No handler exists for this event type; acknowledged so the sender stops retrying.
    Ignored(String),
}

#[derive(Clone)]
pub struct WebhookProcessor {
    bookings: Arc<dyn BookingRepository>,
    notifier: Arc<dyn ConfirmationNotifier>,
    processed: Arc<dyn ProcessedEventStore>,
}

impl WebhookProcessor {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        notifier: Arc<dyn ConfirmationNotifier>,
        processed: Arc<dyn ProcessedEventStore>,
    ) -> Self {
        Self {
            bookings,
            notifier,
            processed,
        }
    }

    /// Routes a verified event to its handler, at most once per event id.
    pub async fn process_event(&self, event: &WebhookEvent) -> Result<DispatchOutcome, AppError> {
        let kind = event.kind();

        tracing::info!(
            event_id = event.id_or_placeholder(),
            event_type = %kind,
            create_time = ?event.create_time,
            "Processing webhook event"
        );

        if let EventType::Unknown(event_type) = &kind {
            tracing::info!(event_id = event.id_or_placeholder(), event_type = %event_type, "Unhandled webhook event type");
            return Ok(DispatchOutcome::Ignored(event_type.clone()));
        }

        if let Some(event_id) = event.id.as_deref() {
            if !self.processed.try_claim(event_id).await? {
                tracing::info!(event_id, event_type = %kind, "Skipping already processed event");
                return Ok(DispatchOutcome::Duplicate);
            }
        }

        let default_resource = Resource::default();
        let resource = event.resource.as_ref().unwrap_or(&default_resource);

        let result = match &kind {
            EventType::CaptureCompleted => self.handle_payment_capture_completed(resource, event).await,
            EventType::CaptureDenied => self.handle_payment_capture_denied(resource, event).await,
            EventType::CaptureRefunded => self.handle_payment_refunded(resource, event).await,
            EventType::CapturePending => self.handle_payment_capture_pending(resource, event).await,
            EventType::CaptureReversed => self.handle_payment_capture_reversed(resource, event).await,
            EventType::Unknown(_) => Ok(()),
        };

        if let Err(err) = &result {
            tracing::error!(
                event_id = event.id_or_placeholder(),
                event_type = %kind,
                error = %err,
                "Webhook handler failed"
            );
            // Let the sender's redelivery run the handler again
            if let Some(event_id) = event.id.as_deref() {
                if let Err(release_err) = self.processed.release(event_id).await {
                    tracing::error!(event_id, error = %release_err, "Failed to release processed-event claim");
                }
            }
        }

        result.map(|_| DispatchOutcome::Handled(kind))
    }

    async fn handle_payment_capture_completed(
        &self,
        resource: &Resource,
        event: &WebhookEvent,
    ) -> Result<(), AppError> {
        let amount = resource.amount.as_ref();
        let payer = resource.payer.as_ref().and_then(|p| p.display());

        tracing::info!(
            transaction_id = ?resource.id,
            order_id = ?resource.order_id(),
            amount = ?amount.map(|a| a.value.as_str()),
            currency = ?amount.map(|a| a.currency_code.as_str()),
            status = ?resource.status,
            final_capture = ?resource.final_capture,
            event_id = event.id_or_placeholder(),
            "Payment captured successfully"
        );

        let mut metadata = base_metadata(resource, event);
        metadata.payer = payer.clone();
        metadata.capture_status = resource.status.clone();
        metadata.final_capture = resource.final_capture;

        let Some((order_id, change)) = self
            .transition(resource, BookingStatus::Confirmed, metadata)
            .await?
        else {
            return Ok(());
        };

        if change == StatusChange::Unchanged {
            tracing::info!(order_id, "Capture already applied to booking; confirmation not resent");
            return Ok(());
        }

        let details = ConfirmationDetails {
            transaction_id: resource.id.clone(),
            amount: amount.map(|a| a.value.clone()),
            currency: amount.map(|a| a.currency_code.clone()),
            payer,
        };

        // The status change is already recorded; a failed notification must not undo it
        if let Err(err) = self.notifier.send_confirmation(order_id, &details).await {
            tracing::error!(order_id, error = %err, "Failed to send payment confirmation");
        }

        Ok(())
    }

    async fn handle_payment_capture_denied(
        &self,
        resource: &Resource,
        event: &WebhookEvent,
    ) -> Result<(), AppError> {
        tracing::info!(
            transaction_id = ?resource.id,
            order_id = ?resource.order_id(),
            reason = ?resource.reason(),
            status = ?resource.status,
            event_id = event.id_or_placeholder(),
            "Payment capture denied"
        );

        let mut metadata = base_metadata(resource, event);
        metadata.reason = resource.reason().map(str::to_string);
        metadata.capture_status = resource.status.clone();

        self.transition(resource, BookingStatus::Failed, metadata).await?;
        Ok(())
    }

    async fn handle_payment_refunded(
        &self,
        resource: &Resource,
        event: &WebhookEvent,
    ) -> Result<(), AppError> {
        let amount = resource.amount.as_ref();

        tracing::info!(
            transaction_id = ?resource.id,
            order_id = ?resource.order_id(),
            amount = ?amount.map(|a| a.value.as_str()),
            currency = ?amount.map(|a| a.currency_code.as_str()),
            event_id = event.id_or_placeholder(),
            "Payment refunded"
        );

        self.transition(resource, BookingStatus::Refunded, base_metadata(resource, event))
            .await?;
        Ok(())
    }

    async fn handle_payment_capture_pending(
        &self,
        resource: &Resource,
        event: &WebhookEvent,
    ) -> Result<(), AppError> {
        tracing::info!(
            transaction_id = ?resource.id,
            order_id = ?resource.order_id(),
            reason = ?resource.reason(),
            event_id = event.id_or_placeholder(),
            "Payment capture pending"
        );

        let mut metadata = base_metadata(resource, event);
        metadata.reason = resource.reason().map(str::to_string);

        self.transition(resource, BookingStatus::Pending, metadata).await?;
        Ok(())
    }

    async fn handle_payment_capture_reversed(
        &self,
        resource: &Resource,
        event: &WebhookEvent,
    ) -> Result<(), AppError> {
        tracing::info!(
            transaction_id = ?resource.id,
            order_id = ?resource.order_id(),
            event_id = event.id_or_placeholder(),
            "Payment capture reversed"
        );

        self.transition(resource, BookingStatus::Reversed, base_metadata(resource, event))
            .await?;
        Ok(())
    }

    /// Upserts the correlated booking. Without an order id there is nothing to update.
    async fn transition<'r>(
        &self,
        resource: &'r Resource,
        status: BookingStatus,
        metadata: StatusMetadata,
    ) -> Result<Option<(&'r str, StatusChange)>, AppError> {
        let Some(order_id) = resource.order_id() else {
            tracing::warn!(
                transaction_id = ?resource.id,
                status = status.as_str(),
                "Capture has no related order id; booking status not updated"
            );
            return Ok(None);
        };

        let change = self
            .bookings
            .upsert_order_status(order_id, status, metadata)
            .await?;
        Ok(Some((order_id, change)))
    }
}

fn base_metadata(resource: &Resource, event: &WebhookEvent) -> StatusMetadata {
    let amount = resource.amount.as_ref();
    StatusMetadata {
        event_id: event.id.clone(),
        transaction_id: resource.id.clone(),
        amount: amount.and_then(|a| a.as_decimal()),
        currency: amount.map(|a| a.currency_code.clone()),
        reason: None,
        payer: None,
        capture_status: None,
        final_capture: None,
        recorded_at: event.created_at().unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::json;

    use crate::bookings::InMemoryBookingRepository;
    use crate::idempotency::MemoryProcessedEventStore;

    #[derive(Default)]
    struct CountingNotifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ConfirmationNotifier for CountingNotifier {
        async fn send_confirmation(&self, _order_id: &str, _details: &ConfirmationDetails) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingRepository;

    #[async_trait]
    impl BookingRepository for FailingRepository {
        async fn upsert_order_status(
            &self,
            _order_id: &str,
            _status: BookingStatus,
            _metadata: StatusMetadata,
        ) -> Result<StatusChange, AppError> {
            Err(AppError::Internal("database unavailable".to_string()))
        }
    }

    struct Harness {
        processor: WebhookProcessor,
        bookings: InMemoryBookingRepository,
        notifier: Arc<CountingNotifier>,
    }

    fn harness() -> Harness {
        let bookings = InMemoryBookingRepository::new();
        let notifier = Arc::new(CountingNotifier::default());
        let processor = WebhookProcessor::new(
            Arc::new(bookings.clone()),
            notifier.clone(),
            Arc::new(MemoryProcessedEventStore::new(3600)),
        );
        Harness {
            processor,
            bookings,
            notifier,
        }
    }

    fn event(id: &str, event_type: &str, order_id: Option<&str>) -> WebhookEvent {
        let mut resource = json!({
            "id": "TX-1",
            "status": "COMPLETED",
            "amount": { "value": "0.05", "currency_code": "USD" },
            "reason_code": "PAYER_CANNOT_PAY"
        });
        if let Some(order_id) = order_id {
            resource["supplementary_data"] = json!({ "related_ids": { "order_id": order_id } });
        }
        serde_json::from_value(json!({
            "id": id,
            "event_type": event_type,
            "create_time": "2024-03-01T10:00:00Z",
            "resource": resource
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_completed_capture_confirms_and_notifies() {
        let h = harness();

        let outcome = h
            .processor
            .process_event(&event("WH-1", "PAYMENT.CAPTURE.COMPLETED", Some("ORD-1")))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Handled(EventType::CaptureCompleted));
        let record = h.bookings.get("ORD-1").await.unwrap();
        assert_eq!(record.status, BookingStatus::Confirmed);
        assert_eq!(record.metadata.transaction_id.as_deref(), Some("TX-1"));
        assert_eq!(record.metadata.amount, Some(Decimal::new(5, 2)));
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completed_handler_is_idempotent_per_order() {
        let h = harness();

        // Distinct event ids bypass the de-duplication store, so the handler itself must be idempotent
        for id in ["WH-1", "WH-2"] {
            h.processor
                .process_event(&event(id, "PAYMENT.CAPTURE.COMPLETED", Some("ORD-1")))
                .await
                .unwrap();
        }

        assert_eq!(h.bookings.get("ORD-1").await.unwrap().status, BookingStatus::Confirmed);
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completed_replay_after_refund_keeps_refund() {
        let h = harness();

        for (id, event_type) in [
            ("WH-1", "PAYMENT.CAPTURE.COMPLETED"),
            ("WH-2", "PAYMENT.CAPTURE.REFUNDED"),
            ("WH-3", "PAYMENT.CAPTURE.COMPLETED"),
        ] {
            h.processor
                .process_event(&event(id, event_type, Some("ORD-1")))
                .await
                .unwrap();
        }

        assert_eq!(h.bookings.get("ORD-1").await.unwrap().status, BookingStatus::Refunded);
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_redelivered_event_id_is_duplicate() {
        let h = harness();
        let delivery = event("WH-1", "PAYMENT.CAPTURE.REFUNDED", Some("ORD-1"));

        assert_eq!(
            h.processor.process_event(&delivery).await.unwrap(),
            DispatchOutcome::Handled(EventType::CaptureRefunded)
        );
        assert_eq!(h.processor.process_event(&delivery).await.unwrap(), DispatchOutcome::Duplicate);
        assert_eq!(h.bookings.get("ORD-1").await.unwrap().status, BookingStatus::Refunded);
    }

    #[tokio::test]
    async fn test_each_known_type_maps_to_status() {
        let cases = [
            ("PAYMENT.CAPTURE.COMPLETED", BookingStatus::Confirmed),
            ("PAYMENT.CAPTURE.DENIED", BookingStatus::Failed),
            ("PAYMENT.CAPTURE.REFUNDED", BookingStatus::Refunded),
            ("PAYMENT.CAPTURE.PENDING", BookingStatus::Pending),
            ("PAYMENT.CAPTURE.REVERSED", BookingStatus::Reversed),
        ];

        for (event_type, expected) in cases {
            let h = harness();
            h.processor
                .process_event(&event("WH-1", event_type, Some("ORD-1")))
                .await
                .unwrap();
            assert_eq!(h.bookings.get("ORD-1").await.unwrap().status, expected, "{}", event_type);
        }
    }

    #[tokio::test]
    async fn test_denied_capture_records_reason() {
        let h = harness();

        h.processor
            .process_event(&event("WH-1", "PAYMENT.CAPTURE.DENIED", Some("ORD-1")))
            .await
            .unwrap();

        let record = h.bookings.get("ORD-1").await.unwrap();
        assert_eq!(record.metadata.reason.as_deref(), Some("PAYER_CANNOT_PAY"));
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_ignored() {
        let h = harness();

        let outcome = h
            .processor
            .process_event(&event("WH-1", "CHECKOUT.ORDER.APPROVED", Some("ORD-1")))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Ignored("CHECKOUT.ORDER.APPROVED".to_string()));
        assert!(h.bookings.get("ORD-1").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_order_id_skips_transition() {
        let h = harness();

        let outcome = h
            .processor
            .process_event(&event("WH-1", "PAYMENT.CAPTURE.COMPLETED", None))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Handled(EventType::CaptureCompleted));
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_handler_releases_claim() {
        let processed = Arc::new(MemoryProcessedEventStore::new(3600));
        let processor = WebhookProcessor::new(
            Arc::new(FailingRepository),
            Arc::new(CountingNotifier::default()),
            processed.clone(),
        );

        let delivery = event("WH-1", "PAYMENT.CAPTURE.COMPLETED", Some("ORD-1"));
        assert!(processor.process_event(&delivery).await.is_err());

        // Released, so the redelivery is attempted again rather than skipped
        assert!(processed.is_empty().await);
        assert!(processor.process_event(&delivery).await.is_err());
    }
}
