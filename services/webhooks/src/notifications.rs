use async_trait::async_trait;

use payhook_common::AppError;
use crate::models::ConfirmationDetails;

/// Sends the customer-facing confirmation once a payment is captured.
#[async_trait]
pub trait ConfirmationNotifier: Send + Sync {
    async fn send_confirmation(&self, order_id: &str, details: &ConfirmationDetails) -> Result<(), AppError>;
}

/// Records confirmations in the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl ConfirmationNotifier for LoggingNotifier {
    async fn send_confirmation(&self, order_id: &str, details: &ConfirmationDetails) -> Result<(), AppError> {
        tracing::info!(
            order_id,
            transaction_id = ?details.transaction_id,
            amount = ?details.amount,
            currency = ?details.currency,
            payer = ?details.payer,
            "Payment confirmation ready for delivery"
        );
        Ok(())
    }
}
