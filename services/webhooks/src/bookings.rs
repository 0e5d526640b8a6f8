use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use payhook_common::AppError;
use crate::models::{BookingStatus, StatusChange, StatusMetadata};

/// Persistence boundary for the order/booking records that payments settle.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Sets the order's status. Reported as [`StatusChange::Unchanged`], with
    /// nothing written, when the order already has `status` or when this
    /// transaction was already moved to `status` earlier, even if the order
    /// has changed status since.
    async fn upsert_order_status(
        &self,
        order_id: &str,
        status: BookingStatus,
        metadata: StatusMetadata,
    ) -> Result<StatusChange, AppError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingRecord {
    pub order_id: String,
    pub status: BookingStatus,
    pub metadata: StatusMetadata,
}

struct BookingEntry {
    record: BookingRecord,
    // (status, transaction id) pairs applied to this order so far
    applied: HashSet<(BookingStatus, String)>,
}

/// Keeps booking records in process memory.
#[derive(Clone, Default)]
pub struct InMemoryBookingRepository {
    records: Arc<RwLock<HashMap<String, BookingEntry>>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, order_id: &str) -> Option<BookingRecord> {
        self.records
            .read()
            .await
            .get(order_id)
            .map(|entry| entry.record.clone())
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn upsert_order_status(
        &self,
        order_id: &str,
        status: BookingStatus,
        metadata: StatusMetadata,
    ) -> Result<StatusChange, AppError> {
        let mut records = self.records.write().await;
        let transition = metadata
            .transaction_id
            .clone()
            .map(|transaction_id| (status, transaction_id));

        let previous = match records.get(order_id) {
            Some(entry) => {
                let replayed = transition
                    .as_ref()
                    .map(|t| entry.applied.contains(t))
                    .unwrap_or(false);
                if entry.record.status == status || replayed {
                    tracing::debug!(
                        order_id,
                        status = status.as_str(),
                        current = entry.record.status.as_str(),
                        "Booking transition already applied"
                    );
                    return Ok(StatusChange::Unchanged);
                }
                Some(entry.record.status)
            }
            None => None,
        };

        let entry = records
            .entry(order_id.to_string())
            .or_insert_with(|| BookingEntry {
                record: BookingRecord {
                    order_id: order_id.to_string(),
                    status,
                    metadata: metadata.clone(),
                },
                applied: HashSet::new(),
            });
        entry.record.status = status;
        entry.record.metadata = metadata;
        entry.applied.extend(transition);

        tracing::debug!(
            order_id,
            status = status.as_str(),
            previous = ?previous.map(|s| s.as_str()),
            "Booking status updated"
        );
        Ok(StatusChange::Changed { previous })
    }
}
