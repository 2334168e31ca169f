//! Bridge from confirmed reservations to the searchable catalog.
//!
//! Each [`ReservationEvent`] on the ticketing channel becomes a catalog row.
//! The row id is the resource id, so a redelivered event rewrites the same
//! row instead of adding a second one. Writing the row is what makes the
//! change stream emit the record the projection consumes.

use async_trait::async_trait;
use sentinel_core::catalog::{CatalogEntry, CatalogError, CatalogStore, TICKETING_CATEGORY};
use sentinel_core::dead_letter::{DeadLetter, DeadLetterError, DeadLetterSink};
use sentinel_core::environment::Clock;
use sentinel_core::event::ReservationEvent;
use sentinel_core::event_bus::Delivery;
use sentinel_core::projection::Metadata;
use sentinel_runtime::metrics::IngestMetrics;
use sentinel_runtime::retry::{RetryPolicy, retry_with_predicate};
use sentinel_runtime::{DeliveryHandler, HandlerError};
use serde_json::Value;
use std::sync::Arc;

/// Value of the `source` metadata field on ingested rows.
pub const SOURCE: &str = "SENTINEL";

/// Title prefix of ingested rows.
pub const TITLE_PREFIX: &str = "Seat Reservation: ";

/// Catalog row for a confirmed reservation.
#[must_use]
pub fn catalog_entry(event: &ReservationEvent) -> CatalogEntry {
    let seat_id = event.resource_id.to_string();
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), Value::from(SOURCE));
    metadata.insert("external_status".to_string(), Value::from(event.status.clone()));
    metadata.insert("seat_id".to_string(), Value::from(seat_id.clone()));
    metadata.insert(
        "occurred_at".to_string(),
        Value::from(event.occurred_at.to_rfc3339()),
    );
    metadata.insert("event_id".to_string(), Value::from(event.event_id.to_string()));

    CatalogEntry {
        title: format!("{TITLE_PREFIX}{seat_id}"),
        id: seat_id,
        category: TICKETING_CATEGORY.to_string(),
        status: event.status.clone(),
        metadata,
    }
}

/// Delivery handler of the ticketing channel.
///
/// Payloads that are not reservation events, and events whose row could not
/// be written within the retry budget, go to the dead-letter sink and are
/// then acknowledged. Only a failed dead-letter hand-off leaves the delivery
/// unacknowledged.
#[derive(Clone)]
pub struct ReservationIngestor {
    catalog: Arc<dyn CatalogStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ReservationIngestor {
    /// Create an ingestor writing to `catalog`.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            dead_letters,
            retry,
            clock,
        }
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        error: String,
        attempts: u32,
    ) -> Result<(), DeadLetterError> {
        self.dead_letters
            .send(DeadLetter {
                source_topic: delivery.topic.clone(),
                key: delivery.key.clone(),
                payload: delivery.payload.clone(),
                error,
                attempts,
                failed_at: self.clock.now(),
            })
            .await
    }
}

#[async_trait]
impl DeliveryHandler for ReservationIngestor {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let event = match ReservationEvent::from_json(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    key = ?delivery.key,
                    payload = %delivery.payload_text(),
                    error = %e,
                    "Malformed reservation event"
                );
                IngestMetrics::record("malformed");
                self.dead_letter(&delivery, e.to_string(), 1).await?;
                delivery.ack();
                return Ok(());
            }
        };

        let entry = catalog_entry(&event);
        let stored = retry_with_predicate(
            &self.retry,
            || self.catalog.upsert(entry.clone()),
            |e| matches!(e, CatalogError::Unavailable(_)),
        )
        .await;

        match stored {
            Ok(()) => {
                tracing::info!(
                    seat_id = %event.resource_id,
                    event_id = %event.event_id,
                    "Reservation persisted to catalog"
                );
                IngestMetrics::record("stored");
            }
            Err(failure) => {
                tracing::error!(
                    seat_id = %event.resource_id,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Reservation could not be persisted to catalog"
                );
                IngestMetrics::record("failed");
                self.dead_letter(&delivery, failure.error.to_string(), failure.attempts)
                    .await?;
            }
        }

        delivery.ack();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use futures::channel::oneshot;
    use sentinel_core::resource::ResourceId;
    use sentinel_testing::{InMemoryDeadLetterSink, test_clock};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Catalog that fails its first `failures` writes.
    #[derive(Default)]
    struct FlakyCatalog {
        failures: AtomicU32,
        rows: Mutex<Vec<CatalogEntry>>,
    }

    #[async_trait]
    impl CatalogStore for FlakyCatalog {
        async fn upsert(&self, entry: CatalogEntry) -> Result<(), CatalogError> {
            let left = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if left.is_ok() {
                return Err(CatalogError::Unavailable("connection reset".to_string()));
            }
            self.rows.lock().unwrap().push(entry);
            Ok(())
        }

        async fn get(&self, id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
            Ok(self.rows.lock().unwrap().iter().rev().find(|e| e.id == id).cloned())
        }
    }

    fn ingestor(catalog: Arc<FlakyCatalog>, sink: &InMemoryDeadLetterSink) -> ReservationIngestor {
        ReservationIngestor::new(
            catalog,
            Arc::new(sink.clone()),
            RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(100))
                .build(),
            Arc::new(test_clock()),
        )
    }

    fn delivery(payload: Vec<u8>) -> (Delivery, oneshot::Receiver<()>) {
        Delivery::acknowledgeable("ticketing".to_string(), Some("42".to_string()), payload, 0, 3)
    }

    fn event() -> ReservationEvent {
        ReservationEvent::reserved(ResourceId(42), &test_clock())
    }

    #[test]
    fn maps_event_to_catalog_row() {
        let event = event();
        let entry = catalog_entry(&event);
        assert_eq!(entry.id, "42");
        assert_eq!(entry.title, "Seat Reservation: 42");
        assert_eq!(entry.category, "TICKETING");
        assert_eq!(entry.status, "RESERVED");
        assert_eq!(entry.metadata["source"], "SENTINEL");
        assert_eq!(entry.metadata["external_status"], "RESERVED");
        assert_eq!(entry.metadata["seat_id"], "42");
        assert_eq!(
            entry.metadata["occurred_at"],
            Value::from(event.occurred_at.to_rfc3339())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stores_after_transient_failures() {
        let catalog = Arc::new(FlakyCatalog::default());
        catalog.failures.store(2, Ordering::SeqCst);
        let sink = InMemoryDeadLetterSink::new();
        let (delivery, acked) = delivery(event().to_json().unwrap());

        ingestor(Arc::clone(&catalog), &sink).handle(delivery).await.unwrap();

        assert!(acked.await.is_ok());
        assert_eq!(catalog.get("42").await.unwrap().unwrap().status, "RESERVED");
        assert!(sink.letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_writes_are_dead_lettered() {
        let catalog = Arc::new(FlakyCatalog::default());
        catalog.failures.store(u32::MAX, Ordering::SeqCst);
        let sink = InMemoryDeadLetterSink::new();
        let payload = event().to_json().unwrap();
        let (delivery, acked) = delivery(payload.clone());

        ingestor(catalog, &sink).handle(delivery).await.unwrap();

        assert!(acked.await.is_ok());
        let letters = sink.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 3);
        assert_eq!(letters[0].payload, payload);
        assert_eq!(letters[0].source_topic, "ticketing");
    }

    #[tokio::test]
    async fn malformed_payload_is_dead_lettered_and_acked() {
        let catalog = Arc::new(FlakyCatalog::default());
        let sink = InMemoryDeadLetterSink::new();
        let (delivery, acked) = delivery(b"not an event".to_vec());

        ingestor(Arc::clone(&catalog), &sink).handle(delivery).await.unwrap();

        assert!(acked.await.is_ok());
        assert_eq!(sink.letters()[0].attempts, 1);
        assert!(catalog.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_hand_off_leaves_delivery_unacked() {
        let catalog = Arc::new(FlakyCatalog::default());
        let sink = InMemoryDeadLetterSink::new();
        sink.set_fail(true);
        let (delivery, acked) = delivery(b"{}".to_vec());

        assert!(ingestor(catalog, &sink).handle(delivery).await.is_err());
        assert!(acked.await.is_err());
    }
}
