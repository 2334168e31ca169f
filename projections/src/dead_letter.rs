//! The dead-letter channel.
//!
//! [`BusDeadLetterSink`] republishes given-up records to `<topic>.dlt` with
//! their original key and payload. [`DeadLetterHandler`] is the channel's
//! terminal consumer: every record is filed in a [`DeadLetterArchive`] and only
//! then acknowledged. The channel carries the original payload and key with
//! no failure details, so archived entries name the source topic (the channel
//! name minus its suffix) and a fixed reason.

use async_trait::async_trait;
use sentinel_core::dead_letter::{DeadLetter, DeadLetterArchive, DeadLetterError, DeadLetterSink};
use sentinel_core::environment::Clock;
use sentinel_core::event_bus::{Delivery, EventBus};
use sentinel_runtime::metrics::DeadLetterMetrics;
use sentinel_runtime::{DeliveryHandler, HandlerError};
use std::sync::Arc;

/// Suffix appended to a topic name to form its dead-letter channel.
pub const DEAD_LETTER_SUFFIX: &str = ".dlt";

/// Reason recorded for letters read back from the channel.
pub const CHANNEL_REASON: &str = "received on dead-letter channel";

/// Dead-letter channel name for `topic`.
#[must_use]
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DEAD_LETTER_SUFFIX}")
}

/// Dead-letter sink that republishes to the source topic's dead-letter channel.
#[derive(Clone)]
pub struct BusDeadLetterSink {
    bus: Arc<dyn EventBus>,
}

impl BusDeadLetterSink {
    /// Create a sink publishing through `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl DeadLetterSink for BusDeadLetterSink {
    async fn send(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        let topic = dead_letter_topic(&letter.source_topic);
        self.bus
            .publish(&topic, letter.key.as_deref().unwrap_or_default(), &letter.payload)
            .await
            .map_err(|e| DeadLetterError::HandOffFailed(e.to_string()))?;
        tracing::debug!(%topic, key = ?letter.key, attempts = letter.attempts, "Dead letter published");
        Ok(())
    }
}

/// Archives dead-lettered records.
#[derive(Clone)]
pub struct DeadLetterHandler {
    archive: Arc<dyn DeadLetterArchive>,
    clock: Arc<dyn Clock>,
}

impl DeadLetterHandler {
    /// Create a handler filing into `archive`.
    #[must_use]
    pub fn new(archive: Arc<dyn DeadLetterArchive>, clock: Arc<dyn Clock>) -> Self {
        Self { archive, clock }
    }

    fn letter(&self, delivery: &Delivery) -> DeadLetter {
        let source_topic = delivery
            .topic
            .strip_suffix(DEAD_LETTER_SUFFIX)
            .unwrap_or(&delivery.topic)
            .to_string();
        DeadLetter {
            source_topic,
            key: delivery.key.clone(),
            payload: delivery.payload.clone(),
            error: CHANNEL_REASON.to_string(),
            attempts: 0,
            failed_at: self.clock.now(),
        }
    }
}

#[async_trait]
impl DeliveryHandler for DeadLetterHandler {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let letter = self.letter(&delivery);
        let id = self.archive.archive(&letter).await?;
        tracing::warn!(
            archive_id = id,
            source_topic = %letter.source_topic,
            key = ?letter.key,
            payload = %letter.payload_text(),
            "Dead letter archived"
        );
        DeadLetterMetrics::record_archived();
        delivery.ack();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use sentinel_core::dead_letter::DeadLetterStatus;
    use sentinel_testing::{InMemoryDeadLetterArchive, InMemoryEventBus, test_clock};

    fn handler(archive: &InMemoryDeadLetterArchive) -> DeadLetterHandler {
        DeadLetterHandler::new(Arc::new(archive.clone()), Arc::new(test_clock()))
    }

    #[test]
    fn topic_naming() {
        assert_eq!(dead_letter_topic("cdc-events"), "cdc-events.dlt");
    }

    #[tokio::test]
    async fn sink_republishes_key_and_payload() {
        let bus = InMemoryEventBus::new();
        let sink = BusDeadLetterSink::new(Arc::new(bus.clone()));
        sink.send(DeadLetter {
            source_topic: "cdc-events".to_string(),
            key: Some("9".to_string()),
            payload: b"{bad".to_vec(),
            error: "Index unavailable".to_string(),
            attempts: 4,
            failed_at: test_clock().now(),
        })
        .await
        .unwrap();

        let published = bus.published("cdc-events.dlt");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, "9");
        assert_eq!(published[0].payload, b"{bad".to_vec());
    }

    #[tokio::test]
    async fn archives_then_acks() {
        let archive = InMemoryDeadLetterArchive::new();
        let (delivery, acked) = Delivery::acknowledgeable(
            "cdc-events.dlt".to_string(),
            Some("42".to_string()),
            br#"{"operation":"create"}"#.to_vec(),
            0,
            7,
        );

        handler(&archive).handle(delivery).await.unwrap();

        assert!(acked.await.is_ok());
        let pending = archive.list(DeadLetterStatus::Pending, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].letter.source_topic, "cdc-events");
        assert_eq!(pending[0].letter.key.as_deref(), Some("42"));
        assert_eq!(pending[0].letter.payload_text(), r#"{"operation":"create"}"#);
    }

    #[tokio::test]
    async fn archive_failure_leaves_record_unacked() {
        let archive = InMemoryDeadLetterArchive::new();
        archive.set_fail(true);
        let (delivery, acked) =
            Delivery::acknowledgeable("cdc-events.dlt".to_string(), None, b"{}".to_vec(), 0, 0);

        assert!(handler(&archive).handle(delivery).await.is_err());
        assert!(acked.await.is_err());
    }
}
