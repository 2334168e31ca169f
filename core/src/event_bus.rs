//! Event bus abstraction for keyed, at-least-once messaging.
//!
//! The [`EventBus`] trait carries three channels in Sentinel:
//!
//! - `ticketing`: confirmed [`ReservationEvent`](crate::event::ReservationEvent)s, keyed by resource id
//! - `cdc-events`: change records captured from the catalog store
//! - `cdc-events.dlt`: verbatim payloads that exhausted their projection retries
//!
//! # Key Principles
//!
//! - **Keyed publish**: the message key selects the partition, so records that
//!   share a key are delivered in publish order. Nothing is promised across keys.
//! - **At-least-once delivery**: a subscriber may see a record more than once
//!   and must be idempotent.
//! - **Manual acknowledgement**: a [`Delivery`] is only committed once the
//!   subscriber calls [`Delivery::ack`]. Dropping an unacknowledged delivery
//!   stops the subscription without committing, so the record is redelivered
//!   on the next subscription.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! bus.publish("ticketing", "42", &payload).await?;
//!
//! let mut stream = bus.subscribe(&["cdc-events"]).await?;
//! while let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     handle(&delivery.payload).await?;
//!     delivery.ack();
//! }
//! ```

use futures::Stream;
use futures::channel::oneshot;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to commit a consumed offset
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroupError(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A message received from a subscription.
///
/// Carries the raw key and payload exactly as published. Subscribers decode
/// the payload themselves; undecodable payloads are still valid deliveries.
pub struct Delivery {
    /// Topic the message was read from
    pub topic: String,
    /// Message key (the partition key), if any
    pub key: Option<String>,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Partition the message was read from
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    ack: Option<oneshot::Sender<()>>,
}

impl Delivery {
    /// Create a delivery that needs no acknowledgement.
    ///
    /// Used by transports without offsets to commit (in-memory buses).
    #[must_use]
    pub const fn new(topic: String, key: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            topic,
            key,
            payload,
            partition: 0,
            offset: 0,
            ack: None,
        }
    }

    /// Create a delivery whose acknowledgement is observed through the
    /// returned receiver.
    ///
    /// The receiver resolves with `Ok(())` when [`Delivery::ack`] is called
    /// and with `Err(Canceled)` if the delivery is dropped unacknowledged.
    #[must_use]
    pub fn acknowledgeable(
        topic: String,
        key: Option<String>,
        payload: Vec<u8>,
        partition: i32,
        offset: i64,
    ) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let delivery = Self {
            topic,
            key,
            payload,
            partition,
            offset,
            ack: Some(tx),
        };
        (delivery, rx)
    }

    /// Payload as UTF-8 text, lossily decoded (for logs and archives).
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Acknowledge the delivery, allowing the transport to commit its offset.
    pub fn ack(mut self) {
        if let Some(tx) = self.ack.take() {
            // The transport may already have gone away; nothing left to commit then.
            let _ = tx.send(());
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("payload_len", &self.payload.len())
            .field("acknowledgeable", &self.ack.is_some())
            .finish()
    }
}

/// Stream of deliveries from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn EventBus>` between the producer, the
/// ingestor and the projection runner.
pub trait EventBus: Send + Sync {
    /// Publish a keyed message to a topic.
    ///
    /// Messages that share a key keep their relative order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker rejects or never
    /// acknowledges the message.
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_resolves_receiver() {
        let (delivery, mut rx) =
            Delivery::acknowledgeable("t".into(), Some("k".into()), b"{}".to_vec(), 0, 7);
        delivery.ack();
        assert_eq!(rx.try_recv(), Ok(Some(())));
    }

    #[test]
    fn dropped_delivery_cancels_receiver() {
        let (delivery, mut rx) = Delivery::acknowledgeable("t".into(), None, Vec::new(), 0, 0);
        drop(delivery);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn plain_delivery_ack_is_noop() {
        let delivery = Delivery::new("t".into(), None, b"x".to_vec());
        assert_eq!(delivery.payload_text(), "x");
        delivery.ack();
    }
}
