//! Event bus consumer with manual acknowledgement and automatic reconnection.
//!
//! [`EventConsumer`] owns the subscribe-process-reconnect loop. Each
//! [`Delivery`] goes to a [`DeliveryHandler`], which decides when to ack it.
//!
//! ```text
//! loop {
//!     subscribe
//!     for each delivery:
//!         handler.handle(delivery)
//!             Ok   -> next delivery
//!             Err  -> drop the subscription (unacked record is redelivered)
//!     wait retry_delay, reconnect
//! }
//! ```
//!
//! A handler error is the signal that the current record could not reach a
//! durable outcome. Continuing past it would let later acks commit over it,
//! so the consumer abandons the subscription instead.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = EventConsumer::new(
//!     "projection",
//!     vec!["cdc-events".to_string()],
//!     event_bus,
//!     handler,
//!     shutdown_tx.subscribe(),
//! )
//! .with_retry_delay(Duration::from_secs(5));
//!
//! let handle = consumer.spawn();
//! ```

use async_trait::async_trait;
use futures::StreamExt;
use sentinel_core::event_bus::{Delivery, EventBus, EventStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Error returned by a handler that could not settle a delivery.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one delivery at a time.
///
/// Implementations ack the delivery once its outcome is durable. Returning
/// `Err` without acking stops the subscription so the record is redelivered.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Handle a delivery.
    ///
    /// # Errors
    ///
    /// Returns an error when the delivery could not be settled.
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError>;
}

/// Why a subscription stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    Ended,
    HandlerFailed,
}

/// Generic event bus consumer.
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn DeliveryHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl EventConsumer {
    /// Create a consumer with the default 5 second reconnect delay.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            event_bus,
            handler,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set the delay before reconnecting after a subscription stops.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, topics = ?self.topics, "Event consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = self.event_bus.subscribe(&topics) => result,
            };

            match subscribed {
                Ok(stream) => {
                    info!(consumer = %self.name, "Subscribed to event bus");
                    match self.process_stream(stream).await {
                        StreamEnd::Shutdown => break,
                        StreamEnd::Ended => {
                            warn!(consumer = %self.name, retry_delay_ms = self.retry_delay_ms(), "Event stream ended, reconnecting");
                        }
                        StreamEnd::HandlerFailed => {
                            warn!(consumer = %self.name, retry_delay_ms = self.retry_delay_ms(), "Subscription abandoned after unsettled delivery, reconnecting");
                        }
                    }
                }
                Err(e) => {
                    error!(consumer = %self.name, error = %e, retry_delay_ms = self.retry_delay_ms(), "Failed to subscribe to event bus");
                }
            }

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    async fn process_stream(&mut self, mut stream: EventStream) -> StreamEnd {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => return StreamEnd::Shutdown,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    debug!(
                        consumer = %self.name,
                        topic = %delivery.topic,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Delivery received"
                    );
                    if let Err(e) = self.handler.handle(delivery).await {
                        error!(consumer = %self.name, error = %e, "Failed to settle delivery");
                        return StreamEnd::HandlerFailed;
                    }
                }
                Some(Err(e)) => {
                    error!(consumer = %self.name, error = %e, "Error receiving from stream");
                }
                None => return StreamEnd::Ended,
            }
        }
    }

    fn retry_delay_ms(&self) -> u64 {
        u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX)
    }
}
