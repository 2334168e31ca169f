//! Supervised workers for the projection and dead-letter channels.
//!
//! Both workers are an [`EventConsumer`] loop around a handler: subscribe,
//! process until shutdown or stream end, reconnect after a delay.

use crate::consumer::ProjectionConsumer;
use crate::dead_letter::DeadLetterHandler;
use sentinel_core::event_bus::EventBus;
use sentinel_runtime::{DeliveryHandler, EventConsumer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Default pause before resubscribing after a subscription stops.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Runs a delivery handler against one topic under supervision.
pub struct ProjectionRunner {
    name: String,
    topic: String,
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn DeliveryHandler>,
    reconnect_delay: Duration,
}

impl ProjectionRunner {
    /// Runner feeding `topic` into the projection consumer.
    #[must_use]
    pub fn projection(
        consumer: ProjectionConsumer,
        bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
    ) -> Self {
        Self::new("projection", Arc::new(consumer), bus, topic)
    }

    /// Runner feeding a dead-letter channel into the archive.
    #[must_use]
    pub fn dead_letters(
        handler: DeadLetterHandler,
        bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
    ) -> Self {
        Self::new("dead-letter", Arc::new(handler), bus, topic)
    }

    /// Runner for any handler.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn DeliveryHandler>,
        bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            bus,
            handler,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Set the reconnect delay.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Topic this runner consumes.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build the underlying consumer loop.
    #[must_use]
    pub fn into_consumer(self, shutdown: broadcast::Receiver<()>) -> EventConsumer {
        EventConsumer::new(
            self.name,
            vec![self.topic],
            self.bus,
            self.handler,
            shutdown,
        )
        .with_retry_delay(self.reconnect_delay)
    }

    /// Start the loop on the runtime. It stops when `shutdown` fires.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        self.into_consumer(shutdown).spawn()
    }
}
