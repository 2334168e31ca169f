//! Fire-and-forget publisher of reservation events.
//!
//! Events are keyed by resource id. Each key maps to one of a fixed set of
//! publishing lanes, and a lane publishes strictly one event at a time, so
//! events for one resource leave in the order they were emitted while
//! different resources publish in parallel. Delivery failures are logged and
//! counted, never retried and never rolled back: the reservation has already
//! committed. There is no outbox, so a failed delivery means the event is
//! lost.

use sentinel_core::event::ReservationEvent;
use sentinel_core::event_bus::EventBus;
use sentinel_runtime::metrics::EventMetrics;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, oneshot};

/// Default topic for reservation events.
pub const DEFAULT_TOPIC: &str = "ticketing";

/// Number of publishing lanes per producer.
const LANES: usize = 8;

/// One queued publication.
struct Publication {
    event: ReservationEvent,
    delivered: oneshot::Sender<bool>,
}

/// Publishes [`ReservationEvent`]s without blocking the caller.
#[derive(Clone)]
pub struct EventProducer {
    bus: Arc<dyn EventBus>,
    topic: String,
    lanes: Arc<OnceLock<Vec<mpsc::UnboundedSender<Publication>>>>,
}

impl EventProducer {
    /// Create a producer publishing to `topic`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            lanes: Arc::new(OnceLock::new()),
        }
    }

    /// Topic events are published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Queue `event` for publishing.
    ///
    /// Events sharing a key are published in the order of their `emit`
    /// calls. The returned receiver resolves to whether the broker accepted
    /// the event; callers are free to drop it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn emit(&self, event: ReservationEvent) -> oneshot::Receiver<bool> {
        let (delivered, receiver) = oneshot::channel();
        let lanes = self.lanes.get_or_init(|| self.spawn_lanes());
        let lane = &lanes[lane_for(&event.key(), lanes.len())];

        if let Err(mpsc::error::SendError(rejected)) = lane.send(Publication { event, delivered }) {
            tracing::error!(
                event_id = %rejected.event.event_id,
                "Publishing lane stopped, reservation event dropped"
            );
            EventMetrics::record_delivery_failure();
            let _ = rejected.delivered.send(false);
        }
        receiver
    }

    fn spawn_lanes(&self) -> Vec<mpsc::UnboundedSender<Publication>> {
        (0..LANES)
            .map(|_| {
                let (tx, mut rx) = mpsc::unbounded_channel::<Publication>();
                let bus = Arc::clone(&self.bus);
                let topic = self.topic.clone();
                tokio::spawn(async move {
                    while let Some(Publication { event, delivered }) = rx.recv().await {
                        let accepted = publish(bus.as_ref(), &topic, &event).await;
                        // The caller may have dropped its receiver.
                        let _ = delivered.send(accepted);
                    }
                });
                tx
            })
            .collect()
    }
}

/// Lane index for a message key.
fn lane_for(key: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    // Lossless: the remainder is below `lanes`.
    #[allow(clippy::cast_possible_truncation)]
    let lane = (hasher.finish() % lanes as u64) as usize;
    lane
}

async fn publish(bus: &dyn EventBus, topic: &str, event: &ReservationEvent) -> bool {
    let key = event.key();
    let payload = match event.to_json() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(event_id = %event.event_id, error = %e, "Failed to encode reservation event");
            EventMetrics::record_delivery_failure();
            return false;
        }
    };

    match bus.publish(topic, &key, &payload).await {
        Ok(()) => {
            tracing::debug!(%topic, %key, event_id = %event.event_id, "Reservation event delivered");
            EventMetrics::record_emitted();
            true
        }
        Err(e) => {
            tracing::error!(
                %topic,
                %key,
                event_id = %event.event_id,
                error = %e,
                "Reservation event delivery failed"
            );
            EventMetrics::record_delivery_failure();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use sentinel_core::event_bus::{EventBusError, EventStream};
    use sentinel_core::resource::ResourceId;
    use sentinel_testing::{InMemoryEventBus, test_clock};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Bus that holds each publish for the next queued delay.
    struct StaggeredBus {
        inner: InMemoryEventBus,
        delays: Mutex<VecDeque<Duration>>,
    }

    impl EventBus for StaggeredBus {
        fn publish(
            &self,
            topic: &str,
            key: &str,
            payload: &[u8],
        ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
            let delay = self.delays.lock().unwrap().pop_front().unwrap_or_default();
            let (topic, key, payload) = (topic.to_string(), key.to_string(), payload.to_vec());
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                self.inner.publish(&topic, &key, &payload).await
            })
        }

        fn subscribe(
            &self,
            topics: &[&str],
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
            self.inner.subscribe(topics)
        }
    }

    #[tokio::test]
    async fn publishes_keyed_json() {
        let bus = InMemoryEventBus::new();
        let producer = EventProducer::new(Arc::new(bus.clone()), DEFAULT_TOPIC);
        let event = ReservationEvent::reserved(ResourceId(42), &test_clock());

        assert!(producer.emit(event.clone()).await.unwrap());

        let published = bus.published("ticketing");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, "42");
        assert_eq!(ReservationEvent::from_json(&published[0].payload).unwrap(), event);
    }

    #[tokio::test]
    async fn delivery_failure_is_reported_not_raised() {
        let bus = InMemoryEventBus::new();
        bus.set_fail_publish(true);
        let producer = EventProducer::new(Arc::new(bus.clone()), DEFAULT_TOPIC);

        let delivered = producer
            .emit(ReservationEvent::reserved(ResourceId(1), &test_clock()))
            .await
            .unwrap();
        assert!(!delivered);
        assert!(bus.published("ticketing").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_keeps_order_when_first_publish_is_slow() {
        let bus = InMemoryEventBus::new();
        let staggered = StaggeredBus {
            inner: bus.clone(),
            delays: Mutex::new(VecDeque::from([Duration::from_millis(50), Duration::ZERO])),
        };
        let producer = EventProducer::new(Arc::new(staggered), DEFAULT_TOPIC);
        let first = ReservationEvent::reserved(ResourceId(5), &test_clock());
        let second = ReservationEvent::reserved(ResourceId(5), &test_clock());

        let first_delivery = producer.emit(first.clone());
        let second_delivery = producer.emit(second.clone());
        assert!(second_delivery.await.unwrap());
        assert!(first_delivery.await.unwrap());

        let ids: Vec<_> = bus
            .published("ticketing")
            .iter()
            .map(|m| ReservationEvent::from_json(&m.payload).unwrap().event_id)
            .collect();
        assert_eq!(ids, [first.event_id, second.event_id]);
    }

    #[test]
    fn a_key_always_maps_to_the_same_lane() {
        for id in 0..64 {
            let key = id.to_string();
            let lane = lane_for(&key, LANES);
            assert!(lane < LANES);
            assert_eq!(lane_for(&key, LANES), lane);
        }
    }
}
