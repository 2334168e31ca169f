//! Event consumer behaviour over the in-memory bus.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use sentinel_core::event_bus::{Delivery, EventBus};
use sentinel_runtime::{DeliveryHandler, EventConsumer, HandlerError};
use sentinel_testing::InMemoryEventBus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const TOPIC: &str = "cdc-events";

/// Acks everything except the first `fail_first` deliveries.
#[derive(Default)]
struct RecordingHandler {
    fail_first: usize,
    calls: AtomicUsize,
    acked: Mutex<Vec<String>>,
}

impl RecordingHandler {
    fn failing(fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Self::default()
        }
    }

    fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryHandler for RecordingHandler {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err("downstream refused the record".into());
        }
        self.acked
            .lock()
            .unwrap()
            .push(delivery.key.clone().unwrap_or_default());
        delivery.ack();
        Ok(())
    }
}

fn consumer(
    bus: &InMemoryEventBus,
    handler: Arc<RecordingHandler>,
    shutdown: &broadcast::Sender<()>,
) -> EventConsumer {
    EventConsumer::new(
        "test-consumer",
        vec![TOPIC.to_string()],
        Arc::new(bus.clone()),
        handler,
        shutdown.subscribe(),
    )
    .with_retry_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn acks_commit_in_order() {
    let bus = InMemoryEventBus::new();
    for key in ["1", "2", "3"] {
        bus.publish(TOPIC, key, b"{}").await.unwrap();
    }
    let handler = Arc::new(RecordingHandler::default());
    let (shutdown, _) = broadcast::channel(1);

    let task = consumer(&bus, Arc::clone(&handler), &shutdown).spawn();
    bus.wait_for_committed(TOPIC, 3).await;
    shutdown.send(()).unwrap();
    task.await.unwrap();

    assert_eq!(handler.acked(), ["1", "2", "3"]);
}

#[tokio::test]
async fn unsettled_delivery_is_redelivered_after_reconnect() {
    let bus = InMemoryEventBus::new();
    bus.publish(TOPIC, "1", b"{}").await.unwrap();
    bus.publish(TOPIC, "2", b"{}").await.unwrap();
    let handler = Arc::new(RecordingHandler::failing(1));
    let (shutdown, _) = broadcast::channel(1);

    let task = consumer(&bus, Arc::clone(&handler), &shutdown).spawn();
    bus.wait_for_committed(TOPIC, 2).await;
    shutdown.send(()).unwrap();
    task.await.unwrap();

    // The first record failed once and came back before the second.
    assert_eq!(handler.acked(), ["1", "2"]);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn subscribe_failures_are_retried() {
    let bus = InMemoryEventBus::new();
    bus.set_fail_subscribe(true);
    bus.publish(TOPIC, "1", b"{}").await.unwrap();
    let handler = Arc::new(RecordingHandler::default());
    let (shutdown, _) = broadcast::channel(1);

    let task = consumer(&bus, Arc::clone(&handler), &shutdown).spawn();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handler.acked().is_empty());

    bus.set_fail_subscribe(false);
    bus.wait_for_committed(TOPIC, 1).await;
    shutdown.send(()).unwrap();
    task.await.unwrap();

    assert_eq!(handler.acked(), ["1"]);
}

#[tokio::test]
async fn shutdown_stops_an_idle_consumer() {
    let bus = InMemoryEventBus::new();
    let (shutdown, _) = broadcast::channel(1);

    let task = consumer(&bus, Arc::new(RecordingHandler::default()), &shutdown).spawn();
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}
