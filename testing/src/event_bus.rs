//! In-memory event bus with a committed offset per topic.
//!
//! Behaves like a single consumer group on a one-partition broker: every
//! topic keeps its full log, a subscription starts at the topic's committed
//! offset, and an offset only advances when its delivery is acked. Dropping a
//! delivery without acking ends the subscription, so the next subscription
//! sees the record again.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use futures::channel::oneshot;
use sentinel_core::event_bus::{Delivery, EventBus, EventBusError, EventStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// A message as it was published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Message key
    pub key: String,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Payload as UTF-8 text.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Default)]
struct TopicLog {
    messages: Vec<PublishedMessage>,
    committed: usize,
}

struct Inner {
    topics: Mutex<HashMap<String, TopicLog>>,
    version: watch::Sender<u64>,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
}

/// In-memory [`EventBus`] for tests.
///
/// # Example
///
/// ```
/// use sentinel_testing::InMemoryEventBus;
/// use sentinel_core::event_bus::EventBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// bus.publish("ticketing", "42", b"{}").await?;
/// assert_eq!(bus.published("ticketing").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                version,
                fail_publish: AtomicBool::new(false),
                fail_subscribe: AtomicBool::new(false),
            }),
        }
    }

    /// Make every publish fail (or succeed again).
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make every subscribe fail (or succeed again).
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Every message ever published to `topic`, in order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<PublishedMessage> {
        self.inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// Committed offset of `topic` (number of acked messages).
    #[must_use]
    pub fn committed(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, |log| log.committed)
    }

    /// Wait until `topic` has committed `count` messages.
    pub async fn wait_for_committed(&self, topic: &str, count: usize) {
        let mut version = self.inner.version.subscribe();
        loop {
            version.borrow_and_update();
            if self.committed(topic) >= count {
                return;
            }
            if version.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait until `topic` holds at least `count` messages.
    pub async fn wait_for_published(&self, topic: &str, count: usize) -> Vec<PublishedMessage> {
        let mut version = self.inner.version.subscribe();
        loop {
            version.borrow_and_update();
            let published = self.published(topic);
            if published.len() >= count {
                return published;
            }
            if version.changed().await.is_err() {
                return published;
            }
        }
    }

    fn append(&self, topic: &str, message: PublishedMessage) {
        self.inner
            .topics
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .messages
            .push(message);
        self.inner.version.send_modify(|v| *v += 1);
    }

    fn commit(inner: &Inner, topic: &str, offset: usize) {
        if let Some(log) = inner.topics.lock().unwrap().get_mut(topic) {
            log.committed = log.committed.max(offset + 1);
        }
        inner.version.send_modify(|v| *v += 1);
    }

    /// Next uncommitted message past the subscription's cursors.
    fn next_message(
        inner: &Inner,
        topics: &[String],
        cursors: &mut HashMap<String, usize>,
    ) -> Option<(String, usize, PublishedMessage)> {
        let logs = inner.topics.lock().unwrap();
        for topic in topics {
            let Some(log) = logs.get(topic) else { continue };
            let cursor = cursors.entry(topic.clone()).or_insert(log.committed);
            if let Some(message) = log.messages.get(*cursor) {
                let offset = *cursor;
                *cursor += 1;
                return Some((topic.clone(), offset, message.clone()));
            }
        }
        None
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = PublishedMessage {
            key: key.to_string(),
            payload: payload.to_vec(),
        };
        Box::pin(async move {
            if self.inner.fail_publish.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    topic,
                    reason: "injected publish failure".to_string(),
                });
            }
            self.append(&topic, message);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();
        Box::pin(async move {
            if self.inner.fail_subscribe.load(Ordering::SeqCst) {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "injected subscribe failure".to_string(),
                });
            }

            let inner = Arc::clone(&self.inner);
            let mut version = inner.version.subscribe();
            let stream = async_stream::stream! {
                let mut cursors: HashMap<String, usize> = HashMap::new();
                let mut pending: Option<oneshot::Receiver<bool>> = None;
                loop {
                    if let Some(settled) = pending.take() {
                        // Unsettled delivery: stop without committing.
                        if !settled.await.unwrap_or(false) {
                            break;
                        }
                    }

                    version.borrow_and_update();
                    if let Some((topic, offset, message)) =
                        Self::next_message(&inner, &topics, &mut cursors)
                    {
                        let (delivery, ack) = Delivery::acknowledgeable(
                            topic.clone(),
                            Some(message.key),
                            message.payload,
                            0,
                            i64::try_from(offset).unwrap_or(i64::MAX),
                        );
                        let (settled_tx, settled_rx) = oneshot::channel();
                        let committer = Arc::clone(&inner);
                        tokio::spawn(async move {
                            let acked = ack.await.is_ok();
                            if acked {
                                Self::commit(&committer, &topic, offset);
                            }
                            let _ = settled_tx.send(acked);
                        });
                        pending = Some(settled_rx);
                        yield Ok(delivery);
                    } else if version.changed().await.is_err() {
                        break;
                    }
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}
