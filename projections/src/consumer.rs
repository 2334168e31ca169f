//! Projection of change records into the read model.
//!
//! # Per-record flow
//!
//! ```text
//! Received ─► decode ─┬─► malformed ──────────────────────────────► Ignored ─────► ack
//!                     └─► Upsert | Delete ─► apply ─┬─► ok ───────► Applied ─────► ack
//!                                                   └─► retry(n) ─┬► Applied ─────► ack
//!                                                                 └► dead letter ─┬► ack
//!                                                                                 └► unacked
//! ```
//!
//! Writes are idempotent by document id, so redelivery after a crash between
//! apply and ack is harmless.

use crate::decode::{DecodeError, decode_change};
use crate::mapping::{MappingError, Projection, project};
use async_trait::async_trait;
use sentinel_core::dead_letter::{DeadLetter, DeadLetterError, DeadLetterSink};
use sentinel_core::environment::Clock;
use sentinel_core::event_bus::Delivery;
use sentinel_core::projection::{DocumentIndex, IndexError};
use sentinel_runtime::metrics::ProjectionMetrics;
use sentinel_runtime::retry::{RetryPolicy, retry_with_predicate};
use sentinel_runtime::{DeliveryHandler, HandlerError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Terminal state of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// The document was written
    Upserted(String),
    /// The document was removed (or was already absent)
    Deleted(String),
    /// The record was malformed and skipped
    Ignored,
    /// The record was handed to the dead-letter sink
    DeadLettered,
}

/// Failure to reach any terminal state for a record.
#[derive(Error, Debug, Clone)]
pub enum ProjectionError {
    /// Dead-lettering failed, so the record must stay unacknowledged
    #[error("Record could not be dead-lettered: {0}")]
    DeadLetter(#[from] DeadLetterError),
}

/// Why a record was ignored.
#[derive(Error, Debug)]
enum Malformed {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// Only an unreachable backend or a missing index is worth another attempt.
const fn is_transient(error: &IndexError) -> bool {
    matches!(error, IndexError::Unavailable(_) | IndexError::IndexNotFound(_))
}

/// Applies change records to a [`DocumentIndex`].
#[derive(Clone)]
pub struct ProjectionConsumer {
    index: Arc<dyn DocumentIndex>,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ProjectionConsumer {
    /// Create a consumer.
    #[must_use]
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        dead_letters: Arc<dyn DeadLetterSink>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            dead_letters,
            retry,
            clock,
        }
    }

    /// Retry policy applied to index writes.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Drive one record to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::DeadLetter`] if the record failed and could
    /// not be dead-lettered. The caller must not acknowledge it.
    #[tracing::instrument(skip(self, payload))]
    pub async fn process(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<ProjectionOutcome, ProjectionError> {
        let projection = match Self::parse(payload) {
            Ok(projection) => projection,
            Err(reason) => {
                warn!(error = %reason, "Ignoring malformed change record");
                ProjectionMetrics::record_ignored();
                return Ok(ProjectionOutcome::Ignored);
            }
        };

        let attempts = AtomicU32::new(0);
        let applied = retry_with_predicate(
            &self.retry,
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.apply(&projection)
            },
            is_transient,
        )
        .await;
        ProjectionMetrics::record_retries(attempts.load(Ordering::Relaxed).saturating_sub(1));

        match applied {
            Ok(()) => {
                debug!(id = projection.id(), operation = projection.label(), "Projection applied");
                ProjectionMetrics::record_applied(projection.label());
                Ok(match projection {
                    Projection::Upsert(document) => ProjectionOutcome::Upserted(document.id),
                    Projection::Delete(id) => ProjectionOutcome::Deleted(id),
                })
            }
            Err(failure) => {
                let letter = DeadLetter {
                    source_topic: topic.to_string(),
                    key: key.map(str::to_string),
                    payload: payload.to_vec(),
                    error: failure.error.to_string(),
                    attempts: failure.attempts,
                    failed_at: self.clock.now(),
                };
                match self.dead_letters.send(letter).await {
                    Ok(()) => {
                        warn!(
                            id = projection.id(),
                            attempts = failure.attempts,
                            error = %failure.error,
                            "Change record dead-lettered"
                        );
                        ProjectionMetrics::record_dead_lettered();
                        Ok(ProjectionOutcome::DeadLettered)
                    }
                    Err(e) => {
                        error!(id = projection.id(), error = %e, "Dead-letter hand-off failed");
                        ProjectionMetrics::record_dead_letter_failure();
                        Err(e.into())
                    }
                }
            }
        }
    }

    fn parse(payload: &[u8]) -> Result<Projection, Malformed> {
        let record = decode_change(payload)?;
        Ok(project(&record)?)
    }

    async fn apply(&self, projection: &Projection) -> Result<(), IndexError> {
        match projection {
            Projection::Upsert(document) => self.index.upsert(document.clone()).await,
            Projection::Delete(id) => self.index.delete(id).await,
        }
    }
}

#[async_trait]
impl DeliveryHandler for ProjectionConsumer {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let outcome = self
            .process(&delivery.topic, delivery.key.as_deref(), &delivery.payload)
            .await?;
        info!(
            topic = %delivery.topic,
            offset = delivery.offset,
            outcome = ?outcome,
            "Change record settled"
        );
        delivery.ack();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use sentinel_testing::{InMemoryDeadLetterSink, InMemoryDocumentIndex, test_clock};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::time::Instant;

    fn consumer(
        index: &InMemoryDocumentIndex,
        sink: &InMemoryDeadLetterSink,
        max_retries: u32,
    ) -> ProjectionConsumer {
        ProjectionConsumer::new(
            Arc::new(index.clone()),
            Arc::new(sink.clone()),
            RetryPolicy::builder()
                .max_retries(max_retries)
                .initial_delay(Duration::from_millis(100))
                .multiplier(2.0)
                .max_delay(Duration::from_secs(1))
                .build(),
            Arc::new(test_clock()),
        )
    }

    fn bytes(value: &Value) -> Vec<u8> {
        serde_json::to_vec(value).unwrap()
    }

    fn create(id: &str, status: &str) -> Vec<u8> {
        bytes(&json!({
            "operation": "create",
            "after": {"id": id, "title": "Seat Reservation: 42", "category": "TICKETING", "status": status}
        }))
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let index = InMemoryDocumentIndex::new();
        let sink = InMemoryDeadLetterSink::new();
        let consumer = consumer(&index, &sink, 3);
        let payload = create("42", "RESERVED");

        let first = consumer.process("cdc-events", Some("42"), &payload).await.unwrap();
        let once = index.document("42").unwrap();
        let second = consumer.process("cdc-events", Some("42"), &payload).await.unwrap();

        assert_eq!(first, ProjectionOutcome::Upserted("42".to_string()));
        assert_eq!(second, first);
        assert_eq!(index.document("42").unwrap(), once);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn delete_of_missing_document_is_a_no_op() {
        let index = InMemoryDocumentIndex::new();
        let sink = InMemoryDeadLetterSink::new();
        let consumer = consumer(&index, &sink, 3);
        let delete = bytes(&json!({"op": "d", "before": {"id": "42"}}));

        let outcome = consumer.process("cdc-events", None, &delete).await.unwrap();
        assert_eq!(outcome, ProjectionOutcome::Deleted("42".to_string()));

        consumer
            .process("cdc-events", None, &create("42", "RESERVED"))
            .await
            .unwrap();
        assert!(index.contains("42"));
    }

    #[tokio::test]
    async fn malformed_records_are_ignored() {
        let index = InMemoryDocumentIndex::new();
        let sink = InMemoryDeadLetterSink::new();
        let consumer = consumer(&index, &sink, 3);

        for payload in [
            b"garbage".to_vec(),
            bytes(&json!({"title": "schemaless"})),
            bytes(&json!({"operation": "delete", "before": {}})),
            bytes(&json!({"operation": "update", "after": {"title": "no id"}})),
        ] {
            let outcome = consumer.process("cdc-events", None, &payload).await.unwrap();
            assert_eq!(outcome, ProjectionOutcome::Ignored);
        }
        assert_eq!(index.write_attempts(), 0);
        assert!(sink.letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_within_budget() {
        let index = InMemoryDocumentIndex::new();
        let sink = InMemoryDeadLetterSink::new();
        index.fail_next_writes(2);

        let started = Instant::now();
        let outcome = consumer(&index, &sink, 3)
            .process("cdc-events", Some("42"), &create("42", "RESERVED"))
            .await
            .unwrap();

        assert_eq!(outcome, ProjectionOutcome::Upserted("42".to_string()));
        assert_eq!(index.write_attempts(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert!(sink.letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_dead_letter_verbatim_once() {
        let index = InMemoryDocumentIndex::new();
        let sink = InMemoryDeadLetterSink::new();
        index.set_fail_always(true);
        let payload = create("42", "RESERVED");

        let started = Instant::now();
        let outcome = consumer(&index, &sink, 3)
            .process("cdc-events", Some("42"), &payload)
            .await
            .unwrap();

        assert_eq!(outcome, ProjectionOutcome::DeadLettered);
        // First attempt plus three retries after 100, 200 and 400 ms.
        assert_eq!(index.write_attempts(), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(700));

        let letters = sink.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].payload, payload);
        assert_eq!(letters[0].key.as_deref(), Some("42"));
        assert_eq!(letters[0].source_topic, "cdc-events");
        assert_eq!(letters[0].attempts, 4);
    }

    #[tokio::test]
    async fn serialization_failures_skip_retries() {
        struct Rejecting;

        #[async_trait]
        impl DocumentIndex for Rejecting {
            async fn upsert(
                &self,
                _document: sentinel_core::projection::ReadModelDocument,
            ) -> Result<(), IndexError> {
                Err(IndexError::Serialization("mapping conflict".to_string()))
            }
            async fn delete(&self, _id: &str) -> Result<(), IndexError> {
                Ok(())
            }
            async fn get(
                &self,
                _id: &str,
            ) -> Result<Option<sentinel_core::projection::ReadModelDocument>, IndexError> {
                Ok(None)
            }
            async fn search(
                &self,
                _query: &sentinel_core::projection::SearchQuery,
            ) -> Result<sentinel_core::projection::SearchHits, IndexError> {
                Err(IndexError::IndexNotFound("documents".to_string()))
            }
        }

        let sink = InMemoryDeadLetterSink::new();
        let consumer = ProjectionConsumer::new(
            Arc::new(Rejecting),
            Arc::new(sink.clone()),
            RetryPolicy::default(),
            Arc::new(test_clock()),
        );

        let outcome = consumer
            .process("cdc-events", Some("1"), &create("1", "RECEIVED"))
            .await
            .unwrap();
        assert_eq!(outcome, ProjectionOutcome::DeadLettered);
        assert_eq!(sink.letters()[0].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_hand_off_is_an_error() {
        let index = InMemoryDocumentIndex::new();
        let sink = InMemoryDeadLetterSink::new();
        index.set_fail_always(true);
        sink.set_fail(true);

        let result = consumer(&index, &sink, 1)
            .process("cdc-events", Some("42"), &create("42", "RESERVED"))
            .await;

        assert!(matches!(result, Err(ProjectionError::DeadLetter(_))));
    }
}
