//! Behaviour of the in-memory ports that other crates' tests rely on.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use sentinel_core::dead_letter::{DeadLetter, DeadLetterArchive, DeadLetterStatus};
use sentinel_core::environment::Clock;
use sentinel_core::projection::{DocumentIndex, IndexError, ReadModelDocument};
use sentinel_core::resource::{Resource, ResourceId, ResourceStore, ResourceStoreError};
use sentinel_testing::{
    InMemoryDeadLetterArchive, InMemoryDocumentIndex, InMemoryResourceStore, test_clock,
};
use std::time::Duration;

fn document(id: &str, title: &str) -> ReadModelDocument {
    ReadModelDocument {
        id: id.to_string(),
        title: title.to_string(),
        category: "TICKETING".to_string(),
        status: "RESERVED".to_string(),
        metadata: serde_json::Map::new(),
    }
}

#[tokio::test]
async fn resource_store_compare_and_set_flips_once() {
    let store = InMemoryResourceStore::with_available([1, 2]);

    assert!(store.compare_and_set(ResourceId(1), false, true).await.unwrap());
    assert!(!store.compare_and_set(ResourceId(1), false, true).await.unwrap());
    assert!(!store.compare_and_set(ResourceId(9), false, true).await.unwrap());
    assert_eq!(store.compare_and_set_calls(), 3);

    let open = store.list_unreserved(10).await.unwrap();
    assert_eq!(open, vec![Resource::available(ResourceId(2))]);
}

#[tokio::test]
async fn resource_store_outage_fails_every_call() {
    let store = InMemoryResourceStore::with_available([1]);
    store.set_unavailable(true);

    assert!(matches!(
        store.get(ResourceId(1)).await,
        Err(ResourceStoreError::Unavailable(_))
    ));
    assert!(store.compare_and_set(ResourceId(1), false, true).await.is_err());

    store.set_unavailable(false);
    assert_eq!(store.peek(1).map(|r| r.reserved), Some(false));
}

#[tokio::test(start_paused = true)]
async fn resource_store_latency_delays_the_transaction() {
    let store = InMemoryResourceStore::with_available([1]);
    store.set_latency(Some(Duration::from_secs(3)));

    let started = tokio::time::Instant::now();
    assert!(store.compare_and_set(ResourceId(1), false, true).await.unwrap());
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test]
async fn document_index_recovers_after_injected_failures() {
    let index = InMemoryDocumentIndex::new();
    index.fail_next_writes(2);

    for _ in 0..2 {
        assert!(matches!(
            index.upsert(document("1", "Seat Reservation: 1")).await,
            Err(IndexError::Unavailable(_))
        ));
    }
    index.upsert(document("1", "Seat Reservation: 1")).await.unwrap();

    assert_eq!(index.write_attempts(), 3);
    assert!(index.contains("1"));
}

#[tokio::test]
async fn archive_status_transitions() {
    let archive = InMemoryDeadLetterArchive::new();
    let letter = DeadLetter {
        source_topic: "cdc-events".to_string(),
        key: Some("7".to_string()),
        payload: b"{}".to_vec(),
        error: "Index unavailable".to_string(),
        attempts: 4,
        failed_at: test_clock().now(),
    };

    let id = archive.archive(&letter).await.unwrap();
    assert!(archive.mark_processing(id).await.unwrap());
    assert!(archive.discard(id, "schema mismatch").await.unwrap());
    assert!(!archive.resolve(id, "operator", None).await.unwrap());

    assert_eq!(archive.count(DeadLetterStatus::Discarded).await.unwrap(), 1);
    assert_eq!(archive.count(DeadLetterStatus::Pending).await.unwrap(), 0);
}
