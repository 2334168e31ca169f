//! Catalog writes flowing through the change stream into search.

#![allow(clippy::unwrap_used)]

use sentinel_core::catalog::{CatalogEntry, CatalogStore};
use sentinel_core::dead_letter::{DeadLetterArchive, DeadLetterStatus};
use sentinel_core::event_bus::EventBus;
use sentinel_projections::{
    BusDeadLetterSink, DeadLetterHandler, DiscoveryEngine, DiscoveryStatus, ProjectionConsumer, ProjectionRunner,
    dead_letter_topic,
};
use sentinel_runtime::RetryPolicy;
use sentinel_testing::{
    InMemoryCatalogStore, InMemoryDeadLetterArchive, InMemoryDeadLetterSink, InMemoryDocumentIndex,
    InMemoryEventBus, test_clock,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const CDC: &str = "cdc-events";

fn entry(id: &str, title: &str, status: &str) -> CatalogEntry {
    let mut metadata = serde_json::Map::new();
    metadata.insert("source".to_string(), json!("SENTINEL"));
    CatalogEntry {
        id: id.to_string(),
        title: title.to_string(),
        category: "TICKETING".to_string(),
        status: status.to_string(),
        metadata,
    }
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(2)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .build()
}

#[tokio::test]
async fn catalog_rows_become_searchable() {
    let bus = InMemoryEventBus::new();
    let catalog = InMemoryCatalogStore::new(Arc::new(bus.clone()), CDC);
    let index = InMemoryDocumentIndex::new();
    let (shutdown, _) = broadcast::channel(1);

    let consumer = ProjectionConsumer::new(
        Arc::new(index.clone()),
        Arc::new(InMemoryDeadLetterSink::new()),
        fast_retries(),
        Arc::new(test_clock()),
    );
    let worker = ProjectionRunner::projection(consumer, Arc::new(bus.clone()), CDC)
        .with_reconnect_delay(Duration::from_millis(10))
        .spawn(shutdown.subscribe());

    catalog
        .upsert(entry("42", "Seat Reservation: 42", "RECEIVED"))
        .await
        .unwrap();
    catalog
        .upsert(entry("42", "Seat Reservation: 42", "RESERVED"))
        .await
        .unwrap();
    bus.wait_for_committed(CDC, 2).await;

    let document = index.document("42").unwrap();
    assert_eq!(document.status, "RESERVED");
    // The connector's JSON-text metadata column is parsed back into a map.
    assert_eq!(document.metadata["source"], "SENTINEL");

    let response = DiscoveryEngine::new(Arc::new(index.clone()))
        .discover("seat", None, 0, 10)
        .await
        .unwrap();
    assert_eq!(response.status, DiscoveryStatus::Success);
    assert_eq!(response.total_hits, 1);
    assert_eq!(response.results[0].document.id, "42");

    catalog.remove("42").await.unwrap();
    bus.wait_for_committed(CDC, 3).await;
    assert!(!index.contains("42"));

    shutdown.send(()).unwrap();
    worker.await.unwrap();
}

#[tokio::test]
async fn malformed_records_are_acked_and_skipped() {
    let bus = InMemoryEventBus::new();
    let index = InMemoryDocumentIndex::new();
    let (shutdown, _) = broadcast::channel(1);

    let consumer = ProjectionConsumer::new(
        Arc::new(index.clone()),
        Arc::new(InMemoryDeadLetterSink::new()),
        fast_retries(),
        Arc::new(test_clock()),
    );
    let worker = ProjectionRunner::projection(consumer, Arc::new(bus.clone()), CDC)
        .spawn(shutdown.subscribe());

    bus.publish(CDC, "x", b"{not json").await.unwrap();
    bus.publish(CDC, "7", br#"{"op":"c","after":{"id":7,"title":"Seat"}}"#)
        .await
        .unwrap();
    bus.wait_for_committed(CDC, 2).await;

    assert_eq!(index.len(), 1);
    assert!(index.contains("7"));

    shutdown.send(()).unwrap();
    worker.await.unwrap();
}

#[tokio::test]
async fn failing_index_routes_record_to_archive() {
    let bus = InMemoryEventBus::new();
    let index = InMemoryDocumentIndex::new();
    index.set_fail_always(true);
    let archive = InMemoryDeadLetterArchive::new();
    let (shutdown, _) = broadcast::channel(1);

    let consumer = ProjectionConsumer::new(
        Arc::new(index.clone()),
        Arc::new(BusDeadLetterSink::new(Arc::new(bus.clone()))),
        fast_retries(),
        Arc::new(test_clock()),
    );
    let projection = ProjectionRunner::projection(consumer, Arc::new(bus.clone()), CDC)
        .spawn(shutdown.subscribe());
    let dead_letters = ProjectionRunner::dead_letters(
        DeadLetterHandler::new(Arc::new(archive.clone()), Arc::new(test_clock())),
        Arc::new(bus.clone()),
        dead_letter_topic(CDC),
    )
    .spawn(shutdown.subscribe());

    let payload = br#"{"operation":"create","after":{"id":"9","title":"Seat"}}"#;
    bus.publish(CDC, "9", payload).await.unwrap();

    let entries = archive.wait_for_entries(1).await;
    bus.wait_for_committed(CDC, 1).await;
    bus.wait_for_committed("cdc-events.dlt", 1).await;

    // First attempt plus two retries.
    assert_eq!(index.write_attempts(), 3);
    assert_eq!(entries[0].letter.payload, payload.to_vec());
    assert_eq!(entries[0].letter.key.as_deref(), Some("9"));
    assert_eq!(entries[0].letter.source_topic, CDC);
    assert_eq!(archive.count(DeadLetterStatus::Pending).await.unwrap(), 1);

    shutdown.send(()).unwrap();
    projection.await.unwrap();
    dead_letters.await.unwrap();
}
