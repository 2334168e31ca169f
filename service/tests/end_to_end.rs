//! The whole service over in-memory ports: reservation to search result.

#![allow(clippy::unwrap_used)]

use sentinel_booking::ReservationOutcome;
use sentinel_core::dead_letter::{DeadLetterArchive, DeadLetterStatus};
use sentinel_core::event::ReservationEvent;
use sentinel_core::event_bus::EventBus;
use sentinel_core::resource::ResourceId;
use sentinel_projections::DiscoveryStatus;
use sentinel_service::{Config, NewCatalogEntry, Ports, Sentinel};
use sentinel_testing::{
    InMemoryCatalogStore, InMemoryDeadLetterArchive, InMemoryDocumentIndex, InMemoryEventBus,
    InMemoryLockCoordinator, InMemoryResourceStore, test_clock,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    bus: InMemoryEventBus,
    index: InMemoryDocumentIndex,
    archive: InMemoryDeadLetterArchive,
    app: Sentinel,
}

fn harness() -> Harness {
    let vars: HashMap<&str, &str> = [
        ("PROJECTION_INITIAL_DELAY_MS", "1"),
        ("PROJECTION_MAX_DELAY_MS", "5"),
        ("PROJECTION_RECONNECT_DELAY_MS", "10"),
    ]
    .into_iter()
    .collect();
    let config = Config::from_lookup(|key| vars.get(key).map(|v| (*v).to_string())).unwrap();

    let bus = InMemoryEventBus::new();
    let index = InMemoryDocumentIndex::new();
    let archive = InMemoryDeadLetterArchive::new();
    let ports = Ports {
        locks: Arc::new(InMemoryLockCoordinator::new()),
        resources: Arc::new(InMemoryResourceStore::with_available([41, 42, 43])),
        catalog: Arc::new(InMemoryCatalogStore::new(
            Arc::new(bus.clone()),
            config.redpanda.cdc_topic.clone(),
        )),
        index: Arc::new(index.clone()),
        archive: Arc::new(archive.clone()),
        bus: Arc::new(bus.clone()),
        ingest_bus: Arc::new(bus.clone()),
        clock: Arc::new(test_clock()),
    };

    Harness {
        bus,
        index,
        archive,
        app: Sentinel::new(ports, &config),
    }
}

#[tokio::test]
async fn concurrent_reservation_becomes_one_searchable_seat() {
    let Harness {
        bus, index, app, ..
    } = harness();
    let workers = app.start();

    let (first, second) = tokio::join!(
        app.orchestrator().reserve(ResourceId(42)),
        app.orchestrator().reserve(ResourceId(42)),
    );
    let mut outcomes = [first.name(), second.name()];
    outcomes.sort_unstable();
    assert_eq!(
        outcomes,
        [
            ReservationOutcome::AlreadyReserved.name(),
            ReservationOutcome::Success.name()
        ]
    );

    let document = index.wait_for("42").await;
    assert_eq!(document.status, "RESERVED");
    assert_eq!(document.title, "Seat Reservation: 42");
    assert_eq!(document.category, "TICKETING");
    assert_eq!(document.metadata["source"], "SENTINEL");

    let published = bus.published("ticketing");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, "42");
    let event = ReservationEvent::from_json(&published[0].payload).unwrap();
    assert_eq!(event.resource_id, ResourceId(42));

    let response = app.discovery().discover("seat", None, 0, 10).await.unwrap();
    assert_eq!(response.status, DiscoveryStatus::Success);
    assert_eq!(response.total_hits, 1);
    assert_eq!(response.results[0].document.id, "42");
    assert_eq!(response.results[0].document.status, "RESERVED");

    let available: Vec<i64> = app
        .orchestrator()
        .available_resources(10)
        .await
        .unwrap()
        .into_iter()
        .map(|resource| resource.id.get())
        .collect();
    assert_eq!(available, vec![41, 43]);

    workers.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn catalog_entries_are_searchable_by_category() {
    let Harness { index, app, .. } = harness();
    let workers = app.start();

    let entry = app
        .catalog()
        .create_entry(NewCatalogEntry {
            title: "Concert Night".to_string(),
            category: "MUSIC".to_string(),
            ..NewCatalogEntry::default()
        })
        .await
        .unwrap();
    index.wait_for(&entry.id).await;

    let music = app
        .discovery()
        .discover("concrt", Some("MUSIC"), 0, 0)
        .await
        .unwrap();
    assert_eq!(music.total_hits, 1);
    assert_eq!(music.results[0].document.status, "RECEIVED");

    let tickets = app
        .discovery()
        .discover("concert", Some("TICKETING"), 0, 10)
        .await
        .unwrap();
    assert_eq!(tickets.total_hits, 0);

    let blank = app.discovery().discover("  ", None, 0, 10).await.unwrap();
    assert_eq!(blank.status, DiscoveryStatus::EmptyQuery);

    workers.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn malformed_reservation_lands_in_archive() {
    let Harness {
        bus, index, archive, app,
    } = harness();
    let workers = app.start();

    bus.publish("ticketing", "42", b"{\"seat\":").await.unwrap();

    let entries = archive.wait_for_entries(1).await;
    bus.wait_for_committed("ticketing", 1).await;

    assert_eq!(entries[0].letter.source_topic, "ticketing");
    assert_eq!(entries[0].letter.key.as_deref(), Some("42"));
    assert_eq!(entries[0].letter.payload, b"{\"seat\":".to_vec());
    assert_eq!(archive.count(DeadLetterStatus::Pending).await.unwrap(), 1);
    assert!(index.is_empty());

    workers.shutdown(Duration::from_secs(5)).await;
}
