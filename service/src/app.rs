//! Application assembly and lifecycle.
//!
//! [`Sentinel`] wires the reservation, catalog and discovery services over a
//! set of [`Ports`]. [`Sentinel::start`] spawns the background workers:
//!
//! 1. **ingest**: ticketing channel into the catalog
//! 2. **projection**: change stream into the document index
//! 3. **dead-letter**: both dead-letter channels into the archive
//!
//! [`Workers::shutdown`] broadcasts the stop signal and waits for every
//! worker, giving each one the configured grace period.

use crate::catalog::CatalogService;
use crate::config::Config;
use crate::ingest::ReservationIngestor;
use sentinel_booking::{BookingOrchestrator, EventProducer, ReservationExecutor};
use sentinel_core::catalog::CatalogStore;
use sentinel_core::dead_letter::{DeadLetterArchive, DeadLetterSink};
use sentinel_core::environment::Clock;
use sentinel_core::event_bus::EventBus;
use sentinel_core::lock::LockCoordinator;
use sentinel_core::projection::DocumentIndex;
use sentinel_core::resource::ResourceStore;
use sentinel_projections::{
    BusDeadLetterSink, DeadLetterHandler, DiscoveryEngine, ProjectionConsumer, ProjectionRunner,
    dead_letter_topic,
};
use sentinel_runtime::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Backends the service runs on.
#[derive(Clone)]
pub struct Ports {
    /// Seat locks
    pub locks: Arc<dyn LockCoordinator>,
    /// Authoritative seat rows
    pub resources: Arc<dyn ResourceStore>,
    /// Catalog rows captured by the change stream
    pub catalog: Arc<dyn CatalogStore>,
    /// Read model
    pub index: Arc<dyn DocumentIndex>,
    /// Dead-letter archive
    pub archive: Arc<dyn DeadLetterArchive>,
    /// Event bus for publishing and for the projection-side subscriptions
    pub bus: Arc<dyn EventBus>,
    /// Event bus for the ingest subscription, which reads under its own
    /// consumer group
    pub ingest_bus: Arc<dyn EventBus>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Topics and timings the workers need.
#[derive(Debug, Clone)]
struct WorkerSettings {
    ticketing_topic: String,
    cdc_topic: String,
    retry: RetryPolicy,
    reconnect_delay: Duration,
}

/// The assembled service.
#[derive(Clone)]
pub struct Sentinel {
    ports: Ports,
    orchestrator: BookingOrchestrator,
    catalog: CatalogService,
    discovery: DiscoveryEngine,
    settings: WorkerSettings,
}

impl Sentinel {
    /// Assemble the services over `ports`.
    #[must_use]
    pub fn new(ports: Ports, config: &Config) -> Self {
        let settings = WorkerSettings {
            ticketing_topic: config.redpanda.ticketing_topic.clone(),
            cdc_topic: config.redpanda.cdc_topic.clone(),
            retry: config.retry_policy(),
            reconnect_delay: config.reconnect_delay(),
        };

        let orchestrator = BookingOrchestrator::new(
            Arc::clone(&ports.locks),
            ReservationExecutor::new(Arc::clone(&ports.resources)),
            EventProducer::new(Arc::clone(&ports.bus), settings.ticketing_topic.clone()),
            Arc::clone(&ports.clock),
            config.booking_config(),
        );
        let catalog = CatalogService::new(Arc::clone(&ports.catalog));
        let discovery = DiscoveryEngine::new(Arc::clone(&ports.index))
            .with_default_page_size(config.discovery.default_page_size);

        Self {
            ports,
            orchestrator,
            catalog,
            discovery,
            settings,
        }
    }

    /// Seat reservation.
    #[must_use]
    pub const fn orchestrator(&self) -> &BookingOrchestrator {
        &self.orchestrator
    }

    /// Free-form catalog entries.
    #[must_use]
    pub const fn catalog(&self) -> &CatalogService {
        &self.catalog
    }

    /// Search over the read model.
    #[must_use]
    pub const fn discovery(&self) -> &DiscoveryEngine {
        &self.discovery
    }

    /// Spawn the background workers.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(&self) -> Workers {
        let (shutdown_tx, _) = broadcast::channel(1);
        let ports = &self.ports;
        let settings = &self.settings;
        let dead_letters: Arc<dyn DeadLetterSink> =
            Arc::new(BusDeadLetterSink::new(Arc::clone(&ports.bus)));

        let ingestor = ReservationIngestor::new(
            Arc::clone(&ports.catalog),
            Arc::clone(&dead_letters),
            settings.retry.clone(),
            Arc::clone(&ports.clock),
        );
        let projection = ProjectionConsumer::new(
            Arc::clone(&ports.index),
            Arc::clone(&dead_letters),
            settings.retry.clone(),
            Arc::clone(&ports.clock),
        );
        let archive = DeadLetterHandler::new(Arc::clone(&ports.archive), Arc::clone(&ports.clock));

        let runners = vec![
            ProjectionRunner::new(
                "ingest",
                Arc::new(ingestor),
                Arc::clone(&ports.ingest_bus),
                settings.ticketing_topic.clone(),
            ),
            ProjectionRunner::projection(
                projection,
                Arc::clone(&ports.bus),
                settings.cdc_topic.clone(),
            ),
            ProjectionRunner::dead_letters(
                archive.clone(),
                Arc::clone(&ports.bus),
                dead_letter_topic(&settings.cdc_topic),
            ),
            ProjectionRunner::dead_letters(
                archive,
                Arc::clone(&ports.bus),
                dead_letter_topic(&settings.ticketing_topic),
            ),
        ];

        let handles = runners
            .into_iter()
            .map(|runner| {
                let runner = runner.with_reconnect_delay(settings.reconnect_delay);
                let topic = runner.topic().to_string();
                info!(%topic, "Starting worker");
                (topic, runner.spawn(shutdown_tx.subscribe()))
            })
            .collect();

        Workers {
            handles,
            shutdown_tx,
        }
    }
}

/// Running background workers.
pub struct Workers {
    handles: Vec<(String, JoinHandle<()>)>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Workers {
    /// Topics being consumed, one per worker.
    #[must_use]
    pub fn topics(&self) -> Vec<&str> {
        self.handles.iter().map(|(topic, _)| topic.as_str()).collect()
    }

    /// Signal every worker to stop and wait up to `timeout` for each.
    pub async fn shutdown(self, timeout: Duration) {
        info!(workers = self.handles.len(), "Stopping workers");
        // Workers that already exited have dropped their receivers.
        let _ = self.shutdown_tx.send(());

        for (topic, handle) in self.handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(%topic, "Worker stopped gracefully"),
                Ok(Err(e)) => warn!(%topic, error = %e, "Worker task failed"),
                Err(_) => warn!(%topic, "Worker shutdown timed out"),
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed the failure is logged and that signal
/// is ignored.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use sentinel_testing::{
        InMemoryCatalogStore, InMemoryDeadLetterArchive, InMemoryDocumentIndex, InMemoryEventBus,
        InMemoryLockCoordinator, InMemoryResourceStore, test_clock,
    };
    use std::collections::HashMap;

    fn sentinel(vars: &[(&str, &str)]) -> Sentinel {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
        let bus = InMemoryEventBus::new();
        let ports = Ports {
            locks: Arc::new(InMemoryLockCoordinator::new()),
            resources: Arc::new(InMemoryResourceStore::with_available([1])),
            catalog: Arc::new(InMemoryCatalogStore::new(
                Arc::new(bus.clone()),
                config.redpanda.cdc_topic.clone(),
            )),
            index: Arc::new(InMemoryDocumentIndex::new()),
            archive: Arc::new(InMemoryDeadLetterArchive::new()),
            bus: Arc::new(bus.clone()),
            ingest_bus: Arc::new(bus),
            clock: Arc::new(test_clock()),
        };
        Sentinel::new(ports, &config)
    }

    #[tokio::test(start_paused = true)]
    async fn workers_follow_configured_topics() {
        let app = sentinel(&[("TICKETING_TOPIC", "seats"), ("CDC_TOPIC", "catalog.changes")]);
        let workers = app.start();

        assert_eq!(
            workers.topics(),
            vec!["seats", "catalog.changes", "catalog.changes.dlt", "seats.dlt"]
        );
        workers.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn booking_uses_configured_lock_prefix() {
        let app = sentinel(&[("BOOKING_LOCK_PREFIX", "hold:")]);
        assert_eq!(app.orchestrator().config().key_prefix, "hold:");
    }
}
