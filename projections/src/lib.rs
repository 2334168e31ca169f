//! # Sentinel Projections
//!
//! The read side of the catalog: change records in, searchable documents out.
//!
//! ```text
//! cdc-events ──► ProjectionConsumer ──► DocumentIndex ◄── DiscoveryEngine
//!                       │
//!                       └─ exhausted retries ──► cdc-events.dlt ──► DeadLetterHandler ──► archive
//! ```
//!
//! - [`decode`]: flat and Debezium change envelopes
//! - [`mapping`]: row snapshot to [`ReadModelDocument`](sentinel_core::projection::ReadModelDocument)
//! - [`consumer`]: per-record apply with retry and dead-lettering
//! - [`dead_letter`]: dead-letter channel sink and its terminal archive handler
//! - [`discovery`]: fuzzy search with paging and highlights
//! - [`runner`]: supervised consumer loops
//!
//! ## Example
//!
//! ```ignore
//! let consumer = ProjectionConsumer::new(index.clone(), dead_letters, RetryPolicy::default(), clock);
//! let worker = ProjectionRunner::projection(consumer, event_bus, "cdc-events")
//!     .spawn(shutdown_tx.subscribe());
//!
//! let discovery = DiscoveryEngine::new(index);
//! let page = discovery.discover("seat", None, 0, 10).await?;
//! ```

pub mod consumer;
pub mod dead_letter;
pub mod decode;
pub mod discovery;
pub mod mapping;
pub mod runner;

pub use consumer::{ProjectionConsumer, ProjectionError, ProjectionOutcome};
pub use dead_letter::{BusDeadLetterSink, DeadLetterHandler, dead_letter_topic};
pub use decode::{DecodeError, decode_change};
pub use discovery::{
    DEFAULT_PAGE_SIZE, DiscoveryEngine, DiscoveryError, DiscoveryResponse, DiscoveryStatus,
};
pub use mapping::{MappingError, Projection};
pub use runner::ProjectionRunner;
