//! # Sentinel Core
//!
//! Domain types and ports for the Sentinel reservation engine and its search
//! projection pipeline.
//!
//! The crate has no I/O of its own. It defines the values that flow through the
//! system and the traits that adapters (Redis, Postgres, Redpanda, in-memory)
//! implement:
//!
//! - [`resource`]: reservable resources and the [`resource::ResourceStore`] persistence port
//! - [`lock`]: lease-based mutual exclusion through [`lock::LockCoordinator`]
//! - [`event`]: the immutable [`event::ReservationEvent`]
//! - [`event_bus`]: keyed publish / acknowledged subscribe through [`event_bus::EventBus`]
//! - [`change`]: change-data-capture records from the authoritative store
//! - [`projection`]: the read-model document and the [`projection::DocumentIndex`] port
//! - [`dead_letter`]: terminal sink for records that exhausted their retries
//! - [`catalog`]: the authoritative catalog rows captured by the change stream
//! - [`text`]: fuzzy term matching and highlighting shared by index implementations
//!
//! ## Flow
//!
//! ```text
//! reserve(id) ─► LockCoordinator ─► ResourceStore ─► EventBus("ticketing")
//!                                                         │
//!                                   CatalogStore ◄── ingestor
//!                                        │
//!                                  change stream ─► projection ─► DocumentIndex ◄── discover()
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod catalog;
pub mod change;
pub mod dead_letter;
pub mod event;
pub mod event_bus;
pub mod lock;
pub mod projection;
pub mod resource;
pub mod text;

/// Environment module - injected capabilities that keep domain logic testable.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Example
    ///
    /// ```
    /// use sentinel_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock implementation of [`Clock`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
