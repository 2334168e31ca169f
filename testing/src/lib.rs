//! # Sentinel Testing
//!
//! In-memory implementations of every Sentinel port, for fast and
//! deterministic tests.
//!
//! This crate provides:
//! - [`InMemoryLockCoordinator`]: lease table on the tokio clock
//! - [`InMemoryResourceStore`]: resource rows with outage and latency injection
//! - [`InMemoryEventBus`]: per-topic logs with committed offsets and manual acks
//! - [`InMemoryDocumentIndex`]: fuzzy-searchable documents with failure injection
//! - [`InMemoryDeadLetterSink`]: captured dead letters
//! - [`InMemoryDeadLetterArchive`]: dead-letter archive with status transitions
//! - [`InMemoryCatalogStore`]: catalog rows that emit change records
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use sentinel_testing::{InMemoryLockCoordinator, InMemoryResourceStore};
//!
//! #[tokio::test(start_paused = true)]
//! async fn reserves_once() {
//!     let locks = Arc::new(InMemoryLockCoordinator::new());
//!     let store = Arc::new(InMemoryResourceStore::with_available([42]));
//!     // build an orchestrator over these and reserve 42 twice
//! }
//! ```

use chrono::{DateTime, Utc};
use sentinel_core::environment::Clock;

pub mod catalog;
pub mod event_bus;
pub mod lock;
pub mod projection_mocks;
pub mod resource_store;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use sentinel_testing::mocks::FixedClock;
    /// use sentinel_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }
}

// Re-export commonly used items
pub use catalog::InMemoryCatalogStore;
pub use event_bus::{InMemoryEventBus, PublishedMessage};
pub use lock::InMemoryLockCoordinator;
pub use mocks::{FixedClock, test_clock};
pub use projection_mocks::{
    InMemoryDeadLetterArchive, InMemoryDeadLetterSink, InMemoryDocumentIndex,
};
pub use resource_store::InMemoryResourceStore;
