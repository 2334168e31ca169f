//! # Sentinel Booking
//!
//! Seat reservation under a distributed lease lock.
//!
//! A request for a resource goes through three parts:
//!
//! - [`orchestrator::BookingOrchestrator`] takes the per-resource lease,
//!   runs the transaction and always releases the lease again
//! - [`executor::ReservationExecutor`] flips the reserved flag with a
//!   compare-and-set
//! - [`producer::EventProducer`] publishes the resulting
//!   [`ReservationEvent`](sentinel_core::event::ReservationEvent) in the
//!   background, keyed by resource id
//!
//! ## Example
//!
//! ```ignore
//! let orchestrator = BookingOrchestrator::new(
//!     locks,
//!     ReservationExecutor::new(store),
//!     EventProducer::new(bus, DEFAULT_TOPIC),
//!     Arc::new(SystemClock),
//!     BookingConfig::default(),
//! );
//!
//! let outcome = orchestrator.reserve(ResourceId(42)).await;
//! println!("{} {}", outcome.status_code(), outcome.label());
//! ```

/// Reservation transaction
pub mod executor;

/// Lock, reserve, emit, release
pub mod orchestrator;

/// Asynchronous reservation event publisher
pub mod producer;

pub use executor::{ReservationError, ReservationExecutor, ReservationResult};
pub use orchestrator::{
    BookingConfig, BookingFault, BookingOrchestrator, BookingState, ReservationOutcome,
};
pub use producer::{DEFAULT_TOPIC, EventProducer};
