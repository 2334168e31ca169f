//! # Sentinel Runtime
//!
//! Runtime building blocks shared by the Sentinel workers.
//!
//! ## Components
//!
//! - **Retry**: [`retry::RetryPolicy`] and the [`retry::RetrySchedule`] state
//!   machine for bounded exponential backoff
//! - **Consumer**: [`consumer::EventConsumer`], the subscribe-process-reconnect
//!   loop with manual acknowledgement
//! - **Metrics**: Prometheus exporter and metric recorders

/// Retry logic with exponential backoff
pub mod retry;

/// Event bus consumer with reconnection
pub mod consumer;

/// Prometheus metrics for observability
pub mod metrics;

pub use consumer::{DeliveryHandler, EventConsumer, HandlerError};
pub use retry::{RetryFailure, RetryPolicy, RetrySchedule};
