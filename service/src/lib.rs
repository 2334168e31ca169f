//! # Sentinel Service
//!
//! Wiring for the Sentinel reservation engine: configuration, the
//! reservation ingestor, free-form catalog entries and the worker lifecycle.
//!
//! The `sentinel` binary assembles the production adapters (Redis locks,
//! `PostgreSQL` stores, Redpanda bus). Tests assemble the same [`Sentinel`]
//! over the in-memory ports from `sentinel-testing`.
//!
//! ## Example
//!
//! ```ignore
//! let app = Sentinel::new(ports, &Config::from_env()?);
//! let workers = app.start();
//!
//! let outcome = app.orchestrator().reserve(ResourceId(42)).await;
//! let page = app.discovery().discover("seat", None, 0, 10).await?;
//!
//! shutdown_signal().await;
//! workers.shutdown(Duration::from_secs(30)).await;
//! ```

pub mod app;
pub mod catalog;
pub mod config;
pub mod ingest;

pub use app::{Ports, Sentinel, Workers, shutdown_signal};
pub use catalog::{CatalogService, CatalogServiceError, NewCatalogEntry};
pub use config::{Config, ConfigError};
pub use ingest::{ReservationIngestor, catalog_entry};
