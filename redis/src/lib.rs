//! Redis lease lock coordinator for Sentinel.
//!
//! A lease is a plain Redis string `key -> owner` with a millisecond TTL:
//!
//! - acquire: `SET key owner NX PX lease` in a script that also lets the
//!   current owner re-take and extend its own lease, polled until the wait
//!   deadline
//! - release: compare-and-delete script, so a late release never removes a
//!   lease that has since passed to another owner
//!
//! # Example
//!
//! ```no_run
//! use sentinel_redis::RedisLockCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let locks = RedisLockCoordinator::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

pub mod lock;

pub use lock::RedisLockCoordinator;
