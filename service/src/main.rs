//! Sentinel server.
//!
//! Connects to `PostgreSQL`, Redis and Redpanda, starts the ingest,
//! projection and dead-letter workers and runs until Ctrl+C or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! docker compose up -d
//! cargo run --bin sentinel
//! ```

use anyhow::Context;
use sentinel_core::environment::SystemClock;
use sentinel_postgres::{
    DeadLetterQueue, PostgresCatalogStore, PostgresDocumentIndex, PostgresResourceStore,
};
use sentinel_redis::RedisLockCoordinator;
use sentinel_redpanda::RedpandaEventBus;
use sentinel_runtime::metrics::MetricsServer;
use sentinel_service::{Config, Ports, Sentinel, shutdown_signal};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.server.log_level)
                .unwrap_or_else(|_| "info,sqlx=warn,rdkafka=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        redis = %config.redis.url,
        redpanda = %config.redpanda.brokers,
        ticketing_topic = %config.redpanda.ticketing_topic,
        cdc_topic = %config.redpanda.cdc_topic,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.server.metrics_addr);
    metrics.start()?;

    let pool = sentinel_postgres::connect(&config.postgres.url, config.postgres.max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    if config.postgres.run_migrations {
        sentinel_postgres::migrate(&pool)
            .await
            .context("Failed to run migrations")?;
    }

    let locks = RedisLockCoordinator::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;

    let bus = RedpandaEventBus::builder()
        .brokers(&config.redpanda.brokers)
        .consumer_group(&config.redpanda.projection_group)
        .build()
        .context("Failed to create event bus")?;
    let ingest_bus = RedpandaEventBus::builder()
        .brokers(&config.redpanda.brokers)
        .consumer_group(&config.redpanda.ingest_group)
        .build()
        .context("Failed to create ingest event bus")?;

    let ports = Ports {
        locks: Arc::new(locks),
        resources: Arc::new(PostgresResourceStore::new(pool.clone())),
        catalog: Arc::new(PostgresCatalogStore::new(pool.clone())),
        index: Arc::new(PostgresDocumentIndex::new(pool.clone())),
        archive: Arc::new(DeadLetterQueue::new(pool)),
        bus: Arc::new(bus),
        ingest_bus: Arc::new(ingest_bus),
        clock: Arc::new(SystemClock),
    };

    let app = Sentinel::new(ports, &config);
    let workers = app.start();
    tracing::info!(topics = ?workers.topics(), "Sentinel is running, press Ctrl+C to stop");

    shutdown_signal().await;

    tracing::info!("Shutting down gracefully...");
    workers.shutdown(config.shutdown_timeout()).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
