//! event_core - event stream inspector
//!
//! Prints an aggregate's event stream, snapshot first, as JSON lines from the
//! configured storage medium.
//!
//! Usage: `event_core <aggregate_type> <aggregate_identifier>`

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_core::event_store::{EventStorage, FilesystemStorage, PostgresStorage};
use event_core::serializer::JsonSerializer;
use event_core::{db, Config, EventStore, StorageBackend};

/// Initialize tracing/logging
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "event_core=debug".into());

    // Logs go to stderr, stdout carries the stream
    let registry = tracing_subscriber::registry().with(filter);
    if config.is_production() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn inspect<S: EventStorage>(
    store: &EventStore<S>,
    aggregate_type: &str,
    identifier: &str,
) -> anyhow::Result<usize> {
    let stream = store.read_events(aggregate_type, identifier).await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut count = 0;
    for event in stream {
        serde_json::to_writer(&mut out, &event)?;
        out.write_all(b"\n")?;
        count += 1;
    }
    out.flush()?;

    Ok(count)
}

async fn read_stream(
    config: &Config,
    aggregate_type: &str,
    identifier: &str,
) -> anyhow::Result<usize> {
    match config.storage_backend {
        StorageBackend::Filesystem => {
            tracing::debug!(dir = %config.event_store_dir.display(), "Using filesystem event store");
            let storage =
                FilesystemStorage::new(&config.event_store_dir, Arc::new(JsonSerializer::new()));
            inspect(&EventStore::new(storage), aggregate_type, identifier).await
        }
        StorageBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let pool = db::connect(config).await?;
            if !db::check_schema(&pool).await? {
                anyhow::bail!("Database schema incomplete, apply migrations/0001_event_store.sql");
            }

            let store = EventStore::new(PostgresStorage::new(pool.clone()));
            let count = inspect(&store, aggregate_type, identifier).await;
            pool.close().await;
            count
        }
        StorageBackend::Memory => {
            anyhow::bail!("The memory backend holds no events outside a running process")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config);

    let mut args = std::env::args().skip(1);
    let (aggregate_type, identifier) = match (args.next(), args.next()) {
        (Some(aggregate_type), Some(identifier)) => (aggregate_type, identifier),
        _ => anyhow::bail!("usage: event_core <aggregate_type> <aggregate_identifier>"),
    };

    let count = read_stream(&config, &aggregate_type, &identifier)
        .await
        .with_context(|| format!("Reading {} {}", aggregate_type, identifier))?;
    tracing::info!(
        aggregate_type = %aggregate_type,
        aggregate_identifier = %identifier,
        event_count = count,
        "Event stream printed"
    );

    Ok(())
}
