//! Database module
//!
//! Pool creation and schema checks for the PostgreSQL medium.

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

use crate::config::{Config, ConfigError};
use crate::error::CoreResult;

const SCHEMA: &str = include_str!("../migrations/0001_event_store.sql");

/// Tables the event store reads and writes
const REQUIRED_TABLES: [&str; 2] = ["domain_events", "snapshot_events"];

/// Create a connection pool from configuration
pub async fn connect(config: &Config) -> CoreResult<PgPool> {
    let url = config
        .database_url
        .as_deref()
        .ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await?;

    Ok(pool)
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(table = %table, "Required table does not exist");
            return Ok(false);
        }
    }

    Ok(true)
}

/// Create the event store tables if they are missing
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(SCHEMA).await?;
    tracing::info!("Event store schema ensured");
    Ok(())
}
