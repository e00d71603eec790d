//! PostgreSQL storage medium
//!
//! Streams live in `domain_events`, snapshots in `snapshot_events`
//! (see `migrations/0001_event_store.sql`). An append handle is a database
//! transaction holding a per-aggregate advisory lock until it ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{DomainEventMessage, MetaData};

use super::{AggregateStreamHandle, EventStorage, EventStoreError};

const UNIQUE_VIOLATION: &str = "23505";

type EventRow = (
    Uuid,
    String,
    String,
    i64,
    String,
    serde_json::Value,
    Json<MetaData>,
    DateTime<Utc>,
);

fn from_row(row: EventRow) -> DomainEventMessage {
    let (
        identifier,
        aggregate_type,
        aggregate_identifier,
        sequence_number,
        payload_type,
        payload,
        meta_data,
        timestamp,
    ) = row;
    DomainEventMessage::from_parts(
        identifier,
        aggregate_type,
        aggregate_identifier,
        sequence_number,
        payload_type,
        payload,
        meta_data.0,
        timestamp,
    )
}

/// Map duplicate `(type, id, sequence)` rows onto a concurrency conflict
fn map_insert_error(err: sqlx::Error, aggregate_type: &str, identifier: &str) -> EventStoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            EventStoreError::conflicting_modification(aggregate_type, identifier)
        }
        _ => EventStoreError::Database(err),
    }
}

/// Event storage in PostgreSQL
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Create a new storage with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStorage for PostgresStorage {
    async fn event_stream_exists(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<bool, EventStoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM domain_events
                WHERE aggregate_type = $1 AND aggregate_identifier = $2
            )
            "#,
        )
        .bind(aggregate_type)
        .bind(identifier)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn open_for_append(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Box<dyn AggregateStreamHandle>, EventStoreError> {
        let mut tx = self.pool.begin().await?;

        // Released automatically when the transaction commits or rolls back
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
            .bind(aggregate_type)
            .bind(identifier)
            .execute(&mut *tx)
            .await?;

        let existed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM domain_events
                WHERE aggregate_type = $1 AND aggregate_identifier = $2
            )
            "#,
        )
        .bind(aggregate_type)
        .bind(identifier)
        .fetch_one(&mut *tx)
        .await?;

        Ok(Box::new(PostgresStreamHandle {
            tx,
            aggregate_type: aggregate_type.to_string(),
            identifier: identifier.to_string(),
            existed,
        }))
    }

    async fn read_event_stream(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Vec<DomainEventMessage>, EventStoreError> {
        let events: Vec<DomainEventMessage> = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT event_identifier, aggregate_type, aggregate_identifier, sequence_number,
                   payload_type, payload, meta_data, time_stamp
            FROM domain_events
            WHERE aggregate_type = $1 AND aggregate_identifier = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(aggregate_type)
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(from_row)
        .collect();

        if events.is_empty() {
            return Err(EventStoreError::stream_not_found(aggregate_type, identifier));
        }

        Ok(events)
    }

    async fn snapshot_exists(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<bool, EventStoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM snapshot_events
                WHERE aggregate_type = $1 AND aggregate_identifier = $2
            )
            "#,
        )
        .bind(aggregate_type)
        .bind(identifier)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn read_latest_snapshot(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Option<DomainEventMessage>, EventStoreError> {
        let snapshot = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT event_identifier, aggregate_type, aggregate_identifier, sequence_number,
                   payload_type, payload, meta_data, time_stamp
            FROM snapshot_events
            WHERE aggregate_type = $1 AND aggregate_identifier = $2
            ORDER BY sequence_number DESC, snapshot_id DESC
            LIMIT 1
            "#,
        )
        .bind(aggregate_type)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?
        .map(from_row);

        Ok(snapshot)
    }

    async fn write_snapshot(
        &self,
        aggregate_type: &str,
        snapshot: &DomainEventMessage,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            INSERT INTO snapshot_events (
                event_identifier, aggregate_type, aggregate_identifier, sequence_number,
                payload_type, payload, meta_data, time_stamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(snapshot.identifier())
        .bind(aggregate_type)
        .bind(snapshot.aggregate_identifier())
        .bind(snapshot.sequence_number())
        .bind(snapshot.payload_type())
        .bind(snapshot.payload())
        .bind(Json(snapshot.meta_data()))
        .bind(snapshot.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

struct PostgresStreamHandle {
    tx: Transaction<'static, Postgres>,
    aggregate_type: String,
    identifier: String,
    existed: bool,
}

#[async_trait]
impl AggregateStreamHandle for PostgresStreamHandle {
    fn stream_existed(&self) -> bool {
        self.existed
    }

    async fn write(&mut self, message: &DomainEventMessage) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            INSERT INTO domain_events (
                event_identifier, aggregate_type, aggregate_identifier, sequence_number,
                payload_type, payload, meta_data, time_stamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(message.identifier())
        .bind(&self.aggregate_type)
        .bind(message.aggregate_identifier())
        .bind(message.sequence_number())
        .bind(message.payload_type())
        .bind(message.payload())
        .bind(Json(message.meta_data()))
        .bind(message.timestamp())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_insert_error(e, &self.aggregate_type, &self.identifier))?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), EventStoreError> {
        let handle = *self;
        handle
            .tx
            .commit()
            .await
            .map_err(|e| map_insert_error(e, &handle.aggregate_type, &handle.identifier))
    }
}
