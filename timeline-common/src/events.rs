//! Raw activity events, as accepted by the ingestion boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;

use crate::derive::DerivationSite;
use crate::event::{EventRecord, Metadata};
use crate::store::{StorageError, StorageResult};
use crate::timeline::{TimelineEntry, TimelineQuery};

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn save(&self, event: &EventRecord) -> StorageResult<()>;
}

/// The `activity_events` table.
pub struct EventRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: String,
    user_id: String,
    source: String,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    metadata: Json<Metadata>,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        EventRecord {
            event_id: row.event_id,
            user_id: row.user_id,
            source: row.source,
            started_at: row.started_at,
            ended_at: row.ended_at,
            metadata: row.metadata.0,
        }
    }
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, query: &TimelineQuery) -> StorageResult<Vec<EventRecord>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
SELECT event_id, user_id, source, started_at, ended_at, metadata
FROM activity_events
WHERE user_id = $1
ORDER BY started_at DESC, event_id DESC
LIMIT $2
            "#,
        )
        .bind(&query.user_id)
        .bind(query.limit())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StorageError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        Ok(rows.into_iter().map(EventRecord::from).collect())
    }

    /// Timeline entries derived on the fly from stored events, without going through the
    /// stream. Uses the stored-event confidence default.
    pub async fn list_derived(&self, query: &TimelineQuery) -> StorageResult<Vec<TimelineEntry>> {
        let events = self.list(query).await?;
        Ok(events
            .iter()
            .map(|event| TimelineEntry::from_event(event, DerivationSite::Stored))
            .collect())
    }

    pub async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|error| StorageError::ConnectionError { error })?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for EventRepository {
    async fn save(&self, event: &EventRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
INSERT INTO activity_events
    (event_id, user_id, source, started_at, ended_at, metadata)
VALUES
    ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.user_id)
        .bind(&event.source)
        .bind(event.started_at)
        .bind(event.ended_at)
        .bind(Json(&event.metadata))
        .execute(&self.pool)
        .await
        .map_err(|error| StorageError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(())
    }
}
