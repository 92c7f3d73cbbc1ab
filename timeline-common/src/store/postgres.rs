use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;

use super::{StorageError, StorageResult, TimelineStore};
use crate::event::Metadata;
use crate::timeline::{TimelineEntry, TimelineQuery};

pub static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

/// Timeline entries in the `timeline_entries` table, keyed by `timeline_id` (the event id).
pub struct PgTimelineStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct TimelineRow {
    timeline_id: String,
    user_id: String,
    source: String,
    category: String,
    confidence: f64,
    geo_context: Json<Metadata>,
    source_event_ids: Vec<String>,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    metadata: Json<Metadata>,
}

impl From<TimelineRow> for TimelineEntry {
    fn from(row: TimelineRow) -> Self {
        TimelineEntry {
            event_id: row.timeline_id,
            user_id: row.user_id,
            source: row.source,
            category: row.category,
            confidence: row.confidence,
            geo_context: row.geo_context.0,
            source_event_ids: row.source_event_ids,
            started_at: row.started_at,
            ended_at: row.ended_at,
            metadata: row.metadata.0,
        }
    }
}

impl PgTimelineStore {
    pub async fn new(url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| StorageError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TimelineStore for PgTimelineStore {
    async fn upsert(&self, entry: &TimelineEntry) -> StorageResult<TimelineEntry> {
        let query = r#"
INSERT INTO timeline_entries
    (timeline_id, user_id, source, category, confidence, geo_context,
     source_event_ids, started_at, ended_at, metadata, updated_at)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
ON CONFLICT (timeline_id) DO UPDATE SET
    user_id = EXCLUDED.user_id,
    source = EXCLUDED.source,
    category = EXCLUDED.category,
    confidence = EXCLUDED.confidence,
    geo_context = EXCLUDED.geo_context,
    source_event_ids = EXCLUDED.source_event_ids,
    started_at = EXCLUDED.started_at,
    ended_at = EXCLUDED.ended_at,
    metadata = EXCLUDED.metadata,
    updated_at = NOW()
RETURNING
    timeline_id, user_id, source, category, confidence, geo_context,
    source_event_ids, started_at, ended_at, metadata
        "#;

        let row: TimelineRow = sqlx::query_as(query)
            .bind(&entry.event_id)
            .bind(&entry.user_id)
            .bind(&entry.source)
            .bind(&entry.category)
            .bind(entry.confidence)
            .bind(Json(&entry.geo_context))
            .bind(&entry.source_event_ids[..])
            .bind(entry.started_at)
            .bind(entry.ended_at)
            .bind(Json(&entry.metadata))
            .fetch_one(&self.pool)
            .await
            .map_err(|error| StorageError::QueryError {
                command: "UPSERT".to_owned(),
                error,
            })?;

        Ok(row.into())
    }

    async fn list_for_user(&self, query: &TimelineQuery) -> StorageResult<Vec<TimelineEntry>> {
        let rows: Vec<TimelineRow> = sqlx::query_as(
            r#"
SELECT
    timeline_id, user_id, source, category, confidence, geo_context,
    source_event_ids, started_at, ended_at, metadata
FROM timeline_entries
WHERE user_id = $1
ORDER BY started_at DESC, timeline_id DESC
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

        Ok(rows.into_iter().map(TimelineEntry::from).collect())
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|error| StorageError::ConnectionError { error })?;
        Ok(())
    }
}
