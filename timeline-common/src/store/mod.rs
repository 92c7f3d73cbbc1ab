mod memory;
mod postgres;

pub use memory::{MemoryEventStore, MemoryTimelineStore};
pub use postgres::{PgTimelineStore, MIGRATOR};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::timeline::{TimelineEntry, TimelineQuery};

/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Durable home of timeline entries, keyed by `event_id`.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// Inserts the entry, or overwrites every field of the entry with the same `event_id`.
    /// Returns what was persisted.
    async fn upsert(&self, entry: &TimelineEntry) -> StorageResult<TimelineEntry>;

    /// The user's entries, most recent `started_at` first.
    async fn list_for_user(&self, query: &TimelineQuery) -> StorageResult<Vec<TimelineEntry>>;

    async fn ping(&self) -> StorageResult<()>;
}
