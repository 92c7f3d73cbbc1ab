use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Free-form, string-keyed event metadata. Backed by a sorted map, so it serializes
/// the same way every time.
pub type Metadata = serde_json::Map<String, Value>;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("failed to decode event: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("event submitted without an event_id")]
    MissingEventId,
    #[error("event submitted without a user_id")]
    MissingUserId,
    #[error("event submitted without a source")]
    MissingSource,
}

/// One unit of user activity, as it travels through the stream.
///
/// Created once at ingestion, where `event_id` is assigned, then only ever copied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub user_id: String,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub metadata: Metadata,
}

fn empty_if_null<'de, D>(deserializer: D) -> Result<Metadata, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Metadata>::deserialize(deserializer)?.unwrap_or_default())
}

impl EventRecord {
    /// Decodes a stream payload. Anything that fails here is a poison record.
    pub fn decode(payload: &[u8]) -> Result<Self, EventError> {
        let event: EventRecord = serde_json::from_slice(payload).map_err(EventError::Decode)?;
        event.validate()?;
        Ok(event)
    }

    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(EventError::Encode)
    }

    /// Records for one user land on the same partition, keeping their relative order.
    pub fn partition_key(&self) -> &[u8] {
        self.user_id.as_bytes()
    }

    /// True when the activity interval ends before it starts. Such records are
    /// still processed, the caller decides whether to report them.
    pub fn is_inverted(&self) -> bool {
        self.ended_at < self.started_at
    }

    fn validate(&self) -> Result<(), EventError> {
        if self.event_id.trim().is_empty() {
            return Err(EventError::MissingEventId);
        }
        if self.user_id.trim().is_empty() {
            return Err(EventError::MissingUserId);
        }
        if self.source.trim().is_empty() {
            return Err(EventError::MissingSource);
        }
        Ok(())
    }
}

/// An activity as submitted to the ingestion boundary. Callers never choose the id:
/// an `event_id` field in the request body is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct NewActivity {
    pub user_id: String,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl NewActivity {
    pub fn into_record(self) -> Result<EventRecord, EventError> {
        let event = EventRecord {
            event_id: Uuid::now_v7().to_string(),
            user_id: self.user_id,
            source: self.source,
            started_at: self.started_at,
            ended_at: self.ended_at,
            metadata: self.metadata.unwrap_or_default(),
        };
        event.validate()?;
        Ok(event)
    }
}
