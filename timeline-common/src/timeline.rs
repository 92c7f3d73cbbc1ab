use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::derive::{derive, DerivationSite};
use crate::event::{EventRecord, Metadata};

pub const DEFAULT_TIMELINE_LIMIT: i64 = 50;
pub const MAX_TIMELINE_LIMIT: i64 = 500;

/// The materialized view of an event, keyed by the event's id.
///
/// Entirely determined by the source event and the derivation site: rebuilding it from
/// the same event yields an equal value, which is what makes redelivery harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub event_id: String,
    pub user_id: String,
    pub source: String,
    pub category: String,
    pub confidence: f64,
    pub geo_context: Metadata,
    pub source_event_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub metadata: Metadata,
}

impl TimelineEntry {
    pub fn from_event(event: &EventRecord, site: DerivationSite) -> Self {
        let derived = derive(&event.source, &event.metadata, site);
        TimelineEntry {
            event_id: event.event_id.clone(),
            user_id: event.user_id.clone(),
            source: event.source.clone(),
            category: derived.category,
            confidence: derived.confidence,
            geo_context: derived.geo_context,
            source_event_ids: vec![event.event_id.clone()],
            started_at: event.started_at,
            ended_at: event.ended_at,
            metadata: event.metadata.clone(),
        }
    }
}

/// A request for a user's most recent timeline entries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimelineQuery {
    pub user_id: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl TimelineQuery {
    pub fn new(user_id: impl Into<String>, limit: Option<i64>) -> Self {
        TimelineQuery {
            user_id: user_id.into(),
            limit,
        }
    }

    /// Missing or non-positive limits get the default, large ones are capped.
    pub fn limit(&self) -> i64 {
        match self.limit {
            Some(limit) if limit > 0 => limit.min(MAX_TIMELINE_LIMIT),
            _ => DEFAULT_TIMELINE_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn event(metadata: serde_json::Value) -> EventRecord {
        EventRecord {
            event_id: "e1".to_string(),
            user_id: "u1".to_string(),
            source: "calendar".to_string(),
            started_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            ended_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            metadata: serde_json::from_value(metadata).unwrap(),
        }
    }

    #[test]
    fn entry_carries_event_fields_through() {
        let event = event(json!({"geo_context": {"city": "Porto"}, "note": "standup"}));
        let entry = TimelineEntry::from_event(&event, DerivationSite::Streamed);

        assert_eq!(entry.event_id, "e1");
        assert_eq!(entry.user_id, "u1");
        assert_eq!(entry.category, "calendar");
        assert_eq!(entry.confidence, 0.6);
        assert_eq!(entry.geo_context["city"], json!("Porto"));
        assert_eq!(entry.source_event_ids, vec!["e1".to_string()]);
        assert_eq!(entry.started_at, event.started_at);
        assert_eq!(entry.ended_at, event.ended_at);
        assert_eq!(entry.metadata, event.metadata);
    }

    #[test]
    fn rebuilding_from_the_same_event_is_identical() {
        let event = event(json!({"category": "focus", "confidence": 0.8}));
        let first = TimelineEntry::from_event(&event, DerivationSite::Streamed);
        let second = TimelineEntry::from_event(&event, DerivationSite::Streamed);

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn query_limits_are_clamped() {
        assert_eq!(TimelineQuery::new("u1", None).limit(), 50);
        assert_eq!(TimelineQuery::new("u1", Some(0)).limit(), 50);
        assert_eq!(TimelineQuery::new("u1", Some(-3)).limit(), 50);
        assert_eq!(TimelineQuery::new("u1", Some(10)).limit(), 10);
        assert_eq!(TimelineQuery::new("u1", Some(500)).limit(), 500);
        assert_eq!(TimelineQuery::new("u1", Some(10_000)).limit(), 500);
    }
}
