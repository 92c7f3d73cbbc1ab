use std::sync::Arc;

use common_kafka::kafka_producer::StreamPublisher;
use metrics::counter;
use tracing::{error, info};

use crate::event::{EventError, EventRecord, NewActivity};
use crate::events::EventStore;

/// Front door of the pipeline: turns submitted activities into event records and hands
/// them to the stream and the raw event table.
///
/// Neither hand-off can fail the call. A lost publish means the timeline misses the event
/// until it is replayed from storage; that risk is accepted to keep ingestion latency flat.
pub struct Ingestor {
    publisher: Option<Arc<dyn StreamPublisher>>,
    events: Option<Arc<dyn EventStore>>,
}

impl Ingestor {
    pub fn new(
        publisher: Option<Arc<dyn StreamPublisher>>,
        events: Option<Arc<dyn EventStore>>,
    ) -> Self {
        Self { publisher, events }
    }

    /// Validates and records one activity. Only validation errors are returned.
    pub async fn ingest(&self, activity: NewActivity) -> Result<EventRecord, EventError> {
        let event = activity.into_record()?;

        if let Some(publisher) = &self.publisher {
            match event.encode() {
                Ok(payload) => {
                    if let Err(e) = publisher.publish(event.partition_key(), &payload).await {
                        error!(event_id = %event.event_id, "failed to publish event: {}", e);
                        counter!("timeline_ingest_publish_failures_total").increment(1);
                    }
                }
                Err(e) => error!(event_id = %event.event_id, "failed to encode event: {}", e),
            }
        }

        if let Some(events) = &self.events {
            if let Err(e) = events.save(&event).await {
                error!(event_id = %event.event_id, "failed to save event: {}", e);
                counter!("timeline_ingest_save_failures_total").increment(1);
            }
        }

        info!(event_id = %event.event_id, user_id = %event.user_id, "ingested event");
        counter!("timeline_ingest_events_total").increment(1);
        Ok(event)
    }
}
