use std::time::{Duration, SystemTime};

use common_kafka::kafka_consumer::{CommitError, FetchError, Record};
use metrics::{counter, gauge, histogram};
use timeline_common::{EventError, EventRecord, StorageError, TimelineEntry};
use tracing::{debug, error, info, warn};

use crate::metrics_consts::{
    COMMIT_FAILED, DECODE_SKIPPED, END_TO_END_LAG, FETCH_BACKOFF, INVERTED_INTERVALS,
    MATERIALIZE_FAILED, MATERIALIZE_TIME, PIPELINE_STATE, RECORDS_COMMITTED, RECORDS_FETCHED,
    RECORDS_MATERIALIZED,
};
use crate::pipeline::PipelineState;

/// Receives everything worth reporting from the pipeline driver. All methods default to
/// doing nothing, so implementations pick what they care about.
pub trait PipelineObserver: Send + Sync {
    fn state_changed(&self, _from: PipelineState, _to: PipelineState) {}

    fn fetched(&self, _record: &Record) {}

    fn fetch_failed(&self, _error: &FetchError) {}

    fn decode_failed(&self, _record: &Record, _error: &EventError) {}

    fn interval_inverted(&self, _event: &EventRecord) {}

    fn materialized(&self, _entry: &TimelineEntry, _elapsed: Duration) {}

    fn materialize_failed(&self, _event: &EventRecord, _error: &StorageError) {}

    fn committed(&self, _record: &Record) {}

    fn commit_failed(&self, _record: &Record, _error: &CommitError) {}
}

/// Logs through `tracing` and counts through `metrics`.
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn state_changed(&self, from: PipelineState, to: PipelineState) {
        info!(?from, ?to, "pipeline state changed");
        gauge!(PIPELINE_STATE).set(to.as_gauge());
    }

    fn fetched(&self, record: &Record) {
        counter!(RECORDS_FETCHED).increment(1);

        if let Some(produced_at) = record.timestamp {
            let now = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64;
            histogram!(END_TO_END_LAG).record((now - produced_at).max(0) as f64);
        }
    }

    fn fetch_failed(&self, error: &FetchError) {
        error!("failed to fetch from stream, backing off: {}", error);
        counter!(FETCH_BACKOFF).increment(1);
    }

    fn decode_failed(&self, record: &Record, error: &EventError) {
        warn!(?record, "skipping record that failed to decode: {}", error);
        counter!(DECODE_SKIPPED).increment(1);
    }

    fn interval_inverted(&self, event: &EventRecord) {
        warn!(
            event_id = %event.event_id,
            started_at = %event.started_at,
            ended_at = %event.ended_at,
            "event ends before it starts"
        );
        counter!(INVERTED_INTERVALS).increment(1);
    }

    fn materialized(&self, entry: &TimelineEntry, elapsed: Duration) {
        debug!(
            event_id = %entry.event_id,
            category = %entry.category,
            "materialized timeline entry"
        );
        counter!(RECORDS_MATERIALIZED).increment(1);
        histogram!(MATERIALIZE_TIME).record(elapsed.as_secs_f64() * 1000.0);
    }

    fn materialize_failed(&self, event: &EventRecord, error: &StorageError) {
        error!(
            event_id = %event.event_id,
            "failed to materialize timeline entry, skipping: {}", error
        );
        counter!(MATERIALIZE_FAILED).increment(1);
    }

    fn committed(&self, _record: &Record) {
        counter!(RECORDS_COMMITTED).increment(1);
    }

    fn commit_failed(&self, record: &Record, error: &CommitError) {
        warn!(?record, "failed to commit offset, record may be redelivered: {}", error);
        counter!(COMMIT_FAILED).increment(1);
    }
}
