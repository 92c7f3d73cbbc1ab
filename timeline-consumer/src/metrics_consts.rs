pub const RECORDS_FETCHED: &str = "timeline_consumer_records_fetched";
pub const RECORDS_MATERIALIZED: &str = "timeline_consumer_records_materialized";
pub const RECORDS_COMMITTED: &str = "timeline_consumer_records_committed";
pub const DECODE_SKIPPED: &str = "timeline_consumer_decode_skipped";
pub const MATERIALIZE_FAILED: &str = "timeline_consumer_materialize_failed";
pub const COMMIT_FAILED: &str = "timeline_consumer_commit_failed";
pub const FETCH_BACKOFF: &str = "timeline_consumer_fetch_backoff";
pub const INVERTED_INTERVALS: &str = "timeline_consumer_inverted_intervals";
pub const MATERIALIZE_TIME: &str = "timeline_consumer_materialize_time_ms";
pub const END_TO_END_LAG: &str = "timeline_consumer_end_to_end_lag_ms";
pub const PIPELINE_STATE: &str = "timeline_consumer_pipeline_state";
