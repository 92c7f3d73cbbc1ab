use std::sync::Arc;
use std::time::{Duration, Instant};

use common_kafka::kafka_consumer::{CommitError, Record, StreamSubscriber};
use serde::Serialize;
use timeline_common::{DerivationSite, EventRecord, StorageError, TimelineEntry, TimelineStore};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::observer::PipelineObserver;

pub const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Running,
    Backoff,
    Stopped,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Running => "running",
            PipelineState::Backoff => "backoff",
            PipelineState::Stopped => "stopped",
        }
    }

    pub(crate) fn as_gauge(&self) -> f64 {
        match self {
            PipelineState::Running => 0.0,
            PipelineState::Backoff => 1.0,
            PipelineState::Stopped => 2.0,
        }
    }
}

/// Whether the driver should keep going after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub fetched: u64,
    pub materialized: u64,
    pub decode_skipped: u64,
    pub materialize_failed: u64,
    pub committed: u64,
    pub commit_failed: u64,
    pub backoffs: u64,
}

/// Moves records from the stream into the timeline store, one at a time:
/// fetch, decode, derive, upsert, then commit.
///
/// Offsets are only committed after the record has been dealt with. Records that fail to
/// decode or to materialize are still committed, so one bad record never stalls its
/// partition. A failed fetch leaves the position untouched and retries after a pause.
pub struct PipelineDriver<S> {
    subscriber: S,
    store: Arc<dyn TimelineStore>,
    observer: Arc<dyn PipelineObserver>,
    fetch_backoff: Duration,
    materialize_timeout: Option<Duration>,
    state: watch::Sender<PipelineState>,
    stats: PipelineStats,
}

impl<S: StreamSubscriber> PipelineDriver<S> {
    pub fn new(
        subscriber: S,
        store: Arc<dyn TimelineStore>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Running);
        Self {
            subscriber,
            store,
            observer,
            fetch_backoff: DEFAULT_FETCH_BACKOFF,
            materialize_timeout: None,
            state,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_fetch_backoff(mut self, backoff: Duration) -> Self {
        self.fetch_backoff = backoff;
        self
    }

    /// Bounds each storage write. A write that runs over counts as a failed one.
    pub fn with_materialize_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.materialize_timeout = timeout;
        self
    }

    /// Follows the driver's state, including the final `Stopped`.
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Runs until `cancel` fires. The subscriber is dropped on return, releasing its
    /// group membership.
    pub async fn run(mut self, cancel: CancellationToken) -> PipelineStats {
        info!("starting timeline pipeline");

        while !cancel.is_cancelled() {
            if self.step(&cancel).await == Step::Stop {
                break;
            }
        }

        self.transition(PipelineState::Stopped);
        info!(stats = ?self.stats, "timeline pipeline stopped");
        self.stats
    }

    /// Handles one record, or one failed fetch.
    pub async fn step(&mut self, cancel: &CancellationToken) -> Step {
        let record = match self.subscriber.fetch(cancel).await {
            Ok(record) => record,
            Err(e) if e.is_cancelled() => return Step::Stop,
            Err(e) => {
                self.stats.backoffs += 1;
                self.observer.fetch_failed(&e);
                self.transition(PipelineState::Backoff);

                tokio::select! {
                    _ = cancel.cancelled() => return Step::Stop,
                    _ = tokio::time::sleep(self.fetch_backoff) => {}
                }

                self.transition(PipelineState::Running);
                return Step::Continue;
            }
        };

        self.stats.fetched += 1;
        self.observer.fetched(&record);

        match EventRecord::decode(&record.payload) {
            Ok(event) => self.materialize(&event).await,
            Err(e) => {
                self.stats.decode_skipped += 1;
                self.observer.decode_failed(&record, &e);
            }
        }

        self.commit(cancel, &record).await
    }

    async fn materialize(&mut self, event: &EventRecord) {
        if event.is_inverted() {
            self.observer.interval_inverted(event);
        }

        let entry = TimelineEntry::from_event(event, DerivationSite::Streamed);
        let start = Instant::now();

        let upsert = self.store.upsert(&entry);
        let result = match self.materialize_timeout {
            Some(timeout) => tokio::time::timeout(timeout, upsert)
                .await
                .unwrap_or_else(|_| Err(StorageError::Timeout(timeout))),
            None => upsert.await,
        };

        match result {
            Ok(stored) => {
                self.stats.materialized += 1;
                self.observer.materialized(&stored, start.elapsed());
            }
            Err(e) => {
                self.stats.materialize_failed += 1;
                self.observer.materialize_failed(event, &e);
            }
        }
    }

    async fn commit(&mut self, cancel: &CancellationToken, record: &Record) -> Step {
        match self.subscriber.commit(cancel, record).await {
            Ok(()) => {
                self.stats.committed += 1;
                self.observer.committed(record);
                Step::Continue
            }
            // Not committed, the record comes back after a restart.
            Err(CommitError::Cancelled) => Step::Stop,
            Err(e) => {
                self.stats.commit_failed += 1;
                self.observer.commit_failed(record, &e);
                Step::Continue
            }
        }
    }

    fn transition(&self, to: PipelineState) {
        let from = self.state.send_replace(to);
        if from != to {
            self.observer.state_changed(from, to);
        }
    }
}
