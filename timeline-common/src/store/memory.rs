use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{StorageError, StorageResult, TimelineStore};
use crate::event::EventRecord;
use crate::events::EventStore;
use crate::timeline::{TimelineEntry, TimelineQuery};

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, TimelineEntry>,
    upserts: usize,
    upsert_failures: usize,
    unavailable: bool,
}

/// Timeline entries held in process, with the same overwrite-by-`event_id` semantics as
/// Postgres. Failures can be injected to exercise callers' error paths.
#[derive(Default)]
pub struct MemoryTimelineStore {
    state: Mutex<MemoryState>,
}

impl MemoryTimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, event_id: &str) -> Option<TimelineEntry> {
        self.lock().entries.get(event_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful upserts so far, including overwrites.
    pub fn upsert_count(&self) -> usize {
        self.lock().upserts
    }

    /// The next `count` upserts fail without writing anything.
    pub fn fail_next_upserts(&self, count: usize) {
        self.lock().upsert_failures = count;
    }

    /// Makes `ping` fail until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("poisoned MemoryTimelineStore mutex")
    }
}

#[async_trait]
impl TimelineStore for MemoryTimelineStore {
    async fn upsert(&self, entry: &TimelineEntry) -> StorageResult<TimelineEntry> {
        let mut state = self.lock();
        if state.upsert_failures > 0 {
            state.upsert_failures -= 1;
            return Err(StorageError::Unavailable("injected upsert failure".to_owned()));
        }

        state.entries.insert(entry.event_id.clone(), entry.clone());
        state.upserts += 1;
        Ok(entry.clone())
    }

    async fn list_for_user(&self, query: &TimelineQuery) -> StorageResult<Vec<TimelineEntry>> {
        let state = self.lock();
        let mut entries: Vec<TimelineEntry> = state
            .entries
            .values()
            .filter(|entry| entry.user_id == query.user_id)
            .cloned()
            .collect();

        entries.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.event_id.cmp(&a.event_id))
        });
        entries.truncate(query.limit() as usize);
        Ok(entries)
    }

    async fn ping(&self) -> StorageResult<()> {
        if self.lock().unavailable {
            return Err(StorageError::Unavailable("store marked unavailable".to_owned()));
        }
        Ok(())
    }
}

/// Raw events held in process, in insertion order.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<EventRecord>>,
    failing: Mutex<bool>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().expect("poisoned MemoryEventStore mutex").clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().expect("poisoned MemoryEventStore mutex") = failing;
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn save(&self, event: &EventRecord) -> StorageResult<()> {
        if *self.failing.lock().expect("poisoned MemoryEventStore mutex") {
            return Err(StorageError::Unavailable("injected save failure".to_owned()));
        }
        self.events
            .lock()
            .expect("poisoned MemoryEventStore mutex")
            .push(event.clone());
        Ok(())
    }
}
