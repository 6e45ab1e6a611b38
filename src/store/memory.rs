// src/store/memory.rs
use std::sync::Mutex;

use async_trait::async_trait;

use super::{EventStore, ListQuery, StoreError, StoreResult};
use crate::event::{BucketKey, DetectionEvent, DetectionRecord, EventId};

/// Process-local store. Used by tests and `STORE_URL=memory:` dry runs.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<DetectionEvent>,
    next_id: i64,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event, in insertion order.
    pub fn snapshot(&self) -> StoreResult<Vec<DetectionEvent>> {
        Ok(self.lock()?.events.clone())
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.lock()?.events.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".into()))
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn find_latest_in_bucket(&self, key: &BucketKey) -> StoreResult<Option<DetectionEvent>> {
        let guard = self.lock()?;
        Ok(guard
            .events
            .iter()
            .filter(|e| key.matches(&e.record))
            .max_by_key(|e| (e.record.occurred_at, e.id))
            .cloned())
    }

    async fn insert(&self, record: &DetectionRecord) -> StoreResult<EventId> {
        let mut guard = self.lock()?;
        guard.next_id += 1;
        let id = EventId(guard.next_id);
        guard.events.push(DetectionEvent {
            id,
            record: record.clone(),
        });
        Ok(id)
    }

    async fn delete_bucket_except(&self, key: &BucketKey, survivor: EventId) -> StoreResult<u64> {
        let mut guard = self.lock()?;
        let before = guard.events.len();
        guard
            .events
            .retain(|e| e.id == survivor || !key.matches(&e.record));
        Ok((before - guard.events.len()) as u64)
    }

    async fn list_recent(&self, query: &ListQuery) -> StoreResult<Vec<DetectionEvent>> {
        let guard = self.lock()?;
        let mut out: Vec<DetectionEvent> = guard
            .events
            .iter()
            .filter(|e| {
                query
                    .location
                    .as_deref()
                    .map_or(true, |l| e.record.location == l)
                    && query.date.as_deref().map_or(true, |d| e.record.date_key == d)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.record
                .occurred_at
                .cmp(&a.record.occurred_at)
                .then_with(|| a.record.location.cmp(&b.record.location))
                .then_with(|| b.id.cmp(&a.id))
        });
        out.truncate(query.effective_limit() as usize);
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
