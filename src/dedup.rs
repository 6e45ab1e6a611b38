//! # Minute-bucket deduplication
//! Every positive detection is inserted unconditionally, then the bucket is
//! re-read and everything but its latest record is deleted. Repeated
//! detections within one minute therefore converge to a single survivor
//! holding the most recent timestamp. Between the insert and the prune a
//! concurrent reader may briefly see more than one record.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;

use crate::event::{BucketKey, DetectionRecord, EventId};
use crate::store::{EventStore, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupOutcome {
    /// Survivor observed before inserting, if the bucket already had one.
    pub previous: Option<EventId>,
    pub inserted: EventId,
    pub survivor: EventId,
    pub pruned: u64,
}

#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<dyn EventStore>,
    timeout: Duration,
}

impl Deduplicator {
    /// `timeout` bounds each individual store call.
    pub fn new(store: Arc<dyn EventStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Runs find-latest / insert / find-latest / delete-except for the record's bucket.
    /// Any failing call aborts the protocol; nothing is retried.
    pub async fn record(&self, record: &DetectionRecord) -> StoreResult<DedupOutcome> {
        let key = BucketKey::for_record(record);
        let t0 = Instant::now();

        let previous = self
            .bounded("find_latest", self.store.find_latest_in_bucket(&key))
            .await?
            .map(|e| e.id);
        tracing::debug!(
            source = %key.source,
            bucket = %key.bucket.start().format("%H:%M"),
            previous = ?previous,
            "bucket state before insert"
        );

        let inserted = self.bounded("insert", self.store.insert(record)).await?;

        let survivor = match self
            .bounded("find_latest", self.store.find_latest_in_bucket(&key))
            .await?
        {
            Some(latest) => latest.id,
            None => {
                tracing::warn!(source = %key.source, id = %inserted, "inserted event not visible on re-read");
                inserted
            }
        };

        let pruned = self
            .bounded("delete_except", self.store.delete_bucket_except(&key, survivor))
            .await?;

        histogram!("camwatch_dedup_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        if pruned > 0 {
            tracing::info!(
                source = %key.source,
                location = %key.location,
                survivor = %survivor,
                pruned,
                "pruned superseded detections"
            );
        }

        Ok(DedupOutcome {
            previous,
            inserted,
            survivor,
            pruned,
        })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout {
                op,
                secs: self.timeout.as_secs(),
            })?
    }
}
