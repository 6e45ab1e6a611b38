// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod bucket;
pub mod config;
pub mod dedup;
pub mod detector;
pub mod display;
pub mod event;
pub mod metrics;
pub mod source;
pub mod store;
pub mod supervisor;
pub mod worker;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::bucket::{Clock, SystemClock, TimeBucket};
pub use crate::config::{ConfigError, MonitorConfig};
pub use crate::dedup::{DedupOutcome, Deduplicator};
pub use crate::detector::{Detector, InferenceModel};
pub use crate::event::{BucketKey, DetectionEvent, DetectionRecord, EventId, LocationMap};
pub use crate::store::{open_store, EventStore, ListQuery, StoreError};
pub use crate::supervisor::{Supervisor, WorkerBoard, WorkerStatus};
pub use crate::worker::{SourceWorker, WorkerDeps, WorkerState};
