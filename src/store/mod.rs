// src/store/mod.rs
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;

use crate::event::{BucketKey, DetectionEvent, DetectionRecord, EventId};

pub use memory::MemoryEventStore;
pub use sqlite::SqliteEventStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store failures. All of them are retryable from the caller's point of view.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store call `{op}` timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

/// Default page size of [`ListQuery`].
pub const DEFAULT_LIST_LIMIT: u32 = 100;
/// Hard cap of [`ListQuery::limit`].
pub const MAX_LIST_LIMIT: u32 = 1000;

/// Filter for the detection listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub location: Option<String>,
    /// Day key in `dd/mm/YYYY`.
    pub date: Option<String>,
    pub limit: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            location: None,
            date: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl ListQuery {
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }
}

/// Durable collection of detection events.
///
/// Every call goes to the backing store; implementations must not cache, since
/// workers of other sources (and other processes) write concurrently.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Latest event of the bucket (greatest timestamp, then greatest id).
    async fn find_latest_in_bucket(&self, key: &BucketKey) -> StoreResult<Option<DetectionEvent>>;

    /// Appends a record and returns its freshly assigned id.
    async fn insert(&self, record: &DetectionRecord) -> StoreResult<EventId>;

    /// Deletes every record of the bucket except `survivor`; returns the number deleted.
    async fn delete_bucket_except(&self, key: &BucketKey, survivor: EventId) -> StoreResult<u64>;

    /// Newest events first (ties by location ascending).
    async fn list_recent(&self, query: &ListQuery) -> StoreResult<Vec<DetectionEvent>>;

    fn name(&self) -> &'static str;
}

/// Opens the backend selected by the URL scheme.
///
/// - `memory:` → [`MemoryEventStore`]
/// - `sqlite:` → [`SqliteEventStore`] (schema and indexes created on connect)
pub async fn open_store(url: &str, tz: Tz) -> anyhow::Result<Arc<dyn EventStore>> {
    let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
    match scheme.as_str() {
        "memory" => Ok(Arc::new(MemoryEventStore::new())),
        "sqlite" => {
            let store = SqliteEventStore::connect(url, tz).await?;
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unsupported STORE_URL scheme `{other}`"),
    }
}
