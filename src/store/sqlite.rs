// src/store/sqlite.rs
use std::str::FromStr;

use async_trait::async_trait;
use chrono::TimeZone;
use chrono_tz::Tz;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{EventStore, ListQuery, StoreError, StoreResult};
use crate::event::{BucketKey, DetectionEvent, DetectionRecord, EventId};

const SELECT_COLUMNS: &str =
    "SELECT id, source, location, occurred_at_ms, date_key, time_key FROM detections";

/// SQLite-backed store. Timestamps are kept as unix milliseconds so range
/// filters hit the `occurred_at_ms` index; `tz` re-attaches the canonical zone on read.
pub struct SqliteEventStore {
    pool: SqlitePool,
    tz: Tz,
}

impl SqliteEventStore {
    /// Connects and initializes the schema.
    pub async fn connect(url: &str, tz: Tz) -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // An in-memory database lives and dies with its single connection.
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(opts)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(opts)
                .await?
        };

        let store = Self::new(pool, tz);
        store.initialize().await?;
        tracing::info!(url = %url, "sqlite event store ready");
        Ok(store)
    }

    pub fn new(pool: SqlitePool, tz: Tz) -> Self {
        Self { pool, tz }
    }

    /// Creates the table plus the timestamp and `(source, date_key)` indexes.
    pub async fn initialize(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS detections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                location TEXT NOT NULL,
                occurred_at_ms INTEGER NOT NULL,
                date_key TEXT NOT NULL,
                time_key TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_detections_occurred_at ON detections(occurred_at_ms)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_detections_source_date ON detections(source, date_key)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_event(&self, row: &SqliteRow) -> StoreResult<DetectionEvent> {
        let id: i64 = row.try_get("id")?;
        let ms: i64 = row.try_get("occurred_at_ms")?;
        let occurred_at = self
            .tz
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| StoreError::Corrupt {
                id,
                reason: format!("timestamp {ms}ms out of range"),
            })?;

        Ok(DetectionEvent {
            id: EventId(id),
            record: DetectionRecord {
                source: row.try_get("source")?,
                location: row.try_get("location")?,
                occurred_at,
                date_key: row.try_get("date_key")?,
                time_key: row.try_get("time_key")?,
            },
        })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn find_latest_in_bucket(&self, key: &BucketKey) -> StoreResult<Option<DetectionEvent>> {
        let (start_ms, end_ms) = key.bucket.millis_range();
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE source = ?1 AND location = ?2 AND date_key = ?3
               AND occurred_at_ms >= ?4 AND occurred_at_ms < ?5
             ORDER BY occurred_at_ms DESC, id DESC
             LIMIT 1"
        ))
        .bind(&key.source)
        .bind(&key.location)
        .bind(key.bucket.date_key())
        .bind(start_ms)
        .bind(end_ms)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(|r| self.row_to_event(r)).transpose()
    }

    async fn insert(&self, record: &DetectionRecord) -> StoreResult<EventId> {
        let result = sqlx::query(
            r#"
            INSERT INTO detections (source, location, occurred_at_ms, date_key, time_key)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&record.source)
        .bind(&record.location)
        .bind(record.occurred_at.timestamp_millis())
        .bind(&record.date_key)
        .bind(&record.time_key)
        .execute(&self.pool)
        .await?;

        Ok(EventId(result.last_insert_rowid()))
    }

    async fn delete_bucket_except(&self, key: &BucketKey, survivor: EventId) -> StoreResult<u64> {
        let (start_ms, end_ms) = key.bucket.millis_range();
        let result = sqlx::query(
            r#"
            DELETE FROM detections
            WHERE id != ?1
              AND source = ?2 AND location = ?3 AND date_key = ?4
              AND occurred_at_ms >= ?5 AND occurred_at_ms < ?6
            "#,
        )
        .bind(survivor.0)
        .bind(&key.source)
        .bind(&key.location)
        .bind(key.bucket.date_key())
        .bind(start_ms)
        .bind(end_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_recent(&self, query: &ListQuery) -> StoreResult<Vec<DetectionEvent>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE (?1 IS NULL OR location = ?1)
               AND (?2 IS NULL OR date_key = ?2)
             ORDER BY occurred_at_ms DESC, location ASC, id DESC
             LIMIT ?3"
        ))
        .bind(query.location.as_deref())
        .bind(query.date.as_deref())
        .bind(i64::from(query.effective_limit()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| self.row_to_event(r)).collect()
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
