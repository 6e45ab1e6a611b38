// src/event.rs
use std::collections::HashMap;
use std::fmt;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;

use crate::bucket::{TimeBucket, DATE_KEY_FORMAT, TIME_KEY_FORMAT};

/// Location recorded for sources missing from the location mapping.
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Store-assigned identifier. Higher ids were inserted later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static `source -> location` mapping, loaded once and shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationMap {
    inner: HashMap<String, String>,
}

impl LocationMap {
    pub fn new(inner: HashMap<String, String>) -> Self {
        Self { inner }
    }

    /// Location label for `source`, or [`UNKNOWN_LOCATION`].
    pub fn resolve(&self, source: &str) -> &str {
        self.inner
            .get(source)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LOCATION)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl FromIterator<(String, String)> for LocationMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

/// A detection about to be written (no id yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionRecord {
    pub source: String,
    pub location: String,
    #[serde(rename = "timestamp")]
    pub occurred_at: DateTime<Tz>,
    #[serde(rename = "date")]
    pub date_key: String,
    #[serde(rename = "time")]
    pub time_key: String,
}

impl DetectionRecord {
    /// Builds the record with both derived keys formatted from `occurred_at`.
    pub fn new(source: impl Into<String>, location: impl Into<String>, occurred_at: DateTime<Tz>) -> Self {
        Self {
            source: source.into(),
            location: location.into(),
            date_key: occurred_at.format(DATE_KEY_FORMAT).to_string(),
            time_key: occurred_at.format(TIME_KEY_FORMAT).to_string(),
            occurred_at,
        }
    }

    pub fn bucket(&self) -> TimeBucket {
        TimeBucket::containing(&self.occurred_at)
    }
}

/// A persisted detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionEvent {
    pub id: EventId,
    #[serde(flatten)]
    pub record: DetectionRecord,
}

impl DetectionEvent {
    pub fn occurred_at(&self) -> DateTime<Tz> {
        self.record.occurred_at
    }
}

/// The dedup scope: one source, its location, one minute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub source: String,
    pub location: String,
    pub bucket: TimeBucket,
}

impl BucketKey {
    pub fn new(source: impl Into<String>, location: impl Into<String>, bucket: TimeBucket) -> Self {
        Self {
            source: source.into(),
            location: location.into(),
            bucket,
        }
    }

    pub fn for_record(record: &DetectionRecord) -> Self {
        Self::new(record.source.clone(), record.location.clone(), record.bucket())
    }

    /// Same filter every backend applies: source, location, date key and the time window.
    pub fn matches(&self, record: &DetectionRecord) -> bool {
        record.source == self.source
            && record.location == self.location
            && record.date_key == self.bucket.date_key()
            && self.bucket.contains(&record.occurred_at)
    }
}
