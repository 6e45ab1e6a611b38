//! Minute buckets and the canonical clock.
//!
//! Every timestamp in the pipeline lives in one canonical zone (configured via
//! `TIMEZONE`). A bucket is the right-open minute `[start, start + 60s)` that
//! contains an instant, floored on the wall clock of that zone.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;

/// Width of one deduplication bucket.
pub const BUCKET_SECS: i64 = 60;

/// Day-precision key stored alongside every event.
pub const DATE_KEY_FORMAT: &str = "%d/%m/%Y";
/// Second-precision key stored alongside every event.
pub const TIME_KEY_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBucket {
    start: DateTime<Tz>,
}

impl TimeBucket {
    /// The bucket holding `t`.
    pub fn containing(t: &DateTime<Tz>) -> Self {
        Self {
            start: bucket_start(t),
        }
    }

    pub fn start(&self) -> DateTime<Tz> {
        self.start
    }

    pub fn end(&self) -> DateTime<Tz> {
        self.start + ChronoDuration::seconds(BUCKET_SECS)
    }

    pub fn contains(&self, t: &DateTime<Tz>) -> bool {
        *t >= self.start && *t < self.end()
    }

    /// Date key every record of this bucket carries.
    pub fn date_key(&self) -> String {
        self.start.format(DATE_KEY_FORMAT).to_string()
    }

    /// Bounds as unix milliseconds, `[start, end)`.
    pub fn millis_range(&self) -> (i64, i64) {
        (
            self.start.timestamp_millis(),
            self.end().timestamp_millis(),
        )
    }

    /// The bucket right after this one.
    pub fn next(&self) -> Self {
        Self { start: self.end() }
    }
}

/// Floors `t` to the minute on the canonical wall clock.
pub fn bucket_start(t: &DateTime<Tz>) -> DateTime<Tz> {
    *t - ChronoDuration::seconds(i64::from(t.second()))
        - ChronoDuration::nanoseconds(i64::from(t.nanosecond()))
}

pub fn bucket_end(t: &DateTime<Tz>) -> DateTime<Tz> {
    bucket_start(t) + ChronoDuration::seconds(BUCKET_SECS)
}

/// Source of "now" in the canonical zone.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;
}

/// Wall clock normalized to a fixed zone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}
