//! Sampled time windows
//!
//! A `TimeRange` is a half-open interval `[start, end)` sampled every `step`
//! milliseconds. All query evaluation happens over one of these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds in common units, used by the DSL duration parser
pub const SECOND: i64 = 1000;
pub const MINUTE: i64 = 60 * SECOND;
pub const HOUR: i64 = 60 * MINUTE;
pub const DAY: i64 = 24 * HOUR;
pub const WEEK: i64 = 7 * DAY;

/// Time window sampled every `step` (half-open interval: [start, end))
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive), in milliseconds
    pub start: i64,
    /// End timestamp (exclusive), in milliseconds
    pub end: i64,
    /// Sampling interval, in milliseconds
    pub step: i64,
}

/// Positional relationship of another range relative to this one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rel {
    /// Same bounds
    Equal,
    /// The other range lies inside this one
    Between,
    /// The other range contains this one
    Around,
    /// The other range ends before this one starts
    Before,
    /// The other range starts after this one ends
    After,
    /// The other range starts before this one and ends inside it
    OverlapsBefore,
    /// The other range starts inside this one and ends after it
    OverlapsAfter,
    /// Ranges are not comparable (different step)
    None,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        Self { start, end, step }
    }

    /// Create a range from chrono timestamps
    pub fn from_datetimes(start: DateTime<Utc>, end: DateTime<Utc>, step: i64) -> Self {
        Self::new(start.timestamp_millis(), end.timestamp_millis(), step)
    }

    /// Create a range for the last N hours from now, sampled hourly
    pub fn last_hours(hours: i64) -> Self {
        let end = truncate(Utc::now().timestamp_millis(), HOUR) + HOUR;
        Self::new(end - hours * HOUR, end, HOUR)
    }

    /// Create a range for the last N days from now, sampled daily
    pub fn last_days(days: i64) -> Self {
        let end = truncate(Utc::now().timestamp_millis(), DAY) + DAY;
        Self::new(end - days * DAY, end, DAY)
    }

    /// Number of samples in the window, rounded toward zero
    pub fn num_steps(&self) -> usize {
        if self.step <= 0 || self.end <= self.start {
            return 0;
        }
        ((self.end - self.start) / self.step) as usize
    }

    /// Iterate over `(timestamp, index)` pairs truncated to step boundaries
    pub fn each(&self) -> Steps {
        Steps {
            first: if self.step > 0 {
                truncate(self.start, self.step)
            } else {
                self.start
            },
            step: self.step,
            index: 0,
            len: self.num_steps(),
        }
    }

    /// Shift both bounds by `millis`
    pub fn offset(&self, millis: i64) -> Self {
        Self {
            start: self.start.saturating_add(millis),
            end: self.end.saturating_add(millis),
            step: self.step,
        }
    }

    /// Same bounds, different sampling interval
    pub fn with_step(&self, step: i64) -> Self {
        Self { step, ..*self }
    }

    /// Truncate a timestamp down to this range's step boundary
    pub fn truncate(&self, timestamp: i64) -> i64 {
        if self.step <= 0 {
            return timestamp;
        }
        truncate(timestamp, self.step)
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Classify where `other` lies relative to this range
    pub fn rel(&self, other: &TimeRange) -> Rel {
        if self.step != other.step {
            return Rel::None;
        }
        if other.start == self.start && other.end == self.end {
            return Rel::Equal;
        }
        if other.end <= self.start {
            return Rel::Before;
        }
        if other.start >= self.end {
            return Rel::After;
        }
        if other.start <= self.start && other.end >= self.end {
            return Rel::Around;
        }
        if other.start >= self.start && other.end <= self.end {
            return Rel::Between;
        }
        if other.start < self.start {
            Rel::OverlapsBefore
        } else {
            Rel::OverlapsAfter
        }
    }
}

fn truncate(timestamp: i64, step: i64) -> i64 {
    timestamp - timestamp.rem_euclid(step)
}

/// Lazy iterator over the sample points of a `TimeRange`
#[derive(Debug, Clone)]
pub struct Steps {
    first: i64,
    step: i64,
    index: usize,
    len: usize,
}

impl Iterator for Steps {
    type Item = (i64, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.len {
            return None;
        }
        let i = self.index;
        self.index += 1;
        Some((self.first + i as i64 * self.step, i))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.len - self.index;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Steps {}
