//! Timestamped sample sequences

use crate::model::TimeRange;
use crate::query::Merger;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// A single sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Samples ordered by timestamp
///
/// Normalized sequences are sorted ascending with no duplicate timestamps.
/// `merge_point` may append out of order, so call `normalize` before any
/// lookup that relies on ordering.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPoints(Vec<DataPoint>);

impl DataPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// One point per step of `range`, every value set to `value`
    pub fn blank(range: &TimeRange, value: f64) -> Self {
        Self(
            range
                .each()
                .map(|(ts, _)| DataPoint::new(ts, value))
                .collect(),
        )
    }

    /// Half-open sub-sequence `[start, end)`
    pub fn slice(&self, start: i64, end: i64) -> DataPoints {
        let lo = self.0.partition_point(|p| p.timestamp < start);
        let hi = self.0.partition_point(|p| p.timestamp < end);
        if lo >= hi {
            return DataPoints::new();
        }
        DataPoints(self.0[lo..hi].to_vec())
    }

    /// Value at `timestamp`, NaN if absent
    pub fn value_at(&self, timestamp: i64) -> f64 {
        match self.0.binary_search_by_key(&timestamp, |p| p.timestamp) {
            Ok(i) => self.0[i].value,
            Err(_) => f64::NAN,
        }
    }

    /// Combine with an existing point at `timestamp` or append a new one
    pub fn merge_point(&mut self, merger: Merger, timestamp: i64, value: f64) {
        match self.0.iter_mut().find(|p| p.timestamp == timestamp) {
            Some(p) => p.value = merger.merge(p.value, value),
            None => self.0.push(DataPoint::new(timestamp, value)),
        }
    }

    pub fn push(&mut self, timestamp: i64, value: f64) {
        self.0.push(DataPoint::new(timestamp, value));
    }

    /// Sort by timestamp and fold duplicate timestamps with `merger`
    pub fn normalize(&mut self, merger: Merger) {
        self.0.sort_by_key(|p| p.timestamp);
        let mut out: Vec<DataPoint> = Vec::with_capacity(self.0.len());
        for p in self.0.drain(..) {
            match out.last_mut() {
                Some(last) if last.timestamp == p.timestamp => {
                    last.value = merger.merge(last.value, p.value);
                }
                _ => out.push(p),
            }
        }
        self.0 = out;
    }

    pub fn is_sorted(&self) -> bool {
        self.0.windows(2).all(|w| w[0].timestamp < w[1].timestamp)
    }

    /// Set every value to `value`
    pub fn fill(&mut self, value: f64) {
        for p in &mut self.0 {
            p.value = value;
        }
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().map(|p| p.value)
    }
}

impl Deref for DataPoints {
    type Target = [DataPoint];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DataPoints {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<DataPoint>> for DataPoints {
    fn from(points: Vec<DataPoint>) -> Self {
        Self(points)
    }
}

impl FromIterator<DataPoint> for DataPoints {
    fn from_iter<T: IntoIterator<Item = DataPoint>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
