//! Concrete series and result sets

use crate::model::{DataPoints, Fields, TimeRange};
use crate::query::Merger;
use serde::{Deserialize, Serialize};

/// One concrete series of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Event name
    pub event: String,
    /// Dimensions identifying this series
    pub fields: Fields,
    /// Window the data was sampled over
    pub range: TimeRange,
    /// Samples
    pub data: DataPoints,
}

impl Series {
    pub fn new(event: impl Into<String>, fields: Fields, range: TimeRange) -> Self {
        Self {
            event: event.into(),
            fields,
            range,
            data: DataPoints::new(),
        }
    }

    /// Builder method: set data
    pub fn with_data(mut self, data: impl Into<DataPoints>) -> Self {
        self.data = data.into();
        self
    }

    /// Copy of this series narrowed to the sample points of `range`
    pub fn slice(&self, range: &TimeRange) -> Series {
        let first = range.truncate(range.start);
        let end = if range.step > 0 {
            first.saturating_add((range.num_steps() as i64).saturating_mul(range.step))
        } else {
            range.end
        };
        Series {
            event: self.event.clone(),
            fields: self.fields.clone(),
            range: *range,
            data: self.data.slice(first, end),
        }
    }
}

/// Unordered collection of series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Results(Vec<Series>);

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the series for `(event, fields)`
    pub fn find(&self, event: &str, fields: &Fields) -> Option<&Series> {
        self.0
            .iter()
            .find(|s| s.event == event && s.fields == *fields)
    }

    /// Whether a series with the same `(event, fields, range)` is present
    pub fn contains(&self, series: &Series) -> bool {
        self.0.iter().any(|s| {
            s.event == series.event && s.range == series.range && s.fields == series.fields
        })
    }

    /// Add a sample, creating the series for `(event, fields)` if needed.
    ///
    /// Samples that land on an existing timestamp are summed.
    pub fn add(&mut self, event: &str, range: TimeRange, fields: &Fields, timestamp: i64, value: f64) {
        let idx = match self
            .0
            .iter()
            .position(|s| s.event == event && s.fields == *fields)
        {
            Some(idx) => idx,
            None => {
                self.0.push(Series::new(event, fields.clone(), range));
                self.0.len() - 1
            }
        };
        self.0[idx].data.merge_point(Merger::Add, timestamp, value);
    }

    pub fn push(&mut self, series: Series) {
        self.0.push(series);
    }

    /// Sort every series' data and fold duplicate timestamps
    pub fn normalize(&mut self) {
        for series in &mut self.0 {
            series.data.normalize(Merger::Add);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Series> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Series> {
        self.0
    }
}

impl Extend<Series> for Results {
    fn extend<T: IntoIterator<Item = Series>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Results {
    type Item = Series;
    type IntoIter = std::vec::IntoIter<Series>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Results {
    type Item = &'a Series;
    type IntoIter = std::slice::Iter<'a, Series>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Vec<Series>> for Results {
    fn from(series: Vec<Series>) -> Self {
        Self(series)
    }
}

impl FromIterator<Series> for Results {
    fn from_iter<T: IntoIterator<Item = Series>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
