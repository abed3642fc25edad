//! Backend Interfaces
//!
//! The query engine reads data through a `Scanner` and never writes. Data
//! collection writes through a `Storer`. Both are implemented by storage
//! backends:
//!
//! - **memory**: `MemoryStore`, an in-process store for tests, fixtures and the CLI
//!
//! Any persistent or remote backend plugs in by implementing the same traits.

mod memory;

pub use memory::{EventStore, MemoryStore, Record};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{MatchFields, Results, TimeRange};

/// A request for the raw series of one event over one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanQuery {
    pub range: TimeRange,
    pub event: String,
    /// Only series whose fields satisfy this are wanted
    pub matcher: MatchFields,
}

impl fmt::Display for ScanQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.event)?;
        if !self.matcher.is_empty() {
            write!(f, "{}", self.matcher)?;
        }
        write!(
            f,
            " [{}, {}) step {}",
            self.range.start, self.range.end, self.range.step
        )
    }
}

/// Source of raw series
///
/// Implementations should honor each query's event and matcher. They may
/// return series over wider windows than requested; the engine narrows them.
/// Every returned series must have sorted data without duplicate timestamps.
/// Cancellation is dropping the returned future.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self, queries: &[ScanQuery]) -> anyhow::Result<Results>;
}

/// Sink for counter snapshots
#[async_trait]
pub trait Storer: Send + Sync {
    async fn store(&self, snapshot: &Snapshot) -> anyhow::Result<()>;
}

/// Counters of one event at one point in time
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix timestamp in milliseconds
    pub time: i64,
    /// Label names, one per entry of each counter's `values`
    pub labels: Vec<String>,
    pub counters: Vec<Counter>,
}

/// One row of a snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Counter {
    pub values: Vec<String>,
    pub count: i64,
}

impl Snapshot {
    pub fn new(time: i64, labels: Vec<String>) -> Self {
        Self {
            time,
            labels,
            counters: Vec::new(),
        }
    }

    /// Builder method: add a counter row
    pub fn counter<V: Into<String>>(mut self, values: impl IntoIterator<Item = V>, count: i64) -> Self {
        self.counters.push(Counter {
            values: values.into_iter().map(Into::into).collect(),
            count,
        });
        self
    }
}
