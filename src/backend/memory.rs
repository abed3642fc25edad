//! In-memory backend
//!
//! Keeps raw points per event behind a Tokio `RwLock`. Scans bucket points to
//! the requested step and sum them, the same shape a persistent backend
//! returns.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::backend::{ScanQuery, Scanner, Snapshot, Storer};
use crate::model::{Fields, Results};

/// A raw point as written by collectors
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Record {
    pub event: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub value: f64,
}

#[derive(Debug, Clone)]
struct Point {
    timestamp: i64,
    fields: Fields,
    value: f64,
}

/// Thread-safe in-memory event store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    events: Arc<RwLock<HashMap<String, Vec<Point>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a single point. Fields are kept label-sorted.
    pub async fn insert(&self, event: &str, fields: Fields, timestamp: i64, value: f64) {
        let mut events = self.events.write().await;
        events.entry(event.to_string()).or_default().push(Point {
            timestamp,
            fields: fields.sorted(),
            value,
        });
    }

    /// Store a batch of records
    pub async fn insert_records(&self, records: impl IntoIterator<Item = Record>) -> usize {
        let mut events = self.events.write().await;
        let mut count = 0;
        for record in records {
            events.entry(record.event).or_default().push(Point {
                timestamp: record.timestamp,
                fields: Fields::from_pairs(record.fields),
                value: record.value,
            });
            count += 1;
        }
        tracing::debug!("Inserted {} records", count);
        count
    }

    /// A `Storer` that writes snapshots as points of `event`
    pub fn event(&self, event: impl Into<String>) -> EventStore {
        EventStore {
            store: self.clone(),
            event: event.into(),
        }
    }

    /// Names of all stored events, sorted
    pub async fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total number of stored points
    pub async fn len(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Scanner for MemoryStore {
    async fn scan(&self, queries: &[ScanQuery]) -> anyhow::Result<Results> {
        let events = self.events.read().await;
        let mut out = Results::new();

        for query in queries {
            if query.range.step <= 0 {
                anyhow::bail!("Invalid step {} for event {}", query.range.step, query.event);
            }
            let Some(points) = events.get(&query.event) else {
                continue;
            };

            let mut results = Results::new();
            for point in points {
                if !query.range.contains(point.timestamp) || !query.matcher.matches(&point.fields) {
                    continue;
                }
                results.add(
                    &query.event,
                    query.range,
                    &point.fields,
                    query.range.truncate(point.timestamp),
                    point.value,
                );
            }
            results.normalize();
            // Overlapping queries return the same series more than once
            for series in results {
                if !out.contains(&series) {
                    out.push(series);
                }
            }
        }

        tracing::debug!("Scanned {} queries into {} series", queries.len(), out.len());
        Ok(out)
    }
}

/// Per-event writer handle onto a `MemoryStore`
#[derive(Debug, Clone)]
pub struct EventStore {
    store: MemoryStore,
    event: String,
}

impl EventStore {
    pub fn name(&self) -> &str {
        &self.event
    }
}

#[async_trait]
impl Storer for EventStore {
    async fn store(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let mut points = Vec::with_capacity(snapshot.counters.len());
        for counter in &snapshot.counters {
            if counter.values.len() != snapshot.labels.len() {
                anyhow::bail!(
                    "Counter for {} has {} values, expected {}",
                    self.event,
                    counter.values.len(),
                    snapshot.labels.len()
                );
            }
            let fields = Fields::from_pairs(
                snapshot
                    .labels
                    .iter()
                    .cloned()
                    .zip(counter.values.iter().cloned()),
            )
            .sorted();
            points.push(Point {
                timestamp: snapshot.time,
                fields,
                value: counter.count as f64,
            });
        }

        let mut events = self.store.events.write().await;
        events
            .entry(self.event.clone())
            .or_default()
            .extend(points);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MatchFields, TimeRange};

    fn query(event: &str, matcher: MatchFields) -> ScanQuery {
        ScanQuery {
            range: TimeRange::new(0, 300, 100),
            event: event.to_string(),
            matcher,
        }
    }

    #[tokio::test]
    async fn test_scan_buckets_and_sums() {
        let store = MemoryStore::new();
        let blue = Fields::new().field("color", "blue");
        store.insert("foo", blue.clone(), 10, 1.0).await;
        store.insert("foo", blue.clone(), 90, 2.0).await;
        store.insert("foo", blue.clone(), 250, 4.0).await;
        store.insert("foo", blue.clone(), 300, 100.0).await;
        store.insert("foo", Fields::new().field("color", "red"), 0, 8.0).await;

        let results = store
            .scan(&[query("foo", MatchFields::new().equals("color", "blue"))])
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let series = results.find("foo", &blue).unwrap();
        assert_eq!(series.range, TimeRange::new(0, 300, 100));
        assert_eq!(series.data.len(), 2);
        assert_eq!(series.data.value_at(0), 3.0);
        assert_eq!(series.data.value_at(200), 4.0);
        assert!(series.data.is_sorted());
    }

    #[tokio::test]
    async fn test_scan_overlapping_queries_return_each_series_once() {
        let store = MemoryStore::new();
        let blue = Fields::new().field("color", "blue");
        let red = Fields::new().field("color", "red");
        store.insert("foo", blue.clone(), 0, 1.0).await;
        store.insert("foo", red.clone(), 0, 2.0).await;

        let results = store
            .scan(&[
                query("foo", MatchFields::new()),
                query("foo", MatchFields::new().equals("color", "blue")),
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results.find("foo", &blue).unwrap().data.value_at(0), 1.0);
        assert_eq!(results.find("foo", &red).unwrap().data.value_at(0), 2.0);
    }

    #[tokio::test]
    async fn test_scan_unknown_event_is_empty() {
        let store = MemoryStore::new();
        let results = store.scan(&[query("nope", MatchFields::new())]).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_scan_rejects_zero_step() {
        let store = MemoryStore::new();
        let mut q = query("foo", MatchFields::new());
        q.range.step = 0;
        assert!(store.scan(&[q]).await.is_err());
    }

    #[tokio::test]
    async fn test_event_store_writes_snapshots() {
        let store = MemoryStore::new();
        let writer = store.event("requests");
        let snapshot = Snapshot::new(100, vec!["status".into(), "method".into()])
            .counter(["200", "GET"], 5)
            .counter(["500", "POST"], 1);
        writer.store(&snapshot).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert_eq!(store.events().await, vec!["requests".to_string()]);

        let results = store
            .scan(&[query("requests", MatchFields::new().equals("status", "200"))])
            .await
            .unwrap();
        let series = results.iter().next().unwrap();
        assert_eq!(series.fields.iter().next().unwrap().label, "method");
        assert_eq!(series.data.value_at(100), 5.0);
    }

    #[tokio::test]
    async fn test_event_store_rejects_mismatched_counter() {
        let store = MemoryStore::new();
        let snapshot = Snapshot::new(0, vec!["status".into()]).counter(["200", "GET"], 1);
        assert!(store.event("requests").store(&snapshot).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_insert_records() {
        let store = MemoryStore::new();
        let records: Vec<Record> = serde_json::from_str(
            r#"[
                {"event": "foo", "fields": {"size": "s"}, "timestamp": 0, "value": 1.5},
                {"event": "bar", "timestamp": 100, "value": 2}
            ]"#,
        )
        .unwrap();
        assert_eq!(store.insert_records(records).await, 2);
        assert_eq!(store.events().await, vec!["bar".to_string(), "foo".to_string()]);
    }
}
