//! Query Executor
//!
//! Runs query text against a `Scanner`:
//! 1. Parse and compile (all query errors surface here, before any I/O)
//! 2. Plan the scan queries for the window
//! 3. Scan once for the whole plan
//! 4. Evaluate the tree over the scanned results
//!
//! # Execution Pipeline
//!
//! ```text
//! Text → Query → [ScanQuery] → Scanner → Results → Eval → [Output]
//! ```

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{ScanQuery, Scanner};
use crate::config::QueryConfig;
use crate::model::TimeRange;
use crate::query::ast::{Output, Query};
use crate::query::compile::compile;
use crate::query::error::{QueryError, QueryResult};

/// Result of a query execution
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    /// Outputs in query order
    pub outputs: Vec<Output>,
    /// Scan queries sent to the backend
    pub scan_queries: usize,
    /// Series the backend returned
    pub series_scanned: usize,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryOutput {
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Query executor
pub struct QueryExecutor {
    scanner: Arc<dyn Scanner>,
    config: QueryConfig,
}

impl QueryExecutor {
    /// Create a new query executor with default settings
    pub fn new(scanner: Arc<dyn Scanner>) -> Self {
        Self::with_config(scanner, QueryConfig::default())
    }

    pub fn with_config(scanner: Arc<dyn Scanner>, config: QueryConfig) -> Self {
        Self { scanner, config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Parse query text using this executor's settings
    pub fn parse(&self, text: &str) -> QueryResult<Query> {
        compile(text, &self.config.group_empty)
    }

    /// Scan queries that would be sent for `query` over `window`
    pub fn plan(&self, query: &Query, window: &TimeRange) -> QueryResult<Vec<ScanQuery>> {
        let mut queries = query.scan_queries(window);
        let total = queries.len();
        if self.config.dedup_scan_queries {
            queries = dedup(queries);
        }
        tracing::debug!("Planned {} scan queries ({} before dedup)", queries.len(), total);

        let limit = self.config.max_scan_queries;
        if limit > 0 && queries.len() > limit {
            return Err(QueryError::TooManyScans {
                count: queries.len(),
                limit,
            });
        }
        Ok(queries)
    }

    /// Execute query text (parses and executes)
    pub async fn execute_str(&self, window: &TimeRange, text: &str) -> QueryResult<QueryOutput> {
        let query = self.parse(text)?;
        self.execute(&query, window).await
    }

    /// Execute a compiled query
    pub async fn execute(&self, query: &Query, window: &TimeRange) -> QueryResult<QueryOutput> {
        let start = Instant::now();

        let queries = self.plan(query, window)?;
        let results = self.scanner.scan(&queries).await.map_err(QueryError::Scan)?;
        let outputs = query.eval(window, &results)?;

        let execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            "Query produced {} outputs from {} series in {}ms",
            outputs.len(),
            results.len(),
            execution_time_ms
        );

        Ok(QueryOutput {
            outputs,
            scan_queries: queries.len(),
            series_scanned: results.len(),
            execution_time_ms,
        })
    }
}

/// Drop repeated scan queries, keeping first occurrences in order
fn dedup(queries: Vec<ScanQuery>) -> Vec<ScanQuery> {
    let mut out: Vec<ScanQuery> = Vec::with_capacity(queries.len());
    for q in queries {
        if !out.contains(&q) {
            out.push(q);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::model::{Fields, Results, Series};
    use async_trait::async_trait;

    const STEP: i64 = 100;

    fn window() -> TimeRange {
        TimeRange::new(0, 3 * STEP, STEP)
    }

    async fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let rows = [
            ("blue", "s", 1.0),
            ("blue", "m", 2.0),
            ("red", "s", 3.0),
            ("green", "m", 100.0),
            ("red", "xl", 5.0),
        ];
        for (color, size, v) in rows {
            let fields = Fields::new().field("color", color).field("size", size);
            for ts in [0, STEP, 2 * STEP] {
                store.insert("foo", fields.clone(), ts, v).await;
                store.insert("bar", fields.clone(), ts, v * 2.0).await;
            }
        }
        store
    }

    fn value_of(out: &QueryOutput, size: &str) -> f64 {
        out.outputs
            .iter()
            .map(|o| o.series())
            .find(|s| s.fields.get("size") == Some(size))
            .map(|s| s.data.value_at(0))
            .unwrap_or(f64::NAN)
    }

    #[tokio::test]
    async fn test_raw_passthrough() {
        let executor = QueryExecutor::new(store().await);
        let out = executor
            .execute_str(&window(), "foo{color: blue}")
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert!(out.outputs.iter().all(|o| o.is_raw()));
        assert!(out
            .outputs
            .iter()
            .all(|o| o.series().fields.get("color") == Some("blue")));
    }

    #[tokio::test]
    async fn test_grouped_sum_of_two_events() {
        let executor = QueryExecutor::new(store().await);
        let out = executor
            .execute_str(&window(), "foo + bar; *BY{size}; *WHERE{color: blue|red}")
            .await
            .unwrap();

        assert_eq!(out.len(), 3);
        assert!(out.outputs.iter().all(|o| o.series().event == "foo + bar"));
        assert_eq!(value_of(&out, "s"), 12.0);
        assert_eq!(value_of(&out, "m"), 6.0);
        assert_eq!(value_of(&out, "xl"), 15.0);
        assert_eq!(out.scan_queries, 2);
    }

    #[tokio::test]
    async fn test_grouped_average() {
        let executor = QueryExecutor::new(store().await);
        let out = executor
            .execute_str(&window(), "!avg{foo}; *BY{size}")
            .await
            .unwrap();

        assert_eq!(value_of(&out, "s"), 2.0);
        assert_eq!(value_of(&out, "m"), 51.0);
        assert_eq!(value_of(&out, "xl"), 5.0);
        for o in &out.outputs {
            assert_eq!(o.series().range, window());
            assert_eq!(o.series().data.len(), 3);
        }
    }

    #[tokio::test]
    async fn test_zip_average_of_group_sums() {
        let executor = QueryExecutor::new(store().await);
        let out = executor
            .execute_str(&window(), "!ZIPAVG{foo, bar}; *BY{size}")
            .await
            .unwrap();

        // s: foo sums to 4, bar to 8
        assert_eq!(value_of(&out, "s"), 6.0);
        assert_eq!(out.outputs[0].series().event, "!ZIPAVG{foo, bar}");
    }

    #[tokio::test]
    async fn test_overlapping_leaves_count_each_series_once() {
        let store = Arc::new(MemoryStore::new());
        store.insert("foo", Fields::new().field("color", "blue"), 0, 1.0).await;
        store.insert("foo", Fields::new().field("color", "red"), 0, 2.0).await;
        let executor = QueryExecutor::new(store);
        let window = TimeRange::new(0, STEP, STEP);

        let out = executor
            .execute_str(&window, "a: !sum{foo}; b: !sum{foo{color: blue}}")
            .await
            .unwrap();
        let value = |name: &str| {
            out.outputs
                .iter()
                .map(|o| o.series())
                .find(|s| s.event == name)
                .map(|s| s.data.value_at(0))
                .unwrap_or(f64::NAN)
        };
        assert_eq!(value("a"), 3.0);
        assert_eq!(value("b"), 1.0);

        let out = executor
            .execute_str(&window, "foo; foo{color: blue}")
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn test_dedup_and_limit() {
        let executor = QueryExecutor::new(store().await);
        let query = executor.parse("foo; x: !sum{foo}; y: !max{foo}").unwrap();
        assert_eq!(executor.plan(&query, &window()).unwrap().len(), 1);

        let config = QueryConfig {
            dedup_scan_queries: false,
            max_scan_queries: 2,
            ..QueryConfig::default()
        };
        let executor = QueryExecutor::with_config(store().await, config);
        let err = executor.plan(&query, &window()).unwrap_err();
        assert!(matches!(err, QueryError::TooManyScans { count: 3, limit: 2 }));
    }

    struct FailingScanner;

    #[async_trait]
    impl Scanner for FailingScanner {
        async fn scan(&self, queries: &[ScanQuery]) -> anyhow::Result<Results> {
            anyhow::bail!("backend unavailable for {} queries", queries.len())
        }
    }

    #[tokio::test]
    async fn test_scan_error_is_surfaced() {
        let executor = QueryExecutor::new(Arc::new(FailingScanner));
        let err = executor.execute_str(&window(), "foo").await.unwrap_err();
        assert!(matches!(err, QueryError::Scan(_)));
        assert_eq!(err.to_string(), "backend unavailable for 1 queries");
    }

    #[tokio::test]
    async fn test_parse_error_skips_scan() {
        let executor = QueryExecutor::new(Arc::new(FailingScanner));
        let err = executor.execute_str(&window(), "!median{foo}").await.unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperator { .. }));
    }

    /// Returns a fixed result set regardless of the queries
    struct FixedScanner(Results);

    #[async_trait]
    impl Scanner for FixedScanner {
        async fn scan(&self, _queries: &[ScanQuery]) -> anyhow::Result<Results> {
            Ok(self.0.clone())
        }
    }

    fn scenario() -> (TimeRange, QueryExecutor) {
        let window = TimeRange::new(0, STEP, STEP);
        let point = |v: f64| vec![crate::model::DataPoint::new(0, v)];
        let results: Results = vec![
            Series::new("foo", Fields::new().field("color", "blue").field("size", "s"), window)
                .with_data(point(8.0)),
            Series::new("foo", Fields::new().field("color", "blue").field("size", "m"), window)
                .with_data(point(9.0)),
            Series::new("bar", Fields::new().field("color", "blue").field("size", "xl"), window)
                .with_data(point(11.0)),
            Series::new("bar", Fields::new().field("color", "blue").field("size", "s"), window)
                .with_data(point(4.0)),
            Series::new("bar", Fields::new().field("color", "green").field("size", "m"), window)
                .with_data(point(50.0)),
        ]
        .into();
        (window, QueryExecutor::new(Arc::new(FixedScanner(results))))
    }

    #[tokio::test]
    async fn test_scenario_raw_series() {
        let (window, executor) = scenario();
        let out = executor.execute_str(&window, "foo{color: blue}").await.unwrap();
        let values: Vec<f64> = out.outputs.iter().map(|o| o.series().data[0].value).collect();
        assert_eq!(values, vec![8.0, 9.0]);
        assert!(out.outputs.iter().all(|o| o.is_raw()));
    }

    #[tokio::test]
    async fn test_scenario_grouped_merge() {
        let (window, executor) = scenario();
        let out = executor
            .execute_str(&window, "foo + bar; *BY{size}; *WHERE{color:blue|red}")
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(value_of(&out, "s"), 12.0);
        assert_eq!(value_of(&out, "m"), 9.0);
        assert_eq!(value_of(&out, "xl"), 11.0);
        assert!(out.outputs.iter().all(|o| o.series().event == "foo + bar"));
    }

    #[tokio::test]
    async fn test_scenario_grouped_average() {
        let (window, executor) = scenario();
        let out = executor.execute_str(&window, "!avg{foo}; *BY{size}").await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(value_of(&out, "s"), 8.0);
        assert_eq!(value_of(&out, "m"), 9.0);
    }

    #[tokio::test]
    async fn test_scenario_zip_of_group_results() {
        let (window, executor) = scenario();
        let out = executor
            .execute_str(&window, "!ZIPAVG{foo, bar}; *BY{size}")
            .await
            .unwrap();
        // s: avg(8, 4); m: avg(9, 50); xl: avg(0, 11)
        assert_eq!(value_of(&out, "s"), 6.0);
        assert_eq!(value_of(&out, "m"), 29.5);
        assert_eq!(value_of(&out, "xl"), 5.5);
    }

    #[tokio::test]
    async fn test_missing_label_uses_empty_placeholder() {
        let store = Arc::new(MemoryStore::new());
        store.insert("foo", Fields::new().field("size", "s"), 0, 1.0).await;
        store.insert("foo", Fields::new(), 0, 2.0).await;

        let config = QueryConfig {
            group_empty: "none".into(),
            ..QueryConfig::default()
        };
        let executor = QueryExecutor::with_config(store, config);
        let out = executor.execute_str(&window(), "!sum{foo}; *BY{size}").await.unwrap();
        assert_eq!(value_of(&out, "none"), 2.0);
        assert_eq!(value_of(&out, "s"), 1.0);
    }
}
