//! # Tally
//!
//! Embeddable query engine for event time series. Events are counted per
//! label combination; queries select, group and combine those series over a
//! sampled time window.
//!
//! ## Modules
//!
//! - [`model`]: Time ranges, fields, matchers and series
//! - [`query`]: Query language parser, evaluation tree and executor
//! - [`backend`]: `Scanner`/`Storer` traits and the in-memory store
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tally::backend::MemoryStore;
//! use tally::model::{Fields, TimeRange};
//! use tally::query::QueryExecutor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let window = TimeRange::last_hours(24);
//!
//!     store
//!         .insert("requests", Fields::new().field("status", "200"), window.start, 1.0)
//!         .await;
//!
//!     let executor = QueryExecutor::new(store);
//!     let output = executor
//!         .execute_str(&window, "!sum{requests}; *BY{status}")
//!         .await?;
//!
//!     println!("{} series", output.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod model;
pub mod query;

// Re-export top-level types for convenience
pub use backend::{MemoryStore, ScanQuery, Scanner, Snapshot, Storer};

pub use model::{Fields, MatchFields, Matcher, Results, Series, TimeRange};

pub use query::{
    parse_query, AggregationFunc, Output, Query, QueryError, QueryExecutor, QueryOutput,
    QueryResult,
};

pub use config::{Config, ConfigError, LoggingConfig, QueryConfig};
