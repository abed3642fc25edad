//! Tally Data Model
//!
//! Value types the query engine operates on:
//!
//! - **time_range**: `TimeRange`, a sampled half-open window, and `Rel`
//! - **fields**: `Fields`, the ordered label/value dimensions of a series
//! - **matcher**: `MatchFields`, label predicates used to select series
//! - **points**: `DataPoints`, timestamp-ordered samples
//! - **series**: `Series` and `Results`, what backends return and the engine produces
//!
//! All of these are built fresh for each query evaluation.

mod fields;
mod matcher;
mod points;
mod series;
mod time_range;

pub use fields::{Field, Fields};
pub use matcher::{MatchFields, Matcher};
pub use points::{DataPoint, DataPoints};
pub use series::{Results, Series};
pub use time_range::{Rel, Steps, TimeRange, DAY, HOUR, MINUTE, SECOND, WEEK};
