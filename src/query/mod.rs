//! Tally Query Engine
//!
//! A small language for selecting, grouping and combining event series:
//!
//! - **Parser**: Parse query text into a syntax tree
//! - **Compile**: Resolve clauses and names into an evaluation tree
//! - **AST**: Evaluation tree (scans, groups, aggregates)
//! - **Aggregate**: Aggregators and mergers
//! - **Executor**: Execute queries against a `Scanner`
//!
//! # Query Language
//!
//! ```text
//! foo{color: blue}                  raw series of `foo` with color=blue
//! foo + bar; *BY{size}              per-size sum of foo plus sum of bar
//! !avg{foo}; *WHERE{color: red}     average across matching series
//! !zipmax{foo, bar[-1:d]}           pointwise max of two aggregates
//! !vsum{foo}                        one total for the whole window
//! total: foo / 2; *OFFSET[-1:w]     named output, a week earlier
//! ```
//!
//! Clauses apply to every statement in their block. `{ ... }` opens a nested
//! block whose own clauses replace the inherited ones.
//!
//! # Example
//!
//! ```rust,ignore
//! use tally::query::QueryExecutor;
//!
//! let executor = QueryExecutor::new(scanner);
//! let output = executor
//!     .execute_str(&TimeRange::last_days(7), "!avg{latency}; *BY{region}")
//!     .await?;
//! ```

mod aggregate;
mod ast;
mod compile;
mod error;
mod executor;
mod parser;

pub use aggregate::{AggregationFunc, Aggregator, Merger};
pub use ast::{
    AggNode, AggOp, BlockNode, Collapse, GroupNode, Named, Node, Output, Query, ScanAgg,
    ScanEval, ScanLeaf, Shift, ValueNode, ZipAgg,
};
pub use error::{Position, QueryError, QueryResult};
pub use executor::{QueryExecutor, QueryOutput};

/// Parse and compile query text with default settings
pub fn parse_query(input: &str) -> QueryResult<Query> {
    compile::compile(input, "")
}

