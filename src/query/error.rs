//! Query error types
//!
//! Defines all error conditions that can occur during query parsing and execution.
//! Everything except `Scan` is detected before the backend is called.

use std::fmt;
use thiserror::Error;

/// Location in query text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Byte offset
    pub offset: usize,
    /// 1-based line
    pub line: usize,
    /// 1-based column, in characters
    pub column: usize,
}

impl Position {
    /// Resolve a byte offset within `source`
    pub fn locate(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        Self {
            offset,
            line,
            column,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Malformed query text
    #[error("Parse error at {pos}: {message}")]
    Parse { pos: Position, message: String },

    /// Unknown aggregator or operator name
    #[error("Invalid operator at {pos}: {name}")]
    InvalidOperator { pos: Position, name: String },

    /// Wrong number of arguments to an aggregate call
    #[error("Invalid arity at {pos}: !{name} expects {expected}, got {got}")]
    InvalidArity {
        pos: Position,
        name: String,
        expected: &'static str,
        got: usize,
    },

    /// Regular expression in a match predicate failed to compile
    #[error("Invalid regexp at {pos}: {pattern}: {message}")]
    InvalidRegex {
        pos: Position,
        pattern: String,
        message: String,
    },

    /// Operands of a binary operation have different lengths
    #[error("Invalid operand size: {left} != {right}")]
    InvalidOperandSize { left: usize, right: usize },

    /// Query plan exceeds the configured scan limit
    #[error("Too many scan queries: {count} exceeds limit of {limit}")]
    TooManyScans { count: usize, limit: usize },

    /// Backend scan failed
    #[error(transparent)]
    Scan(anyhow::Error),
}

impl QueryError {
    /// Source position for errors raised while parsing
    pub fn position(&self) -> Option<Position> {
        match self {
            Self::Parse { pos, .. }
            | Self::InvalidOperator { pos, .. }
            | Self::InvalidArity { pos, .. }
            | Self::InvalidRegex { pos, .. } => Some(*pos),
            _ => None,
        }
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
