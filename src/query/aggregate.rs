//! Aggregators and Mergers
//!
//! Aggregators fold a stream of samples into one value. Mergers combine two
//! aligned samples into one.
//!
//! `AggregationFunc` names an aggregator; `AggregationFunc::blank` is the only
//! way to obtain a working `Aggregator`, so stateful kinds (`avg`) always start
//! from a fresh instance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregation functions available in queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationFunc {
    /// Sum of values, NaN skipped
    Sum,
    /// Number of samples, NaN included
    Count,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Running average of non-NaN values
    Avg,
}

impl AggregationFunc {
    /// Parse from string (case-insensitive)
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "count" => Some(Self::Count),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "avg" | "average" => Some(Self::Avg),
            _ => None,
        }
    }

    /// A new aggregator instance for one independent reduction
    pub fn blank(self) -> Aggregator {
        match self {
            Self::Sum => Aggregator::Sum,
            Self::Count => Aggregator::Count,
            Self::Min => Aggregator::Min,
            Self::Max => Aggregator::Max,
            Self::Avg => Aggregator::Avg { sum: 0.0, count: 0 },
        }
    }

    /// Fold a slice of values with a fresh aggregator
    pub fn apply(self, values: &[f64]) -> f64 {
        let mut agg = self.blank();
        let zero = agg.zero();
        values.iter().fold(zero, |acc, &v| agg.aggregate(acc, v))
    }
}

impl fmt::Display for AggregationFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Count => write!(f, "count"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Avg => write!(f, "avg"),
        }
    }
}

/// A reducer instance
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregator {
    Sum,
    Count,
    Min,
    Max,
    Avg { sum: f64, count: u64 },
}

impl Aggregator {
    /// Starting accumulator
    pub fn zero(&self) -> f64 {
        match self {
            Self::Sum | Self::Count => 0.0,
            Self::Min => f64::INFINITY,
            Self::Max => f64::NEG_INFINITY,
            Self::Avg { .. } => f64::NAN,
        }
    }

    /// Fold one more sample into `acc`
    pub fn aggregate(&mut self, acc: f64, v: f64) -> f64 {
        match self {
            Self::Sum => {
                if v.is_nan() {
                    acc
                } else {
                    acc + v
                }
            }
            Self::Count => acc + 1.0,
            // Comparisons with NaN are false, so NaN samples leave acc as is
            Self::Min => {
                if v < acc {
                    v
                } else {
                    acc
                }
            }
            Self::Max => {
                if v > acc {
                    v
                } else {
                    acc
                }
            }
            Self::Avg { sum, count } => {
                if v.is_nan() {
                    return acc;
                }
                *sum += v;
                *count += 1;
                *sum / *count as f64
            }
        }
    }

    /// Clear carried state before an unrelated reduction
    pub fn reset(&mut self) {
        if let Self::Avg { sum, count } = self {
            *sum = 0.0;
            *count = 0;
        }
    }
}

/// Elementwise binary combinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Merger {
    /// Addition; a NaN operand acts as the identity
    Add,
    Sub,
    Mul,
    Div,
}

impl Merger {
    /// Parse from operator symbol
    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "+" => Some(Self::Add),
            "-" => Some(Self::Sub),
            "*" => Some(Self::Mul),
            "/" => Some(Self::Div),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }

    pub fn merge(&self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => {
                if a.is_nan() {
                    b
                } else if b.is_nan() {
                    a
                } else {
                    a + b
                }
            }
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
        }
    }
}

impl fmt::Display for Merger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [AggregationFunc; 5] = [
        AggregationFunc::Sum,
        AggregationFunc::Count,
        AggregationFunc::Min,
        AggregationFunc::Max,
        AggregationFunc::Avg,
    ];

    #[test]
    fn test_nan_leaves_zero_unchanged() {
        for func in [
            AggregationFunc::Sum,
            AggregationFunc::Min,
            AggregationFunc::Max,
        ] {
            let mut agg = func.blank();
            let zero = agg.zero();
            assert_eq!(agg.aggregate(zero, f64::NAN), zero, "{}", func);
        }

        let mut avg = AggregationFunc::Avg.blank();
        let zero = avg.zero();
        assert!(avg.aggregate(zero, f64::NAN).is_nan());
    }

    #[test]
    fn test_count_increments_on_nan() {
        let mut agg = AggregationFunc::Count.blank();
        let acc = agg.aggregate(agg.zero(), f64::NAN);
        assert_eq!(acc, 1.0);
        assert_eq!(agg.aggregate(acc, 42.0), 2.0);
    }

    #[test]
    fn test_apply() {
        let values = [1.0, 2.0, f64::NAN, 3.0, 4.0, 5.0];

        assert_eq!(AggregationFunc::Sum.apply(&values), 15.0);
        assert_eq!(AggregationFunc::Count.apply(&values), 6.0);
        assert_eq!(AggregationFunc::Min.apply(&values), 1.0);
        assert_eq!(AggregationFunc::Max.apply(&values), 5.0);
        assert_eq!(AggregationFunc::Avg.apply(&values), 3.0);

        assert_eq!(AggregationFunc::Sum.apply(&[]), 0.0);
        assert_eq!(AggregationFunc::Min.apply(&[]), f64::INFINITY);
        assert!(AggregationFunc::Avg.apply(&[]).is_nan());
    }

    #[test]
    fn test_avg_is_running() {
        let mut agg = AggregationFunc::Avg.blank();
        let mut acc = agg.zero();
        acc = agg.aggregate(acc, 2.0);
        assert_eq!(acc, 2.0);
        acc = agg.aggregate(acc, 4.0);
        assert_eq!(acc, 3.0);

        agg.reset();
        assert_eq!(agg.aggregate(agg.zero(), 10.0), 10.0);
    }

    #[test]
    fn test_blank_instances_are_independent() {
        let mut a = AggregationFunc::Avg.blank();
        let mut b = AggregationFunc::Avg.blank();
        a.aggregate(a.zero(), 100.0);
        assert_eq!(b.aggregate(b.zero(), 1.0), 1.0);
    }

    #[test]
    fn test_from_name() {
        for func in ALL {
            assert_eq!(AggregationFunc::from_name(&func.to_string()), Some(func));
        }
        assert_eq!(AggregationFunc::from_name("AVG"), Some(AggregationFunc::Avg));
        assert_eq!(AggregationFunc::from_name("median"), None);
    }

    #[test]
    fn test_merge_nan_asymmetry() {
        assert_eq!(Merger::Add.merge(f64::NAN, 5.0), 5.0);
        assert_eq!(Merger::Add.merge(5.0, f64::NAN), 5.0);
        assert!(Merger::Add.merge(f64::NAN, f64::NAN).is_nan());
        assert!(Merger::Sub.merge(f64::NAN, 5.0).is_nan());
        assert!(Merger::Sub.merge(5.0, f64::NAN).is_nan());
        assert!(Merger::Mul.merge(f64::NAN, 5.0).is_nan());
        assert!(Merger::Div.merge(f64::NAN, 5.0).is_nan());
        assert_eq!(Merger::Div.merge(1.0, 0.0), f64::INFINITY);
    }

    #[test]
    fn test_merger_symbols() {
        for m in [Merger::Add, Merger::Sub, Merger::Mul, Merger::Div] {
            assert_eq!(Merger::from_symbol(m.symbol()), Some(m));
        }
        assert_eq!(Merger::Sub.merge(5.0, 3.0), 2.0);
        assert_eq!(Merger::Mul.merge(5.0, 3.0), 15.0);
    }
}
