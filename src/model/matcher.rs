//! Label predicates
//!
//! `MatchFields` maps each label to a `Matcher`. A series matches when every
//! label in the map is present in its fields and satisfies the predicate.

use crate::model::Fields;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Predicate over a single label value
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact string match
    Equals(String),
    /// Value starts with the string
    Prefix(String),
    /// Value ends with the string
    Suffix(String),
    /// Value matches the regular expression
    Regex(Regex),
    /// Any of the predicates matches
    Any(Vec<Matcher>),
    /// All of the predicates match
    All(Vec<Matcher>),
}

impl Matcher {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Equals(s) => value == s,
            Self::Prefix(s) => value.starts_with(s.as_str()),
            Self::Suffix(s) => value.ends_with(s.as_str()),
            Self::Regex(re) => re.is_match(value),
            Self::Any(ms) => ms.iter().any(|m| m.matches(value)),
            Self::All(ms) => ms.iter().all(|m| m.matches(value)),
        }
    }

    /// Combine with OR, flattening nested `Any`
    pub fn or(self, other: Matcher) -> Matcher {
        match (self, other) {
            (Self::Any(mut a), Self::Any(b)) => {
                a.extend(b);
                Self::Any(a)
            }
            (Self::Any(mut a), m) => {
                a.push(m);
                Self::Any(a)
            }
            (m, Self::Any(mut b)) => {
                b.insert(0, m);
                Self::Any(b)
            }
            (a, b) => Self::Any(vec![a, b]),
        }
    }

    /// Combine with AND, flattening nested `All`
    pub fn and(self, other: Matcher) -> Matcher {
        match (self, other) {
            (Self::All(mut a), Self::All(b)) => {
                a.extend(b);
                Self::All(a)
            }
            (Self::All(mut a), m) => {
                a.push(m);
                Self::All(a)
            }
            (m, Self::All(mut b)) => {
                b.insert(0, m);
                Self::All(b)
            }
            (a, b) => Self::All(vec![a, b]),
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Equals(a), Self::Equals(b)) => a == b,
            (Self::Prefix(a), Self::Prefix(b)) => a == b,
            (Self::Suffix(a), Self::Suffix(b)) => a == b,
            (Self::Regex(a), Self::Regex(b)) => a.as_str() == b.as_str(),
            (Self::Any(a), Self::Any(b)) => a == b,
            (Self::All(a), Self::All(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(s) => write!(f, "{}", s),
            Self::Prefix(s) => write!(f, "!prefix({:?})", s),
            Self::Suffix(s) => write!(f, "!suffix({:?})", s),
            Self::Regex(re) => write!(f, "!regexp({:?})", re.as_str()),
            Self::Any(ms) => join(f, ms, "|"),
            Self::All(ms) => join(f, ms, "&"),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, ms: &[Matcher], sep: &str) -> fmt::Result {
    for (i, m) in ms.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", m)?;
    }
    Ok(())
}

/// Label → predicate filter for series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchFields(BTreeMap<String, Matcher>);

impl MatchFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the predicate for a label
    pub fn with(mut self, label: impl Into<String>, matcher: Matcher) -> Self {
        self.0.insert(label.into(), matcher);
        self
    }

    /// Builder method: exact match on a label
    pub fn equals(self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(label, Matcher::Equals(value.into()))
    }

    pub fn get(&self, label: &str) -> Option<&Matcher> {
        self.0.get(label)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Matcher)> {
        self.0.iter()
    }

    /// Check whether fields satisfy every predicate
    pub fn matches(&self, fields: &Fields) -> bool {
        self.0.iter().all(|(label, matcher)| {
            fields
                .get(label)
                .map(|value| matcher.matches(value))
                .unwrap_or(false)
        })
    }

    /// Combine two filters, OR-ing predicates that share a label
    pub fn merge(&self, other: &MatchFields) -> MatchFields {
        self.combine(other, Matcher::or)
    }

    /// Combine two filters, AND-ing predicates that share a label
    pub fn and(&self, other: &MatchFields) -> MatchFields {
        self.combine(other, Matcher::and)
    }

    fn combine(&self, other: &MatchFields, op: fn(Matcher, Matcher) -> Matcher) -> MatchFields {
        let mut out = self.0.clone();
        for (label, matcher) in &other.0 {
            let combined = match out.remove(label) {
                Some(existing) => op(existing, matcher.clone()),
                None => matcher.clone(),
            };
            out.insert(label.clone(), combined);
        }
        MatchFields(out)
    }
}

impl fmt::Display for MatchFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (label, matcher)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", label, matcher)?;
        }
        write!(f, "}}")
    }
}

/// Serialized as `label → predicate` in query syntax
impl Serialize for MatchFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(label, m)| (label, m.to_string())))
    }
}
