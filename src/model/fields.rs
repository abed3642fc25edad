//! Series dimensions
//!
//! `Fields` is the ordered list of `(label, value)` pairs that identifies one
//! series within an event.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single label/value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Field {
    pub label: String,
    pub value: String,
}

impl Field {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Ordered dimensions of a series
///
/// Equality is order-sensitive. Duplicate labels are not expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(Vec<Field>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build fields from `(label, value)` pairs, keeping their order
    pub fn from_pairs<L, V>(pairs: impl IntoIterator<Item = (L, V)>) -> Self
    where
        L: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(l, v)| Field::new(l, v)).collect())
    }

    /// Builder method: append a field
    pub fn field(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push(Field::new(label, value));
        self
    }

    pub fn push(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.0.push(Field::new(label, value));
    }

    /// Value of a label, if present
    pub fn get(&self, label: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|f| f.label == label)
            .map(|f| f.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.0.iter()
    }

    /// Sort fields by label (stable for equal labels)
    pub fn sort(&mut self) {
        self.0.sort_by(|a, b| a.label.cmp(&b.label));
    }

    /// Sorted copy
    pub fn sorted(&self) -> Self {
        let mut fields = self.clone();
        fields.sort();
        fields
    }

    /// Check label-sorted fields against label-sorted allowed values.
    ///
    /// Every label in `values` with a non-empty list must be present with one of
    /// the listed values. Labels absent from `values` always match.
    pub fn match_sorted(&self, values: &BTreeMap<String, Vec<String>>) -> bool {
        let mut fields = self.0.iter().peekable();
        for (label, allowed) in values {
            if allowed.is_empty() {
                continue;
            }
            // Both sides are sorted, so skip fields with smaller labels
            while fields.peek().is_some_and(|f| f.label < *label) {
                fields.next();
            }
            match fields.peek() {
                Some(f) if f.label == *label => {
                    if !allowed.iter().any(|v| *v == f.value) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }

    /// Project onto exactly `labels`, in that order.
    ///
    /// Missing labels get `empty` as their value. The result is the grouping key.
    pub fn group_by(&self, empty: &str, labels: &[String]) -> Fields {
        Fields(
            labels
                .iter()
                .map(|label| Field::new(label.clone(), self.get(label).unwrap_or(empty)))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Field> for Fields {
    fn from_iter<T: IntoIterator<Item = Field>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field.label, field.value)?;
        }
        write!(f, "}}")
    }
}
