//! Runtime value representation
//!
//! This module defines the [`Value`] enum, the dynamically-typed result of
//! every expression the interpreter evaluates, and [`ListValue`], the
//! multi-typed set behind `LIST` variables.
//!
//! # Value Types
//!
//! - [`Value::Nil`]: absent / undefined
//! - [`Value::Bool`]: boolean, coerced to 1/0 when rendered into narrative
//! - [`Value::Number`]: f64; whole numbers render without a fraction
//! - [`Value::Str`]: UTF-8 string
//! - [`Value::List`]: set of enabled items, grouped by declaring list
//!
//! A [`ListValue`] may hold items from several `LIST` declarations at once:
//! `{doors: {front, back}, moods: {calm}}` is a single value. Ordinal-aware
//! operations (ordering, min/max, ranges) need the declaration tables and
//! live in [`crate::interpreter::lists`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Runtime values in the interpreter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    List(ListValue),
}

impl Value {
    /// Truthiness under the narrative expression language: `nil`, `false`,
    /// `0`, the empty string, and the empty list are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
        }
    }

    /// Get the numeric value, coercing booleans to 1/0.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(true) => Some(1.0),
            Value::Bool(false) => Some(0.0),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListValue> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }
}

/// A list value: for each declaring list, the set of enabled item names.
///
/// `BTreeMap`/`BTreeSet` keep iteration deterministic, which makes equality,
/// serialization, and test output stable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListValue {
    pub entries: BTreeMap<String, BTreeSet<String>>,
}

impl ListValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A list value holding exactly one item.
    pub fn single(list: &str, item: &str) -> Self {
        let mut v = Self::new();
        v.insert(list, item);
        v
    }

    pub fn insert(&mut self, list: &str, item: &str) {
        self.entries
            .entry(list.to_string())
            .or_default()
            .insert(item.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|s| s.is_empty())
    }

    /// Total number of enabled items across all lists.
    pub fn count(&self) -> usize {
        self.entries.values().map(|s| s.len()).sum()
    }

    /// Iterate `(list, item)` pairs in deterministic order.
    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(list, set)| set.iter().map(move |item| (list.as_str(), item.as_str())))
    }

    /// Subset test: every item of `other` is present in `self`.
    pub fn contains_all(&self, other: &ListValue) -> bool {
        other.items().all(|(list, item)| {
            self.entries
                .get(list)
                .is_some_and(|set| set.contains(item))
        })
    }

    /// Record membership of a declaring list without enabling any item.
    /// An emptied value still knows its origins, which `LIST_ALL` and
    /// `LIST_INVERT` rely on.
    pub fn add_origin(&mut self, list: &str) {
        self.entries.entry(list.to_string()).or_default();
    }

    /// Same enabled items, ignoring empty origin entries.
    pub fn same_items(&self, other: &ListValue) -> bool {
        self.items().eq(other.items())
    }

    pub fn union(&self, other: &ListValue) -> ListValue {
        let mut out = self.clone();
        for list in other.entries.keys() {
            out.add_origin(list);
        }
        for (list, item) in other.items() {
            out.insert(list, item);
        }
        out
    }

    pub fn difference(&self, other: &ListValue) -> ListValue {
        let mut out = ListValue::new();
        for list in self.entries.keys() {
            out.add_origin(list);
        }
        for (list, item) in self.items() {
            let gone = other
                .entries
                .get(list)
                .is_some_and(|set| set.contains(item));
            if !gone {
                out.insert(list, item);
            }
        }
        out
    }

    pub fn intersect(&self, other: &ListValue) -> ListValue {
        let mut out = ListValue::new();
        for list in self.entries.keys() {
            out.add_origin(list);
        }
        for (list, item) in self.items() {
            let kept = other
                .entries
                .get(list)
                .is_some_and(|set| set.contains(item));
            if kept {
                out.insert(list, item);
            }
        }
        out
    }
}
