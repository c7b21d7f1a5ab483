//! Ordinal-aware list algebra
//!
//! Set structure lives on [`ListValue`]; everything that needs the
//! `LIST` declarations — ordinals, ordering, min/max, ranges, inversion,
//! rendering — lives here. The raw ordinal of an item is its 1-based
//! position in its declaring list.

use crate::parser::ast::Story;
use crate::state::value::{ListValue, Value};

/// Ordering operators over list operands. Lists compare as ordinal
/// intervals: `a < b` when every item of `a` sits below every item of
/// `b` (`max(a) < min(b)`), and symmetrically for the rest. Either
/// operand being empty compares false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrdering {
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

/// Render a value into narrative text: booleans become 1/0, nil becomes
/// nothing, whole numbers drop the fraction, lists render their items
/// comma-separated in declaration order.
pub fn render(value: &Value, story: &Story) -> String {
    match value {
        Value::Nil => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{n}")
            }
        }
        Value::Str(s) => s.clone(),
        Value::List(l) => render_list(l, story),
    }
}

fn render_list(value: &ListValue, story: &Story) -> String {
    let mut names: Vec<&str> = Vec::new();

    // Declared lists first, items in declaration order.
    for def in &story.lists {
        if let Some(set) = value.entries.get(&def.name) {
            for item in &def.items {
                if set.contains(item) {
                    names.push(item);
                }
            }
        }
    }
    // Entries under undeclared list names (host-supplied) trail in
    // deterministic order.
    for (list, set) in &value.entries {
        if story.list(list).is_none() {
            names.extend(set.iter().map(String::as_str));
        }
    }

    names.join(", ")
}

/// `(list name, item, ordinal)` triples of the enabled items, in
/// declaration order. Items from unknown lists are skipped.
fn ordinals<'a>(value: &'a ListValue, story: &'a Story) -> Vec<(&'a str, &'a str, usize)> {
    let mut out = Vec::new();
    for def in &story.lists {
        if let Some(set) = value.entries.get(&def.name) {
            for (pos, item) in def.items.iter().enumerate() {
                if set.contains(item) {
                    out.push((def.name.as_str(), item.as_str(), pos + 1));
                }
            }
        }
    }
    out
}

fn min_entry<'a>(value: &'a ListValue, story: &'a Story) -> Option<(&'a str, &'a str, usize)> {
    ordinals(value, story).into_iter().min_by_key(|e| e.2)
}

fn max_entry<'a>(value: &'a ListValue, story: &'a Story) -> Option<(&'a str, &'a str, usize)> {
    ordinals(value, story).into_iter().max_by_key(|e| e.2)
}

pub fn compare(op: ListOrdering, a: &ListValue, b: &ListValue, story: &Story) -> bool {
    let (Some(a_min), Some(a_max)) = (min_entry(a, story), max_entry(a, story)) else {
        return false;
    };
    let (Some(b_min), Some(b_max)) = (min_entry(b, story), max_entry(b, story)) else {
        return false;
    };
    match op {
        ListOrdering::Less => a_max.2 < b_min.2,
        ListOrdering::LessEq => a_max.2 <= b_min.2,
        ListOrdering::Greater => a_min.2 > b_max.2,
        ListOrdering::GreaterEq => a_min.2 >= b_max.2,
    }
}

/// Single-item list holding the minimum-ordinal member.
pub fn min_item(value: &ListValue, story: &Story) -> ListValue {
    match min_entry(value, story) {
        Some((list, item, _)) => ListValue::single(list, item),
        None => ListValue::new(),
    }
}

/// Single-item list holding the maximum-ordinal member.
pub fn max_item(value: &ListValue, story: &Story) -> ListValue {
    match max_entry(value, story) {
        Some((list, item, _)) => ListValue::single(list, item),
        None => ListValue::new(),
    }
}

/// Every item of every declaring list that contributes to `value`.
pub fn all_items(value: &ListValue, story: &Story) -> ListValue {
    let mut out = ListValue::new();
    for list in value.entries.keys() {
        if let Some(def) = story.list(list) {
            for item in &def.items {
                out.insert(list, item);
            }
        }
    }
    out
}

/// Items of the declaring lists that are *not* enabled in `value`.
pub fn invert(value: &ListValue, story: &Story) -> ListValue {
    all_items(value, story).difference(value)
}

/// Raw ordinal of a single-element list, if it is one.
pub fn value_of(value: &ListValue, story: &Story) -> Option<usize> {
    let entries = ordinals(value, story);
    match entries.as_slice() {
        [(_, _, ord)] => Some(*ord),
        _ => None,
    }
}

/// Members of `value`'s declaring lists with ordinal in `[lo, hi]`.
pub fn range(value: &ListValue, lo: usize, hi: usize, story: &Story) -> ListValue {
    let mut out = ListValue::new();
    for (list, item, ord) in ordinals(&all_items(value, story), story) {
        if ord >= lo && ord <= hi {
            out.insert(list, item);
        }
    }
    out
}
