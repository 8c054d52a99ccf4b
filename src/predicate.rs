// Filter tree and its evaluator. The query engine treats structured filter
// trees as input (no SQL text ever reaches this crate); this module is the
// default, concrete implementation of the "predicate evaluator" the source
// interface leaves external, so the crate is usable standalone.

use crate::row::Row;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    In,
    IsNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Leaf {
        field: String,
        op: Operator,
        value: Value,
    },
    Composite {
        logic: Logic,
        children: Vec<Filter>,
    },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Filter::Leaf {
            field: field.into(),
            op: Operator::Eq,
            value,
        }
    }

    pub fn and(children: Vec<Filter>) -> Self {
        Filter::Composite {
            logic: Logic::And,
            children,
        }
    }

    pub fn or(children: Vec<Filter>) -> Self {
        Filter::Composite {
            logic: Logic::Or,
            children,
        }
    }

    pub fn not(child: Filter) -> Self {
        Filter::Composite {
            logic: Logic::Not,
            children: vec![child],
        }
    }

    /// Top-level leaves, used by the query engine's index-selection pass:
    /// an AND tree's immediate leaf children are candidates for index
    /// lookups; anything nested under OR/NOT must fall back to residual
    /// evaluation since an index can't cheaply serve those shapes.
    pub fn top_level_leaves(&self) -> Vec<(&str, Operator, &Value)> {
        match self {
            Filter::Leaf { field, op, value } => vec![(field.as_str(), *op, value)],
            Filter::Composite {
                logic: Logic::And,
                children,
            } => children
                .iter()
                .filter_map(|c| match c {
                    Filter::Leaf { field, op, value } => Some((field.as_str(), *op, value)),
                    _ => None,
                })
                .collect(),
            Filter::Composite { .. } => Vec::new(),
        }
    }
}

pub trait PredicateEvaluator: Send + Sync {
    fn matches(&self, row: &Row, filter: &Filter) -> bool;

    /// Conjunctive (AND) application of a flat filter list.
    fn apply_filters(&self, row: &Row, filters: &[Filter]) -> bool {
        filters.iter().all(|f| self.matches(row, f))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPredicateEvaluator;

impl PredicateEvaluator for DefaultPredicateEvaluator {
    fn matches(&self, row: &Row, filter: &Filter) -> bool {
        match filter {
            Filter::Leaf { field, op, value } => eval_leaf(row, field, *op, value),
            Filter::Composite { logic, children } => match logic {
                Logic::And => children.iter().all(|c| self.matches(row, c)),
                Logic::Or => children.iter().any(|c| self.matches(row, c)),
                Logic::Not => children.first().map(|c| !self.matches(row, c)).unwrap_or(true),
            },
        }
    }
}

fn eval_leaf(row: &Row, field: &str, op: Operator, literal: &Value) -> bool {
    let stored = row.get(field);

    if op == Operator::IsNull {
        return matches!(stored, None | Some(Value::Null));
    }

    let stored = match stored {
        Some(v) => v,
        None => return false,
    };

    match op {
        Operator::Eq => values_equal(stored, literal),
        Operator::Ne => !values_equal(stored, literal),
        Operator::Lt => compare(stored, literal).map(|o| o.is_lt()).unwrap_or(false),
        Operator::Le => compare(stored, literal).map(|o| o.is_le()).unwrap_or(false),
        Operator::Gt => compare(stored, literal).map(|o| o.is_gt()).unwrap_or(false),
        Operator::Ge => compare(stored, literal).map(|o| o.is_ge()).unwrap_or(false),
        Operator::Like => match (stored.as_str(), literal.as_str()) {
            (Some(text), Some(pattern)) => like_match(text, pattern),
            _ => false,
        },
        Operator::In => match literal {
            Value::List(items) => items.iter().any(|item| values_equal(stored, item)),
            _ => false,
        },
        Operator::IsNull => unreachable!("handled above"),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    a == b
}

/// Heterogeneous comparisons are not errors here: the residual filter runs
/// over every row in a full scan, and a mismatched leaf should just fail to
/// match rather than abort the whole scan.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

/// `%` matches any run of characters (including none); `_` matches exactly
/// one character. No external regex dependency — recursive backtracking
/// matcher over the two wildcards, which is all LIKE needs.
pub fn like_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    like_rec(&t, &p)
}

fn like_rec(text: &[char], pattern: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('%') => {
            // Skip redundant leading '%'s, then try matching the rest of the
            // pattern at every possible split point.
            let rest = &pattern[1..];
            if like_rec(text, rest) {
                return true;
            }
            for i in 0..text.len() {
                if like_rec(&text[i + 1..], rest) {
                    return true;
                }
            }
            false
        }
        Some('_') => !text.is_empty() && like_rec(&text[1..], &pattern[1..]),
        Some(c) => text.first() == Some(c) && like_rec(&text[1..], &pattern[1..]),
    }
}
