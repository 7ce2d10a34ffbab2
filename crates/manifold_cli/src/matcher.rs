//! `--match` filtering of top-level manifest items.
//!
//! An expression is one or more `field<op>value` conditions joined by `&`,
//! all of which must hold. Repeating `--match` gives alternatives, any of
//! which may hold.

use std::cmp::Ordering;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde_json::Value;

/// Comparison operator of one condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Matches,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    /// Split `expr` at its first operator.
    fn split(expr: &str) -> Option<(&str, Operator, &str)> {
        let start = expr.find(['=', '!', '~', '<', '>'])?;
        let rest = &expr[start..];
        let (op, len) = match rest.as_bytes() {
            [b'!', b'=', ..] => (Operator::Ne, 2),
            [b'<', b'=', ..] => (Operator::Le, 2),
            [b'>', b'=', ..] => (Operator::Ge, 2),
            [b'=', ..] => (Operator::Eq, 1),
            [b'~', ..] => (Operator::Matches, 1),
            [b'<', ..] => (Operator::Lt, 1),
            [b'>', ..] => (Operator::Gt, 1),
            _ => return None,
        };
        Some((&expr[..start], op, &rest[len..]))
    }
}

#[derive(Debug, Clone)]
struct Condition {
    field: String,
    op: Operator,
    value: String,
    pattern: Option<Regex>,
}

impl Condition {
    fn parse(expr: &str) -> Result<Self> {
        let Some((field, op, value)) = Operator::split(expr) else {
            bail!("Invalid match condition '{}': expected field<op>value", expr);
        };
        let field = field.trim();
        if field.is_empty() {
            bail!("Invalid match condition '{}': missing field", expr);
        }

        let pattern = match op {
            Operator::Matches => Some(
                Regex::new(value)
                    .with_context(|| format!("Invalid regular expression in '{}'", expr))?,
            ),
            _ => None,
        };

        Ok(Self {
            field: field.to_string(),
            op,
            value: value.to_string(),
            pattern,
        })
    }

    fn holds(&self, item: &Value) -> bool {
        let actual = field_text(item, &self.field);
        match self.op {
            Operator::Eq => actual == self.value,
            Operator::Ne => actual != self.value,
            Operator::Matches => self
                .pattern
                .as_ref()
                .is_some_and(|pattern| pattern.is_match(&actual)),
            Operator::Lt => compare(&actual, &self.value) == Ordering::Less,
            Operator::Le => compare(&actual, &self.value) != Ordering::Greater,
            Operator::Gt => compare(&actual, &self.value) == Ordering::Greater,
            Operator::Ge => compare(&actual, &self.value) != Ordering::Less,
        }
    }
}

/// String form of a (possibly dotted) field; absent fields read as empty.
fn field_text(item: &Value, field: &str) -> String {
    let mut current = item;
    for segment in field.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    match current {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Numeric when both sides are numbers, lexical otherwise.
fn compare(left: &str, right: &str) -> Ordering {
    match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(left), Ok(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
        _ => left.cmp(right),
    }
}

/// Disjunction of `&`-joined condition groups.
#[derive(Debug, Clone, Default)]
pub struct ItemMatcher {
    alternatives: Vec<Vec<Condition>>,
}

impl ItemMatcher {
    pub fn parse<S: AsRef<str>>(expressions: &[S]) -> Result<Self> {
        let alternatives = expressions
            .iter()
            .map(|expr| {
                expr.as_ref()
                    .split('&')
                    .filter(|part| !part.trim().is_empty())
                    .map(Condition::parse)
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { alternatives })
    }

    /// Whether no filter was given.
    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }

    pub fn matches(&self, item: &Value) -> bool {
        self.is_empty()
            || self
                .alternatives
                .iter()
                .any(|conditions| conditions.iter().all(|condition| condition.holds(item)))
    }
}
