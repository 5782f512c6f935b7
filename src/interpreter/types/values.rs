//! Runtime value types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Runtime value type
///
/// `Set` is a selection bitset: an ordered set of element indices. Iterating
/// a set with `for ... in` yields single-element sets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Val {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(String),
    List(Vec<Val>),
    Set(BTreeSet<u32>),
}

impl Val {
    /// Check if value is truthy (for conditionals)
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Num(n) => *n != 0.0,
            Val::Str(s) => !s.is_empty(),
            Val::List(items) => !items.is_empty(),
            Val::Set(bits) => !bits.is_empty(),
        }
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Int(i) => Some(*i as f64),
            Val::Num(n) => Some(*n),
            Val::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Integer view of the value; floats are truncated
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Val::Int(i) => Some(*i),
            Val::Num(n) if n.is_finite() => Some(n.trunc() as i64),
            Val::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Equality used by `switch`/`case`: numbers compare by value across
    /// int/float, everything else structurally.
    pub fn loosely_equals(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Int(_) | Val::Num(_), Val::Int(_) | Val::Num(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => self == other,
        }
    }

    /// Number of elements a `for ... in` loop visits
    pub fn iteration_len(&self) -> Option<usize> {
        match self {
            Val::List(items) => Some(items.len()),
            Val::Set(bits) => Some(bits.len()),
            _ => None,
        }
    }

    /// The `index`-th element visited by a `for ... in` loop
    pub fn iteration_item(&self, index: usize) -> Option<Val> {
        match self {
            Val::List(items) => items.get(index).cloned(),
            Val::Set(bits) => bits
                .iter()
                .nth(index)
                .map(|bit| Val::Set(BTreeSet::from([*bit]))),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "boolean",
            Val::Int(_) => "integer",
            Val::Num(_) => "decimal",
            Val::Str(_) => "string",
            Val::List(_) => "array",
            Val::Set(_) => "bitset",
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => Ok(()),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Int(i) => write!(f, "{}", i),
            Val::Num(n) => write!(f, "{}", n),
            Val::Str(s) => f.write_str(s),
            Val::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        Val::Str(s) => write!(f, "\"{}\"", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                f.write_str("]")
            }
            Val::Set(bits) => {
                f.write_str("({")?;
                for (i, bit) in bits.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", bit)?;
                }
                f.write_str("})")
            }
        }
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl From<i64> for Val {
    fn from(i: i64) -> Self {
        Val::Int(i)
    }
}

impl From<f64> for Val {
    fn from(n: f64) -> Self {
        Val::Num(n)
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Str(s.to_string())
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::Str(s)
    }
}
