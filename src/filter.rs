//! Structured row filters.
//!
//! A `Filter` is a conjunction of `column <op> literal` predicates. Its rendered
//! text is both the SQL `WHERE` clause handed to relational sources and the
//! literal filter component of count-cache keys, so rendering must stay stable
//! across releases.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::source::MATCH_ALL_FILTER;
use crate::errors::ExtractError;
use crate::types::{ColumnName, FilterText};

/// Cell or literal value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
}

impl Value {
    /// Numeric view used for feature extraction; `None` for text and null.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(value) => Some(*value as f64),
            Value::Real(value) => Some(*value),
            Value::Null | Value::Text(_) => None,
        }
    }

    /// SQL-style comparison: null compares with nothing, numbers compare
    /// numerically, text compares with text.
    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Text(_), _) | (_, Value::Text(_)) => None,
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(value) => write!(f, "{value}"),
            Value::Real(value) => write!(f, "{value:?}"),
            Value::Text(value) => write!(f, "'{}'", value.replace('\'', "''")),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// Comparison operator of a predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// One `column <op> literal` condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Column the condition reads.
    pub column: ColumnName,
    /// Comparison applied.
    pub op: CmpOp,
    /// Literal the column is compared with.
    pub value: Value,
}

/// Conjunction of predicates; the empty filter matches every row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// Filter matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Add a predicate (builder style).
    pub fn and(mut self, column: impl Into<ColumnName>, op: CmpOp, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Predicates in the order they were added.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Render as SQL `WHERE` text; this exact text keys the count cache.
    pub fn render(&self) -> FilterText {
        if self.predicates.is_empty() {
            return MATCH_ALL_FILTER.to_string();
        }
        self.predicates
            .iter()
            .map(|predicate| {
                format!(
                    "{} {} {}",
                    predicate.column,
                    predicate.op.symbol(),
                    predicate.value
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Check every referenced column exists and every literal is renderable.
    pub fn validate<S: AsRef<str>>(&self, columns: &[S]) -> Result<(), ExtractError> {
        for predicate in &self.predicates {
            validate_identifier(&predicate.column)?;
            if !columns
                .iter()
                .any(|column| column.as_ref() == predicate.column)
            {
                return Err(ExtractError::Configuration(format!(
                    "filter references unknown column '{}'",
                    predicate.column
                )));
            }
            match &predicate.value {
                Value::Real(value) if !value.is_finite() => {
                    return Err(ExtractError::Configuration(format!(
                        "filter literal for '{}' must be finite",
                        predicate.column
                    )));
                }
                Value::Null => {
                    return Err(ExtractError::Configuration(format!(
                        "filter literal for '{}' must not be NULL",
                        predicate.column
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Evaluate against a row; `lookup` resolves a column name to its cell.
    pub fn matches<'a>(&self, mut lookup: impl FnMut(&str) -> Option<&'a Value>) -> bool {
        self.predicates.iter().all(|predicate| {
            lookup(&predicate.column)
                .and_then(|cell| cell.compare(&predicate.value))
                .is_some_and(|ordering| predicate.op.accepts(ordering))
        })
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Reject names that cannot be interpolated into SQL as bare identifiers.
pub fn validate_identifier(name: &str) -> Result<(), ExtractError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        _ => false,
    };
    if !valid {
        return Err(ExtractError::Configuration(format!(
            "'{name}' is not a valid column or table identifier"
        )));
    }
    Ok(())
}
