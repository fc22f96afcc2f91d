//! Parsed query structure and its AQL serialization
//!
//! `Display` writes canonical AQL: `Model(k="v" n>1 p^"a"$"ab" flag) { Link }`.
//! For any query parsed without parameters, parsing the displayed text
//! yields an equal query. Strings containing `"` have no AQL form.

use std::fmt;

use apogy_core::Value;

/// Operator and operand of one filter condition
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Bare key: the field must be present
    Present,
    /// `key=value`
    Equal(Value),
    /// `key<value`
    Less(Value),
    /// `key>value`
    Greater(Value),
    /// `key^value`, optionally `$skip`
    Prefix {
        /// Required prefix
        value: Value,
        /// Only values sorting after this one
        skip: Option<Value>,
    },
}

/// One `key op value` entry of a filter
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Field path (`val.title`)
    pub key: String,
    /// What the field must satisfy
    pub predicate: Predicate,
}

impl Condition {
    /// Create a condition
    pub fn new(key: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            key: key.into(),
            predicate,
        }
    }
}

/// A parsed AQL query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Model the query targets
    pub model: String,
    /// Conditions in source order
    pub filter: Vec<Condition>,
    /// Nested sub-queries
    pub links: Vec<Query>,
}

impl Query {
    /// A query over `model` with no filter or links
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Add a condition (builder style)
    pub fn with_condition(mut self, key: impl Into<String>, predicate: Predicate) -> Self {
        self.filter.push(Condition::new(key, predicate));
        self
    }

    /// Add a nested query (builder style)
    pub fn with_link(mut self, link: Query) -> Self {
        self.links.push(link);
        self
    }

    /// First condition on `key`, if any
    pub fn condition(&self, key: &str) -> Option<&Condition> {
        self.filter.iter().find(|c| c.key == key)
    }
}

/// Write a value as an AQL literal
fn write_literal(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "\"{}\"", s),
        Value::Float(n) => write!(f, "{}", n),
        Value::Int(n) => write!(f, "{}", n),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Null => f.write_str("null"),
        // Composite parameter values have no literal form.
        Value::Array(_) | Value::Object(_) => match serde_json::to_string(value) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        },
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)?;
        match &self.predicate {
            Predicate::Present => Ok(()),
            Predicate::Equal(v) => {
                f.write_str("=")?;
                write_literal(f, v)
            }
            Predicate::Less(v) => {
                f.write_str("<")?;
                write_literal(f, v)
            }
            Predicate::Greater(v) => {
                f.write_str(">")?;
                write_literal(f, v)
            }
            Predicate::Prefix { value, skip } => {
                f.write_str("^")?;
                write_literal(f, value)?;
                if let Some(skip) = skip {
                    f.write_str("$")?;
                    write_literal(f, skip)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.model)?;
        if !self.filter.is_empty() {
            f.write_str("(")?;
            for (i, cond) in self.filter.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{}", cond)?;
            }
            f.write_str(")")?;
        }
        if !self.links.is_empty() {
            f.write_str(" {")?;
            for link in &self.links {
                write!(f, " {}", link)?;
            }
            f.write_str(" }")?;
        }
        Ok(())
    }
}
