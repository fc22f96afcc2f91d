//! Field mutations
//!
//! A write may carry `mut: {field: {op: operand}}` instead of (or on top of)
//! a full `val`. Each field names exactly one operator, applied to the
//! current value of that top-level field of the stored `val`. A missing
//! field counts as `0`.
//!
//! | Operator | Aliases |
//! |----------|---------|
//! | `add` | `+` |
//! | `sub` | `subtract`, `-` |
//! | `mul` | `multiply`, `*` |
//! | `div` | `divide`, `/` |
//! | `min` | `minimum` |
//! | `max` | `maximum` |
//! | `set` | |
//!
//! Integer math is used when both operands are integers, float math
//! otherwise. `set` replaces the field with any value.

use std::collections::BTreeMap;

use apogy_core::{Error, Result, Value};

/// One field operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    /// current + operand
    Add,
    /// current - operand
    Sub,
    /// current * operand
    Mul,
    /// current / operand
    Div,
    /// smaller of the two
    Min,
    /// larger of the two
    Max,
    /// operand replaces the field
    Set,
}

impl MutationOp {
    /// Parse an operator name or alias
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "add" | "+" => MutationOp::Add,
            "sub" | "subtract" | "-" => MutationOp::Sub,
            "mul" | "multiply" | "*" => MutationOp::Mul,
            "div" | "divide" | "/" => MutationOp::Div,
            "min" | "minimum" => MutationOp::Min,
            "max" | "maximum" => MutationOp::Max,
            "set" => MutationOp::Set,
            _ => return None,
        })
    }

    fn apply_int(self, field: &str, current: i64, operand: i64) -> Result<i64> {
        let result = match self {
            MutationOp::Add => current.checked_add(operand),
            MutationOp::Sub => current.checked_sub(operand),
            MutationOp::Mul => current.checked_mul(operand),
            MutationOp::Div if operand == 0 => return Err(division_by_zero(field)),
            MutationOp::Div => current.checked_div(operand),
            MutationOp::Min => Some(current.min(operand)),
            MutationOp::Max => Some(current.max(operand)),
            MutationOp::Set => Some(operand),
        };
        result.ok_or_else(|| {
            Error::validation(format!("invalid mutation expression for '{}': integer overflow", field))
        })
    }

    fn apply_float(self, field: &str, current: f64, operand: f64) -> Result<f64> {
        Ok(match self {
            MutationOp::Add => current + operand,
            MutationOp::Sub => current - operand,
            MutationOp::Mul => current * operand,
            MutationOp::Div if operand == 0.0 => return Err(division_by_zero(field)),
            MutationOp::Div => current / operand,
            MutationOp::Min => current.min(operand),
            MutationOp::Max => current.max(operand),
            MutationOp::Set => operand,
        })
    }
}

fn division_by_zero(field: &str) -> Error {
    Error::validation(format!("invalid mutation expression for '{}': division by zero", field))
}

/// Parse one `{op: operand}` expression
fn parse_expr<'v>(field: &str, expr: &'v Value) -> Result<(MutationOp, &'v Value)> {
    let map = expr.as_object().ok_or_else(|| {
        Error::validation(format!(
            "invalid mutation expression for '{}': expected object, got {}",
            field,
            expr.type_name()
        ))
    })?;
    let mut ops = map.iter();
    let (name, operand) = ops.next().ok_or_else(|| {
        Error::validation(format!("invalid mutation expression for '{}': no op given", field))
    })?;
    if ops.next().is_some() {
        return Err(Error::validation(format!(
            "invalid mutation expression for '{}': only one op allowed",
            field
        )));
    }
    let op = MutationOp::parse(name).ok_or_else(|| {
        Error::validation(format!("invalid mutation expression for '{}': {}", field, name))
    })?;
    Ok((op, operand))
}

fn apply_one(field: &str, op: MutationOp, current: Option<&Value>, operand: &Value) -> Result<Value> {
    if op == MutationOp::Set {
        return Ok(operand.clone());
    }
    if !operand.is_number() {
        return Err(Error::validation(format!(
            "invalid mutation value for '{}': {}",
            field,
            operand.type_name()
        )));
    }
    let current = current.unwrap_or(&Value::Int(0));
    match (current, operand) {
        (Value::Int(a), Value::Int(b)) => op.apply_int(field, *a, *b).map(Value::Int),
        (a, b) if a.is_number() => {
            let (a, b) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
            op.apply_float(field, a, b).map(Value::Float)
        }
        _ => Err(Error::validation(format!(
            "cannot perform mutation on non-numeric field '{}'",
            field
        ))),
    }
}

/// Apply mutations to a stored body, returning the new body
///
/// `base` must be an object or null (a document that does not exist yet).
///
/// # Errors
///
/// Returns `Validation` for malformed expressions, non-numeric operands or
/// fields, division by zero and integer overflow. `base` is left untouched.
pub fn apply_mutations(base: &Value, mutations: &BTreeMap<String, Value>) -> Result<Value> {
    let mut val = match base {
        Value::Object(map) => map.clone(),
        Value::Null => BTreeMap::new(),
        other => {
            return Err(Error::validation(format!(
                "cannot mutate a document whose val is {}",
                other.type_name()
            )))
        }
    };
    for (field, expr) in mutations {
        let (op, operand) = parse_expr(field, expr)?;
        let next = apply_one(field, op, val.get(field), operand)?;
        val.insert(field.clone(), next);
    }
    Ok(Value::Object(val))
}
