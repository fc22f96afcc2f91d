//! Field schema of a model
//!
//! A model's `val.schema` maps field names to type specs:
//!
//! - a string naming a type: `string`, `int`, `float`, `number`, `bool`,
//!   `any`, `object`, `array`; a trailing `?` makes the field optional
//! - a nested map: an object with its own fields
//! - a one-element list: an array whose items match that spec
//!
//! Unknown fields are rejected, and `null` only matches optional fields or
//! `any`. Validation errors carry the JSON-pointer path of the offending
//! node (`/val/title: expected string, got Int`).

use std::collections::BTreeMap;
use std::fmt;

use apogy_core::{Error, Result, Value};

/// Scalar and opaque container types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    /// UTF-8 string
    String,
    /// Integer number
    Int,
    /// Any number
    Float,
    /// Any number
    Number,
    /// Boolean
    Bool,
    /// Anything, including null
    Any,
    /// Any object, contents unchecked
    Object,
    /// Any array, contents unchecked
    Array,
}

impl Primitive {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "string" => Primitive::String,
            "int" => Primitive::Int,
            "float" => Primitive::Float,
            "number" => Primitive::Number,
            "bool" => Primitive::Bool,
            "any" => Primitive::Any,
            "object" => Primitive::Object,
            "array" => Primitive::Array,
            _ => return None,
        })
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Primitive::String => value.is_string(),
            Primitive::Int => matches!(value, Value::Int(_)),
            Primitive::Float | Primitive::Number => value.is_number(),
            Primitive::Bool => matches!(value, Value::Bool(_)),
            Primitive::Any => true,
            Primitive::Object => matches!(value, Value::Object(_)),
            Primitive::Array => matches!(value, Value::Array(_)),
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Primitive::String => "string",
            Primitive::Int => "int",
            Primitive::Float => "float",
            Primitive::Number => "number",
            Primitive::Bool => "bool",
            Primitive::Any => "any",
            Primitive::Object => "object",
            Primitive::Array => "array",
        };
        f.write_str(name)
    }
}

/// Shape of one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// Named type
    Primitive(Primitive),
    /// Object with declared fields
    Object(BTreeMap<String, Field>),
    /// Array of one item type
    Array(Box<Field>),
}

/// A field type plus optionality
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Expected shape
    pub ty: FieldType,
    /// May be absent or null
    pub optional: bool,
}

/// Compiled schema of a model's `val`
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    fields: BTreeMap<String, Field>,
}

impl Schema {
    /// Compile `val.schema` of a model document
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the path of the first invalid spec.
    pub fn compile(spec: &Value) -> Result<Self> {
        match spec {
            Value::Object(map) => Ok(Schema {
                fields: compile_fields(map, "/val/schema")?,
            }),
            other => Err(invalid_spec(
                "/val/schema",
                format!("expected object, got {}", other.type_name()),
            )),
        }
    }

    /// Declared top-level fields
    pub fn fields(&self) -> &BTreeMap<String, Field> {
        &self.fields
    }

    /// Validate a document body
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the path of the first mismatch.
    pub fn validate(&self, val: &Value) -> Result<()> {
        match val {
            Value::Object(map) => check_fields(&self.fields, map, "/val"),
            other => Err(mismatch("/val", "object", other)),
        }
    }
}

fn invalid_spec(path: &str, msg: impl fmt::Display) -> Error {
    Error::validation(format!("validation error: invalid schema: {}: {}", path, msg))
}

fn mismatch(path: &str, expected: impl fmt::Display, got: &Value) -> Error {
    Error::validation(format!(
        "validation error: {}: expected {}, got {}",
        path,
        expected,
        got.type_name()
    ))
}

fn compile_fields(map: &BTreeMap<String, Value>, path: &str) -> Result<BTreeMap<String, Field>> {
    map.iter()
        .map(|(name, spec)| {
            let field = compile_field(spec, &format!("{}/{}", path, name))?;
            Ok((name.clone(), field))
        })
        .collect()
}

fn compile_field(spec: &Value, path: &str) -> Result<Field> {
    match spec {
        Value::String(name) => {
            let (name, optional) = match name.strip_suffix('?') {
                Some(base) => (base, true),
                None => (name.as_str(), false),
            };
            let primitive = Primitive::parse(name)
                .ok_or_else(|| invalid_spec(path, format!("unknown type '{}'", name)))?;
            Ok(Field {
                ty: FieldType::Primitive(primitive),
                optional,
            })
        }
        Value::Object(map) => Ok(Field {
            ty: FieldType::Object(compile_fields(map, path)?),
            optional: false,
        }),
        Value::Array(items) if items.len() == 1 => Ok(Field {
            ty: FieldType::Array(Box::new(compile_field(&items[0], &format!("{}/0", path))?)),
            optional: false,
        }),
        Value::Array(_) => Err(invalid_spec(path, "array spec must have exactly one item")),
        other => Err(invalid_spec(
            path,
            format!("expected type name, object or list, got {}", other.type_name()),
        )),
    }
}

fn check_fields(
    fields: &BTreeMap<String, Field>,
    map: &BTreeMap<String, Value>,
    path: &str,
) -> Result<()> {
    if let Some(unknown) = map.keys().find(|k| !fields.contains_key(*k)) {
        return Err(Error::validation(format!(
            "validation error: {}/{}: unknown field",
            path, unknown
        )));
    }
    for (name, field) in fields {
        let child = format!("{}/{}", path, name);
        match map.get(name) {
            None if field.optional => {}
            None => {
                return Err(Error::validation(format!(
                    "validation error: {}: required field is missing",
                    child
                )))
            }
            Some(value) => check_field(field, value, &child)?,
        }
    }
    Ok(())
}

fn check_field(field: &Field, value: &Value, path: &str) -> Result<()> {
    if value.is_null() {
        return match &field.ty {
            _ if field.optional => Ok(()),
            FieldType::Primitive(Primitive::Any) => Ok(()),
            FieldType::Primitive(p) => Err(mismatch(path, p, value)),
            FieldType::Object(_) => Err(mismatch(path, "object", value)),
            FieldType::Array(_) => Err(mismatch(path, "array", value)),
        };
    }
    match &field.ty {
        FieldType::Primitive(p) if p.matches(value) => Ok(()),
        FieldType::Primitive(p) => Err(mismatch(path, p, value)),
        FieldType::Object(fields) => match value {
            Value::Object(map) => check_fields(fields, map, path),
            other => Err(mismatch(path, "object", other)),
        },
        FieldType::Array(item) => match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, v)| check_field(item, v, &format!("{}/{}", path, i))),
            other => Err(mismatch(path, "array", other)),
        },
    }
}
