//! Document wire and storage shape
//!
//! A document is identified by `(model, id)`. `version` and `history` are
//! maintained by the CRUD engine; clients only supply `version` to request
//! an optimistic-concurrency check, and `mut` to request field arithmetic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value::Value;

/// Built-in model of model documents
pub const MODEL_MODEL: &str = "Model";

/// Built-in model of reactor documents
pub const REACTOR_MODEL: &str = "Reactor";

/// Creation and last-update timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    /// When the document was first persisted
    pub created: DateTime<Utc>,
    /// When the document was last changed
    pub updated: DateTime<Utc>,
}

impl History {
    /// History for a document persisted for the first time at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created: now,
            updated: now,
        }
    }
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document {
    /// Document id, unique within its model
    pub id: String,
    /// Model (schema) name
    pub model: String,
    /// Persisted version; on writes, the expected current version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Creation and update timestamps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<History>,
    /// Document body
    #[serde(default)]
    pub val: Value,
    /// Runtime status reported by the engine (never persisted by clients)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    /// Field mutations to apply to the stored `val`: `{field: {op: operand}}`
    #[serde(rename = "mut", default, skip_serializing_if = "Option::is_none")]
    pub mutations: Option<BTreeMap<String, Value>>,
}

impl Document {
    /// A document with the given identity and body
    pub fn new(model: impl Into<String>, id: impl Into<String>, val: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            val: val.into(),
            ..Default::default()
        }
    }

    /// Set the expected version (builder style)
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Add a field mutation (builder style)
    pub fn with_mutation(mut self, field: impl Into<String>, op: &str, operand: impl Into<Value>) -> Self {
        let mut expr = BTreeMap::new();
        expr.insert(op.to_string(), operand.into());
        self.mutations
            .get_or_insert_with(BTreeMap::new)
            .insert(field.into(), Value::Object(expr));
        self
    }

    /// Persisted version, 0 for documents never written
    pub fn current_version(&self) -> u64 {
        self.version.unwrap_or(0)
    }

    /// `model/id`, for messages and logs
    pub fn path(&self) -> String {
        format!("{}/{}", self.model, self.id)
    }
}
