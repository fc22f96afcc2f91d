//! Secondary index maintenance
//!
//! Every indexable scalar leaf of a document's `val` produces one entry:
//!
//! ```text
//! f SEP model SEP val.path.to.field SEP encoded SEP id  ->  [0]
//! ```
//!
//! Arrays contribute one entry per element under the array's own path.
//! Strings of 128 bytes or more, and strings or object keys containing the
//! separator, are not indexed. Null and bool leaves are skipped with a
//! warning. Entry creation and deletion both go through [`index_entries`],
//! so an update that deletes the old value's entries and creates the new
//! value's entries in one transaction never leaves a stale entry behind.
//!
//! Fields declared `unique` also own a claim record
//! `u SEP model SEP path SEP encoded -> id`. Two concurrent writers claiming
//! the same value both write the claim key, so the backend's commit-time
//! conflict detection catches the race even when neither could yet see the
//! other's index entry.
//!
//! The encoded segment carries no kind tag: an 8-byte string and a number
//! can share the same bytes. Whoever needs the kind (unique checks, the
//! search evaluator) reads it back from the document with [`field_leaves`].

use std::collections::BTreeSet;

use apogy_core::keys::{
    document_key, encode_index_value, index_entry_key, index_field_prefix, index_value_prefix,
    prefix_successor, split_index_entry, unique_claim_key, INDEX_MARKER,
};
use apogy_core::{Context, Document, Error, KvWrite, Result, Value, Visitor};
use tracing::{trace, warn};

use crate::codec::decode_document;
use crate::model::Model;

/// Path of the root of a document body
pub const ROOT_PATH: &str = "val";

/// Kind of an indexed scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarKind {
    /// UTF-8 string, encoded as its bytes
    Text,
    /// Int or Float, encoded as an f64
    Number,
}

impl ScalarKind {
    /// Kind of a value, `None` for values that are never indexed by kind
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(ScalarKind::Text),
            Value::Int(_) | Value::Float(_) => Some(ScalarKind::Number),
            _ => None,
        }
    }
}

/// One `(path, encoded scalar)` pair of a document body
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    /// Dotted path below the document (`val.author.name`)
    pub path: String,
    /// Encoded scalar
    pub encoded: Vec<u8>,
    /// Kind of the scalar the bytes came from
    pub kind: ScalarKind,
}

#[derive(Default)]
struct EntryCollector {
    entries: BTreeSet<IndexEntry>,
}

impl Visitor for EntryCollector {
    fn visit_leaf(&mut self, path: &str, value: &Value) {
        if let (Some(encoded), Some(kind)) = (encode_index_value(value), ScalarKind::of(value)) {
            self.entries.insert(IndexEntry {
                path: path.to_string(),
                encoded,
                kind,
            });
            return;
        }
        match value {
            // Long strings and separator-bearing strings are skipped silently.
            Value::String(_) => {}
            Value::Null if path == ROOT_PATH => {}
            other => warn!(path, kind = other.type_name(), "value kind is not indexed"),
        }
    }

    fn visit_skipped_key(&mut self, path: &str, key: &str) {
        warn!(path, key_len = key.len(), "object key contains the key separator, not indexed");
    }
}

/// Distinct index entries of a document body, in key order
pub fn index_entries(val: &Value) -> Vec<IndexEntry> {
    let mut collector = EntryCollector::default();
    val.walk(ROOT_PATH, &mut collector);
    collector.entries.into_iter().collect()
}

struct LeafCollector<'p> {
    path: &'p str,
    leaves: Vec<Value>,
}

impl Visitor for LeafCollector<'_> {
    fn visit_leaf(&mut self, path: &str, value: &Value) {
        if path == self.path && encode_index_value(value).is_some() {
            self.leaves.push(value.clone());
        }
    }
}

/// Indexable scalars of `val` at an index path
///
/// Walks the tree exactly as [`index_entries`] does, so every returned leaf
/// has an entry under `path` and vice versa.
pub fn field_leaves(val: &Value, path: &str) -> Vec<Value> {
    let mut collector = LeafCollector {
        path,
        leaves: Vec::new(),
    };
    val.walk(ROOT_PATH, &mut collector);
    collector.leaves
}

/// Remove every index entry (and owned unique claim) of `doc`
pub fn delete_index(ctx: &Context, tx: &mut dyn KvWrite, model: &Model, doc: &Document) -> Result<()> {
    for entry in index_entries(&doc.val) {
        tx.del(index_entry_key(&doc.model, &entry.path, &entry.encoded, &doc.id))?;
        if model.is_unique(&entry.path) {
            let claim = unique_claim_key(&doc.model, &entry.path, &entry.encoded);
            if tx.get(ctx, &claim)?.as_deref() == Some(doc.id.as_bytes()) {
                tx.del(claim)?;
            }
        }
    }
    Ok(())
}

/// Write every index entry of `doc`, unique fields checked first
///
/// # Errors
///
/// Returns `Conflict` if a unique field's value is already held by another
/// document; nothing is written in that case.
pub fn create_index(ctx: &Context, tx: &mut dyn KvWrite, model: &Model, doc: &Document) -> Result<()> {
    let entries = index_entries(&doc.val);

    for entry in entries.iter().filter(|e| model.is_unique(&e.path)) {
        check_unique(ctx, &*tx, doc, entry)?;
    }

    for entry in entries {
        if model.is_unique(&entry.path) {
            tx.put(
                unique_claim_key(&doc.model, &entry.path, &entry.encoded),
                doc.id.as_bytes().to_vec(),
            )?;
        }
        tx.put(
            index_entry_key(&doc.model, &entry.path, &entry.encoded, &doc.id),
            INDEX_MARKER.to_vec(),
        )?;
    }
    Ok(())
}

fn check_unique(ctx: &Context, tx: &dyn KvWrite, doc: &Document, entry: &IndexEntry) -> Result<()> {
    let violation = |owner: &[u8]| {
        Error::conflict(format!(
            "unique index {} already contains this value (held by {})",
            entry.path,
            String::from_utf8_lossy(owner)
        ))
    };

    let claim = unique_claim_key(&doc.model, &entry.path, &entry.encoded);
    if let Some(owner) = tx.get(ctx, &claim)? {
        if owner != doc.id.as_bytes() && holds_value(ctx, tx, &doc.model, &owner, entry)? {
            return Err(violation(owner.as_slice()));
        }
    }

    let field_prefix = index_field_prefix(&doc.model, &entry.path);
    let prefix = index_value_prefix(&doc.model, &entry.path, &entry.encoded);
    let end = prefix_successor(&prefix);
    for item in tx.iter(ctx, &prefix, &end) {
        let (key, _) = item?;
        // Number encodings may contain SEP, so the range can hold other values.
        let Some((encoded, owner)) = split_index_entry(&key, &field_prefix) else {
            continue;
        };
        if encoded != entry.encoded.as_slice() || owner == doc.id.as_bytes() {
            continue;
        }
        if holds_value(ctx, tx, &doc.model, owner, entry)? {
            return Err(violation(owner));
        }
    }
    Ok(())
}

/// True if document `owner` has the entry's scalar, kind included
///
/// An entry without a readable owner document counts as held.
fn holds_value(ctx: &Context, tx: &dyn KvWrite, model: &str, owner: &[u8], entry: &IndexEntry) -> Result<bool> {
    let Ok(owner) = std::str::from_utf8(owner) else {
        return Ok(true);
    };
    let Some(raw) = tx.get(ctx, &document_key(model, owner))? else {
        return Ok(true);
    };
    let held = field_leaves(&decode_document(&raw)?.val, &entry.path)
        .iter()
        .any(|leaf| {
            ScalarKind::of(leaf) == Some(entry.kind)
                && encode_index_value(leaf).as_deref() == Some(entry.encoded.as_slice())
        });
    if !held {
        trace!(path = %entry.path, owner, "same bytes held by a value of another kind");
    }
    Ok(held)
}
