//! Models and the model cache
//!
//! A model is a document of model `Model`. Its `val` may carry:
//!
//! ```json
//! {
//!   "schema":   {"title": "string", "isbn": "string?"},
//!   "index":    {"isbn": "unique", "title": "index"},
//!   "reactors": ["Immutable"]
//! }
//! ```
//!
//! Index paths are declared relative to `val` and stored with the `val.`
//! prefix, matching the paths the index engine produces. The built-in models
//! `Model` and `Reactor` are never stored; [`Model::builtin`] returns them.

use std::collections::BTreeMap;
use std::sync::Arc;

use apogy_core::{Document, Error, Result, Value, MODEL_MODEL, REACTOR_MODEL};
use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::meta::validate_model_id;
use crate::schema::Schema;

static BUILTIN_MODEL: Lazy<Arc<Model>> = Lazy::new(|| Arc::new(Model::bare(MODEL_MODEL)));
static BUILTIN_REACTOR: Lazy<Arc<Model>> = Lazy::new(|| Arc::new(Model::bare(REACTOR_MODEL)));

/// Kind of a declared index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// At most one document may hold a given value
    Unique,
    /// Plain secondary index
    Index,
}

impl IndexKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "unique" => Some(IndexKind::Unique),
            "index" => Some(IndexKind::Index),
            _ => None,
        }
    }
}

/// A compiled model
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    /// Model id, e.g. `com.example.Book`
    pub id: String,
    /// Field schema, if declared
    pub schema: Option<Schema>,
    /// Declared indexes keyed by full path (`val.isbn`)
    pub index: BTreeMap<String, IndexKind>,
    /// Reactors invoked on writes, in order
    pub reactors: Vec<String>,
}

impl Model {
    fn bare(id: &str) -> Self {
        Model {
            id: id.to_string(),
            schema: None,
            index: BTreeMap::new(),
            reactors: Vec::new(),
        }
    }

    /// The built-in model with this id, if any
    pub fn builtin(id: &str) -> Option<Arc<Model>> {
        match id {
            MODEL_MODEL => Some(Arc::clone(&BUILTIN_MODEL)),
            REACTOR_MODEL => Some(Arc::clone(&BUILTIN_REACTOR)),
            _ => None,
        }
    }

    /// True for `Model` and `Reactor`
    pub fn is_builtin_id(id: &str) -> bool {
        id == MODEL_MODEL || id == REACTOR_MODEL
    }

    /// Compile a model document
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the id is not domain-style, the schema does
    /// not compile, an index kind is unknown or the reactor list is malformed.
    /// Whether the listed reactors exist is checked by the caller.
    pub fn from_document(doc: &Document) -> Result<Self> {
        validate_model_id(&doc.id)?;
        let mut model = Model::bare(&doc.id);

        let val = match &doc.val {
            Value::Null => return Ok(model),
            Value::Object(map) => map,
            other => {
                return Err(Error::validation(format!(
                    "validation error: /val: expected object, got {}",
                    other.type_name()
                )))
            }
        };

        if let Some(spec) = val.get("schema").filter(|v| !v.is_null()) {
            model.schema = Some(Schema::compile(spec)?);
        }

        match val.get("index") {
            None | Some(Value::Null) => {}
            Some(Value::Object(index)) => {
                for (path, kind) in index {
                    let kind = kind.as_str().and_then(IndexKind::parse).ok_or_else(|| {
                        Error::validation(format!(
                            "validation error: /val/index/{}: expected \"unique\" or \"index\"",
                            path
                        ))
                    })?;
                    model.index.insert(format!("val.{}", path), kind);
                }
            }
            Some(other) => {
                return Err(Error::validation(format!(
                    "validation error: /val/index: expected object, got {}",
                    other.type_name()
                )))
            }
        }

        match val.get("reactors") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let id = item.as_str().ok_or_else(|| {
                        Error::validation(format!(
                            "validation error: /val/reactors/{}: expected string, got {}",
                            i,
                            item.type_name()
                        ))
                    })?;
                    model.reactors.push(id.to_string());
                }
            }
            Some(other) => {
                return Err(Error::validation(format!(
                    "validation error: /val/reactors: expected array, got {}",
                    other.type_name()
                )))
            }
        }

        Ok(model)
    }

    /// Paths declared `unique`
    pub fn unique_paths(&self) -> impl Iterator<Item = &str> {
        self.index
            .iter()
            .filter(|(_, kind)| **kind == IndexKind::Unique)
            .map(|(path, _)| path.as_str())
    }

    /// True if `path` is declared `unique`
    pub fn is_unique(&self, path: &str) -> bool {
        self.index.get(path) == Some(&IndexKind::Unique)
    }
}

/// Compiled models keyed by model id
///
/// Entries are filled on first use and invalidated after every committed
/// write or delete of the corresponding model document. Each invalidation
/// bumps the model's generation; a fill that read its definition under an
/// older generation is returned to the caller but not cached.
#[derive(Debug, Default)]
pub struct ModelCache {
    entries: DashMap<String, Arc<Model>>,
    generations: DashMap<String, u64>,
}

impl ModelCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached model
    pub fn get(&self, id: &str) -> Option<Arc<Model>> {
        self.entries.get(id).map(|m| Arc::clone(m.value()))
    }

    /// Current generation of a model id
    ///
    /// Read it before reading the model document and pass it to
    /// [`ModelCache::insert`].
    pub fn generation(&self, id: &str) -> u64 {
        self.generations.get(id).map_or(0, |g| *g.value())
    }

    /// Cache a model loaded under `generation`
    ///
    /// Keeps an entry that raced in first. If the model was invalidated since
    /// `generation` was read, nothing is cached and `model` is returned as is.
    pub fn insert(&self, model: Arc<Model>, generation: u64) -> Arc<Model> {
        // Lock order: generations, then entries (same as invalidate).
        let current = self.generations.entry(model.id.clone()).or_insert(0);
        if *current != generation {
            return model;
        }
        let entry = self
            .entries
            .entry(model.id.clone())
            .or_insert_with(|| model);
        let cached = Arc::clone(entry.value());
        drop(entry);
        drop(current);
        cached
    }

    /// Drop a model's entry
    pub fn invalidate(&self, id: &str) {
        let mut generation = self.generations.entry(id.to_string()).or_insert(0);
        *generation += 1;
        self.entries.remove(id);
    }

    /// Number of cached models
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries
    pub fn clear(&self) {
        for mut generation in self.generations.iter_mut() {
            *generation += 1;
        }
        self.entries.clear();
    }
}
