//! Document store: schema-governed CRUD over a transactional KV backend
//!
//! ## Writes
//!
//! A write is one KV transaction that reads the stored record, computes the
//! new one, swaps the index entries and commits. Two concurrency modes:
//!
//! - **Explicit** (`version` given): the transaction holds a write intent on
//!   the document key. A stored version other than the expected one is a
//!   `Conflict` and is never retried.
//! - **Implicit** (no `version`): the whole read-compute-write cycle is
//!   retried with backoff when the backend reports a commit-time write
//!   conflict, so field mutations (`mut`) never lose an update.
//!
//! A write whose resulting `val` equals the stored one is a no-op: the stored
//! document is returned with its version unchanged.
//!
//! ## Built-in models
//!
//! Documents of model `Model` declare schemas, indexes and reactors of other
//! models. Documents of model `Reactor` configure reactor instances. Both are
//! validated on write and applied to the in-process caches after commit.
//!
//! ## Reconciliation
//!
//! After a committed change to a document whose model lists reactors, a
//! reconcile task is queued on the [`ReconcileScheduler`]. Its failures are
//! logged and never affect the write.

mod builder;
mod reconcile;

pub use builder::DocumentStoreBuilder;

use std::sync::Arc;

use apogy_core::keys::{document_key, document_prefix, prefix_successor};
use apogy_core::{
    Context, Document, Error, History, KvRead, KvStore, KvWrite, Result, SearchRequest,
    SearchResponse, Value, MODEL_MODEL, REACTOR_MODEL,
};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::background::{ReconcileScheduler, TaskPriority};
use crate::bus::Bus;
use crate::codec::{decode_document, encode_document};
use crate::config::EngineConfig;
use crate::index::{create_index, delete_index};
use crate::meta::{validate_meta, validate_path};
use crate::model::{Model, ModelCache};
use crate::mutation::apply_mutations;
use crate::reactor::{Reactor, ReactorRegistry};
use crate::retry::backoff;
use crate::search;

use reconcile::ReconcileTask;

fn version_out_of_date() -> Error {
    Error::conflict("version is out of date")
}

fn preempted() -> Error {
    Error::conflict("preempted by a different parallel write")
}

/// Result of one write attempt
enum Outcome {
    /// Nothing to write; the stored document
    Unchanged(Document),
    /// Committed change
    Written {
        old: Option<Document>,
        new: Document,
    },
}

/// Schema-governed document store
///
/// Owns the model cache, reactor registry, reconcile scheduler and optional
/// bus; nothing is process-global, so several stores can live side by side.
pub struct DocumentStore {
    config: EngineConfig,
    kv: Arc<dyn KvStore>,
    models: Arc<ModelCache>,
    reactors: Arc<ReactorRegistry>,
    scheduler: Arc<ReconcileScheduler>,
    bus: Option<Arc<dyn Bus>>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("backend", &self.kv.name())
            .field("cached_models", &self.models.len())
            .field("reactors", &self.reactors)
            .field("scheduler", &self.scheduler)
            .field("bus", &self.bus.is_some())
            .finish()
    }
}

impl DocumentStore {
    /// Start building a store
    pub fn builder() -> DocumentStoreBuilder {
        DocumentStoreBuilder::new()
    }

    /// Open a store with every collaborator created from `config`
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the configuration is invalid.
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// KV backend
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Model cache
    pub fn models(&self) -> &Arc<ModelCache> {
        &self.models
    }

    /// Reactor registry
    pub fn reactors(&self) -> &Arc<ReactorRegistry> {
        &self.reactors
    }

    /// Reconcile scheduler
    pub fn scheduler(&self) -> &Arc<ReconcileScheduler> {
        &self.scheduler
    }

    /// Check that the backend is usable
    ///
    /// # Errors
    ///
    /// Fails if the context is done or the backend is unavailable.
    pub fn ping(&self, ctx: &Context) -> Result<()> {
        self.kv.ping(ctx)
    }

    /// Wait for every queued reconcile task
    pub fn drain(&self) {
        self.scheduler.drain();
    }

    /// Finish queued reconcile work and stop all reactors
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.reactors.stop_all();
        info!("document store shut down");
    }

    // ========================================================================
    // Models
    // ========================================================================

    /// Compiled model of `name`
    ///
    /// # Errors
    ///
    /// Returns `Validation` if no such model is registered or its stored
    /// definition no longer compiles.
    pub fn model(&self, ctx: &Context, name: &str) -> Result<Arc<Model>> {
        if let Some(builtin) = Model::builtin(name) {
            return Ok(builtin);
        }
        if let Some(cached) = self.models.get(name) {
            return Ok(cached);
        }

        // Generation first: an invalidation after this point voids the fill.
        let generation = self.models.generation(name);
        let read = self.kv.read();
        let raw = read
            .get(ctx, &document_key(MODEL_MODEL, name))?
            .ok_or_else(|| {
                Error::validation(format!("validation error: model {} does not exist", name))
            })?;
        let model = Model::from_document(&decode_document(&raw)?)?;
        debug!(model = %name, generation, "model loaded");
        Ok(self.models.insert(Arc::new(model), generation))
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Read one document
    ///
    /// `Reactor` documents carry `status.reactor.running`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed identifiers and `NotFound` if the
    /// document does not exist.
    pub fn get(&self, ctx: &Context, model: &str, id: &str) -> Result<Document> {
        ctx.check()?;
        validate_path(model, id)?;
        let read = self.kv.read();
        let raw = read
            .get(ctx, &document_key(model, id))?
            .ok_or_else(|| Error::not_found("document not found"))?;
        let mut doc = decode_document(&raw)?;
        if model == REACTOR_MODEL {
            doc.status = Some(self.reactors.status(id));
        }
        Ok(doc)
    }

    /// Run a search request
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed requests; storage errors propagate.
    pub fn search(&self, ctx: &Context, req: &SearchRequest) -> Result<SearchResponse> {
        ctx.check()?;
        let read = self.kv.read();
        search::search(ctx, read.as_ref(), req, &self.config.search)
    }

    /// Parse an AQL query and run its top-level search
    ///
    /// `?` placeholders bind to `params` in order. Nested (linked) queries
    /// are compiled into the request but not executed.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for parse errors and malformed searches.
    pub fn query(&self, ctx: &Context, aql: &str, params: &[Value]) -> Result<SearchResponse> {
        let query = apogy_aql::parse(aql, params)?;
        let request = query.to_search_request();
        if !request.links.is_empty() {
            debug!(links = request.links.len(), "linked queries are not executed");
        }
        self.search(ctx, &request)
    }

    // ========================================================================
    // Write
    // ========================================================================

    /// Create or update a document
    ///
    /// Returns the stored document: the new record, or the existing one if
    /// the write would not change `val`.
    ///
    /// # Errors
    ///
    /// - `Validation`: malformed identifiers, schema or mutation errors,
    ///   invalid `Model`/`Reactor` definitions, reactor rejections
    /// - `Conflict`: version mismatch, unique index violation, or a lost
    ///   race with a parallel write
    pub fn put(&self, ctx: &Context, doc: Document) -> Result<Document> {
        ctx.check()?;
        validate_meta(&doc)?;

        let mut prepared: Option<Arc<dyn Reactor>> = None;
        match doc.model.as_str() {
            MODEL_MODEL => {
                let declared = Model::from_document(&doc)?;
                self.reactors.ensure_running(&declared.reactors)?;
            }
            REACTOR_MODEL => prepared = Some(self.reactors.prepare(&doc)?),
            _ => {}
        }

        let model = self.model(ctx, &doc.model)?;
        if doc.mutations.is_none() {
            if let Some(schema) = &model.schema {
                schema.validate(&doc.val)?;
            }
        }

        let outcome = match doc.version {
            Some(expected) => self.put_explicit(ctx, &model, &doc, expected),
            None => self.put_implicit(ctx, &model, &doc),
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(reactor) = prepared {
                    reactor.stop();
                }
                return Err(e);
            }
        };

        match outcome {
            Outcome::Unchanged(stored) => {
                if let Some(reactor) = prepared {
                    if self.reactors.is_running(&stored.id) {
                        reactor.stop();
                    } else {
                        self.reactors.install(&stored.id, reactor);
                    }
                }
                debug!(path = %stored.path(), "put unchanged");
                Ok(stored)
            }
            Outcome::Written { old, new } => {
                match new.model.as_str() {
                    MODEL_MODEL => self.models.invalidate(&new.id),
                    REACTOR_MODEL => {
                        if let Some(reactor) = prepared {
                            self.reactors.install(&new.id, reactor);
                        }
                    }
                    _ => {}
                }
                debug!(path = %new.path(), version = new.current_version(), "put");
                self.schedule_reconcile(&model, old, Some(new.clone()));
                Ok(new)
            }
        }
    }

    fn put_explicit(&self, ctx: &Context, model: &Model, doc: &Document, expected: u64) -> Result<Outcome> {
        let key = document_key(&doc.model, &doc.id);
        let mut tx = self.kv.exclusive_write(ctx, &[key])?;
        let outcome = self.put_attempt(ctx, tx.as_mut(), model, doc, Some(expected));
        self.finish(ctx, tx.as_mut(), outcome).map_err(|e| {
            if e.is_retryable() {
                preempted()
            } else {
                e
            }
        })
    }

    fn put_implicit(&self, ctx: &Context, model: &Model, doc: &Document) -> Result<Outcome> {
        let policy = &self.config.retry;
        let mut attempt = 0;
        loop {
            let mut tx = self.kv.write(ctx)?;
            let outcome = self.put_attempt(ctx, tx.as_mut(), model, doc, None);
            match self.finish(ctx, tx.as_mut(), outcome) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                    warn!(path = %doc.path(), attempt, error = %e, "write conflict, retrying");
                    drop(tx);
                    backoff(ctx, policy.calculate_delay(attempt))?;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    warn!(path = %doc.path(), attempts = attempt + 1, "write conflict, giving up");
                    return Err(preempted());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Commit a written outcome, roll back anything else
    fn finish(&self, ctx: &Context, tx: &mut dyn KvWrite, outcome: Result<Outcome>) -> Result<Outcome> {
        match outcome {
            Ok(written @ Outcome::Written { .. }) => {
                tx.commit(ctx)?;
                Ok(written)
            }
            other => {
                tx.rollback();
                other
            }
        }
    }

    fn put_attempt(
        &self,
        ctx: &Context,
        tx: &mut dyn KvWrite,
        model: &Model,
        doc: &Document,
        expected: Option<u64>,
    ) -> Result<Outcome> {
        let key = document_key(&doc.model, &doc.id);
        let old = match tx.get(ctx, &key)? {
            Some(raw) => Some(decode_document(&raw)?),
            None => None,
        };

        if let Some(expected) = expected {
            match &old {
                Some(stored) if stored.current_version() != expected => {
                    return Err(version_out_of_date())
                }
                None if expected != 0 => return Err(version_out_of_date()),
                _ => {}
            }
        }

        let val = match &doc.mutations {
            Some(mutations) => {
                let base = old.as_ref().map(|o| &o.val).unwrap_or(&Value::Null);
                let val = apply_mutations(base, mutations)?;
                if let Some(schema) = &model.schema {
                    schema.validate(&val)?;
                }
                val
            }
            None => doc.val.clone(),
        };

        if let Some(stored) = &old {
            if stored.val == val {
                return Ok(Outcome::Unchanged(stored.clone()));
            }
            delete_index(ctx, tx, model, stored)?;
        }

        let now = Utc::now();
        let candidate = Document {
            id: doc.id.clone(),
            model: doc.model.clone(),
            version: Some(old.as_ref().map_or(0, Document::current_version) + 1),
            history: Some(History {
                created: old
                    .as_ref()
                    .and_then(|o| o.history)
                    .map_or(now, |h| h.created),
                updated: now,
            }),
            val,
            status: None,
            mutations: None,
        };

        let validated = self
            .reactors
            .validate(ctx, &model.reactors, old.as_ref(), Some(candidate.clone()))?;
        // Reactors may rewrite the body, never the identity or bookkeeping.
        let new = match validated {
            Some(out) => Document {
                val: out.val,
                ..candidate
            },
            None => candidate,
        };

        tx.put(key, encode_document(&new, self.config.encoding)?)?;
        create_index(ctx, tx, model, &new)?;
        Ok(Outcome::Written { old, new })
    }

    /// Delete a document, returning the deleted record
    ///
    /// # Errors
    ///
    /// - `NotFound` if the document does not exist
    /// - `Conflict("model is in use")` for a `Model` that still has documents
    /// - `Validation` if a reactor rejects the deletion
    pub fn delete(&self, ctx: &Context, model: &str, id: &str) -> Result<Document> {
        ctx.check()?;
        validate_path(model, id)?;
        let target = self.model(ctx, model)?;

        let policy = &self.config.retry;
        let mut attempt = 0;
        let old = loop {
            let mut tx = self.kv.write(ctx)?;
            let result = self
                .delete_attempt(ctx, tx.as_mut(), &target, model, id)
                .and_then(|old| tx.commit(ctx).map(|()| old));
            match result {
                Ok(old) => break old,
                Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                    warn!(model, id, attempt, error = %e, "delete conflict, retrying");
                    tx.rollback();
                    drop(tx);
                    backoff(ctx, policy.calculate_delay(attempt))?;
                    attempt += 1;
                }
                Err(e) => {
                    tx.rollback();
                    return Err(if e.is_retryable() { preempted() } else { e });
                }
            }
        };

        match model {
            MODEL_MODEL => self.models.invalidate(id),
            REACTOR_MODEL => {
                self.reactors.remove(id);
            }
            _ => {}
        }
        debug!(model, id, "deleted");
        self.schedule_reconcile(&target, Some(old.clone()), None);
        Ok(old)
    }

    fn delete_attempt(
        &self,
        ctx: &Context,
        tx: &mut dyn KvWrite,
        target: &Model,
        model: &str,
        id: &str,
    ) -> Result<Document> {
        let key = document_key(model, id);
        let old = match tx.get(ctx, &key)? {
            Some(raw) => decode_document(&raw)?,
            None => return Err(Error::not_found("document not found")),
        };

        if model == MODEL_MODEL {
            let prefix = document_prefix(id);
            let end = prefix_successor(&prefix);
            if let Some(first) = tx.iter(ctx, &prefix, &end).next() {
                first?;
                return Err(Error::conflict("model is in use"));
            }
        }

        self.reactors
            .validate(ctx, &target.reactors, Some(&old), None)?;
        delete_index(ctx, tx, target, &old)?;
        tx.del(key)?;
        Ok(old)
    }

    fn schedule_reconcile(&self, model: &Arc<Model>, old: Option<Document>, new: Option<Document>) {
        if model.reactors.is_empty() {
            return;
        }
        let task = ReconcileTask {
            reactors: Arc::clone(&self.reactors),
            bus: self.bus.clone(),
            model: Arc::clone(model),
            old,
            new,
            config: self.config.reconcile.clone(),
        };
        self.scheduler
            .schedule(TaskPriority::for_model(&model.id), move || task.run());
    }
}
