//! Reactors: pluggable validation and reconciliation
//!
//! A reactor is bound to models through the model's `val.reactors` list.
//! On every write to a document of such a model:
//!
//! 1. `validate(old, new)` runs inside the write, before commit. It may
//!    return a transformed document or reject the change.
//! 2. `reconcile(old, new)` runs after commit, off the request path. Its
//!    failures are logged and retried, never rolled back.
//!
//! Reactors are themselves documents of model `Reactor`. `val.runtime` names
//! a [`ReactorRuntime`] registered on the [`ReactorRegistry`]; the runtime
//! turns the document into a running [`Reactor`].

mod builtin;
mod registry;

pub use builtin::{Immutable, IMMUTABLE_ID};
pub use registry::ReactorRegistry;

use std::sync::Arc;

use apogy_core::{Context, Document, Result};

/// A running reactor instance
pub trait Reactor: Send + Sync {
    /// Check (and possibly transform) a change before it commits
    ///
    /// `old` is `None` for creations, `new` is `None` for deletions. The
    /// returned document replaces `new`.
    ///
    /// # Errors
    ///
    /// Any error rejects the change.
    fn validate(
        &self,
        ctx: &Context,
        old: Option<&Document>,
        new: Option<Document>,
    ) -> Result<Option<Document>>;

    /// Act on a committed change
    fn reconcile(&self, _ctx: &Context, _old: Option<&Document>, _new: Option<&Document>) -> Result<()> {
        Ok(())
    }

    /// Release resources; called on replacement or removal
    fn stop(&self) {}
}

/// Factory for one runtime kind (`val.runtime` of a reactor document)
pub trait ReactorRuntime: Send + Sync {
    /// Runtime kind name
    fn kind(&self) -> &str;

    /// Start a reactor from its document
    ///
    /// # Errors
    ///
    /// Configuration errors reject the reactor document's write.
    fn start(&self, reactor: &Document) -> Result<Arc<dyn Reactor>>;
}
