//! Built-in reactors

use apogy_core::{Context, Document, Error, Result};

use super::Reactor;

/// Id of the [`Immutable`] reactor
pub const IMMUTABLE_ID: &str = "Immutable";

/// Rejects any update of an existing document; creation and deletion pass
#[derive(Debug, Default, Clone, Copy)]
pub struct Immutable;

impl Reactor for Immutable {
    fn validate(
        &self,
        _ctx: &Context,
        old: Option<&Document>,
        new: Option<Document>,
    ) -> Result<Option<Document>> {
        if old.is_some() && new.is_some() {
            return Err(Error::validation("Document is immutable"));
        }
        Ok(new)
    }
}
