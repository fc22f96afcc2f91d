//! Document metadata validation
//!
//! `model` and `id` become key segments, so both are restricted to
//! `[A-Za-z0-9.-]` and at most 64 bytes. Neither can then contain the key
//! separator.

use apogy_core::limits::{is_meta_char, MAX_META_BYTES, MIN_MODEL_ID_PARTS};
use apogy_core::{Document, Error, Result};

fn check_segment(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(format!(
            "validation error: /{} must not be empty",
            field
        )));
    }
    if value.len() > MAX_META_BYTES {
        return Err(Error::validation(format!(
            "validation error: /{} must be at most {} bytes",
            field, MAX_META_BYTES
        )));
    }
    if let Some(bad) = value.chars().find(|c| !is_meta_char(*c)) {
        return Err(Error::validation(format!(
            "validation error: /{} has invalid character: {}",
            field,
            bad.escape_debug()
        )));
    }
    Ok(())
}

/// Validate `model` and `id` of a document
pub fn validate_meta(doc: &Document) -> Result<()> {
    validate_path(&doc.model, &doc.id)
}

/// Validate a `(model, id)` pair addressed by a read or delete
pub fn validate_path(model: &str, id: &str) -> Result<()> {
    check_segment("model", model)?;
    check_segment("id", id)
}

/// Model ids are domain-style: `com.example.Book`
pub fn validate_model_id(id: &str) -> Result<()> {
    let parts: Vec<&str> = id.split('.').collect();
    if parts.len() < MIN_MODEL_ID_PARTS || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::validation(
            "validation error: /id must be a domain, like com.example.Book",
        ));
    }
    Ok(())
}
