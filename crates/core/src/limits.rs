//! Size limits for document metadata and index keys
//!
//! These limits are enforced by the CRUD engine and the index engine.
//! They are part of the storage format: changing them changes which keys
//! existing documents produce.

/// Maximum length of a model name or document id, in bytes
pub const MAX_META_BYTES: usize = 64;

/// Strings of this many bytes or more are not indexed
pub const MAX_INDEXED_STRING_BYTES: usize = 128;

/// Minimum number of dot-separated parts in a model id (`com.example.Book`)
pub const MIN_MODEL_ID_PARTS: usize = 3;

/// Characters allowed in model names and document ids
pub fn is_meta_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '-'
}
