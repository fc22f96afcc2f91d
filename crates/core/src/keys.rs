//! Binary key layout
//!
//! Every record the core writes lives in one ordered byte keyspace. Segments
//! are joined with [`SEP`] (`0xFF`), a byte that never occurs in UTF-8, so
//! no model name, id, field path or indexed string can forge a boundary.
//!
//! | Record | Layout | Value |
//! |--------|--------|-------|
//! | document | `o SEP model SEP id SEP` | tagged encoded document |
//! | index entry | `f SEP model SEP path SEP encoded SEP id` | `[0]` |
//! | unique claim | `u SEP model SEP path SEP encoded` | owner id |
//!
//! Encoded index values: strings are their raw bytes, numbers are the 8
//! little-endian bytes of the f64 bit pattern.

use byteorder::{ByteOrder, LittleEndian};

use crate::limits::MAX_INDEXED_STRING_BYTES;
use crate::value::Value;

/// Segment separator
pub const SEP: u8 = 0xFF;

/// Tag byte of document records
pub const DOCUMENT_TAG: u8 = b'o';

/// Tag byte of index entries
pub const INDEX_TAG: u8 = b'f';

/// Tag byte of unique claims
pub const UNIQUE_TAG: u8 = b'u';

/// Value stored under every index entry
pub const INDEX_MARKER: &[u8] = &[0];

/// True if the bytes contain the separator
pub fn contains_separator(bytes: &[u8]) -> bool {
    bytes.contains(&SEP)
}

/// Storage key of a document: `o SEP model SEP id SEP`
pub fn document_key(model: &str, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(model.len() + id.len() + 4);
    key.push(DOCUMENT_TAG);
    key.push(SEP);
    key.extend_from_slice(model.as_bytes());
    key.push(SEP);
    key.extend_from_slice(id.as_bytes());
    key.push(SEP);
    key
}

/// Prefix shared by all documents of a model: `o SEP model SEP`
pub fn document_prefix(model: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(model.len() + 3);
    key.push(DOCUMENT_TAG);
    key.push(SEP);
    key.extend_from_slice(model.as_bytes());
    key.push(SEP);
    key
}

/// Prefix of every index entry of one field: `f SEP model SEP path SEP`
pub fn index_field_prefix(model: &str, path: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(model.len() + path.len() + 4);
    key.push(INDEX_TAG);
    key.push(SEP);
    key.extend_from_slice(model.as_bytes());
    key.push(SEP);
    key.extend_from_slice(path.as_bytes());
    key.push(SEP);
    key
}

/// Prefix of the entries of one (field, value) pair: `f SEP model SEP path SEP encoded SEP`
pub fn index_value_prefix(model: &str, path: &str, encoded: &[u8]) -> Vec<u8> {
    let mut key = index_field_prefix(model, path);
    key.extend_from_slice(encoded);
    key.push(SEP);
    key
}

/// Full index entry key
pub fn index_entry_key(model: &str, path: &str, encoded: &[u8], id: &str) -> Vec<u8> {
    let mut key = index_value_prefix(model, path, encoded);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Unique claim key: `u SEP model SEP path SEP encoded`
pub fn unique_claim_key(model: &str, path: &str, encoded: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(model.len() + path.len() + encoded.len() + 4);
    key.push(UNIQUE_TAG);
    key.push(SEP);
    key.extend_from_slice(model.as_bytes());
    key.push(SEP);
    key.extend_from_slice(path.as_bytes());
    key.push(SEP);
    key.extend_from_slice(encoded);
    key
}

/// Encode a scalar for use as an index key segment
///
/// Returns `None` for values that are not indexed: containers, null, bools,
/// strings of 128 bytes or more and strings containing the separator.
pub fn encode_index_value(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => {
            let bytes = s.as_bytes();
            if bytes.len() < MAX_INDEXED_STRING_BYTES && !contains_separator(bytes) {
                Some(bytes.to_vec())
            } else {
                None
            }
        }
        Value::Int(_) | Value::Float(_) => value.as_f64().map(|f| encode_f64(f).to_vec()),
        _ => None,
    }
}

/// 8 little-endian bytes of the f64 bit pattern
pub fn encode_f64(f: f64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, f.to_bits());
    buf
}

/// Inverse of [`encode_f64`]; `None` unless the segment is exactly 8 bytes
pub fn decode_f64(segment: &[u8]) -> Option<f64> {
    if segment.len() != 8 {
        return None;
    }
    Some(f64::from_bits(LittleEndian::read_u64(segment)))
}

/// Split an index entry key below `field_prefix` into `(encoded, id)`
///
/// The id is everything after the last separator; ids never contain one.
/// Returns `None` for keys that do not belong to the field.
pub fn split_index_entry<'k>(key: &'k [u8], field_prefix: &[u8]) -> Option<(&'k [u8], &'k [u8])> {
    let rest = key.strip_prefix(field_prefix)?;
    let last = rest.iter().rposition(|&b| b == SEP)?;
    Some((&rest[..last], &rest[last + 1..]))
}

/// Smallest key strictly greater than every key starting with `prefix`
///
/// Trailing `0xFF` bytes are dropped and the last remaining byte is
/// incremented. A prefix made only of `0xFF` has no successor; the result is
/// then empty, which range scans treat as unbounded.
pub fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last == u8::MAX {
            end.pop();
        } else {
            let idx = end.len() - 1;
            end[idx] = last + 1;
            return end;
        }
    }
    end
}

/// Smallest key strictly greater than `key`
pub fn key_successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}
