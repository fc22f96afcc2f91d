//! Stored document encoding
//!
//! A stored record is one tag byte followed by the payload:
//!
//! | Tag | Payload |
//! |-----|---------|
//! | `j` | JSON (serde_json) |
//! | `m` | MessagePack with named fields (rmp-serde) |
//!
//! Writers use the configured [`Encoding`]; readers accept both, so the
//! setting can change without rewriting existing records.

use apogy_core::{Document, Error, Result};

use crate::config::Encoding;

const JSON_TAG: u8 = b'j';
const MSGPACK_TAG: u8 = b'm';

/// Encode a document for storage
pub fn encode_document(doc: &Document, encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Json => {
            let mut out = vec![JSON_TAG];
            serde_json::to_writer(&mut out, doc)?;
            Ok(out)
        }
        Encoding::Msgpack => {
            let payload = rmp_serde::to_vec_named(doc)
                .map_err(|e| Error::Serialization(format!("msgpack encode: {}", e)))?;
            let mut out = Vec::with_capacity(payload.len() + 1);
            out.push(MSGPACK_TAG);
            out.extend_from_slice(&payload);
            Ok(out)
        }
    }
}

/// Decode a stored document in either encoding
pub fn decode_document(bytes: &[u8]) -> Result<Document> {
    match bytes.split_first() {
        Some((&JSON_TAG, payload)) => Ok(serde_json::from_slice(payload)?),
        Some((&MSGPACK_TAG, payload)) => rmp_serde::from_slice(payload)
            .map_err(|e| Error::Serialization(format!("msgpack decode: {}", e))),
        Some((tag, _)) => Err(Error::Serialization(format!(
            "unknown document encoding tag 0x{:02x}",
            tag
        ))),
        None => Err(Error::Serialization("empty document record".to_string())),
    }
}
