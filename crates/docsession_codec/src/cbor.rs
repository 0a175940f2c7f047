//! CBOR encoding of documents.
//!
//! Documents keep their fields sorted, so equal documents always encode to
//! identical bytes.

use crate::error::{CodecError, CodecResult};
use crate::value::Document;

/// Encodes a document to CBOR bytes.
pub fn to_cbor(document: &Document) -> CodecResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(document, &mut bytes)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a document from CBOR bytes.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Document> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::invalid_cbor(e.to_string()))
}
