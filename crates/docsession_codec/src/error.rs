//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting entities and documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to turn an entity into a document.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to turn a document back into an entity.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The entity serialized to something other than an object.
    #[error("entity of type {type_name} did not serialize to an object")]
    NotAnObject {
        /// Name of the offending type.
        type_name: String,
    },

    /// CBOR bytes could not be read back.
    #[error("invalid CBOR payload: {message}")]
    InvalidCbor {
        /// Description of the structural error.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid CBOR error.
    pub fn invalid_cbor(message: impl Into<String>) -> Self {
        Self::InvalidCbor {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CodecError::NotAnObject {
            type_name: "Tag".into(),
        };
        assert_eq!(
            err.to_string(),
            "entity of type Tag did not serialize to an object"
        );
        assert!(CodecError::decoding_failed("missing field `name`")
            .to_string()
            .contains("name"));
    }
}
