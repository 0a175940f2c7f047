//! Error types for docsession core.

use crate::types::{Etag, TransactionId};
use docsession_codec::CodecError;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors reported by a document store backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// No document exists under the key.
    #[error("document not found: {key}")]
    DocumentNotFound {
        /// The key that was requested.
        key: String,
    },

    /// A write carried an etag that does not match the stored document.
    #[error("concurrency violation on {key}: expected etag {expected:?}, found {actual:?}")]
    ConcurrencyViolation {
        /// The key being written.
        key: String,
        /// Etag sent with the command.
        expected: Option<Etag>,
        /// Etag currently stored, if the document exists.
        actual: Option<Etag>,
    },

    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the caller may retry the operation.
        transient: bool,
    },

    /// The backend answered with something that breaks its contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Stored bytes could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl BackendError {
    /// Creates a transient transport error.
    pub fn transport_transient(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            transient: true,
        }
    }

    /// Creates a permanent transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            transient: false,
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transport { transient: true, .. })
    }
}

/// Errors that can occur in session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Failure reported by the backend.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Entity conversion failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A different instance is already tracked under the key.
    #[error("attempted to associate a different object with key {key}")]
    NonUniqueObject {
        /// The contested key.
        key: String,
    },

    /// The entity type declares no identity property.
    #[error("entity type {type_tag} has no identity property")]
    MissingIdentityProperty {
        /// Type tag of the entity.
        type_tag: &'static str,
    },

    /// An entity serialized a field the session writes itself.
    #[error("entity type {type_tag} uses reserved field {field:?}")]
    ReservedField {
        /// Type tag of the entity.
        type_tag: &'static str,
        /// Name of the clashing field.
        field: String,
    },

    /// A fetched document carried no etag.
    #[error("document {key} was returned without an etag")]
    MissingEtag {
        /// Key of the document.
        key: String,
    },

    /// The etag in a document's metadata could not be parsed.
    #[error("document {key} has malformed etag {value:?}")]
    InvalidEtag {
        /// Key of the document.
        key: String,
        /// The raw metadata value.
        value: String,
    },

    /// The key is tracked as a different entity type.
    #[error("key {key} is tracked as {actual}, not {expected}")]
    TypeMismatch {
        /// Key being loaded.
        key: String,
        /// Type requested by the caller.
        expected: &'static str,
        /// Type actually tracked.
        actual: &'static str,
    },

    /// The session used up its request budget.
    #[error("session exceeded its limit of {limit} requests")]
    TooManyRequests {
        /// Configured limit.
        limit: u32,
    },

    /// The session is already enlisted in another transaction.
    #[error("session already enlisted in {current}, cannot join {requested}")]
    AlreadyEnlisted {
        /// Transaction the session is enlisted in.
        current: TransactionId,
        /// Transaction that was offered.
        requested: TransactionId,
    },
}

impl SessionError {
    /// Returns true if this is a concurrency conflict reported by the backend.
    pub fn is_concurrency_violation(&self) -> bool {
        matches!(
            self,
            SessionError::Backend(BackendError::ConcurrencyViolation { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(BackendError::transport_transient("connection reset").is_transient());
        assert!(!BackendError::transport_fatal("bad certificate").is_transient());
        assert!(!BackendError::DocumentNotFound { key: "a/1".into() }.is_transient());
    }

    #[test]
    fn error_display() {
        let err = SessionError::NonUniqueObject {
            key: "items/1".into(),
        };
        assert_eq!(
            err.to_string(),
            "attempted to associate a different object with key items/1"
        );

        let err = SessionError::TooManyRequests { limit: 30 };
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn concurrency_classifier() {
        let err = SessionError::from(BackendError::ConcurrencyViolation {
            key: "items/1".into(),
            expected: None,
            actual: None,
        });
        assert!(err.is_concurrency_violation());
        assert!(!SessionError::MissingEtag { key: "x".into() }.is_concurrency_violation());
    }
}
