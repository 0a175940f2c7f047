//! Document store backend abstraction.

mod memory;

pub use memory::{BackendOperation, BackendStats, InMemoryBackend};

use crate::error::BackendResult;
use crate::types::{Etag, TransactionId};
use docsession_codec::Document;

/// A document as returned by a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDocument {
    /// Key the document is stored under.
    pub key: String,
    /// Document body.
    pub data: Document,
    /// Auxiliary metadata stored with the document.
    pub metadata: Document,
    /// Current etag, if the backend reports one.
    pub etag: Option<Etag>,
}

/// Which kind of command produced a batch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMethod {
    /// Insert or replace a document.
    Put,
    /// Remove a document.
    Delete,
}

/// A single write in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchCommand {
    /// Insert or replace a document.
    Put {
        /// Target key.
        key: String,
        /// Expected current etag; `None` writes unconditionally.
        etag: Option<Etag>,
        /// Document body.
        document: Document,
        /// Metadata stored alongside the body.
        metadata: Document,
    },
    /// Remove a document.
    Delete {
        /// Target key.
        key: String,
        /// Expected current etag; `None` deletes unconditionally.
        etag: Option<Etag>,
    },
}

impl BatchCommand {
    /// Returns the target key.
    pub fn key(&self) -> &str {
        match self {
            BatchCommand::Put { key, .. } | BatchCommand::Delete { key, .. } => key,
        }
    }

    /// Returns the expected etag.
    pub fn etag(&self) -> Option<Etag> {
        match self {
            BatchCommand::Put { etag, .. } | BatchCommand::Delete { etag, .. } => *etag,
        }
    }

    /// Returns the command kind.
    pub fn method(&self) -> CommandMethod {
        match self {
            BatchCommand::Put { .. } => CommandMethod::Put,
            BatchCommand::Delete { .. } => CommandMethod::Delete,
        }
    }
}

/// Outcome of one command in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    /// Kind of command this result answers.
    pub method: CommandMethod,
    /// Key the document ended up under.
    pub key: String,
    /// New etag for puts; `None` for deletes.
    pub etag: Option<Etag>,
}

/// A remote document store.
///
/// Backends own transport, retries and wire encoding; the session only
/// sees these calls.
///
/// # Invariants
///
/// - `get_many` returns exactly one entry per requested key, in order
/// - `batch` is atomic and returns exactly one result per command, in order
/// - a batch sent with a transaction id is not visible until `commit`
pub trait DocumentBackend: Send + Sync {
    /// Fetches one document.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::DocumentNotFound`](crate::BackendError::DocumentNotFound)
    /// when no document exists under `key`, or any transport failure.
    fn get(&self, key: &str) -> BackendResult<FetchedDocument>;

    /// Fetches several documents in one round-trip.
    fn get_many(&self, keys: &[String]) -> BackendResult<Vec<Option<FetchedDocument>>>;

    /// Executes a batch of writes atomically.
    fn batch(
        &self,
        commands: &[BatchCommand],
        transaction: Option<TransactionId>,
    ) -> BackendResult<Vec<BatchResult>>;

    /// Produces a key for a new document.
    ///
    /// `prefix` is the collection prefix the entity asked for (such as
    /// `"orders/"`), if any.
    fn generate_key(&self, type_tag: &str, prefix: Option<&str>) -> BackendResult<String>;

    /// Makes a transaction's writes visible.
    fn commit(&self, transaction: TransactionId) -> BackendResult<()>;

    /// Discards a transaction's writes.
    fn rollback(&self, transaction: TransactionId) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_accessors() {
        let etag = Etag::from_u128(7);
        let put = BatchCommand::Put {
            key: "items/1".into(),
            etag: Some(etag),
            document: Document::new(),
            metadata: Document::new(),
        };
        let delete = BatchCommand::Delete {
            key: "items/2".into(),
            etag: None,
        };

        assert_eq!(put.key(), "items/1");
        assert_eq!(put.etag(), Some(etag));
        assert_eq!(put.method(), CommandMethod::Put);
        assert_eq!(delete.key(), "items/2");
        assert_eq!(delete.etag(), None);
        assert_eq!(delete.method(), CommandMethod::Delete);
    }
}
