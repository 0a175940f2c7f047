//! The session's side of a distributed transaction.

use super::TransactionParticipant;
use crate::backend::DocumentBackend;
use crate::error::BackendResult;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Whether a session currently belongs to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnlistmentState {
    /// Not part of any transaction.
    Unenlisted,
    /// Registered with the coordinator of this transaction.
    Enlisted(TransactionId),
}

impl EnlistmentState {
    /// Returns the transaction, if enlisted.
    pub fn transaction(&self) -> Option<TransactionId> {
        match self {
            EnlistmentState::Unenlisted => None,
            EnlistmentState::Enlisted(id) => Some(*id),
        }
    }
}

/// Participant handed to the coordinator on the session's behalf.
///
/// Forwards the outcome to the backend, then returns the session to
/// [`EnlistmentState::Unenlisted`] whether or not the backend call worked.
pub struct SessionEnlistment<B: DocumentBackend> {
    backend: Arc<B>,
    state: Arc<Mutex<EnlistmentState>>,
}

impl<B: DocumentBackend> SessionEnlistment<B> {
    pub(crate) fn new(backend: Arc<B>, state: Arc<Mutex<EnlistmentState>>) -> Self {
        Self { backend, state }
    }

    fn finish(&self, transaction: TransactionId, result: BackendResult<()>) -> BackendResult<()> {
        *self.state.lock() = EnlistmentState::Unenlisted;
        debug!(%transaction, ok = result.is_ok(), "enlistment finished");
        result
    }
}

impl<B: DocumentBackend> TransactionParticipant for SessionEnlistment<B> {
    fn commit(&self, transaction: TransactionId) -> BackendResult<()> {
        let result = self.backend.commit(transaction);
        self.finish(transaction, result)
    }

    fn rollback(&self, transaction: TransactionId) -> BackendResult<()> {
        let result = self.backend.rollback(transaction);
        self.finish(transaction, result)
    }
}
