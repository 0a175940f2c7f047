//! Distributed transaction participation.
//!
//! A session joins a transaction lazily, the first time it saves inside a
//! [`TransactionContext`]. From then on the coordinator drives the outcome
//! through the [`TransactionParticipant`] the session registered.

mod enlistment;

pub use enlistment::{EnlistmentState, SessionEnlistment};

use crate::error::{BackendResult, SessionResult};
use crate::types::TransactionId;
use std::fmt;
use std::sync::Arc;

/// Something that takes part in a distributed transaction.
pub trait TransactionParticipant: Send + Sync {
    /// Makes the participant's work in `transaction` durable.
    fn commit(&self, transaction: TransactionId) -> BackendResult<()>;

    /// Discards the participant's work in `transaction`.
    fn rollback(&self, transaction: TransactionId) -> BackendResult<()>;
}

/// Coordinates the outcome of distributed transactions.
pub trait TransactionCoordinator: Send + Sync {
    /// Registers a participant for `transaction`.
    fn enlist(
        &self,
        transaction: TransactionId,
        participant: Arc<dyn TransactionParticipant>,
    ) -> SessionResult<()>;
}

/// An active distributed transaction, passed explicitly to
/// [`DocumentSession::save_changes_in`](crate::DocumentSession::save_changes_in).
#[derive(Clone)]
pub struct TransactionContext {
    id: TransactionId,
    coordinator: Arc<dyn TransactionCoordinator>,
}

impl TransactionContext {
    /// Creates a context for `id` driven by `coordinator`.
    pub fn new(id: TransactionId, coordinator: Arc<dyn TransactionCoordinator>) -> Self {
        Self { id, coordinator }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the coordinator.
    pub fn coordinator(&self) -> &Arc<dyn TransactionCoordinator> {
        &self.coordinator
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
