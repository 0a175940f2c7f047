//! Sample entities, session helpers and a recording coordinator.

use docsession_codec::{from_document, to_document, CodecResult, Document, Entity};
use docsession_core::{
    BackendResult, DocumentSession, InMemoryBackend, SessionConfig, SessionError, SessionResult,
    TransactionCoordinator, TransactionId, TransactionParticipant,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A stock item, stored under `items/<n>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Document key.
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Units in stock.
    pub quantity: i64,
    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Item {
    /// Creates an unsaved item.
    pub fn new(name: &str, quantity: i64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            quantity,
            tags: Vec::new(),
        }
    }

    /// Sets the key the item will be stored under.
    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }
}

impl Entity for Item {
    const TYPE_TAG: &'static str = "Item";

    fn identity(&self) -> Option<String> {
        self.id.clone()
    }

    fn set_identity(&mut self, key: &str) {
        self.id = Some(key.to_string());
    }

    fn to_document(&self) -> CodecResult<Document> {
        to_document(self)
    }

    fn from_document(document: Document) -> CodecResult<Self> {
        from_document(document)
    }
}

/// One line of an [`Order`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Key of the ordered item.
    pub item: String,
    /// Units ordered.
    pub quantity: i64,
}

/// An order whose identity lives in a `key` property instead of `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Document key.
    pub key: Option<String>,
    /// Customer name.
    pub customer: String,
    /// Ordered lines.
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Creates an unsaved order without lines.
    pub fn new(customer: &str) -> Self {
        Self {
            key: None,
            customer: customer.to_string(),
            lines: Vec::new(),
        }
    }
}

impl Entity for Order {
    const TYPE_TAG: &'static str = "Order";
    const IDENTITY_PROPERTY: Option<&'static str> = Some("key");

    fn identity(&self) -> Option<String> {
        self.key.clone()
    }

    fn set_identity(&mut self, key: &str) {
        self.key = Some(key.to_string());
    }

    fn to_document(&self) -> CodecResult<Document> {
        to_document(self)
    }

    fn from_document(document: Document) -> CodecResult<Self> {
        from_document(document)
    }
}

/// A type with no identity property; every session call on it fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Untracked {
    /// Payload.
    pub label: String,
}

impl Entity for Untracked {
    const TYPE_TAG: &'static str = "Untracked";
    const IDENTITY_PROPERTY: Option<&'static str> = None;

    fn identity(&self) -> Option<String> {
        None
    }

    fn set_identity(&mut self, _key: &str) {}

    fn to_document(&self) -> CodecResult<Document> {
        to_document(self)
    }

    fn from_document(document: Document) -> CodecResult<Self> {
        from_document(document)
    }
}

/// Creates an empty in-memory backend and a default session over it.
pub fn memory_session() -> (Arc<InMemoryBackend>, DocumentSession<InMemoryBackend>) {
    session_with(SessionConfig::default())
}

/// Creates an empty in-memory backend and a session with `config`.
pub fn session_with(
    config: SessionConfig,
) -> (Arc<InMemoryBackend>, DocumentSession<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::new());
    let session = DocumentSession::with_config(Arc::clone(&backend), config);
    (backend, session)
}

/// Opens a second session over an existing backend.
pub fn reopen(backend: &Arc<InMemoryBackend>) -> DocumentSession<InMemoryBackend> {
    DocumentSession::new(Arc::clone(backend))
}

/// Saves `items` through a throwaway session and returns their keys.
pub fn seed_items(backend: &Arc<InMemoryBackend>, items: Vec<Item>) -> SessionResult<Vec<String>> {
    let mut session = reopen(backend);
    let tracked: Vec<_> = items.into_iter().map(docsession_core::Tracked::new).collect();
    for item in &tracked {
        session.store(item)?;
    }
    session.save_changes()?;
    Ok(tracked
        .iter()
        .filter_map(|item| item.read().id.clone())
        .collect())
}

/// Installs a test subscriber honoring `RUST_LOG`; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A coordinator that records participants and lets the test decide the
/// outcome.
#[derive(Default)]
pub struct RecordingCoordinator {
    participants: Mutex<Vec<(TransactionId, Arc<dyn TransactionParticipant>)>>,
    refuse: Mutex<bool>,
}

impl RecordingCoordinator {
    /// Creates a coordinator with no participants.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every later enlistment fail.
    pub fn refuse_enlistment(&self) {
        *self.refuse.lock() = true;
    }

    /// Number of participants enlisted in `transaction`.
    pub fn enlisted(&self, transaction: TransactionId) -> usize {
        self.participants
            .lock()
            .iter()
            .filter(|(id, _)| *id == transaction)
            .count()
    }

    /// Commits every participant of `transaction`, stopping at the first error.
    pub fn commit_all(&self, transaction: TransactionId) -> BackendResult<()> {
        for participant in self.take(transaction) {
            participant.commit(transaction)?;
        }
        Ok(())
    }

    /// Rolls back every participant of `transaction`.
    pub fn rollback_all(&self, transaction: TransactionId) -> BackendResult<()> {
        for participant in self.take(transaction) {
            participant.rollback(transaction)?;
        }
        Ok(())
    }

    fn take(&self, transaction: TransactionId) -> Vec<Arc<dyn TransactionParticipant>> {
        let mut participants = self.participants.lock();
        let (taken, kept) = participants
            .drain(..)
            .partition::<Vec<_>, _>(|(id, _)| *id == transaction);
        *participants = kept;
        taken.into_iter().map(|(_, participant)| participant).collect()
    }
}

impl TransactionCoordinator for RecordingCoordinator {
    fn enlist(
        &self,
        transaction: TransactionId,
        participant: Arc<dyn TransactionParticipant>,
    ) -> SessionResult<()> {
        if *self.refuse.lock() {
            return Err(SessionError::Backend(
                docsession_core::BackendError::protocol("enlistment refused"),
            ));
        }
        self.participants.lock().push((transaction, participant));
        Ok(())
    }
}
