//! In-memory document store backend.

use super::{BatchCommand, BatchResult, CommandMethod, DocumentBackend, FetchedDocument};
use crate::error::{BackendError, BackendResult};
use crate::types::{Etag, TransactionId, ETAG_METADATA_FIELD};
use docsession_codec::{from_cbor, to_cbor, Document};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};

/// Backend calls that can be counted and failed on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOperation {
    /// [`DocumentBackend::get`].
    Get,
    /// [`DocumentBackend::get_many`].
    GetMany,
    /// [`DocumentBackend::batch`].
    Batch,
    /// [`DocumentBackend::generate_key`].
    GenerateKey,
    /// [`DocumentBackend::commit`].
    Commit,
    /// [`DocumentBackend::rollback`].
    Rollback,
}

/// Call counters kept by [`InMemoryBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Number of single-document fetches.
    pub gets: u64,
    /// Number of multi-document fetches.
    pub get_manys: u64,
    /// Number of batches received.
    pub batches: u64,
    /// Number of generated keys.
    pub generated_keys: u64,
    /// Number of commits.
    pub commits: u64,
    /// Number of rollbacks.
    pub rollbacks: u64,
}

impl BackendStats {
    /// Fetches and batches, the calls that would cross the network.
    pub fn round_trips(&self) -> u64 {
        self.gets + self.get_manys + self.batches
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    data: Vec<u8>,
    metadata: Vec<u8>,
    etag: Etag,
}

type StagedWrite = (String, Option<StoredDocument>);

#[derive(Debug, Default)]
struct StoreState {
    documents: BTreeMap<String, StoredDocument>,
    pending: HashMap<TransactionId, Vec<StagedWrite>>,
    key_counters: HashMap<String, u64>,
}

impl StoreState {
    fn apply(&mut self, writes: Vec<StagedWrite>) {
        for (key, write) in writes {
            match write {
                Some(stored) => {
                    self.documents.insert(key, stored);
                }
                None => {
                    self.documents.remove(&key);
                }
            }
        }
    }
}

/// A document store kept entirely in memory.
///
/// Documents are held as CBOR bytes, so every fetch decodes a fresh copy
/// the way a remote store would. Suitable for:
/// - Unit and integration tests
/// - Embedding a session without a server
///
/// Besides the [`DocumentBackend`] contract it enforces etags on writes,
/// stages transactional batches until commit, counts calls, and can be told
/// to fail the next call of a given kind.
///
/// # Example
///
/// ```rust
/// use docsession_core::{DocumentBackend, InMemoryBackend};
/// use docsession_codec::Document;
///
/// let backend = InMemoryBackend::new();
/// backend.insert("items/1", Document::new().with("name", "lamp"), Document::new()).unwrap();
///
/// let fetched = backend.get("items/1").unwrap();
/// assert_eq!(fetched.data.get_text("name"), Some("lamp"));
/// assert!(fetched.etag.is_some());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<StoreState>,
    stats: Mutex<BackendStats>,
    failures: Mutex<HashMap<BackendOperation, BackendError>>,
    batch_log: Mutex<Vec<Vec<BatchCommand>>>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a document directly, bypassing batches and counters.
    pub fn insert(
        &self,
        key: impl Into<String>,
        data: Document,
        metadata: Document,
    ) -> BackendResult<Etag> {
        let stored = encode(&data, &metadata)?;
        let etag = stored.etag;
        self.state.write().documents.insert(key.into(), stored);
        Ok(etag)
    }

    /// Returns the committed body stored under `key`.
    pub fn document(&self, key: &str) -> Option<Document> {
        let state = self.state.read();
        state
            .documents
            .get(key)
            .and_then(|stored| from_cbor(&stored.data).ok())
    }

    /// Returns the committed etag of `key`.
    pub fn etag(&self, key: &str) -> Option<Etag> {
        self.state.read().documents.get(key).map(|stored| stored.etag)
    }

    /// Returns true if a committed document exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.state.read().documents.contains_key(key)
    }

    /// Number of committed documents.
    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    /// Returns true if no documents are committed.
    pub fn is_empty(&self) -> bool {
        self.state.read().documents.is_empty()
    }

    /// Number of transactions with staged, uncommitted writes.
    pub fn pending_transactions(&self) -> usize {
        self.state.read().pending.len()
    }

    /// Returns a snapshot of the call counters.
    pub fn stats(&self) -> BackendStats {
        self.stats.lock().clone()
    }

    /// Returns every batch received, oldest first.
    pub fn batches(&self) -> Vec<Vec<BatchCommand>> {
        self.batch_log.lock().clone()
    }

    /// Returns the most recent batch received.
    pub fn last_batch(&self) -> Option<Vec<BatchCommand>> {
        self.batch_log.lock().last().cloned()
    }

    /// Makes the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: BackendOperation, error: BackendError) {
        self.failures.lock().insert(operation, error);
    }

    fn enter(&self, operation: BackendOperation) -> BackendResult<()> {
        {
            let mut stats = self.stats.lock();
            match operation {
                BackendOperation::Get => stats.gets += 1,
                BackendOperation::GetMany => stats.get_manys += 1,
                BackendOperation::Batch => stats.batches += 1,
                BackendOperation::GenerateKey => stats.generated_keys += 1,
                BackendOperation::Commit => stats.commits += 1,
                BackendOperation::Rollback => stats.rollbacks += 1,
            }
        }
        match self.failures.lock().remove(&operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn fetch(state: &StoreState, key: &str) -> BackendResult<Option<FetchedDocument>> {
        let Some(stored) = state.documents.get(key) else {
            return Ok(None);
        };
        let data = from_cbor(&stored.data)?;
        let mut metadata = from_cbor(&stored.metadata)?;
        metadata.insert(ETAG_METADATA_FIELD, stored.etag.to_string());
        Ok(Some(FetchedDocument {
            key: key.to_string(),
            data,
            metadata,
            etag: Some(stored.etag),
        }))
    }
}

fn encode(data: &Document, metadata: &Document) -> BackendResult<StoredDocument> {
    let mut metadata = metadata.clone();
    metadata.remove(ETAG_METADATA_FIELD);
    Ok(StoredDocument {
        data: to_cbor(data)?,
        metadata: to_cbor(&metadata)?,
        etag: Etag::new(),
    })
}

fn collection_prefix(type_tag: &str) -> String {
    format!("{}s/", type_tag.to_lowercase())
}

impl DocumentBackend for InMemoryBackend {
    fn get(&self, key: &str) -> BackendResult<FetchedDocument> {
        self.enter(BackendOperation::Get)?;
        let state = self.state.read();
        Self::fetch(&state, key)?.ok_or_else(|| BackendError::DocumentNotFound {
            key: key.to_string(),
        })
    }

    fn get_many(&self, keys: &[String]) -> BackendResult<Vec<Option<FetchedDocument>>> {
        self.enter(BackendOperation::GetMany)?;
        let state = self.state.read();
        keys.iter().map(|key| Self::fetch(&state, key)).collect()
    }

    fn batch(
        &self,
        commands: &[BatchCommand],
        transaction: Option<TransactionId>,
    ) -> BackendResult<Vec<BatchResult>> {
        self.enter(BackendOperation::Batch)?;
        self.batch_log.lock().push(commands.to_vec());

        let mut state = self.state.write();

        // Writes already staged by this transaction shadow committed documents.
        let mut overlay: HashMap<String, Option<Etag>> = transaction
            .and_then(|txn| state.pending.get(&txn))
            .map(|staged| {
                staged
                    .iter()
                    .map(|(key, write)| (key.clone(), write.as_ref().map(|s| s.etag)))
                    .collect()
            })
            .unwrap_or_default();

        let mut writes = Vec::with_capacity(commands.len());
        let mut results = Vec::with_capacity(commands.len());

        for command in commands {
            let key = command.key();
            let current = match overlay.get(key) {
                Some(etag) => *etag,
                None => state.documents.get(key).map(|stored| stored.etag),
            };
            if let Some(expected) = command.etag() {
                if current != Some(expected) {
                    return Err(BackendError::ConcurrencyViolation {
                        key: key.to_string(),
                        expected: Some(expected),
                        actual: current,
                    });
                }
            }

            match command {
                BatchCommand::Put {
                    document, metadata, ..
                } => {
                    let stored = encode(document, metadata)?;
                    overlay.insert(key.to_string(), Some(stored.etag));
                    results.push(BatchResult {
                        method: CommandMethod::Put,
                        key: key.to_string(),
                        etag: Some(stored.etag),
                    });
                    writes.push((key.to_string(), Some(stored)));
                }
                BatchCommand::Delete { .. } => {
                    overlay.insert(key.to_string(), None);
                    results.push(BatchResult {
                        method: CommandMethod::Delete,
                        key: key.to_string(),
                        etag: None,
                    });
                    writes.push((key.to_string(), None));
                }
            }
        }

        match transaction {
            Some(txn) => state.pending.entry(txn).or_default().extend(writes),
            None => state.apply(writes),
        }
        Ok(results)
    }

    fn generate_key(&self, type_tag: &str, prefix: Option<&str>) -> BackendResult<String> {
        self.enter(BackendOperation::GenerateKey)?;
        let prefix = prefix
            .map(str::to_string)
            .unwrap_or_else(|| collection_prefix(type_tag));

        let mut state = self.state.write();
        loop {
            let counter = state.key_counters.entry(prefix.clone()).or_insert(0);
            *counter += 1;
            let key = format!("{prefix}{counter}");
            if !state.documents.contains_key(&key) {
                return Ok(key);
            }
        }
    }

    fn commit(&self, transaction: TransactionId) -> BackendResult<()> {
        self.enter(BackendOperation::Commit)?;
        let mut state = self.state.write();
        // A participant that never sent a batch has nothing staged.
        if let Some(writes) = state.pending.remove(&transaction) {
            state.apply(writes);
        }
        Ok(())
    }

    fn rollback(&self, transaction: TransactionId) -> BackendResult<()> {
        self.enter(BackendOperation::Rollback)?;
        self.state.write().pending.remove(&transaction);
        Ok(())
    }
}
