//! The document session: identity map, change tracking and batched saves.

mod batch;
mod changes;
mod identity_map;
mod tracked;

pub use identity_map::EntityMetadata;
pub use tracked::Tracked;

use crate::backend::{CommandMethod, DocumentBackend, FetchedDocument};
use crate::config::SessionConfig;
use crate::error::{BackendError, SessionError, SessionResult};
use crate::transaction::{EnlistmentState, SessionEnlistment, TransactionContext};
use crate::types::{Etag, TransactionId, ENTITY_TYPE_METADATA_FIELD, ETAG_METADATA_FIELD};
use batch::{assemble, reconcile};
use changes::{decode_entity, entity_document, has_changed, require_identity};
use docsession_codec::{diff, Document, DocumentChange, Entity};
use identity_map::{IdentityMap, TrackedEntry};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use tracked::ErasedEntity;

/// An entity that was just written by [`DocumentSession::save_changes`].
#[derive(Debug, Clone)]
pub struct StoredEntity {
    key: String,
    etag: Option<Etag>,
    entity: ErasedEntity,
}

impl StoredEntity {
    /// Key the entity was stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Etag assigned by the backend.
    pub fn etag(&self) -> Option<Etag> {
        self.etag
    }

    /// Type tag of the entity.
    pub fn type_tag(&self) -> &'static str {
        self.entity.object.type_tag()
    }

    /// Returns the typed handle if the entity is a `T`.
    pub fn downcast<T: Entity>(&self) -> Option<Tracked<T>> {
        self.entity.downcast()
    }
}

/// Callback fired once per entity written by a save.
pub type StoredListener = Box<dyn FnMut(&StoredEntity) + Send>;

/// What a call to [`DocumentSession::save_changes`] sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    /// Number of delete commands.
    pub deletes: usize,
    /// Number of put commands.
    pub puts: usize,
}

impl SaveSummary {
    /// Returns true if nothing was sent.
    pub fn is_empty(&self) -> bool {
        self.deletes == 0 && self.puts == 0
    }
}

/// A unit of work against a document store.
///
/// The session remembers every entity it loads or is asked to store, hands
/// out the same instance for the same key, and on
/// [`save_changes`](Self::save_changes) sends one atomic batch containing
/// the deletes requested plus a put for every entity whose document changed.
///
/// A session is meant for one logical unit of work on one thread; methods
/// that touch the tracking state take `&mut self`.
///
/// # Example
///
/// ```rust,ignore
/// let backend = Arc::new(InMemoryBackend::new());
/// let mut session = DocumentSession::new(backend);
///
/// let order = Tracked::new(Order { id: None, total: 10 });
/// session.store(&order)?;
/// session.save_changes()?;
///
/// let same = session.load::<Order>(order.read().id.as_deref().unwrap())?.unwrap();
/// assert!(same.ptr_eq(&order));
/// ```
pub struct DocumentSession<B: DocumentBackend + 'static> {
    backend: Arc<B>,
    config: SessionConfig,
    identity_map: IdentityMap,
    enlistment: Arc<Mutex<EnlistmentState>>,
    stored_listeners: Vec<StoredListener>,
    number_of_requests: u32,
}

impl<B: DocumentBackend + 'static> DocumentSession<B> {
    /// Creates a session with the default configuration.
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, SessionConfig::default())
    }

    /// Creates a session with an explicit configuration.
    pub fn with_config(backend: Arc<B>, config: SessionConfig) -> Self {
        Self {
            backend,
            config,
            identity_map: IdentityMap::new(),
            enlistment: Arc::new(Mutex::new(EnlistmentState::Unenlisted)),
            stored_listeners: Vec::new(),
            number_of_requests: 0,
        }
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Number of backend round-trips made so far.
    pub fn number_of_requests(&self) -> u32 {
        self.number_of_requests
    }

    /// Current transaction enlistment.
    pub fn enlistment_state(&self) -> EnlistmentState {
        *self.enlistment.lock()
    }

    /// Registers a callback fired for every entity written by a save.
    pub fn on_stored(&mut self, listener: impl FnMut(&StoredEntity) + Send + 'static) {
        self.stored_listeners.push(Box::new(listener));
    }

    /// Loads the entity stored under `key`.
    ///
    /// A key that is already tracked is answered from the identity map
    /// without a backend call. Returns `Ok(None)` if the document does not
    /// exist.
    pub fn load<T: Entity>(&mut self, key: &str) -> SessionResult<Option<Tracked<T>>> {
        require_identity::<T>()?;
        if let Some(entry) = self.identity_map.get_by_key(key) {
            return downcast_entry(key, entry).map(Some);
        }

        self.increment_requests()?;
        match self.backend.get(key) {
            Ok(fetched) => self.track(fetched).map(Some),
            Err(BackendError::DocumentNotFound { .. }) => {
                debug!(key, "document not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Loads several entities with at most one backend call.
    ///
    /// The result has one slot per requested key, in request order.
    pub fn load_many<T: Entity>(&mut self, keys: &[&str]) -> SessionResult<Vec<Option<Tracked<T>>>> {
        require_identity::<T>()?;
        let mut results = Vec::with_capacity(keys.len());
        let mut missing = Vec::new();
        let mut positions = Vec::new();

        for (position, key) in keys.iter().enumerate() {
            match self.identity_map.get_by_key(key) {
                Some(entry) => results.push(Some(downcast_entry(key, entry)?)),
                None => {
                    results.push(None);
                    missing.push((*key).to_string());
                    positions.push(position);
                }
            }
        }
        if missing.is_empty() {
            return Ok(results);
        }

        self.increment_requests()?;
        let fetched = self.backend.get_many(&missing)?;
        if fetched.len() != missing.len() {
            return Err(BackendError::protocol(format!(
                "requested {} documents, received {}",
                missing.len(),
                fetched.len()
            ))
            .into());
        }

        // Decode everything before registering anything, so a bad document
        // leaves the identity map untouched.
        let mut loaded = Vec::new();
        let mut fresh: Vec<(Tracked<T>, EntityMetadata)> = Vec::new();
        for (position, document) in positions.into_iter().zip(fetched) {
            let Some(document) = document else {
                continue;
            };
            let earlier = fresh
                .iter()
                .find(|(_, metadata)| metadata.key.as_deref() == Some(document.key.as_str()))
                .map(|(entity, _)| entity.clone());
            let entity = match (earlier, self.identity_map.get_by_key(&document.key)) {
                (Some(entity), _) => entity,
                (None, Some(entry)) => downcast_entry(&document.key, entry)?,
                (None, None) => {
                    let (entity, metadata) = self.materialize::<T>(document)?;
                    fresh.push((entity.clone(), metadata));
                    entity
                }
            };
            loaded.push((position, entity));
        }

        for (entity, metadata) in fresh {
            self.identity_map.insert(entity.erase(), metadata);
        }
        for (position, entity) in loaded {
            results[position] = Some(entity);
        }
        Ok(results)
    }

    /// Starts tracking a new or detached entity.
    ///
    /// Storing an instance that is already tracked is a no-op. Storing a
    /// different instance under a key that is already tracked fails with
    /// [`SessionError::NonUniqueObject`].
    pub fn store<T: Entity>(&mut self, entity: &Tracked<T>) -> SessionResult<()> {
        require_identity::<T>()?;
        let id = entity.instance_id();
        if self.identity_map.contains(id) {
            return Ok(());
        }

        let key = entity
            .read()
            .identity()
            .filter(|key| self.config.is_assigned_key(key));
        if let Some(key) = &key {
            if let Some(owner) = self.identity_map.instance_for_key(key) {
                if owner != id {
                    return Err(SessionError::NonUniqueObject { key: key.clone() });
                }
            }
        }

        debug!(type_tag = T::TYPE_TAG, key = ?key, "storing entity");
        let metadata_document = Document::new().with(ENTITY_TYPE_METADATA_FIELD, T::TYPE_TAG);
        self.identity_map.insert(
            entity.erase(),
            EntityMetadata {
                original_document: Document::new(),
                metadata_document,
                etag: None,
                key,
            },
        );
        Ok(())
    }

    /// Marks an entity for deletion on the next save.
    pub fn delete<T: Entity>(&mut self, entity: &Tracked<T>) -> SessionResult<()> {
        require_identity::<T>()?;
        debug!(type_tag = T::TYPE_TAG, key = ?entity.read().identity(), "marking entity for deletion");
        self.identity_map.mark_deleted(entity.erase());
        Ok(())
    }

    /// Stops tracking an entity without deleting it remotely.
    pub fn evict<T: Entity>(&mut self, entity: &Tracked<T>) {
        let id = entity.instance_id();
        self.identity_map.remove(id);
        self.identity_map.unmark_deleted(id);
    }

    /// Drops all tracking state without deleting anything remotely.
    pub fn clear(&mut self) {
        debug!(tracked = self.identity_map.len(), "clearing session");
        self.identity_map.clear();
    }

    /// Sends all pending changes as one batch, outside any transaction.
    pub fn save_changes(&mut self) -> SessionResult<SaveSummary> {
        self.flush(None)
    }

    /// Sends all pending changes as part of a distributed transaction.
    ///
    /// The first call enlists the session with the context's coordinator;
    /// the batch is then held by the backend until the coordinator commits.
    pub fn save_changes_in(&mut self, context: &TransactionContext) -> SessionResult<SaveSummary> {
        self.enlist(context)?;
        self.flush(Some(context.id()))
    }

    /// Returns true if any tracked entity changed or a delete is pending.
    pub fn has_changes(&self) -> SessionResult<bool> {
        // Deleting a never-saved entity sends nothing.
        if self
            .identity_map
            .deleted()
            .iter()
            .any(|deleted| deleted.object.identity().is_some())
        {
            return Ok(true);
        }
        for (id, entry) in self.identity_map.entries_in_order() {
            if self.identity_map.is_deleted(id) {
                continue;
            }
            if has_changed(&*entry.entity.object, Some(&entry.metadata), &self.config)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns true if the entity would be written by the next save.
    ///
    /// Untracked entities always count as changed.
    pub fn has_changed<T: Entity>(&self, entity: &Tracked<T>) -> SessionResult<bool> {
        let erased = entity.erase();
        let metadata = self
            .identity_map
            .get(entity.instance_id())
            .map(|entry| &entry.metadata);
        has_changed(&*erased.object, metadata, &self.config)
    }

    /// Lists the document fields that changed since the entity was loaded.
    pub fn what_changed<T: Entity>(&self, entity: &Tracked<T>) -> SessionResult<Vec<DocumentChange>> {
        let current = entity_document(&*entity.erase().object, &self.config)?;
        let original = self
            .identity_map
            .get(entity.instance_id())
            .map(|entry| entry.metadata.original_document.clone())
            .unwrap_or_default();
        Ok(diff(&original, &current))
    }

    /// Etag recorded for the entity, if tracked and persisted.
    pub fn etag_for<T: Entity>(&self, entity: &Tracked<T>) -> Option<Etag> {
        self.identity_map
            .get(entity.instance_id())
            .and_then(|entry| entry.metadata.etag)
    }

    /// Key recorded for the entity, if tracked and keyed.
    pub fn key_for<T: Entity>(&self, entity: &Tracked<T>) -> Option<String> {
        self.identity_map
            .get(entity.instance_id())
            .and_then(|entry| entry.metadata.key.clone())
    }

    /// Copy of the metadata tracked for the entity.
    pub fn metadata_for<T: Entity>(&self, entity: &Tracked<T>) -> Option<EntityMetadata> {
        self.identity_map
            .get(entity.instance_id())
            .map(|entry| entry.metadata.clone())
    }

    /// Returns true if an entity is tracked under `key`.
    pub fn is_loaded(&self, key: &str) -> bool {
        self.identity_map.contains_key(key)
    }

    /// Returns true if the entity is tracked by this session.
    pub fn is_tracked<T: Entity>(&self, entity: &Tracked<T>) -> bool {
        self.identity_map.contains(entity.instance_id())
    }

    /// Number of tracked entities.
    pub fn tracked_count(&self) -> usize {
        self.identity_map.len()
    }

    /// Number of entities waiting to be deleted.
    pub fn pending_deletes(&self) -> usize {
        self.identity_map.deleted_len()
    }

    fn increment_requests(&mut self) -> SessionResult<()> {
        let limit = self.config.max_requests_per_session;
        if self.number_of_requests >= limit {
            return Err(SessionError::TooManyRequests { limit });
        }
        self.number_of_requests += 1;
        Ok(())
    }

    /// Registers a fetched document, or returns the instance already tracked
    /// under its key.
    fn track<T: Entity>(&mut self, fetched: FetchedDocument) -> SessionResult<Tracked<T>> {
        if let Some(entry) = self.identity_map.get_by_key(&fetched.key) {
            return downcast_entry(&fetched.key, entry);
        }
        let (entity, metadata) = self.materialize::<T>(fetched)?;
        self.identity_map.insert(entity.erase(), metadata);
        Ok(entity)
    }

    /// Decodes a fetched document and builds its metadata without touching
    /// the identity map.
    fn materialize<T: Entity>(
        &self,
        fetched: FetchedDocument,
    ) -> SessionResult<(Tracked<T>, EntityMetadata)> {
        let FetchedDocument {
            key,
            data,
            mut metadata,
            etag,
        } = fetched;
        if !metadata.contains_key(ETAG_METADATA_FIELD) {
            let etag = etag.ok_or_else(|| SessionError::MissingEtag { key: key.clone() })?;
            metadata.insert(ETAG_METADATA_FIELD, etag.to_string());
        }
        let raw = metadata.get_text(ETAG_METADATA_FIELD).unwrap_or_default();
        let etag: Etag = raw.parse().map_err(|_| SessionError::InvalidEtag {
            key: key.clone(),
            value: raw.to_string(),
        })?;

        let entity = Tracked::new(decode_entity::<T>(&key, &data, &self.config)?);
        debug!(%key, type_tag = T::TYPE_TAG, %etag, "tracking loaded entity");
        let metadata = EntityMetadata {
            original_document: data,
            metadata_document: metadata,
            etag: Some(etag),
            key: Some(key),
        };
        Ok((entity, metadata))
    }

    fn enlist(&mut self, context: &TransactionContext) -> SessionResult<()> {
        match *self.enlistment.lock() {
            EnlistmentState::Enlisted(current) if current == context.id() => return Ok(()),
            EnlistmentState::Enlisted(current) => {
                return Err(SessionError::AlreadyEnlisted {
                    current,
                    requested: context.id(),
                })
            }
            EnlistmentState::Unenlisted => {}
        }

        let participant = Arc::new(SessionEnlistment::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.enlistment),
        ));
        context.coordinator().enlist(context.id(), participant)?;
        *self.enlistment.lock() = EnlistmentState::Enlisted(context.id());
        debug!(transaction = %context.id(), "enlisted in transaction");
        Ok(())
    }

    fn flush(&mut self, transaction: Option<TransactionId>) -> SessionResult<SaveSummary> {
        let plan = assemble(&self.identity_map, &*self.backend, &self.config)?;
        let summary = SaveSummary {
            deletes: plan.count(CommandMethod::Delete),
            puts: plan.count(CommandMethod::Put),
        };

        if plan.is_empty() {
            // Unsaved entities that were deleted only need local cleanup.
            reconcile(&mut self.identity_map, plan, &[]);
            return Ok(summary);
        }

        self.increment_requests()?;
        let results = self.backend.batch(&plan.commands, transaction)?;
        if results.len() != plan.commands.len() {
            return Err(BackendError::protocol(format!(
                "sent {} commands, received {} results",
                plan.commands.len(),
                results.len()
            ))
            .into());
        }

        let stored = reconcile(&mut self.identity_map, plan, &results);
        debug!(
            deletes = summary.deletes,
            puts = summary.puts,
            transaction = ?transaction,
            "saved changes"
        );
        for entity in &stored {
            for listener in &mut self.stored_listeners {
                listener(entity);
            }
        }
        Ok(summary)
    }
}

fn downcast_entry<T: Entity>(key: &str, entry: &TrackedEntry) -> SessionResult<Tracked<T>> {
    entry
        .entity
        .downcast::<T>()
        .ok_or_else(|| SessionError::TypeMismatch {
            key: key.to_string(),
            expected: T::TYPE_TAG,
            actual: entry.entity.object.type_tag(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use docsession_codec::{from_document, to_document, CodecResult};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Lamp {
        id: Option<String>,
        watts: i64,
    }

    impl Entity for Lamp {
        const TYPE_TAG: &'static str = "Lamp";

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

    fn session() -> DocumentSession<InMemoryBackend> {
        DocumentSession::new(Arc::new(InMemoryBackend::new()))
    }

    #[test]
    fn summary_emptiness() {
        assert!(SaveSummary::default().is_empty());
        assert!(!SaveSummary { deletes: 1, puts: 0 }.is_empty());
    }

    #[test]
    fn store_registers_fresh_metadata() {
        let mut session = session();
        let lamp = Tracked::new(Lamp { id: Some("lamps/7".into()), watts: 40 });
        session.store(&lamp).unwrap();

        let entry = session.identity_map.get_by_key("lamps/7").unwrap();
        assert!(entry.metadata.original_document.is_empty());
        assert_eq!(
            entry.metadata.metadata_document.get_text(ENTITY_TYPE_METADATA_FIELD),
            Some("Lamp")
        );
        assert!(session.has_changed(&lamp).unwrap());
    }

    #[test]
    fn save_updates_snapshot_and_counts_one_request() {
        let mut session = session();
        let lamp = Tracked::new(Lamp { id: None, watts: 60 });
        session.store(&lamp).unwrap();

        let summary = session.save_changes().unwrap();
        assert_eq!(summary, SaveSummary { deletes: 0, puts: 1 });
        assert_eq!(session.number_of_requests(), 1);

        let metadata = session.metadata_for(&lamp).unwrap();
        assert_eq!(metadata.key.as_deref(), Some("lamps/1"));
        assert_eq!(metadata.original_document.get_text("type"), Some("Lamp"));
        assert_eq!(
            metadata.metadata_document.get_text(ETAG_METADATA_FIELD),
            metadata.etag.map(|e| e.to_string()).as_deref()
        );
    }

    #[test]
    fn tracked_instance_is_reused_on_load() {
        let mut session = session();
        let lamp = Tracked::new(Lamp { id: None, watts: 60 });
        session.store(&lamp).unwrap();
        session.save_changes().unwrap();

        let loaded = session.load::<Lamp>("lamps/1").unwrap().unwrap();
        assert!(loaded.ptr_eq(&lamp));
        assert_eq!(session.number_of_requests(), 1);
    }
}
