//! Identity map and per-entity metadata.

use crate::session::tracked::{ErasedEntity, InstanceId};
use crate::types::Etag;
use docsession_codec::Document;
use std::collections::HashMap;

/// Bookkeeping the session keeps for each tracked entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMetadata {
    /// Snapshot taken at load or after the last successful save.
    pub original_document: Document,
    /// Auxiliary document sent with every write.
    pub metadata_document: Document,
    /// Concurrency token from the last load or save.
    pub etag: Option<Etag>,
    /// Current document key.
    pub key: Option<String>,
}

#[derive(Debug)]
pub(crate) struct TrackedEntry {
    pub(crate) entity: ErasedEntity,
    pub(crate) metadata: EntityMetadata,
    /// Registration order, so flushes are deterministic.
    pub(crate) sequence: u64,
}

/// Key map, metadata map and deletion set.
///
/// # Invariants
///
/// - every key in `by_key` points at an instance present in `entries`
/// - an entry's `metadata.key`, when set, maps back to that entry
#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    by_key: HashMap<String, InstanceId>,
    entries: HashMap<InstanceId, TrackedEntry>,
    deleted: Vec<ErasedEntity>,
    next_sequence: u64,
}

impl IdentityMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get_by_key(&self, key: &str) -> Option<&TrackedEntry> {
        self.by_key.get(key).and_then(|id| self.entries.get(id))
    }

    pub(crate) fn instance_for_key(&self, key: &str) -> Option<InstanceId> {
        self.by_key.get(key).copied()
    }

    pub(crate) fn get(&self, id: InstanceId) -> Option<&TrackedEntry> {
        self.entries.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: InstanceId) -> Option<&mut TrackedEntry> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn contains(&self, id: InstanceId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Starts tracking an entity; maps its key if it has one.
    pub(crate) fn insert(&mut self, entity: ErasedEntity, metadata: EntityMetadata) {
        let id = entity.instance_id();
        if let Some(key) = &metadata.key {
            self.by_key.insert(key.clone(), id);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            id,
            TrackedEntry {
                entity,
                metadata,
                sequence,
            },
        );
    }

    /// Points `key` at `id`, replacing whatever was mapped there.
    pub(crate) fn map_key(&mut self, key: String, id: InstanceId) -> Option<InstanceId> {
        self.by_key.insert(key, id)
    }

    /// Removes `key` only if it currently points at `id`.
    pub(crate) fn unmap_key(&mut self, key: &str, id: InstanceId) {
        if self.by_key.get(key) == Some(&id) {
            self.by_key.remove(key);
        }
    }

    /// Stops tracking an instance and drops its key mapping.
    pub(crate) fn remove(&mut self, id: InstanceId) -> Option<TrackedEntry> {
        let entry = self.entries.remove(&id)?;
        if let Some(key) = &entry.metadata.key {
            self.unmap_key(key, id);
        }
        Some(entry)
    }

    pub(crate) fn mark_deleted(&mut self, entity: ErasedEntity) {
        let id = entity.instance_id();
        if !self.is_deleted(id) {
            self.deleted.push(entity);
        }
    }

    pub(crate) fn unmark_deleted(&mut self, id: InstanceId) {
        self.deleted.retain(|entity| entity.instance_id() != id);
    }

    pub(crate) fn is_deleted(&self, id: InstanceId) -> bool {
        self.deleted.iter().any(|entity| entity.instance_id() == id)
    }

    pub(crate) fn deleted(&self) -> &[ErasedEntity] {
        &self.deleted
    }

    pub(crate) fn clear_deleted(&mut self) {
        self.deleted.clear();
    }

    /// Tracked entries in registration order.
    pub(crate) fn entries_in_order(&self) -> Vec<(InstanceId, &TrackedEntry)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(id, e)| (*id, e)).collect();
        entries.sort_by_key(|(_, entry)| entry.sequence);
        entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn deleted_len(&self) -> usize {
        self.deleted.len()
    }

    #[cfg(test)]
    pub(crate) fn key_count(&self) -> usize {
        self.by_key.len()
    }

    /// Drops all tracking state at once.
    pub(crate) fn clear(&mut self) {
        self.by_key.clear();
        self.entries.clear();
        self.deleted.clear();
    }
}
