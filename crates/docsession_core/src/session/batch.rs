//! Batch assembly and result reconciliation.
//!
//! Assembly only reads session state. Everything a flush changes locally is
//! applied by [`reconcile`] after the backend has accepted the batch, so a
//! failed batch leaves the session exactly as it was.

use crate::backend::{BatchCommand, BatchResult, CommandMethod, DocumentBackend};
use crate::config::SessionConfig;
use crate::error::SessionResult;
use crate::session::changes::entity_document;
use crate::session::identity_map::IdentityMap;
use crate::session::tracked::{ErasedEntity, InstanceId};
use crate::session::StoredEntity;
use crate::types::ETAG_METADATA_FIELD;
use docsession_codec::Document;
use std::collections::HashSet;
use tracing::{trace, warn};

/// The entity behind one command of a batch.
#[derive(Debug, Clone)]
pub(crate) struct PlannedEntity {
    pub(crate) entity: ErasedEntity,
    /// Document sent with a put; `None` for deletes.
    pub(crate) document: Option<Document>,
}

/// Commands to send plus what to do locally once they succeed.
#[derive(Debug, Default)]
pub(crate) struct SavePlan {
    pub(crate) commands: Vec<BatchCommand>,
    /// Parallel to `commands`.
    pub(crate) entities: Vec<PlannedEntity>,
    /// Instances that stop being tracked when the flush succeeds.
    pub(crate) untrack: Vec<InstanceId>,
}

impl SavePlan {
    fn push(&mut self, command: BatchCommand, entity: PlannedEntity) {
        trace!(method = ?command.method(), key = command.key(), etag = ?command.etag(), "planned command");
        self.commands.push(command);
        self.entities.push(entity);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn count(&self, method: CommandMethod) -> usize {
        self.commands.iter().filter(|c| c.method() == method).count()
    }
}

/// Builds the ordered command list: all deletes, then all puts.
pub(crate) fn assemble<B: DocumentBackend + ?Sized>(
    map: &IdentityMap,
    backend: &B,
    config: &SessionConfig,
) -> SessionResult<SavePlan> {
    let mut plan = SavePlan::default();
    let mut excluded = HashSet::new();

    for deleted in map.deleted() {
        let id = deleted.instance_id();
        if map.contains(id) {
            excluded.insert(id);
            plan.untrack.push(id);
        }

        let Some(key) = deleted.object.identity() else {
            trace!(type_tag = deleted.object.type_tag(), "skipping delete of unsaved entity");
            continue;
        };

        let tracked = map
            .instance_for_key(&key)
            .and_then(|owner| map.get(owner).map(|entry| (owner, entry)));
        let (etag, entity) = match tracked {
            Some((owner, entry)) => {
                if excluded.insert(owner) {
                    plan.untrack.push(owner);
                }
                let etag = if config.use_optimistic_concurrency {
                    entry.metadata.etag
                } else {
                    None
                };
                (etag, entry.entity.clone())
            }
            None => (None, deleted.clone()),
        };

        plan.push(
            BatchCommand::Delete { key, etag },
            PlannedEntity {
                entity,
                document: None,
            },
        );
    }

    for (id, entry) in map.entries_in_order() {
        if excluded.contains(&id) {
            continue;
        }
        let object = &*entry.entity.object;
        let document = entity_document(object, config)?;
        if document == entry.metadata.original_document {
            continue;
        }

        let key = match object.identity() {
            Some(key) if config.is_assigned_key(&key) => key,
            other => {
                let prefix = other.as_deref().filter(|key| config.is_prefix_key(key));
                backend.generate_key(object.type_tag(), prefix)?
            }
        };
        let etag = if config.use_optimistic_concurrency {
            entry.metadata.etag
        } else {
            None
        };

        plan.push(
            BatchCommand::Put {
                key,
                etag,
                document: document.clone(),
                metadata: entry.metadata.metadata_document.clone(),
            },
            PlannedEntity {
                entity: entry.entity.clone(),
                document: Some(document),
            },
        );
    }

    Ok(plan)
}

/// Applies a successful flush to the identity map.
///
/// `results` must be parallel to `plan.commands` (empty when nothing was
/// sent). Returns the entities that were stored, in command order.
pub(crate) fn reconcile(
    map: &mut IdentityMap,
    plan: SavePlan,
    results: &[BatchResult],
) -> Vec<StoredEntity> {
    for id in &plan.untrack {
        map.remove(*id);
    }
    map.clear_deleted();

    // Drop every old mapping first so keys can move between entities.
    for planned in plan.entities.iter().filter(|p| p.document.is_some()) {
        let id = planned.entity.instance_id();
        let old_key = map.get(id).and_then(|entry| entry.metadata.key.clone());
        if let Some(old_key) = old_key {
            map.unmap_key(&old_key, id);
        }
        if let Some(identity) = planned.entity.object.identity() {
            map.unmap_key(&identity, id);
        }
    }

    let mut stored = Vec::new();
    for (result, planned) in results.iter().zip(plan.entities) {
        if result.method != CommandMethod::Put {
            continue;
        }
        let Some(document) = planned.document else {
            continue;
        };
        let id = planned.entity.instance_id();
        let Some(entry) = map.get_mut(id) else {
            warn!(key = %result.key, "stored entity is no longer tracked, skipping");
            continue;
        };

        entry.metadata.etag = result.etag;
        entry.metadata.key = Some(result.key.clone());
        entry.metadata.original_document = document;
        match result.etag {
            Some(etag) => entry
                .metadata
                .metadata_document
                .insert(ETAG_METADATA_FIELD, etag.to_string()),
            None => entry.metadata.metadata_document.remove(ETAG_METADATA_FIELD),
        };

        if let Some(previous) = map.map_key(result.key.clone(), id) {
            if previous != id {
                warn!(key = %result.key, "key moved to another entity, evicting the previous owner");
                if let Some(displaced) = map.get_mut(previous) {
                    displaced.metadata.key = None;
                }
                map.remove(previous);
            }
        }

        planned.entity.object.set_identity(&result.key);
        stored.push(StoredEntity {
            key: result.key.clone(),
            etag: result.etag,
            entity: planned.entity,
        });
    }
    stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::session::identity_map::EntityMetadata;
    use crate::session::tracked::Tracked;
    use crate::types::Etag;
    use docsession_codec::{from_document, to_document, CodecResult, Entity};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Crate {
        id: Option<String>,
        weight: i64,
    }

    impl Entity for Crate {
        const TYPE_TAG: &'static str = "Crate";

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

    fn fresh(id: Option<&str>, weight: i64) -> Tracked<Crate> {
        Tracked::new(Crate {
            id: id.map(str::to_string),
            weight,
        })
    }

    fn stored_metadata(key: &str, etag: Etag) -> EntityMetadata {
        EntityMetadata {
            original_document: Document::new(),
            metadata_document: Document::new(),
            etag: Some(etag),
            key: Some(key.to_string()),
        }
    }

    fn clean_metadata(entity: &Tracked<Crate>, key: &str, etag: Etag, config: &SessionConfig) -> EntityMetadata {
        EntityMetadata {
            original_document: entity_document(&*entity.erase().object, config).unwrap(),
            ..stored_metadata(key, etag)
        }
    }

    #[test]
    fn empty_map_plans_nothing() {
        let map = IdentityMap::new();
        let backend = InMemoryBackend::new();
        let plan = assemble(&map, &backend, &SessionConfig::default()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(backend.stats().generated_keys, 0);
    }

    #[test]
    fn deletes_come_before_puts() {
        let config = SessionConfig::default();
        let backend = InMemoryBackend::new();
        let mut map = IdentityMap::new();

        let kept = fresh(None, 1);
        map.insert(kept.erase(), EntityMetadata {
            original_document: Document::new(),
            metadata_document: Document::new(),
            etag: None,
            key: None,
        });
        let doomed = fresh(Some("crates/9"), 2);
        map.insert(doomed.erase(), clean_metadata(&doomed, "crates/9", Etag::new(), &config));
        map.mark_deleted(doomed.erase());

        let plan = assemble(&map, &backend, &config).unwrap();
        assert_eq!(plan.commands.len(), 2);
        assert_eq!(plan.commands[0].method(), CommandMethod::Delete);
        assert_eq!(plan.commands[0].key(), "crates/9");
        assert_eq!(plan.commands[1].method(), CommandMethod::Put);
        assert_eq!(plan.commands[1].key(), "crates/1");
        assert_eq!(plan.untrack, vec![doomed.instance_id()]);
    }

    #[test]
    fn delete_carries_etag_only_with_optimistic_concurrency() {
        let etag = Etag::new();
        let backend = InMemoryBackend::new();

        for (occ, expected) in [(false, None), (true, Some(etag))] {
            let config = SessionConfig::default().use_optimistic_concurrency(occ);
            let mut map = IdentityMap::new();
            let doomed = fresh(Some("crates/1"), 1);
            map.insert(doomed.erase(), clean_metadata(&doomed, "crates/1", etag, &config));
            map.mark_deleted(doomed.erase());

            let plan = assemble(&map, &backend, &config).unwrap();
            assert_eq!(plan.commands[0].etag(), expected);
        }
    }

    #[test]
    fn untracked_delete_uses_entity_key() {
        let config = SessionConfig::default();
        let backend = InMemoryBackend::new();
        let mut map = IdentityMap::new();
        let stranger = fresh(Some("crates/4"), 1);
        map.mark_deleted(stranger.erase());

        let plan = assemble(&map, &backend, &config).unwrap();
        assert_eq!(
            plan.commands,
            vec![BatchCommand::Delete {
                key: "crates/4".into(),
                etag: None
            }]
        );
        assert!(plan.untrack.is_empty());
    }

    #[test]
    fn unsaved_delete_is_dropped_locally() {
        let config = SessionConfig::default();
        let backend = InMemoryBackend::new();
        let mut map = IdentityMap::new();
        let transient = fresh(None, 1);
        map.insert(transient.erase(), EntityMetadata {
            original_document: Document::new(),
            metadata_document: Document::new(),
            etag: None,
            key: None,
        });
        map.mark_deleted(transient.erase());

        let plan = assemble(&map, &backend, &config).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.untrack, vec![transient.instance_id()]);

        reconcile(&mut map, plan, &[]);
        assert_eq!(map.len(), 0);
        assert_eq!(map.deleted_len(), 0);
    }

    #[test]
    fn temporary_and_prefix_keys_are_replaced() {
        let config = SessionConfig::default();
        let backend = InMemoryBackend::new();
        let mut map = IdentityMap::new();
        for id in ["temp/1", "archive/"] {
            let entity = fresh(Some(id), 1);
            map.insert(entity.erase(), EntityMetadata {
                original_document: Document::new(),
                metadata_document: Document::new(),
                etag: None,
                key: None,
            });
        }

        let plan = assemble(&map, &backend, &config).unwrap();
        let keys: Vec<_> = plan.commands.iter().map(|c| c.key().to_string()).collect();
        assert_eq!(keys, vec!["crates/1", "archive/1"]);
    }

    #[test]
    fn reconcile_rekeys_and_refreshes_snapshot() {
        let config = SessionConfig::default();
        let backend = InMemoryBackend::new();
        let mut map = IdentityMap::new();
        let entity = fresh(None, 5);
        map.insert(entity.erase(), EntityMetadata {
            original_document: Document::new(),
            metadata_document: Document::new(),
            etag: None,
            key: None,
        });

        let plan = assemble(&map, &backend, &config).unwrap();
        let results = backend.batch(&plan.commands, None).unwrap();
        let stored = reconcile(&mut map, plan, &results);

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key(), "crates/1");
        assert_eq!(entity.read().id.as_deref(), Some("crates/1"));

        let entry = map.get_by_key("crates/1").unwrap();
        assert_eq!(entry.metadata.etag, results[0].etag);
        assert_eq!(entry.metadata.key.as_deref(), Some("crates/1"));
        assert!(assemble(&map, &backend, &config).unwrap().is_empty());
    }

    #[test]
    fn reconcile_evicts_previous_owner_of_a_returned_key() {
        let config = SessionConfig::default();
        let backend = InMemoryBackend::new();
        let mut map = IdentityMap::new();
        let owner = fresh(Some("crates/1"), 1);
        map.insert(owner.erase(), clean_metadata(&owner, "crates/1", Etag::new(), &config));
        let newcomer = fresh(None, 2);
        map.insert(newcomer.erase(), EntityMetadata {
            original_document: Document::new(),
            metadata_document: Document::new(),
            etag: None,
            key: None,
        });

        // The backend has never seen `crates/1`, so it hands the key out again.
        let plan = assemble(&map, &backend, &config).unwrap();
        assert_eq!(plan.commands.len(), 1);
        assert_eq!(plan.commands[0].key(), "crates/1");
        let results = backend.batch(&plan.commands, None).unwrap();
        let stored = reconcile(&mut map, plan, &results);

        assert_eq!(stored.len(), 1);
        assert!(map.get(owner.instance_id()).is_none());
        assert_eq!(map.instance_for_key("crates/1"), Some(newcomer.instance_id()));
        assert_eq!(map.len(), 1);
        assert_eq!(newcomer.read().id.as_deref(), Some("crates/1"));
    }

    #[test]
    fn reconcile_skips_entities_evicted_mid_flush() {
        let config = SessionConfig::default();
        let backend = InMemoryBackend::new();
        let mut map = IdentityMap::new();
        let a = fresh(None, 1);
        let b = fresh(None, 2);
        for entity in [&a, &b] {
            map.insert(entity.erase(), EntityMetadata {
                original_document: Document::new(),
                metadata_document: Document::new(),
                etag: None,
                key: None,
            });
        }

        let plan = assemble(&map, &backend, &config).unwrap();
        let results = backend.batch(&plan.commands, None).unwrap();
        map.remove(a.instance_id());

        let stored = reconcile(&mut map, plan, &results);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key(), "crates/2");
        assert_eq!(a.read().id, None);
        assert!(!map.contains_key("crates/1"));
        assert!(map.contains_key("crates/2"));
    }
}
