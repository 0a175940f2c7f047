//! Entity handles shared between the application and the session.

use docsession_codec::{CodecResult, Document, Entity};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A shared handle to an entity instance.
///
/// The session keeps its own clone of the handle while the entity is
/// tracked. Two handles denote the same instance when [`Tracked::ptr_eq`]
/// holds; the identity map relies on that, not on field equality.
pub struct Tracked<T>(Arc<RwLock<T>>);

impl<T> Tracked<T> {
    /// Wraps a new, untracked entity.
    pub fn new(entity: T) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    /// Locks the entity for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    /// Locks the entity for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    /// Returns true if both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn instance_id(&self) -> InstanceId {
        InstanceId(Arc::as_ptr(&self.0) as *const () as usize)
    }

    pub(crate) fn from_shared(shared: Arc<RwLock<T>>) -> Self {
        Self(shared)
    }
}

impl<T: Entity> Tracked<T> {
    pub(crate) fn erase(&self) -> ErasedEntity {
        ErasedEntity {
            object: self.0.clone(),
            any: self.0.clone(),
        }
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&*self.0.read()).finish()
    }
}

/// Address of a tracked allocation.
///
/// Stable while the session holds a clone of the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct InstanceId(usize);

/// Type-erased view of an entity, enough for change tracking.
pub(crate) trait TrackedObject: Send + Sync {
    fn type_tag(&self) -> &'static str;
    fn identity_property(&self) -> Option<&'static str>;
    fn identity(&self) -> Option<String>;
    fn set_identity(&self, key: &str);
    fn to_document(&self) -> CodecResult<Document>;
}

impl<T: Entity> TrackedObject for RwLock<T> {
    fn type_tag(&self) -> &'static str {
        T::TYPE_TAG
    }

    fn identity_property(&self) -> Option<&'static str> {
        T::IDENTITY_PROPERTY
    }

    fn identity(&self) -> Option<String> {
        self.read().identity()
    }

    fn set_identity(&self, key: &str) {
        self.write().set_identity(key);
    }

    fn to_document(&self) -> CodecResult<Document> {
        self.read().to_document()
    }
}

/// An entity with its concrete type erased.
#[derive(Clone)]
pub(crate) struct ErasedEntity {
    pub(crate) object: Arc<dyn TrackedObject>,
    any: Arc<dyn Any + Send + Sync>,
}

impl ErasedEntity {
    pub(crate) fn instance_id(&self) -> InstanceId {
        InstanceId(Arc::as_ptr(&self.object) as *const () as usize)
    }

    /// Recovers the typed handle, if the entity is a `T`.
    pub(crate) fn downcast<T: Entity>(&self) -> Option<Tracked<T>> {
        Arc::clone(&self.any)
            .downcast::<RwLock<T>>()
            .ok()
            .map(Tracked::from_shared)
    }
}

impl fmt::Debug for ErasedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedEntity")
            .field("type_tag", &self.object.type_tag())
            .field("identity", &self.object.identity())
            .finish()
    }
}
