//! Entities and their navigations
//!
//! An entity is a plain serde struct with a stable `Id`. Scalar navigations
//! are [`Reference`] fields (the foreign key plus a lazily resolved target),
//! collection navigations are [`Collection`] fields guarded by a
//! [`LoadingStatus`](crate::concurrency::LoadingStatus). Navigation state is
//! never serialized and is reset by `Clone`, so cloning an entity always
//! yields a detached value copy.

pub mod collection;
pub mod erased;
pub mod join;
pub mod navigation;
pub mod reference;

pub use collection::Collection;
pub use erased::{downcast, AnyEntity, ErasedRef};
pub use join::JoinView;
pub use navigation::{navigations_of, CollectionNav, Navigations, ReferenceNav};
pub use reference::Reference;

use crate::types::{EntityType, Id};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A persisted object with a stable identity.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: EntityType;

    fn id(&self) -> Id;

    fn set_id(&mut self, id: Id);

    /// Relationship table of this type. Built once per process, see [`navigations_of`].
    fn navigations() -> Navigations<Self> {
        Navigations::new()
    }

    /// Value of a foreign-key property. Reference navigations answer for their
    /// own foreign key; override for plain `Option<Id>` key fields.
    fn foreign_key(&self, property: &str) -> Option<Id> {
        navigations_of::<Self>().reference_key(self, property)
    }

    /// Set a foreign-key property. Returns false for unknown properties.
    fn set_foreign_key(&mut self, property: &str, value: Option<Id>) -> bool {
        navigations_of::<Self>().set_reference_key(self, property, value)
    }
}

/// Shared handle to one entity instance.
///
/// Identity is the allocation: two handles are the same instance only when
/// [`EntityRef::ptr_eq`] holds, regardless of their ids.
pub struct EntityRef<T>(Arc<RwLock<T>>);

impl<T> Clone for EntityRef<T> {
    fn clone(&self) -> Self {
        EntityRef(Arc::clone(&self.0))
    }
}

impl<T: Entity> EntityRef<T> {
    pub fn new(value: T) -> Self {
        EntityRef(Arc::new(RwLock::new(value)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    pub fn id(&self) -> Id {
        self.0.read().id()
    }

    /// Detached value copy of the current state.
    pub fn snapshot(&self) -> T {
        self.0.read().clone()
    }

    pub fn ptr_eq(&self, other: &EntityRef<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn erase(&self) -> ErasedRef {
        Arc::new(self.clone())
    }
}

impl<T: Entity> fmt::Debug for EntityRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(guard) => write!(f, "EntityRef<{}>({})", T::TYPE, guard.id()),
            None => write!(f, "EntityRef<{}>(<locked>)", T::TYPE),
        }
    }
}
