//! Scalar navigation: a foreign key plus its lazily resolved target.

use crate::entity::{Entity, EntityRef};
use crate::types::Id;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Serialized as the bare foreign key; the resolved target is runtime state.
pub struct Reference<T> {
    id: Option<Id>,
    target: Arc<Mutex<Option<EntityRef<T>>>>,
}

impl<T> Default for Reference<T> {
    fn default() -> Self {
        Reference {
            id: None,
            target: Arc::new(Mutex::new(None)),
        }
    }
}

/// Cloning keeps the foreign key and drops the resolved target.
impl<T> Clone for Reference<T> {
    fn clone(&self) -> Self {
        Reference {
            id: self.id,
            target: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T: Entity> Reference<T> {
    pub fn to(id: Id) -> Self {
        Reference {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<Id> {
        self.id
    }

    /// The resolved target, if it has been loaded and still matches the key.
    pub fn get(&self) -> Option<EntityRef<T>> {
        let target = self.target.lock();
        match (&*target, self.id) {
            (Some(entity), Some(id)) if entity.id() == id => Some(entity.clone()),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.get().is_some()
    }

    /// Point at `target` (or clear), updating the foreign key.
    pub fn set(&mut self, target: Option<&EntityRef<T>>) {
        self.id = target.map(|t| t.id());
        *self.target.lock() = target.cloned();
    }

    /// Change the foreign key; a resolved target that no longer matches is dropped.
    pub fn set_id(&mut self, id: Option<Id>) {
        if self.id != id {
            self.id = id;
            *self.target.lock() = None;
        }
    }

    pub(crate) fn resolve(&self, target: EntityRef<T>) {
        *self.target.lock() = Some(target);
    }

    pub(crate) fn resolved_raw(&self) -> Option<EntityRef<T>> {
        self.target.lock().clone()
    }

    pub(crate) fn share(&self) -> Reference<T> {
        Reference {
            id: self.id,
            target: Arc::clone(&self.target),
        }
    }
}

impl<T> Serialize for Reference<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Reference<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = Option::<Id>::deserialize(deserializer)?;
        Ok(Reference {
            id,
            target: Arc::new(Mutex::new(None)),
        })
    }
}

impl<T: Entity> fmt::Debug for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("type", &T::TYPE)
            .field("id", &self.id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
