//! Entity cache: `id -> entity` plus its foreign-key index.

use crate::entity::{downcast, Entity, EntityRef, ErasedRef};
use crate::repository::index::ForeignKeyIndex;
use crate::types::{EntityType, Id};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;

/// Type-erased view of an [`EntityCache`], used by change propagation and
/// aggregate caches that hold many types side by side.
pub trait ErasedCache: Send + Sync {
    fn entity_type(&self) -> EntityType;

    fn get(&self, id: Id) -> Option<ErasedRef>;

    fn contains(&self, id: Id) -> bool;

    /// Insert unless present. Returns false on a type mismatch or duplicate id.
    fn insert(&self, entity: ErasedRef) -> bool;

    fn remove(&self, id: Id) -> Option<ErasedRef>;

    /// Re-read the foreign keys of a cached entity after an in-place update.
    fn reindex(&self, id: Id);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_any(&self) -> &dyn Any;
}

pub struct EntityCache<T> {
    entries: RwLock<HashMap<Id, EntityRef<T>>>,
    index: RwLock<ForeignKeyIndex>,
}

impl<T: Entity> EntityCache<T> {
    pub fn new(indexed: Vec<&'static str>) -> Self {
        EntityCache {
            entries: RwLock::new(HashMap::new()),
            index: RwLock::new(ForeignKeyIndex::new(indexed)),
        }
    }

    pub fn get(&self, id: Id) -> Option<EntityRef<T>> {
        self.entries.read().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<EntityRef<T>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn is_indexed(&self, property: &str) -> bool {
        self.index.read().is_indexed(property)
    }

    /// Entities whose `property` equals `value`; `None` when not indexed.
    pub fn by_property(&self, property: &str, value: Id) -> Option<Vec<EntityRef<T>>> {
        let ids = self.index.read().lookup(property, value)?;
        let entries = self.entries.read();
        Some(ids.iter().filter_map(|id| entries.get(id).cloned()).collect())
    }

    pub fn add(&self, entity: EntityRef<T>) -> bool {
        let id = entity.id();
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            return false;
        }
        let keys = self.keys_of(&entity);
        entries.insert(id, entity);
        self.index.write().insert(id, keys);
        true
    }

    pub fn take(&self, id: Id) -> Option<EntityRef<T>> {
        let removed = self.entries.write().remove(&id);
        if removed.is_some() {
            self.index.write().remove(id);
        }
        removed
    }

    /// Drop every entry, keeping the indexed properties.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        self.index.write().clear();
        entries.clear();
    }

    fn keys_of(&self, entity: &EntityRef<T>) -> Vec<(&'static str, Id)> {
        let properties = self.index.read().properties().to_vec();
        let guard = entity.read();
        properties
            .into_iter()
            .filter_map(|property| guard.foreign_key(property).map(|key| (property, key)))
            .collect()
    }
}

impl<T: Entity> ErasedCache for EntityCache<T> {
    fn entity_type(&self) -> EntityType {
        T::TYPE
    }

    fn get(&self, id: Id) -> Option<ErasedRef> {
        EntityCache::get(self, id).map(|e| e.erase())
    }

    fn contains(&self, id: Id) -> bool {
        self.entries.read().contains_key(&id)
    }

    fn insert(&self, entity: ErasedRef) -> bool {
        match downcast::<T>(entity.as_ref()) {
            Some(entity) => self.add(entity),
            None => false,
        }
    }

    fn remove(&self, id: Id) -> Option<ErasedRef> {
        self.take(id).map(|e| e.erase())
    }

    fn reindex(&self, id: Id) {
        let Some(entity) = EntityCache::get(self, id) else {
            return;
        };
        let keys = self.keys_of(&entity);
        self.index.write().insert(id, keys);
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Typed view of an erased cache.
pub fn typed<T: Entity>(cache: &dyn ErasedCache) -> Option<&EntityCache<T>> {
    cache.as_any().downcast_ref::<EntityCache<T>>()
}
