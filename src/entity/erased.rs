//! Type-erased entity handles
//!
//! The change tracker, the caches and the propagation pipeline hold entities
//! of many types side by side. They do so through `ErasedRef`, an object-safe
//! view of an [`EntityRef`] that exposes exactly the operations those layers
//! need.

use crate::concurrency::LoadingStatus;
use crate::entity::{navigations_of, Entity, EntityRef};
use crate::error::StorageError;
use crate::repository::loader::NavigationLoader;
use crate::types::{EntityType, Id};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

pub type ErasedRef = Arc<dyn AnyEntity>;

pub trait AnyEntity: Send + Sync + 'static {
    fn entity_type(&self) -> EntityType;

    fn id(&self) -> Id;

    fn as_any(&self) -> &dyn Any;

    fn encode(&self) -> Result<Vec<u8>, StorageError>;

    fn foreign_key(&self, property: &str) -> Option<Id>;

    fn set_foreign_key(&self, property: &str, value: Option<Id>) -> bool;

    /// Same underlying instance, not merely the same id.
    fn same_instance(&self, other: &dyn AnyEntity) -> bool;

    /// A detached value copy: same field values, fresh navigation state.
    fn value_copy(&self) -> ErasedRef;

    /// Overwrite field values from `other` in place, keeping this instance's
    /// identity and its navigation state. Returns false on a type mismatch.
    fn assign_from(&self, other: &dyn AnyEntity) -> bool;

    /// Items of collection navigations, optionally only aggregate members.
    fn collection_children(&self, aggregate_only: bool) -> Vec<(&'static str, ErasedRef)>;

    /// Resolved scalar navigation targets.
    fn referenced(&self) -> Vec<(&'static str, ErasedRef)>;

    /// Resolve scalar navigations through `lookup(target_type, key)`.
    fn resolve_references(&self, lookup: &dyn Fn(EntityType, Id) -> Option<ErasedRef>);

    fn attach_child(&self, navigation: &str, child: &dyn AnyEntity) -> bool;

    fn detach_child(&self, navigation: &str, child: Id) -> bool;

    fn collection_status(&self, navigation: &str) -> Option<LoadingStatus>;

    fn mark_collections_loaded(&self);

    fn load_navigations(&self, loader: &NavigationLoader);
}

pub fn downcast<T: Entity>(entity: &dyn AnyEntity) -> Option<EntityRef<T>> {
    entity.as_any().downcast_ref::<EntityRef<T>>().cloned()
}

impl<T: Entity> AnyEntity for EntityRef<T> {
    fn entity_type(&self) -> EntityType {
        T::TYPE
    }

    fn id(&self) -> Id {
        EntityRef::id(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn encode(&self) -> Result<Vec<u8>, StorageError> {
        let guard = self.read();
        bincode::serialize(&*guard).map_err(|e| StorageError::Encode {
            entity_type: T::TYPE,
            id: guard.id(),
            reason: e.to_string(),
        })
    }

    fn foreign_key(&self, property: &str) -> Option<Id> {
        self.read().foreign_key(property)
    }

    fn set_foreign_key(&self, property: &str, value: Option<Id>) -> bool {
        self.write().set_foreign_key(property, value)
    }

    fn same_instance(&self, other: &dyn AnyEntity) -> bool {
        downcast::<T>(other).is_some_and(|other| self.ptr_eq(&other))
    }

    fn value_copy(&self) -> ErasedRef {
        Arc::new(EntityRef::new(self.snapshot()))
    }

    fn assign_from(&self, other: &dyn AnyEntity) -> bool {
        let Some(other) = downcast::<T>(other) else {
            return false;
        };
        if self.ptr_eq(&other) {
            return true;
        }

        let mut fresh = other.snapshot();
        let navigations = navigations_of::<T>();
        let mut current = self.write();
        for navigation in navigations.references() {
            navigation.carry_over(&current, &fresh);
        }
        for navigation in navigations.collections() {
            navigation.transplant(&mut current, &mut fresh);
        }
        *current = fresh;
        true
    }

    fn collection_children(&self, aggregate_only: bool) -> Vec<(&'static str, ErasedRef)> {
        let guard = self.read();
        let mut children = Vec::new();
        for navigation in navigations_of::<T>().collections() {
            let relationship = navigation.relationship();
            if aggregate_only && !relationship.aggregate_member {
                continue;
            }
            for child in navigation.children(&guard) {
                children.push((relationship.field, child));
            }
        }
        children
    }

    fn referenced(&self) -> Vec<(&'static str, ErasedRef)> {
        let guard = self.read();
        navigations_of::<T>()
            .references()
            .iter()
            .filter_map(|navigation| {
                navigation
                    .resolved(&guard)
                    .map(|target| (navigation.relationship().field, target))
            })
            .collect()
    }

    fn resolve_references(&self, lookup: &dyn Fn(EntityType, Id) -> Option<ErasedRef>) {
        let guard = self.read();
        for navigation in navigations_of::<T>().references() {
            let Some(key) = navigation.key(&guard) else {
                continue;
            };
            if let Some(target) = lookup(navigation.relationship().target, key) {
                navigation.link(&guard, target.as_ref());
            }
        }
    }

    fn attach_child(&self, navigation: &str, child: &dyn AnyEntity) -> bool {
        let guard = self.read();
        navigations_of::<T>()
            .collection_named(navigation)
            .is_some_and(|nav| nav.attach(&guard, child))
    }

    fn detach_child(&self, navigation: &str, child: Id) -> bool {
        let guard = self.read();
        navigations_of::<T>()
            .collection_named(navigation)
            .is_some_and(|nav| nav.detach(&guard, child))
    }

    fn collection_status(&self, navigation: &str) -> Option<LoadingStatus> {
        let guard = self.read();
        navigations_of::<T>()
            .collection_named(navigation)
            .map(|nav| nav.status(&guard))
    }

    fn mark_collections_loaded(&self) {
        let guard = self.read();
        for navigation in navigations_of::<T>().collections() {
            navigation.mark_loaded(&guard);
        }
    }

    fn load_navigations(&self, loader: &NavigationLoader) {
        loader.load(self);
    }
}

/// Every entity reachable from `root` through aggregate-member collections,
/// `root` first. Only collections that are already populated are followed.
pub fn aggregate_members(root: &ErasedRef) -> Vec<ErasedRef> {
    let mut members = Vec::new();
    let mut visited = HashSet::new();
    let mut pending = vec![Arc::clone(root)];
    while let Some(entity) = pending.pop() {
        if !visited.insert((entity.entity_type(), entity.id())) {
            continue;
        }
        for (_, child) in entity.collection_children(true) {
            pending.push(child);
        }
        members.push(entity);
    }
    members
}
