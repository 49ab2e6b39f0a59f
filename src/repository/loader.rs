//! Lazy navigation loader
//!
//! Populates the navigations of an entity through the repositories the
//! active context resolves. Scalar navigations are resolved by id; collection
//! navigations go through their [`LoadGate`](crate::concurrency::LoadGate),
//! so each is loaded at most once and a cycle back into a collection that is
//! already loading on this thread stops immediately.

use crate::concurrency::GateEntry;
use crate::context::Context;
use crate::entity::{navigations_of, Collection, Entity, EntityRef, ErasedRef, Reference};
use crate::error::PersistenceError;
use crate::types::{EntityType, Id};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct NavigationLoader {
    context: Arc<Context>,
}

impl NavigationLoader {
    pub fn new(context: Arc<Context>) -> Self {
        NavigationLoader { context }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Load every navigation of `entity` under the loader's context.
    pub fn load<T: Entity>(&self, entity: &EntityRef<T>) {
        let _scope = self.context.scope();
        let navigations = navigations_of::<T>();
        for navigation in navigations.references() {
            navigation.load(entity, self);
        }
        for navigation in navigations.collections() {
            navigation.load(entity, self);
        }
    }

    pub fn load_erased(&self, entity: &ErasedRef) {
        entity.load_navigations(self);
    }

    pub fn load_reference<T: Entity>(
        &self,
        owner_type: EntityType,
        owner_id: Id,
        field: &'static str,
        reference: &Reference<T>,
    ) {
        let Some(key) = reference.id() else {
            return;
        };
        if key == owner_id {
            // The key is the owner's own identity; the owner is the target.
            trace!(owner_type = %owner_type, field, "Skipping self-keyed navigation");
            return;
        }
        if reference.is_resolved() {
            return;
        }

        let repository = match self.context.repository::<T>() {
            Ok(repository) => repository,
            Err(e) => {
                warn!(
                    owner_type = %owner_type,
                    field,
                    target = %T::TYPE,
                    error = %e,
                    "No repository for navigation target, leaving it unset"
                );
                return;
            }
        };
        match repository.get_by_id(key) {
            Ok(Some(target)) => reference.resolve(target),
            Ok(None) => debug!(owner_type = %owner_type, field, id = %key, "Navigation target not found"),
            Err(e) => warn!(
                owner_type = %owner_type,
                field,
                id = %key,
                error = %e,
                "Failed to resolve navigation"
            ),
        }
    }

    pub fn load_collection<C: Entity>(
        &self,
        owner_type: EntityType,
        owner_id: Id,
        field: &'static str,
        foreign_key: &'static str,
        collection: &Collection<C>,
    ) {
        let ticket = match collection.gate().enter(false) {
            GateEntry::Acquired(ticket) => ticket,
            GateEntry::Loaded | GateEntry::Failed | GateEntry::Reentrant => return,
        };

        let loaded = self
            .context
            .repository::<C>()
            .and_then(|repository| repository.load_by_property(foreign_key, owner_id));
        match loaded {
            Ok(items) => {
                let count = items.len();
                for item in items {
                    collection.push(item);
                }
                ticket.complete();
                trace!(owner_type = %owner_type, field, count, "Loaded collection");
            }
            Err(e) => {
                let error = PersistenceError::LoadingFailed {
                    navigation: format!("{}.{}", owner_type, field),
                    reason: e.to_string(),
                };
                warn!(owner_id = %owner_id, error = %error, "Collection left empty");
                ticket.fail();
            }
        }
    }
}
