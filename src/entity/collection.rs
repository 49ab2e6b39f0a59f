//! Lazily populated collection navigation.

use crate::concurrency::{LoadGate, LoadingStatus};
use crate::entity::{Entity, EntityRef};
use crate::types::Id;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

struct CollectionState<C> {
    gate: LoadGate,
    items: RwLock<Vec<EntityRef<C>>>,
}

/// Collection navigation of an entity.
///
/// Items are unique by id: inserting an item whose id is already present is a
/// no-op, which makes repeated population idempotent.
pub struct Collection<C> {
    state: Arc<CollectionState<C>>,
}

impl<C> Default for Collection<C> {
    fn default() -> Self {
        Collection {
            state: Arc::new(CollectionState {
                gate: LoadGate::new(),
                items: RwLock::new(Vec::new()),
            }),
        }
    }
}

/// Cloning detaches: the clone starts `Unloaded` and empty.
impl<C> Clone for Collection<C> {
    fn clone(&self) -> Self {
        Collection::default()
    }
}

impl<C: Entity> Collection<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> LoadingStatus {
        self.state.gate.status()
    }

    pub fn is_loaded(&self) -> bool {
        self.status() == LoadingStatus::Loaded
    }

    /// Snapshot of the current items.
    pub fn items(&self) -> Vec<EntityRef<C>> {
        self.state.items.read().clone()
    }

    pub fn ids(&self) -> Vec<Id> {
        self.state.items.read().iter().map(|item| item.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.state.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.items.read().is_empty()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.find(id).is_some()
    }

    pub fn find(&self, id: Id) -> Option<EntityRef<C>> {
        self.state
            .items
            .read()
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    /// Append unless an item with the same id is already present.
    pub fn push(&self, item: EntityRef<C>) -> bool {
        let id = item.id();
        let mut items = self.state.items.write();
        if items.iter().any(|existing| existing.id() == id) {
            return false;
        }
        items.push(item);
        true
    }

    pub fn remove(&self, id: Id) -> Option<EntityRef<C>> {
        let mut items = self.state.items.write();
        let position = items.iter().position(|item| item.id() == id)?;
        Some(items.remove(position))
    }

    pub fn mark_loaded(&self) {
        self.state.gate.mark_loaded();
    }

    pub(crate) fn gate(&self) -> &LoadGate {
        &self.state.gate
    }

    /// Second handle onto the same collection state.
    pub(crate) fn share(&self) -> Collection<C> {
        Collection {
            state: Arc::clone(&self.state),
        }
    }
}

impl<C: Entity> fmt::Debug for Collection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("type", &C::TYPE)
            .field("status", &self.status())
            .field("len", &self.len())
            .finish()
    }
}
