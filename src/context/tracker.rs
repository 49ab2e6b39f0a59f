//! Change tracker: identity map and per-entry state of one unit of work.

use crate::entity::ErasedRef;
use crate::error::StorageError;
use crate::types::{EntityType, Id};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryState {
    Added,
    Unchanged,
    Modified,
    Deleted,
}

struct Entry {
    entity: ErasedRef,
    state: EntryState,
    /// Encoding as last read from or written to storage.
    snapshot: Option<Vec<u8>>,
    sequence: u64,
}

/// A tracked entry with pending work.
#[derive(Clone)]
pub struct PendingChange {
    pub state: EntryState,
    pub entity: ErasedRef,
}

impl PendingChange {
    pub fn entity_type(&self) -> EntityType {
        self.entity.entity_type()
    }

    pub fn id(&self) -> Id {
        self.entity.id()
    }
}

impl std::fmt::Debug for PendingChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {} {}", self.state, self.entity_type(), self.id())
    }
}

/// Each `(type, id)` is tracked at most once.
#[derive(Default)]
pub struct ChangeTracker {
    entries: HashMap<(EntityType, Id), Entry>,
    next_sequence: u64,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, entity_type: EntityType, id: Id) -> Option<(ErasedRef, EntryState)> {
        self.entries
            .get(&(entity_type, id))
            .map(|entry| (Arc::clone(&entry.entity), entry.state))
    }

    pub fn state(&self, entity_type: EntityType, id: Id) -> Option<EntryState> {
        self.entries.get(&(entity_type, id)).map(|entry| entry.state)
    }

    /// Track an entity read from storage. When the key is already tracked the
    /// existing instance is returned and `entity` is discarded.
    pub fn attach_unchanged(&mut self, entity: ErasedRef) -> Result<ErasedRef, StorageError> {
        let key = (entity.entity_type(), entity.id());
        if let Some(existing) = self.entries.get(&key) {
            return Ok(Arc::clone(&existing.entity));
        }
        let snapshot = entity.encode()?;
        let sequence = self.next();
        self.entries.insert(
            key,
            Entry {
                entity: Arc::clone(&entity),
                state: EntryState::Unchanged,
                snapshot: Some(snapshot),
                sequence,
            },
        );
        Ok(entity)
    }

    /// Stage a new entity. Re-staging a tracked key is a no-op.
    pub fn stage_added(&mut self, entity: ErasedRef) -> bool {
        let key = (entity.entity_type(), entity.id());
        if self.entries.contains_key(&key) {
            return false;
        }
        let sequence = self.next();
        self.entries.insert(
            key,
            Entry {
                entity,
                state: EntryState::Added,
                snapshot: None,
                sequence,
            },
        );
        true
    }

    pub fn mark_modified(&mut self, entity_type: EntityType, id: Id) -> bool {
        match self.entries.get_mut(&(entity_type, id)) {
            Some(entry) if entry.state == EntryState::Unchanged => {
                entry.state = EntryState::Modified;
                true
            }
            _ => false,
        }
    }

    /// Stage a deletion. An `Added` entry is simply dropped, since nothing
    /// was persisted for it. Returns the state the entry ends up in.
    pub fn mark_deleted(&mut self, entity: &ErasedRef) -> Result<Option<EntryState>, StorageError> {
        let key = (entity.entity_type(), entity.id());
        match self.entries.get(&key).map(|e| e.state) {
            Some(EntryState::Added) => {
                self.entries.remove(&key);
                Ok(None)
            }
            Some(_) => {
                let sequence = self.next();
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.state = EntryState::Deleted;
                    entry.sequence = sequence;
                }
                Ok(Some(EntryState::Deleted))
            }
            None => {
                let snapshot = entity.encode()?;
                let sequence = self.next();
                self.entries.insert(
                    key,
                    Entry {
                        entity: Arc::clone(entity),
                        state: EntryState::Deleted,
                        snapshot: Some(snapshot),
                        sequence,
                    },
                );
                Ok(Some(EntryState::Deleted))
            }
        }
    }

    pub fn detach(&mut self, entity_type: EntityType, id: Id) -> bool {
        self.entries.remove(&(entity_type, id)).is_some()
    }

    /// Flag `Unchanged` entries whose encoding differs from their snapshot.
    pub fn detect_changes(&mut self) -> Result<usize, StorageError> {
        let mut modified = 0;
        let mut stamped = Vec::new();
        for (key, entry) in self.entries.iter_mut() {
            if entry.state != EntryState::Unchanged {
                continue;
            }
            let current = entry.entity.encode()?;
            if entry.snapshot.as_deref() != Some(current.as_slice()) {
                entry.state = EntryState::Modified;
                stamped.push(*key);
                modified += 1;
            }
        }
        for key in stamped {
            let sequence = self.next();
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.sequence = sequence;
            }
        }
        Ok(modified)
    }

    /// Pending entries in the order they were staged.
    pub fn pending(&self) -> Vec<PendingChange> {
        let mut pending: Vec<(&Entry, u64)> = self
            .entries
            .values()
            .filter(|entry| entry.state != EntryState::Unchanged)
            .map(|entry| (entry, entry.sequence))
            .collect();
        pending.sort_by_key(|(_, sequence)| *sequence);
        pending
            .into_iter()
            .map(|(entry, _)| PendingChange {
                state: entry.state,
                entity: Arc::clone(&entry.entity),
            })
            .collect()
    }

    /// Drop a pending change without persisting it: `Added` entries are
    /// detached, others return to `Unchanged` at their current value.
    pub fn revert(&mut self, entity_type: EntityType, id: Id) -> Result<(), StorageError> {
        let key = (entity_type, id);
        match self.entries.get(&key).map(|e| e.state) {
            Some(EntryState::Added) => {
                self.entries.remove(&key);
            }
            Some(_) => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.snapshot = Some(entry.entity.encode()?);
                    entry.state = EntryState::Unchanged;
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Mark everything committed: deletions leave the tracker, the rest become
    /// `Unchanged` at their current encoding.
    pub fn accept_all(&mut self) -> Result<(), StorageError> {
        self.entries.retain(|_, entry| entry.state != EntryState::Deleted);
        for entry in self.entries.values_mut() {
            if entry.state != EntryState::Unchanged {
                entry.snapshot = Some(entry.entity.encode()?);
                entry.state = EntryState::Unchanged;
            }
        }
        Ok(())
    }

    /// Every tracked, not deleted entity of `entity_type`.
    pub fn of_type(&self, entity_type: EntityType) -> Vec<(ErasedRef, EntryState)> {
        let mut found: Vec<(&Entry, ErasedRef)> = self
            .entries
            .iter()
            .filter(|((ty, _), entry)| *ty == entity_type && entry.state != EntryState::Deleted)
            .map(|(_, entry)| (entry, Arc::clone(&entry.entity)))
            .collect();
        found.sort_by_key(|(entry, _)| entry.sequence);
        found
            .into_iter()
            .map(|(entry, entity)| (entity, entry.state))
            .collect()
    }

    /// Every tracked entity that is not staged for deletion.
    pub fn live_entities(&self) -> Vec<ErasedRef> {
        self.entries
            .values()
            .filter(|entry| entry.state != EntryState::Deleted)
            .map(|entry| Arc::clone(&entry.entity))
            .collect()
    }
}
