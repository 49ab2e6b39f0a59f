//! In-memory row store for tests and transient tooling.

use crate::error::StorageError;
use crate::store::{Store, WriteBatch, WriteOp};
use crate::types::{EntityType, Id};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<(EntityType, Id), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl Store for MemoryStore {
    fn get(&self, entity_type: EntityType, id: Id) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.rows.read().get(&(entity_type, id)).cloned())
    }

    fn scan(&self, entity_type: EntityType) -> Result<Vec<(Id, Vec<u8>)>, StorageError> {
        Ok(self
            .rows
            .read()
            .range((entity_type, Id::nil())..)
            .take_while(|((ty, _), _)| *ty == entity_type)
            .map(|((_, id), bytes)| (*id, bytes.clone()))
            .collect())
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut rows = self.rows.write();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put {
                    entity_type,
                    id,
                    bytes,
                } => {
                    rows.insert((entity_type, id), bytes);
                }
                WriteOp::Delete { entity_type, id } => {
                    rows.remove(&(entity_type, id));
                }
            }
        }
        Ok(())
    }
}
