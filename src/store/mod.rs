//! Durable storage boundary
//!
//! The cache layer talks to storage only through [`Store`]: rows are opaque
//! byte blobs addressed by `(EntityType, Id)`, and every commit is applied as
//! one atomic [`WriteBatch`].

pub mod memory;
pub mod persistence;

pub use memory::MemoryStore;
pub use persistence::SledStore;

use crate::error::StorageError;
use crate::types::{EntityType, Id};

/// One row operation of a commit.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put {
        entity_type: EntityType,
        id: Id,
        bytes: Vec<u8>,
    },
    Delete {
        entity_type: EntityType,
        id: Id,
    },
}

/// Ordered set of row operations applied atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, entity_type: EntityType, id: Id, bytes: Vec<u8>) {
        self.ops.push(WriteOp::Put {
            entity_type,
            id,
            bytes,
        });
    }

    pub fn delete(&mut self, entity_type: EntityType, id: Id) {
        self.ops.push(WriteOp::Delete { entity_type, id });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Durable row store.
pub trait Store: Send + Sync {
    fn get(&self, entity_type: EntityType, id: Id) -> Result<Option<Vec<u8>>, StorageError>;

    /// Every row of one type, in key order.
    fn scan(&self, entity_type: EntityType) -> Result<Vec<(Id, Vec<u8>)>, StorageError>;

    /// Apply all operations or none.
    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError>;

    fn count(&self, entity_type: EntityType) -> Result<usize, StorageError> {
        Ok(self.scan(entity_type)?.len())
    }
}

/// Row key: type name, a separator, then the 16 id bytes.
pub(crate) fn row_key(entity_type: EntityType, id: Id) -> Vec<u8> {
    let mut key = type_prefix(entity_type);
    key.extend_from_slice(id.as_bytes());
    key
}

pub(crate) fn type_prefix(entity_type: EntityType) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(entity_type.name().len() + 17);
    prefix.extend_from_slice(entity_type.name().as_bytes());
    prefix.push(b':');
    prefix
}
