//! Sled-backed row store

use crate::error::StorageError;
use crate::store::{row_key, type_prefix, Store, WriteBatch, WriteOp};
use crate::types::{EntityType, Id};
use std::path::Path;

fn backend(action: &str, err: sled::Error) -> StorageError {
    StorageError::Backend(format!("{}: {}", action, err))
}

/// Sled implementation of [`Store`]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open (or create) a sled database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open sled database: {}", e),
            ))
        })?;
        Ok(Self { db })
    }

    /// A database that lives only as long as this handle.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| backend("Failed to open temporary database", e))?;
        Ok(Self { db })
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    pub fn contains(&self, entity_type: EntityType, id: Id) -> Result<bool, StorageError> {
        self.db
            .contains_key(row_key(entity_type, id))
            .map_err(|e| backend("Failed to check row existence", e))
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db
            .flush()
            .map_err(|e| backend("Failed to flush database", e))?;
        Ok(())
    }
}

impl Store for SledStore {
    fn get(&self, entity_type: EntityType, id: Id) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self
            .db
            .get(row_key(entity_type, id))
            .map_err(|e| backend("Failed to get row", e))?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn scan(&self, entity_type: EntityType) -> Result<Vec<(Id, Vec<u8>)>, StorageError> {
        let prefix = type_prefix(entity_type);
        let mut rows = Vec::new();
        for item in self.db.scan_prefix(&prefix) {
            let (key, value) = item.map_err(|e| backend("Failed to iterate rows", e))?;
            // Longer type names sharing this prefix cannot match: the separator is part of it.
            let Some(id) = Id::from_slice(&key[prefix.len()..]) else {
                return Err(StorageError::Decode {
                    entity_type,
                    reason: format!("malformed row key of length {}", key.len()),
                });
            };
            rows.push((id, value.to_vec()));
        }
        Ok(rows)
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut sled_batch = sled::Batch::default();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put {
                    entity_type,
                    id,
                    bytes,
                } => sled_batch.insert(row_key(entity_type, id), bytes),
                WriteOp::Delete { entity_type, id } => sled_batch.remove(row_key(entity_type, id)),
            }
        }
        self.db
            .apply_batch(sled_batch)
            .map_err(|e| backend("Failed to apply batch", e))?;
        Ok(())
    }
}
