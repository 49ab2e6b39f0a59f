//! Error types for the graph cache and unit-of-work layer.

use crate::types::{EntityType, Id};
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to encode {entity_type} {id}: {reason}")]
    Encode {
        entity_type: EntityType,
        id: Id,
        reason: String,
    },

    #[error("Failed to decode {entity_type}: {reason}")]
    Decode {
        entity_type: EntityType,
        reason: String,
    },

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Schema construction errors
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Entity type registered twice: {0}")]
    DuplicateType(EntityType),

    #[error("Entity type not registered: {0}")]
    UnknownType(EntityType),

    #[error("Navigation {owner}.{field} targets unregistered type {target}")]
    UnknownTarget {
        owner: EntityType,
        field: &'static str,
        target: EntityType,
    },

    #[error("Schema declares no aggregate root type")]
    NoAggregateRoot,

    #[error("Entity type {entity_type} declares more than one link to a parent ({first}, {second})")]
    MultipleParentLinks {
        entity_type: EntityType,
        first: &'static str,
        second: &'static str,
    },
}

/// Errors surfaced by contexts and repositories.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("No repository registered for entity type {0}")]
    RepositoryNotFound(EntityType),

    #[error("{entity_type} {id} is not part of the current aggregate (root: {})", root.map(|r| r.to_string()).unwrap_or_else(|| "none".to_string()))]
    InvalidAggregateScope {
        entity_type: EntityType,
        id: Id,
        root: Option<Id>,
    },

    #[error("Loading navigation {navigation} failed: {reason}")]
    LoadingFailed {
        navigation: String,
        reason: String,
    },

    #[error("Property {property} of {entity_type} is not indexed by this repository")]
    PropertyNotIndexed {
        entity_type: EntityType,
        property: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Context provider has been dropped")]
    ProviderDropped,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for PersistenceError {
    fn from(err: config::ConfigError) -> Self {
        PersistenceError::ConfigError(err.to_string())
    }
}

/// Error reported by a change listener. Logged by the propagation pipeline,
/// never returned to the committing caller.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Listener {listener} failed: {reason}")]
    Failed {
        listener: &'static str,
        reason: String,
    },

    #[error("Listener {listener} panicked: {message}")]
    Panicked {
        listener: &'static str,
        message: String,
    },
}

pub type Result<T, E = PersistenceError> = std::result::Result<T, E>;
