//! Configuration
//!
//! Layered configuration: built-in defaults, the global file, workspace files
//! and `GRAPHCACHE__SECTION__KEY` environment overrides, merged by the
//! `config` crate and deserialized into [`GraphCacheConfig`].

mod merge;
mod sources;

use crate::error::{PersistenceError, StorageError};
use crate::logging::{self, LoggingConfig};
use crate::store::{MemoryStore, SledStore, Store};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphCacheConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sled,
    Memory,
}

/// Durable store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Sled database directory; resolved under the user data directory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Open a throwaway sled database instead of `path`.
    #[serde(default)]
    pub temporary: bool,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Sled
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
            temporary: false,
        }
    }
}

impl StorageConfig {
    /// The sled directory this configuration points at.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| {
            directories::ProjectDirs::from("", "", "graphcache")
                .map(|dirs| dirs.data_dir().join("store"))
        })
    }

    pub fn open(&self) -> Result<Arc<dyn Store>, StorageError> {
        match self.backend {
            StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StorageBackend::Sled if self.temporary => Ok(Arc::new(SledStore::temporary()?)),
            StorageBackend::Sled => {
                let path = self.resolved_path().ok_or_else(|| {
                    StorageError::Backend("No storage path configured and no home directory".to_string())
                })?;
                Ok(Arc::new(SledStore::new(path)?))
            }
        }
    }
}

/// Cache layer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Serve aggregate-scoped contexts from per-root caches.
    #[serde(default = "default_true")]
    pub aggregate_cache: bool,

    /// Entity type keys that get a full-table cache.
    #[serde(default)]
    pub full_cache_types: Vec<String>,

    /// Capacity of the change broadcast channel.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_broadcast_capacity() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            aggregate_cache: default_true(),
            full_cache_types: Vec::new(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Storage(String),
    Cache(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ValidationError::Cache(msg) => write!(f, "Cache: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl GraphCacheConfig {
    /// Validate the entire configuration, reporting every problem at once.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.storage.backend == StorageBackend::Sled
            && !self.storage.temporary
            && self.storage.resolved_path().is_none()
        {
            errors.push(ValidationError::Storage(
                "sled backend needs a path when no data directory can be determined".to_string(),
            ));
        }
        if let Some(path) = &self.storage.path {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError::Storage("Store path cannot be empty".to_string()));
            }
        }

        if self.cache.broadcast_capacity == 0 {
            errors.push(ValidationError::Cache(
                "broadcast_capacity must be greater than zero".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for name in &self.cache.full_cache_types {
            if name.trim().is_empty() {
                errors.push(ValidationError::Cache("Empty entity type in full_cache_types".to_string()));
            } else if !seen.insert(name.as_str()) {
                errors.push(ValidationError::Cache(format!(
                    "Entity type '{}' listed twice in full_cache_types",
                    name
                )));
            }
        }

        if let Err(e) = logging::parse_format(&self.logging.format) {
            errors.push(ValidationError::Logging(e.to_string()));
        }
        if let Err(e) = logging::parse_output(&self.logging.output) {
            errors.push(ValidationError::Logging(e.to_string()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Loads [`GraphCacheConfig`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, global file, `<workspace_root>/config/*.toml`, environment.
    pub fn load(workspace_root: &Path) -> Result<GraphCacheConfig, PersistenceError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let config = sources::add_environment(builder).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Defaults plus one explicit file; the environment still overrides.
    pub fn load_from_file(path: &Path) -> Result<GraphCacheConfig, PersistenceError> {
        let builder = merge::merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path).required(true));
        let config = sources::add_environment(builder).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load and validate, folding validation errors into one `ConfigError`.
    pub fn load_validated(workspace_root: &Path) -> Result<GraphCacheConfig, PersistenceError> {
        let config = Self::load(workspace_root)?;
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            PersistenceError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        Ok(config)
    }
}
