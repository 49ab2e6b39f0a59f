//! Layered configuration driving the context provider

use super::test_utils::with_isolated_env;
use graphcache::config::{ConfigLoader, StorageBackend};
use graphcache::model::{self, CharacterClass, ItemDefinition};
use graphcache::{ContextProvider, PersistenceError};
use std::fs;
use tempfile::TempDir;

fn write_workspace_config(workspace: &TempDir, contents: &str) {
    let dir = workspace.path().join("config");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), contents).unwrap();
}

/// Workspace file selects backend and full caches
#[test]
fn test_workspace_file_configures_provider() {
    let workspace = TempDir::new().unwrap();
    write_workspace_config(
        &workspace,
        "[storage]\nbackend = \"memory\"\n\n[cache]\nfull_cache_types = [\"CharacterClass\", \"ItemDefinition\"]\n",
    );

    let config = with_isolated_env(&workspace, &[], || ConfigLoader::load_validated(workspace.path())).unwrap();
    assert_eq!(config.storage.backend, StorageBackend::Memory);

    let provider = ContextProvider::from_config(model::schema().unwrap(), &config).unwrap();
    assert!(provider.full_cache::<CharacterClass>().is_some());
    assert!(provider.full_cache::<ItemDefinition>().is_some());
    assert!(provider.aggregate_caches().is_some());
}

/// Global file, then workspace file, then environment
#[test]
fn test_precedence_of_sources() {
    let workspace = TempDir::new().unwrap();
    let global_dir = workspace.path().join("xdg").join("graphcache");
    fs::create_dir_all(&global_dir).unwrap();
    fs::write(
        global_dir.join("config.toml"),
        "[storage]\nbackend = \"memory\"\n\n[cache]\nbroadcast_capacity = 8\naggregate_cache = true\n",
    )
    .unwrap();
    write_workspace_config(&workspace, "[cache]\nbroadcast_capacity = 32\n");

    let config = with_isolated_env(
        &workspace,
        &[("GRAPHCACHE__CACHE__AGGREGATE_CACHE", "false")],
        || ConfigLoader::load(workspace.path()),
    )
    .unwrap();

    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.cache.broadcast_capacity, 32);
    assert!(!config.cache.aggregate_cache);

    let provider = ContextProvider::from_config(model::schema().unwrap(), &config).unwrap();
    assert!(provider.aggregate_caches().is_none());
    assert!(provider.broadcaster().is_some());
}

/// Unknown entity types in full_cache_types are rejected
#[test]
fn test_unknown_full_cache_type() {
    let workspace = TempDir::new().unwrap();
    write_workspace_config(
        &workspace,
        "[storage]\nbackend = \"memory\"\n\n[cache]\nfull_cache_types = [\"Dragon\"]\n",
    );
    let config = with_isolated_env(&workspace, &[], || ConfigLoader::load(workspace.path())).unwrap();

    let result = ContextProvider::from_config(model::schema().unwrap(), &config);
    assert!(matches!(result, Err(PersistenceError::ConfigError(_))));
}
