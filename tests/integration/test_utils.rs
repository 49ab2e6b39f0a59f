//! Shared fixtures for integration tests
//!
//! A store wrapper that counts full-type scans, and helpers that seed the
//! reference model through a context.

use graphcache::context::{ContextProvider, ContextPurpose};
use graphcache::error::StorageError;
use graphcache::model::{self, GameConfiguration, MonsterAttribute, MonsterDefinition};
use graphcache::store::{MemoryStore, Store, WriteBatch};
use graphcache::{EntityType, Id};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Store wrapper recording how often each type was scanned.
pub struct CountingStore {
    inner: Arc<dyn Store>,
    scans: Mutex<HashMap<EntityType, usize>>,
    scan_delay: Option<Duration>,
    post_scan_delay: Option<Duration>,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        CountingStore {
            inner,
            scans: Mutex::new(HashMap::new()),
            scan_delay: None,
            post_scan_delay: None,
        }
    }

    /// Make every scan slow enough for concurrent callers to pile up.
    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = Some(delay);
        self
    }

    /// Hold every scan result back for `delay` after reading it, so that
    /// commits can land between the read and its use.
    pub fn with_post_scan_delay(mut self, delay: Duration) -> Self {
        self.post_scan_delay = Some(delay);
        self
    }

    pub fn scans(&self, entity_type: EntityType) -> usize {
        self.scans.lock().get(&entity_type).copied().unwrap_or(0)
    }
}

impl Store for CountingStore {
    fn get(&self, entity_type: EntityType, id: Id) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(entity_type, id)
    }

    fn scan(&self, entity_type: EntityType) -> Result<Vec<(Id, Vec<u8>)>, StorageError> {
        *self.scans.lock().entry(entity_type).or_insert(0) += 1;
        if let Some(delay) = self.scan_delay {
            std::thread::sleep(delay);
        }
        let rows = self.inner.scan(entity_type)?;
        if let Some(delay) = self.post_scan_delay {
            std::thread::sleep(delay);
        }
        Ok(rows)
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        self.inner.apply(batch)
    }
}

/// Provider over the reference model and the given store.
pub fn provider_over(store: Arc<dyn Store>) -> ContextProvider {
    ContextProvider::new(model::schema().unwrap(), store)
}

pub fn memory_provider() -> ContextProvider {
    provider_over(Arc::new(MemoryStore::new()))
}

/// Commit one configuration with the named monsters (each with one
/// attribute). Returns the configuration id and the monster ids.
pub fn seed_configuration(provider: &ContextProvider, name: &str, monsters: &[&str]) -> (Id, Vec<Id>) {
    let context = provider.create_context(ContextPurpose::Configuration);
    let config = context
        .create_new::<GameConfiguration>(|c| c.name = name.to_string())
        .unwrap();
    let monster_ids = monsters
        .iter()
        .map(|monster_name| {
            let monster = context
                .create_new::<MonsterDefinition>(|m| {
                    m.name = monster_name.to_string();
                    m.game_configuration.set_id(Some(config.id()));
                })
                .unwrap();
            context
                .create_new::<MonsterAttribute>(|a| {
                    a.name = "Defense".to_string();
                    a.monster_definition.set_id(Some(monster.id()));
                })
                .unwrap();
            monster.id()
        })
        .collect();
    assert!(context.save_changes().unwrap());
    (config.id(), monster_ids)
}

/// Serializes environment mutation across tests running in parallel.
static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Run `f` with `HOME` and `XDG_CONFIG_HOME` inside `test_dir` and the
/// extra variables set; the previous environment is restored afterwards.
pub fn with_isolated_env<F, R>(test_dir: &tempfile::TempDir, vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

    let home = test_dir.path().join("home");
    let xdg_config = test_dir.path().join("xdg");
    std::fs::create_dir_all(&home).unwrap();
    std::fs::create_dir_all(&xdg_config).unwrap();

    let mut overrides: Vec<(String, String)> = vec![
        ("HOME".to_string(), home.display().to_string()),
        ("XDG_CONFIG_HOME".to_string(), xdg_config.display().to_string()),
    ];
    overrides.extend(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())));

    let previous: Vec<(String, Option<String>)> = overrides
        .iter()
        .map(|(key, _)| (key.clone(), std::env::var(key).ok()))
        .collect();
    for (key, value) in &overrides {
        std::env::set_var(key, value);
    }

    let result = f();

    for (key, value) in previous {
        match value {
            Some(value) => std::env::set_var(&key, value),
            None => std::env::remove_var(&key),
        }
    }
    result
}
