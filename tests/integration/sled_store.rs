//! Sled-backed persistence across provider restarts

use super::test_utils::{provider_over, seed_configuration};
use graphcache::context::ContextPurpose;
use graphcache::model::{GameConfiguration, MonsterDefinition};
use graphcache::store::{SledStore, Store};
use graphcache::Entity;
use std::sync::Arc;
use tempfile::TempDir;

/// Committed graphs survive reopening the store and reload with their navigations
#[test]
fn test_reopen_and_read_graph() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store");

    let (root, monsters) = {
        let store: Arc<dyn Store> = Arc::new(SledStore::new(&path).unwrap());
        let provider = provider_over(store);
        seed_configuration(&provider, "Season 6", &["Dragon", "Golem"])
    };

    let store: Arc<dyn Store> = Arc::new(SledStore::new(&path).unwrap());
    assert_eq!(store.count(MonsterDefinition::TYPE).unwrap(), 2);
    let provider = provider_over(store).with_aggregate_cache().unwrap();

    let context = provider.create_aggregate_context(root);
    let config = context.get_by_id::<GameConfiguration>(root).unwrap().unwrap();
    assert_eq!(config.read().name, "Season 6");
    let mut held = config.read().monsters.ids();
    held.sort();
    let mut expected = monsters.clone();
    expected.sort();
    assert_eq!(held, expected);

    let dragon = context.get_by_id::<MonsterDefinition>(monsters[0]).unwrap().unwrap();
    assert_eq!(dragon.read().attributes.len(), 1);
    assert!(dragon.read().game_configuration.get().is_some_and(|c| c.ptr_eq(&config)));
}

/// Deletes are durable
#[test]
fn test_delete_persists() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn Store> = Arc::new(SledStore::new(dir.path()).unwrap());
    let provider = provider_over(store.clone());
    let (root, _) = seed_configuration(&provider, "C", &["Orc"]);

    let context = provider.create_context(ContextPurpose::Configuration);
    assert!(context.delete_by_id::<GameConfiguration>(root).unwrap());
    context.save_changes().unwrap();

    assert_eq!(store.count(GameConfiguration::TYPE).unwrap(), 0);
    assert_eq!(store.count(MonsterDefinition::TYPE).unwrap(), 0);
}
