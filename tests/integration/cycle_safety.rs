//! Navigation cycles terminate and each collection loads once

use super::test_utils::{provider_over, seed_configuration, CountingStore};
use graphcache::concurrency::LoadingStatus;
use graphcache::context::ContextPurpose;
use graphcache::model::{GameConfiguration, MonsterAttribute, MonsterDefinition};
use graphcache::store::MemoryStore;
use graphcache::Entity;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Monster -> configuration -> monsters -> monster closes on the same instance
#[test]
fn test_back_reference_to_root_terminates() {
    let store = Arc::new(CountingStore::new(Arc::new(MemoryStore::new())));
    let provider = provider_over(store.clone());
    let (root, monsters) = seed_configuration(&provider, "C", &["Bull Fighter", "Hound"]);

    let first = monsters[0];

    let (done, finished) = mpsc::channel();
    let worker_provider = provider.clone();
    let worker = std::thread::spawn(move || {
        let context = worker_provider.create_context(ContextPurpose::Configuration);
        let monster = context.get_by_id::<MonsterDefinition>(first).unwrap().unwrap();
        done.send(()).unwrap();
        (context, monster)
    });
    finished
        .recv_timeout(Duration::from_secs(10))
        .expect("loading a cyclic graph did not finish");
    let (context, monster) = worker.join().unwrap();

    let config = monster.read().game_configuration.get().unwrap();
    assert_eq!(config.id(), root);
    let siblings = config.read().monsters.items();
    assert_eq!(config.read().monsters.status(), LoadingStatus::Loaded);
    assert_eq!(siblings.len(), 2);
    assert!(siblings.iter().any(|m| m.ptr_eq(&monster)));

    // The configuration's monster collection was populated by a single scan.
    assert_eq!(store.scans(MonsterDefinition::TYPE), 1);
    assert_eq!(store.scans(GameConfiguration::TYPE), 0);

    // Reading again hits the identity map and loads nothing new.
    let again = context.get_by_id::<MonsterDefinition>(first).unwrap().unwrap();
    assert!(again.ptr_eq(&monster));
    assert_eq!(store.scans(MonsterDefinition::TYPE), 1);
}

/// Loading a root scans each child table once, however many owners it has
#[test]
fn test_one_scan_per_type_per_read() {
    let store = Arc::new(CountingStore::new(Arc::new(MemoryStore::new())));
    let provider = provider_over(store.clone());
    let names = ["Spider", "Hound", "Goblin", "Yeti", "Lich", "Orc"];
    let (root, _) = seed_configuration(&provider, "C", &names);

    let context = provider.create_context(ContextPurpose::Configuration);
    let config = context.get_by_id::<GameConfiguration>(root).unwrap().unwrap();
    let monsters = config.read().monsters.items();
    assert_eq!(monsters.len(), names.len());
    for monster in &monsters {
        assert_eq!(monster.read().attributes.status(), LoadingStatus::Loaded);
        assert_eq!(monster.read().attributes.len(), 1);
    }
    assert_eq!(store.scans(MonsterDefinition::TYPE), 1);
    assert_eq!(store.scans(MonsterAttribute::TYPE), 1);

    // A later read starts a fresh pass and sees new rows.
    let writer = provider.create_context(ContextPurpose::Configuration);
    writer
        .create_new::<MonsterAttribute>(|a| a.monster_definition.set_id(Some(monsters[0].id())))
        .unwrap();
    writer.save_changes().unwrap();
    let reader = provider.create_context(ContextPurpose::Configuration);
    let reloaded = reader.get_by_id::<MonsterDefinition>(monsters[0].id()).unwrap().unwrap();
    assert_eq!(reloaded.read().attributes.len(), 2);
    assert_eq!(store.scans(MonsterAttribute::TYPE), 2);
}
