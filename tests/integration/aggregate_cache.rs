//! Per-root aggregate caches: isolation and incremental consistency

use super::test_utils::{memory_provider, provider_over, seed_configuration, CountingStore};
use graphcache::context::ContextPurpose;
use graphcache::model::{GameConfiguration, MonsterAttribute, MonsterDefinition};
use graphcache::store::MemoryStore;
use graphcache::{Entity, PersistenceError};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn monster_names(provider: &graphcache::ContextProvider, root: graphcache::Id) -> BTreeSet<String> {
    let context = provider.create_aggregate_context(root);
    context
        .get_all::<MonsterDefinition>()
        .unwrap()
        .iter()
        .map(|m| m.read().name.clone())
        .collect()
}

/// Create M1, read it through the cache, delete it, read again: one population
#[test]
fn test_monster_create_then_delete_without_reload() {
    let provider = memory_provider().with_aggregate_cache().unwrap();
    let (root, monsters) = seed_configuration(&provider, "C", &["M1"]);

    assert_eq!(monster_names(&provider, root), BTreeSet::from(["M1".to_string()]));
    assert_eq!(provider.statistics().aggregate_populations(), 1);

    let edit = provider
        .create_edit_context::<MonsterDefinition>(Some(root))
        .unwrap();
    assert!(edit.delete_by_id::<MonsterDefinition>(monsters[0]).unwrap());
    assert!(edit.save_changes().unwrap());

    assert!(monster_names(&provider, root).is_empty());
    let resident = provider.ensure_cache_for(root).unwrap();
    assert!(resident.get(MonsterDefinition::TYPE, monsters[0]).is_none());
    // Only the root is left; the attribute went with its monster.
    assert_eq!(resident.len(), 1);
    assert_eq!(provider.statistics().aggregate_populations(), 1);
    assert_eq!(provider.statistics().full_loads(), 0);
}

/// A child committed under R shows up in R's cache exactly once
#[test]
fn test_new_child_visible_once_in_root_cache() {
    let provider = memory_provider().with_aggregate_cache().unwrap();
    let (root, _) = seed_configuration(&provider, "C", &["Goblin"]);
    assert_eq!(monster_names(&provider, root).len(), 1);

    let edit = provider
        .create_edit_context::<MonsterDefinition>(Some(root))
        .unwrap();
    let created = edit
        .create_new::<MonsterDefinition>(|m| m.name = "Hell Hound".to_string())
        .unwrap();
    edit.save_changes().unwrap();

    let reader = provider.create_aggregate_context(root);
    let all = reader.get_all::<MonsterDefinition>().unwrap();
    assert_eq!(all.iter().filter(|m| m.id() == created.id()).count(), 1);
    assert_eq!(all.len(), 2);

    let config = reader.get_by_id::<GameConfiguration>(root).unwrap().unwrap();
    let held = config.read().monsters.ids();
    assert_eq!(held.iter().filter(|id| **id == created.id()).count(), 1);
    assert_eq!(provider.statistics().aggregate_populations(), 1);
}

/// Entities created under A never appear when reading under B
#[test]
fn test_roots_are_isolated() {
    let provider = memory_provider().with_aggregate_cache().unwrap();
    let (a, _) = seed_configuration(&provider, "A", &["Spider"]);
    let (b, _) = seed_configuration(&provider, "B", &["Yeti"]);
    assert_eq!(monster_names(&provider, a), BTreeSet::from(["Spider".to_string()]));
    assert_eq!(monster_names(&provider, b), BTreeSet::from(["Yeti".to_string()]));

    let edit = provider
        .create_edit_context::<MonsterDefinition>(Some(a))
        .unwrap();
    let created = edit
        .create_new::<MonsterDefinition>(|m| m.name = "Elite Yeti".to_string())
        .unwrap();
    edit.save_changes().unwrap();

    assert_eq!(monster_names(&provider, a).len(), 2);
    assert_eq!(monster_names(&provider, b), BTreeSet::from(["Yeti".to_string()]));

    let reader = provider.create_aggregate_context(b);
    let err = reader.get_by_id::<MonsterDefinition>(created.id()).unwrap_err();
    assert!(matches!(err, PersistenceError::InvalidAggregateScope { .. }));
    assert_eq!(provider.statistics().aggregate_populations(), 2);
}

/// Changes to a cached entity are applied in place
#[test]
fn test_changes_update_cached_instance() {
    let provider = memory_provider().with_aggregate_cache().unwrap();
    let (root, monsters) = seed_configuration(&provider, "C", &["Lich"]);

    let reader = provider.create_aggregate_context(root);
    let cached = reader.get_by_id::<MonsterDefinition>(monsters[0]).unwrap().unwrap();

    let edit = provider
        .create_edit_context::<MonsterDefinition>(Some(root))
        .unwrap();
    let editable = edit.get_by_id::<MonsterDefinition>(monsters[0]).unwrap().unwrap();
    assert!(!editable.ptr_eq(&cached));
    editable.write().level = 14;
    edit.save_changes().unwrap();

    assert_eq!(cached.read().level, 14);
    assert_eq!(cached.read().attributes.len(), 1);
}

/// Contexts outside any aggregate never touch the per-root caches
#[test]
fn test_unscoped_context_reads_store() {
    let provider = memory_provider().with_aggregate_cache().unwrap();
    let (root, _) = seed_configuration(&provider, "C", &["Orc"]);

    let context = provider.create_context(ContextPurpose::Configuration);
    let monsters = context.get_all::<MonsterDefinition>().unwrap();
    assert_eq!(monsters.len(), 1);
    assert_eq!(provider.statistics().aggregate_populations(), 0);
    assert!(provider.aggregate_caches().unwrap().resident(root).is_none());
}

/// A monster committed while the root's cache is being populated is not lost
#[test]
fn test_commit_during_population_reaches_cache() {
    let store = Arc::new(CountingStore::new(Arc::new(MemoryStore::new())).with_post_scan_delay(Duration::from_millis(300)));
    let provider = provider_over(store).with_aggregate_cache().unwrap();
    let (root, _) = seed_configuration(&provider, "C", &["M1"]);

    let created = std::thread::scope(|scope| {
        let populating = scope.spawn(|| provider.ensure_cache_for(root).unwrap());

        std::thread::sleep(Duration::from_millis(100));
        let edit = provider
            .create_edit_context::<MonsterDefinition>(Some(root))
            .unwrap();
        let created = edit
            .create_new::<MonsterDefinition>(|m| m.name = "M2".to_string())
            .unwrap();
        assert!(edit.save_changes().unwrap());

        let resident = populating.join().unwrap();
        assert!(resident.is_ready());
        created
    });

    assert_eq!(
        monster_names(&provider, root),
        BTreeSet::from(["M1".to_string(), "M2".to_string()])
    );
    let reader = provider.create_aggregate_context(root);
    let config = reader.get_by_id::<GameConfiguration>(root).unwrap().unwrap();
    assert_eq!(config.read().monsters.ids().iter().filter(|id| **id == created.id()).count(), 1);
    assert_eq!(provider.statistics().aggregate_populations(), 1);
}

/// Threads racing on the first access of a root share one population
#[test]
fn test_concurrent_ensure_cache_for_populates_once() {
    let store = Arc::new(CountingStore::new(Arc::new(MemoryStore::new())).with_scan_delay(Duration::from_millis(20)));
    let provider = provider_over(store).with_aggregate_cache().unwrap();
    let (root, _) = seed_configuration(&provider, "C", &["Spider", "Budge Dragon"]);

    let threads = 8;
    let barrier = Barrier::new(threads);
    let caches: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    provider.ensure_cache_for(root).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(caches.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(provider.statistics().aggregate_populations(), 1);
    // Root, two monsters, two attributes.
    assert_eq!(caches[0].len(), 5);
}

/// Moving a monster to another root moves its attributes along
#[test]
fn test_reparented_monster_takes_members_along() {
    let provider = memory_provider().with_aggregate_cache().unwrap();
    let (a, monsters) = seed_configuration(&provider, "A", &["Spider"]);
    let (b, _) = seed_configuration(&provider, "B", &["Yeti"]);
    let first = provider.ensure_cache_for(a).unwrap();
    let second = provider.ensure_cache_for(b).unwrap();
    let attribute = first
        .get(MonsterDefinition::TYPE, monsters[0])
        .unwrap()
        .collection_children(true)[0]
        .1
        .id();

    let context = provider.create_context(ContextPurpose::Configuration);
    let monster = context.get_by_id::<MonsterDefinition>(monsters[0]).unwrap().unwrap();
    monster.write().game_configuration.set_id(Some(b));
    assert!(context.save_changes().unwrap());

    assert!(first.get(MonsterDefinition::TYPE, monsters[0]).is_none());
    assert!(first.get(MonsterAttribute::TYPE, attribute).is_none());
    assert_eq!(first.len(), 1);

    let moved = second.get(MonsterDefinition::TYPE, monsters[0]).unwrap();
    let cached_attribute = second.get(MonsterAttribute::TYPE, attribute).unwrap();
    let children = moved.collection_children(true);
    assert_eq!(children.len(), 1);
    assert!(children[0].1.same_instance(cached_attribute.as_ref()));
    assert_eq!(
        monster_names(&provider, b),
        BTreeSet::from(["Spider".to_string(), "Yeti".to_string()])
    );
    assert_eq!(provider.statistics().aggregate_populations(), 2);
}
