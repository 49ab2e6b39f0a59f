//! Full-table cache: at-most-once population under concurrent first access

use super::test_utils::{provider_over, CountingStore};
use graphcache::context::ContextPurpose;
use graphcache::model::{Account, CharacterClass};
use graphcache::store::MemoryStore;
use graphcache::{Entity, Repository};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn seed_accounts(provider: &graphcache::ContextProvider, names: &[&str]) {
    let context = provider.create_context(ContextPurpose::Account);
    for name in names {
        context
            .create_new::<Account>(|a| a.login_name = name.to_string())
            .unwrap();
    }
    context.save_changes().unwrap();
}

/// Eight threads race on an uninitialized cache; the store is scanned once
#[test]
fn test_concurrent_get_all_loads_once() {
    let store = Arc::new(CountingStore::new(Arc::new(MemoryStore::new())).with_scan_delay(Duration::from_millis(50)));
    let provider = provider_over(store.clone()).with_full_cache::<Account>();
    seed_accounts(&provider, &["alice", "bob", "carol"]);
    assert_eq!(store.scans(Account::TYPE), 0);

    let threads = 8;
    let barrier = Barrier::new(threads);
    let results: Vec<BTreeSet<graphcache::Id>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| {
                    let cache = provider.full_cache::<Account>().unwrap();
                    barrier.wait();
                    cache.get_all().unwrap().iter().map(|a| a.id()).collect()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(results.iter().all(|ids| ids.len() == 3));
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(store.scans(Account::TYPE), 1);
    assert_eq!(provider.statistics().full_loads(), 1);
}

/// Readers in separate contexts share the cached instances
#[test]
fn test_contexts_read_through_full_cache() {
    let store = Arc::new(CountingStore::new(Arc::new(MemoryStore::new())));
    let provider = provider_over(store.clone()).with_full_cache::<Account>();
    seed_accounts(&provider, &["dave"]);

    let first = provider.create_context(ContextPurpose::Player);
    let second = provider.create_context(ContextPurpose::Trade);
    let a = first.get_all::<Account>().unwrap();
    let b = second.get_all::<Account>().unwrap();

    assert_eq!(a.len(), 1);
    assert!(a[0].ptr_eq(&b[0]));
    assert_eq!(store.scans(Account::TYPE), 1);
}

/// Lookups by an indexed foreign key are answered from the cache
#[test]
fn test_indexed_lookup_after_commit() {
    let provider = super::test_utils::memory_provider().with_full_cache::<CharacterClass>();
    let (config, _) = super::test_utils::seed_configuration(&provider, "Season 6", &[]);
    let cache = provider.full_cache::<CharacterClass>().unwrap();
    assert!(cache
        .load_by_property("game_configuration_id", config)
        .unwrap()
        .is_empty());

    let context = provider.create_context(ContextPurpose::Configuration);
    context
        .create_new::<CharacterClass>(|c| {
            c.name = "Summoner".to_string();
            c.game_configuration.set_id(Some(config));
        })
        .unwrap();
    context.save_changes().unwrap();

    let classes = cache.load_by_property("game_configuration_id", config).unwrap();
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0].read().name, "Summoner");
    assert!(cache.load_by_property("name", config).is_err());
}

/// An account deleted while the cache is loading does not come back
#[test]
fn test_delete_during_population_is_not_resurrected() {
    let store = Arc::new(CountingStore::new(Arc::new(MemoryStore::new())).with_post_scan_delay(Duration::from_millis(300)));
    let provider = provider_over(store.clone()).with_full_cache::<Account>();
    let setup = provider.create_context(ContextPurpose::Account);
    let alice = setup
        .create_new::<Account>(|a| a.login_name = "alice".to_string())
        .unwrap();
    setup.save_changes().unwrap();

    let cache = provider.full_cache::<Account>().unwrap();
    std::thread::scope(|scope| {
        let loading = scope.spawn(|| cache.get_all().unwrap().len());

        std::thread::sleep(Duration::from_millis(100));
        setup.delete(&alice).unwrap();
        assert!(setup.save_changes().unwrap());

        loading.join().unwrap();
    });

    assert!(cache.get_all().unwrap().is_empty());
    assert!(cache.get_by_id(alice.id()).unwrap().is_none());
    assert_eq!(provider.store().count(Account::TYPE).unwrap(), 0);
    assert_eq!(store.scans(Account::TYPE), 1);
}
