//! Aggregate-scoped edit contexts only write their edit closure

use super::test_utils::{memory_provider, seed_configuration};
use graphcache::context::{ContextPurpose, EntryState};
use graphcache::model::{GameConfiguration, GameServerConfiguration, GameServerDefinition, ItemDefinition, MonsterDefinition};
use graphcache::Entity;

fn seed_item(provider: &graphcache::ContextProvider, root: graphcache::Id, name: &str) -> graphcache::Id {
    let context = provider.create_context(ContextPurpose::Configuration);
    let item = context
        .create_new::<ItemDefinition>(|i| {
            i.name = name.to_string();
            i.game_configuration.set_id(Some(root));
        })
        .unwrap();
    context.save_changes().unwrap();
    item.id()
}

fn stored_item_name(provider: &graphcache::ContextProvider, id: graphcache::Id) -> String {
    let context = provider.create_context(ContextPurpose::Configuration);
    let item = context.get_by_id::<ItemDefinition>(id).unwrap().unwrap();
    let name = item.read().name.clone();
    name
}

/// Modifying a read-only type in a monster edit context leaves storage unchanged
#[test]
fn test_read_only_type_is_not_written() {
    let provider = memory_provider();
    let (root, monsters) = seed_configuration(&provider, "C", &["Golem"]);
    let item = seed_item(&provider, root, "Jewel of Bless");

    let edit = provider
        .create_edit_context::<MonsterDefinition>(Some(root))
        .unwrap();
    let loaded = edit.get_by_id::<ItemDefinition>(item).unwrap().unwrap();
    loaded.write().name = "Jewel of Curse".to_string();
    edit.mark_modified(&loaded).unwrap();

    let monster = edit.get_by_id::<MonsterDefinition>(monsters[0]).unwrap().unwrap();
    monster.write().drop_item.set_id(Some(item));

    assert!(edit.save_changes().unwrap());
    assert_eq!(stored_item_name(&provider, item), "Jewel of Bless");

    let context = provider.create_context(ContextPurpose::Configuration);
    let stored = context.get_by_id::<MonsterDefinition>(monsters[0]).unwrap().unwrap();
    assert_eq!(stored.read().drop_item.id(), Some(item));
}

/// Back-reference types are readable but edits to them are dropped as well
#[test]
fn test_back_reference_edit_is_dropped() {
    let provider = memory_provider();
    let (root, _) = seed_configuration(&provider, "C", &[]);

    let edit = provider
        .create_edit_context::<MonsterDefinition>(Some(root))
        .unwrap();
    let config = edit.get_by_id::<GameConfiguration>(root).unwrap().unwrap();
    config.write().name = "Renamed".to_string();
    assert!(!edit.save_changes().unwrap());
    assert_eq!(edit.entry_state(GameConfiguration::TYPE, root), Some(EntryState::Unchanged));

    let context = provider.create_context(ContextPurpose::Configuration);
    let stored = context.get_by_id::<GameConfiguration>(root).unwrap().unwrap();
    assert_eq!(stored.read().name, "C");
}

/// Additional edit types are written together with their root type
#[test]
fn test_additional_types_are_writable() {
    let provider = memory_provider();
    let edit = provider
        .create_edit_context::<GameServerDefinition>(None)
        .unwrap();
    let server_config = edit
        .create_new::<GameServerConfiguration>(|c| {
            c.max_players = 1000;
            c.map_names = vec!["Lorencia".to_string(), "Devias".to_string()];
        })
        .unwrap();
    let server = edit
        .create_new::<GameServerDefinition>(|s| {
            s.server_id = 1;
            s.configuration.set(Some(&server_config));
        })
        .unwrap();
    assert!(edit.save_changes().unwrap());

    let context = provider.create_context(ContextPurpose::GuildServer);
    let stored = context.get_by_id::<GameServerDefinition>(server.id()).unwrap().unwrap();
    let configuration = stored.read().configuration.get().unwrap();
    assert_eq!(configuration.read().max_players, 1000);
    assert_eq!(configuration.read().map_names.len(), 2);
}
