//! Reference domain model
//!
//! A game server's configuration data: one aggregate rooted at
//! [`GameConfiguration`] that owns monsters, items and character classes,
//! plus account data that lives outside the aggregate. The model exercises
//! every relationship kind the cache layer supports: member collections,
//! back-references, plain references, a many-to-many join and a member
//! scalar reference.

use crate::entity::{CollectionNav, Collection, Entity, EntityRef, JoinView, Navigations, Reference, ReferenceNav};
use crate::error::SchemaError;
use crate::schema::{Schema, SchemaBuilder};
use crate::types::{EntityType, Id};
use serde::{Deserialize, Serialize};

macro_rules! entity_identity {
    ($ty:ident) => {
        const TYPE: EntityType = EntityType::new(stringify!($ty));

        fn id(&self) -> Id {
            self.id
        }

        fn set_id(&mut self, id: Id) {
            self.id = id;
        }
    };
}

/// Aggregate root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameConfiguration {
    pub id: Id,
    pub name: String,
    pub max_level: u16,
    #[serde(skip)]
    pub monsters: Collection<MonsterDefinition>,
    #[serde(skip)]
    pub items: Collection<ItemDefinition>,
    #[serde(skip)]
    pub character_classes: Collection<CharacterClass>,
}

impl GameConfiguration {
    pub fn named(name: &str) -> Self {
        GameConfiguration {
            id: Id::new(),
            name: name.to_string(),
            max_level: 400,
            ..Default::default()
        }
    }
}

impl Entity for GameConfiguration {
    entity_identity!(GameConfiguration);

    fn navigations() -> Navigations<Self> {
        Navigations::new()
            .with_collection(
                CollectionNav::<Self, _>::new("monsters", "game_configuration_id", |c| &c.monsters, |c| &mut c.monsters)
                    .member_of_aggregate(),
            )
            .with_collection(
                CollectionNav::<Self, _>::new("items", "game_configuration_id", |c| &c.items, |c| &mut c.items)
                    .member_of_aggregate(),
            )
            .with_collection(
                CollectionNav::<Self, _>::new(
                    "character_classes",
                    "game_configuration_id",
                    |c| &c.character_classes,
                    |c| &mut c.character_classes,
                )
                .member_of_aggregate(),
            )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonsterDefinition {
    pub id: Id,
    pub name: String,
    pub level: u16,
    pub game_configuration: Reference<GameConfiguration>,
    pub drop_item: Reference<ItemDefinition>,
    #[serde(skip)]
    pub attributes: Collection<MonsterAttribute>,
}

impl MonsterDefinition {
    pub fn named(name: &str, level: u16) -> Self {
        MonsterDefinition {
            id: Id::new(),
            name: name.to_string(),
            level,
            ..Default::default()
        }
    }
}

impl Entity for MonsterDefinition {
    entity_identity!(MonsterDefinition);

    fn navigations() -> Navigations<Self> {
        Navigations::new()
            .with_reference(ReferenceNav::<Self, _>::new(
                "game_configuration",
                "game_configuration_id",
                |m| &m.game_configuration,
                |m| &mut m.game_configuration,
            ))
            .with_reference(ReferenceNav::<Self, _>::new("drop_item", "drop_item_id", |m| &m.drop_item, |m| &mut m.drop_item))
            .with_collection(
                CollectionNav::<Self, _>::new("attributes", "monster_definition_id", |m| &m.attributes, |m| &mut m.attributes)
                    .member_of_aggregate(),
            )
            .with_parent_link("game_configuration_id", GameConfiguration::TYPE)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonsterAttribute {
    pub id: Id,
    pub name: String,
    pub value: f32,
    pub monster_definition: Reference<MonsterDefinition>,
}

impl MonsterAttribute {
    pub fn new(name: &str, value: f32) -> Self {
        MonsterAttribute {
            id: Id::new(),
            name: name.to_string(),
            value,
            ..Default::default()
        }
    }
}

impl Entity for MonsterAttribute {
    entity_identity!(MonsterAttribute);

    fn navigations() -> Navigations<Self> {
        Navigations::new()
            .with_reference(ReferenceNav::<Self, _>::new(
                "monster_definition",
                "monster_definition_id",
                |a| &a.monster_definition,
                |a| &mut a.monster_definition,
            ))
            .with_parent_link("monster_definition_id", MonsterDefinition::TYPE)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub id: Id,
    pub name: String,
    pub game_configuration: Reference<GameConfiguration>,
    #[serde(skip)]
    pub qualified_class_rows: Collection<ItemCharacterClass>,
}

impl ItemDefinition {
    pub fn named(name: &str) -> Self {
        ItemDefinition {
            id: Id::new(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Character classes allowed to equip this item.
    ///
    /// Rows created through the view are pushed onto `qualified_class_rows`
    /// but must still be staged with [`crate::context::Context::add`].
    pub fn qualified_classes(&self) -> JoinView<'_, CharacterClass, ItemCharacterClass> {
        let item = self.id;
        JoinView::new(
            &self.qualified_class_rows,
            |row| &row.character_class,
            move |class: &EntityRef<CharacterClass>| ItemCharacterClass::between(item, class),
        )
    }
}

impl Entity for ItemDefinition {
    entity_identity!(ItemDefinition);

    fn navigations() -> Navigations<Self> {
        Navigations::new()
            .with_reference(ReferenceNav::<Self, _>::new(
                "game_configuration",
                "game_configuration_id",
                |i| &i.game_configuration,
                |i| &mut i.game_configuration,
            ))
            .with_collection(
                CollectionNav::<Self, _>::new(
                    "qualified_class_rows",
                    "item_definition_id",
                    |i| &i.qualified_class_rows,
                    |i| &mut i.qualified_class_rows,
                )
                .member_of_aggregate(),
            )
            .with_parent_link("game_configuration_id", GameConfiguration::TYPE)
    }
}

/// Join row between an item and a class that may use it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemCharacterClass {
    pub id: Id,
    pub item_definition: Reference<ItemDefinition>,
    pub character_class: Reference<CharacterClass>,
}

impl ItemCharacterClass {
    pub fn between(item: Id, class: &EntityRef<CharacterClass>) -> Self {
        let mut row = ItemCharacterClass {
            id: Id::new(),
            item_definition: Reference::to(item),
            ..Default::default()
        };
        row.character_class.set(Some(class));
        row
    }
}

impl Entity for ItemCharacterClass {
    entity_identity!(ItemCharacterClass);

    fn navigations() -> Navigations<Self> {
        Navigations::new()
            .with_reference(ReferenceNav::<Self, _>::new(
                "item_definition",
                "item_definition_id",
                |r| &r.item_definition,
                |r| &mut r.item_definition,
            ))
            .with_reference(ReferenceNav::<Self, _>::new(
                "character_class",
                "character_class_id",
                |r| &r.character_class,
                |r| &mut r.character_class,
            ))
            .with_parent_link("item_definition_id", ItemDefinition::TYPE)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterClass {
    pub id: Id,
    pub name: String,
    pub game_configuration: Reference<GameConfiguration>,
}

impl CharacterClass {
    pub fn named(name: &str) -> Self {
        CharacterClass {
            id: Id::new(),
            name: name.to_string(),
            ..Default::default()
        }
    }
}

impl Entity for CharacterClass {
    entity_identity!(CharacterClass);

    fn navigations() -> Navigations<Self> {
        Navigations::new()
            .with_reference(ReferenceNav::<Self, _>::new(
                "game_configuration",
                "game_configuration_id",
                |c| &c.game_configuration,
                |c| &mut c.game_configuration,
            ))
            .with_parent_link("game_configuration_id", GameConfiguration::TYPE)
    }
}

/// One game server instance. Edited together with its own configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameServerDefinition {
    pub id: Id,
    pub server_id: u16,
    pub description: String,
    pub configuration: Reference<GameServerConfiguration>,
    pub game_configuration: Reference<GameConfiguration>,
}

impl Entity for GameServerDefinition {
    entity_identity!(GameServerDefinition);

    fn navigations() -> Navigations<Self> {
        Navigations::new()
            .with_reference(
                ReferenceNav::<Self, _>::new(
                    "configuration",
                    "configuration_id",
                    |s| &s.configuration,
                    |s| &mut s.configuration,
                )
                .member_of_aggregate(),
            )
            .with_reference(ReferenceNav::<Self, _>::new(
                "game_configuration",
                "game_configuration_id",
                |s| &s.game_configuration,
                |s| &mut s.game_configuration,
            ))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameServerConfiguration {
    pub id: Id,
    pub max_players: u32,
    pub map_names: Vec<String>,
}

impl Entity for GameServerConfiguration {
    entity_identity!(GameServerConfiguration);
}

/// Player account. Not part of the configuration aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub login_name: String,
    #[serde(skip)]
    pub characters: Collection<Character>,
}

impl Account {
    pub fn new(login_name: &str) -> Self {
        Account {
            id: Id::new(),
            login_name: login_name.to_string(),
            ..Default::default()
        }
    }
}

impl Entity for Account {
    entity_identity!(Account);

    fn navigations() -> Navigations<Self> {
        Navigations::new().with_collection(
            CollectionNav::<Self, _>::new("characters", "account_id", |a| &a.characters, |a| &mut a.characters)
                .member_of_aggregate(),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Character {
    pub id: Id,
    pub name: String,
    pub level: u16,
    pub account: Reference<Account>,
    pub character_class: Reference<CharacterClass>,
}

impl Entity for Character {
    entity_identity!(Character);

    fn navigations() -> Navigations<Self> {
        Navigations::new()
            .with_reference(ReferenceNav::<Self, _>::new("account", "account_id", |c| &c.account, |c| &mut c.account))
            .with_reference(ReferenceNav::<Self, _>::new(
                "character_class",
                "character_class_id",
                |c| &c.character_class,
                |c| &mut c.character_class,
            ))
            .with_parent_link("account_id", Account::TYPE)
    }
}

/// Register every model type, without aggregate settings.
pub fn register_all(builder: SchemaBuilder) -> SchemaBuilder {
    builder
        .register::<GameConfiguration>()
        .register::<MonsterDefinition>()
        .register::<MonsterAttribute>()
        .register::<ItemDefinition>()
        .register::<ItemCharacterClass>()
        .register::<CharacterClass>()
        .register::<GameServerDefinition>()
        .register::<GameServerConfiguration>()
        .register::<Account>()
        .register::<Character>()
}

/// The model's schema: aggregate root [`GameConfiguration`], and game server
/// definitions edited together with their server configuration.
pub fn schema() -> Result<Schema, SchemaError> {
    register_all(Schema::builder())
        .aggregate_root(GameConfiguration::TYPE)
        .additional_edit_types(GameServerDefinition::TYPE, [GameServerConfiguration::TYPE])
        .build()
}
