//! CLI route: single route table and run context.

use crate::cli::parse::{Commands, OutputFormat};
use crate::cli::presentation::{self, ResidentSize, SeedSummary, StatsReport, TypeCount};
use crate::config::{ConfigLoader, GraphCacheConfig, StorageBackend};
use crate::context::{ContextProvider, ContextPurpose};
use crate::entity::EntityRef;
use crate::model::{
    self, Account, Character, CharacterClass, GameConfiguration, ItemDefinition, MonsterAttribute,
    MonsterDefinition,
};
use crate::types::Id;
use anyhow::{anyhow, Context as _};
use std::path::{Path, PathBuf};
use tracing::info;

const CLASS_NAMES: [&str; 3] = ["Dark Wizard", "Dark Knight", "Fairy Elf"];

/// Runtime context for CLI execution: loaded configuration and an open provider.
pub struct RunContext {
    provider: ContextProvider,
    config: GraphCacheConfig,
}

impl RunContext {
    /// Load configuration (explicit file or workspace layers), apply the
    /// `--store` override and open the provider over the reference model.
    pub fn new(
        workspace_root: &Path,
        config_path: Option<&Path>,
        store_path: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let mut config = match config_path {
            Some(path) => ConfigLoader::load_from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => ConfigLoader::load(workspace_root).context("Failed to load configuration")?,
        };
        if let Some(path) = store_path {
            config.storage.backend = StorageBackend::Sled;
            config.storage.path = Some(path);
            config.storage.temporary = false;
        }

        let schema = model::schema().context("Failed to build the model schema")?;
        let provider = ContextProvider::from_config(schema, &config).context("Failed to open the store")?;
        Ok(RunContext { provider, config })
    }

    pub fn provider(&self) -> &ContextProvider {
        &self.provider
    }

    pub fn config(&self) -> &GraphCacheConfig {
        &self.config
    }

    pub fn execute(&self, command: &Commands) -> anyhow::Result<String> {
        match command {
            Commands::Closure { entity_type, format } => self.closure(entity_type, *format),
            Commands::Seed { name, monsters } => self.seed(name, *monsters),
            Commands::Stats { warm, format } => self.stats(*warm, *format),
            Commands::Show { entity_type, id } => self.show(entity_type, id.as_deref()),
        }
    }

    fn closure(&self, name: &str, format: OutputFormat) -> anyhow::Result<String> {
        let schema = self.provider.schema();
        let entity_type = schema
            .find_type(name)
            .ok_or_else(|| anyhow!("Unknown entity type '{}'", name))?;
        let closure = schema.edit_closure(entity_type)?;
        match format {
            OutputFormat::Text => Ok(presentation::format_closure_text(&closure)),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(closure.as_ref())?),
        }
    }

    fn seed(&self, name: &str, monsters: usize) -> anyhow::Result<String> {
        let context = self.provider.create_context(ContextPurpose::Configuration);
        let config = context.create_new::<GameConfiguration>(|c| c.name = name.to_string())?;
        let root = config.id();

        let classes = CLASS_NAMES
            .iter()
            .map(|class| {
                context.create_new::<CharacterClass>(|c| {
                    c.name = class.to_string();
                    c.game_configuration.set_id(Some(root));
                })
            })
            .collect::<crate::error::Result<Vec<_>>>()?;

        let item = context.create_new::<ItemDefinition>(|i| {
            i.name = "Kris".to_string();
            i.game_configuration.set_id(Some(root));
        })?;
        let rows: Vec<_> = {
            let guard = item.read();
            let view = guard.qualified_classes();
            classes.iter().take(2).filter_map(|class| view.add(class)).collect()
        };
        for row in &rows {
            context.add(row);
        }

        for index in 0..monsters {
            let level = (index as u16 + 1) * 4;
            let monster = context.create_new::<MonsterDefinition>(|m| {
                m.name = format!("Monster {}", index + 1);
                m.level = level;
                m.game_configuration.set_id(Some(root));
                m.drop_item.set_id(Some(item.id()));
            })?;
            for (attribute, value) in [("Defense", f32::from(level) * 1.5), ("Level", f32::from(level))] {
                context.create_new::<MonsterAttribute>(|a| {
                    a.name = attribute.to_string();
                    a.value = value;
                    a.monster_definition.set_id(Some(monster.id()));
                })?;
            }
        }

        let account = context.create_new::<Account>(|a| a.login_name = "demo".to_string())?;
        seed_character(&context, &account, classes.get(1))?;

        context.save_changes()?;
        info!(root = %root, monsters, "Seeded game configuration");
        Ok(presentation::format_seed_summary(&SeedSummary {
            configuration: root,
            name: name.to_string(),
            monsters,
            character_classes: classes.len(),
            account: account.id(),
        }))
    }

    fn stats(&self, warm: bool, format: OutputFormat) -> anyhow::Result<String> {
        let schema = self.provider.schema();
        let store = self.provider.store();

        let rows = schema
            .types()
            .iter()
            .map(|ty| {
                Ok(TypeCount {
                    entity_type: ty.name().to_string(),
                    rows: store.count(*ty)?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut residents = Vec::new();
        if warm {
            let root_type = schema
                .aggregate_root()
                .ok_or_else(|| anyhow!("The schema declares no aggregate root"))?;
            for (root, _) in store.scan(root_type)? {
                let cache = self
                    .provider
                    .ensure_cache_for(root)
                    .with_context(|| format!("Failed to warm the cache of {} {}", root_type, root))?;
                residents.push(ResidentSize {
                    root,
                    entities: cache.len(),
                });
            }
        }

        let report = StatsReport {
            rows,
            residents,
            statistics: self.provider.statistics().snapshot(),
        };
        match format {
            OutputFormat::Text => Ok(presentation::format_stats_text(&report)),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(&report)?),
        }
    }

    fn show(&self, name: &str, id: Option<&str>) -> anyhow::Result<String> {
        let schema = self.provider.schema();
        let entity_type = schema
            .find_type(name)
            .ok_or_else(|| anyhow!("Unknown entity type '{}'", name))?;
        let handle = schema.handle(entity_type)?;
        let store = self.provider.store();

        let json = match id {
            Some(id) => {
                let id = Id::parse(id).ok_or_else(|| anyhow!("'{}' is not a valid id", id))?;
                let bytes = store
                    .get(entity_type, id)?
                    .ok_or_else(|| anyhow!("{} {} not found", entity_type, id))?;
                handle.to_json(&bytes)?
            }
            None => serde_json::Value::Array(
                store
                    .scan(entity_type)?
                    .iter()
                    .map(|(_, bytes)| handle.to_json(bytes))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        Ok(serde_json::to_string_pretty(&json)?)
    }
}

fn seed_character(
    context: &crate::context::Context,
    account: &EntityRef<Account>,
    class: Option<&EntityRef<CharacterClass>>,
) -> crate::error::Result<()> {
    context.create_new::<Character>(|c| {
        c.name = "DemoKnight".to_string();
        c.level = 1;
        c.account.set_id(Some(account.id()));
        c.character_class.set(class);
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run_context(dir: &TempDir) -> RunContext {
        RunContext::new(dir.path(), None, Some(dir.path().join("store"))).unwrap()
    }

    #[test]
    fn test_seed_then_stats() {
        let dir = TempDir::new().unwrap();
        let run = run_context(&dir);
        run.execute(&Commands::Seed {
            name: "Season 6".to_string(),
            monsters: 3,
        })
        .unwrap();

        let json = run
            .execute(&Commands::Stats {
                warm: true,
                format: OutputFormat::Json,
            })
            .unwrap();
        let report: serde_json::Value = serde_json::from_str(&json).unwrap();
        let count = |name: &str| {
            report["rows"]
                .as_array()
                .unwrap()
                .iter()
                .find(|row| row["entity_type"] == name)
                .map(|row| row["rows"].as_u64().unwrap())
                .unwrap()
        };
        assert_eq!(count("MonsterDefinition"), 3);
        assert_eq!(count("MonsterAttribute"), 6);
        assert_eq!(count("ItemCharacterClass"), 2);
        assert_eq!(count("Character"), 1);
        assert_eq!(report["residents"].as_array().unwrap().len(), 1);
        assert_eq!(report["statistics"]["aggregate_populations"], 1);
    }

    #[test]
    fn test_closure_and_unknown_type() {
        let dir = TempDir::new().unwrap();
        let run = run_context(&dir);
        let text = run
            .execute(&Commands::Closure {
                entity_type: "MonsterDefinition".to_string(),
                format: OutputFormat::Text,
            })
            .unwrap();
        assert!(text.contains("MonsterAttribute"));
        assert!(text.contains("monsters"));

        let err = run
            .execute(&Commands::Closure {
                entity_type: "Dragon".to_string(),
                format: OutputFormat::Text,
            })
            .unwrap_err();
        assert!(err.to_string().contains("Unknown entity type"));
    }

    #[test]
    fn test_show_missing_entity() {
        let dir = TempDir::new().unwrap();
        let run = run_context(&dir);
        let err = run
            .execute(&Commands::Show {
                entity_type: "Account".to_string(),
                id: Some(Id::new().to_string()),
            })
            .unwrap_err();
        assert!(err.to_string().contains("not found"));

        let listed = run
            .execute(&Commands::Show {
                entity_type: "Account".to_string(),
                id: None,
            })
            .unwrap();
        assert_eq!(listed.trim(), "[]");
    }
}
