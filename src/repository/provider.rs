//! Repository resolution for the active context.

use crate::context::provider::Shared;
use crate::context::Context;
use crate::entity::Entity;
use crate::error::{PersistenceError, Result};
use crate::repository::aggregate::{AggregateCacheRepository, AggregateCaches};
use crate::repository::cached::{CachedRepository, FullCache};
use crate::repository::{DurableRepository, Repository};
use crate::types::EntityType;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Registered repositories of one context provider.
#[derive(Default)]
pub struct RepositoryProvider {
    durable: RwLock<HashMap<EntityType, Arc<dyn Any + Send + Sync>>>,
    full: RwLock<HashMap<EntityType, Arc<dyn FullCache>>>,
    aggregate: RwLock<Option<Arc<AggregateCaches>>>,
}

impl RepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_full(&self, cache: Arc<dyn FullCache>) -> Arc<dyn FullCache> {
        let mut full = self.full.write();
        Arc::clone(full.entry(cache.entity_type()).or_insert(cache))
    }

    pub(crate) fn set_aggregate(&self, caches: Arc<AggregateCaches>) -> Arc<AggregateCaches> {
        let mut aggregate = self.aggregate.write();
        Arc::clone(aggregate.get_or_insert(caches))
    }

    pub fn full_caches(&self) -> Vec<Arc<dyn FullCache>> {
        self.full.read().values().cloned().collect()
    }

    pub fn full_cache(&self, entity_type: EntityType) -> Option<Arc<dyn FullCache>> {
        self.full.read().get(&entity_type).cloned()
    }

    pub fn aggregate_caches(&self) -> Option<Arc<AggregateCaches>> {
        self.aggregate.read().clone()
    }

    pub(crate) fn full_typed<T: Entity>(&self) -> Option<Arc<CachedRepository<T>>> {
        let cache = self.full_cache(T::TYPE)?;
        cache.into_any().downcast::<CachedRepository<T>>().ok()
    }

    /// Pick the repository serving `T` under `context`.
    ///
    /// Cache loads and types the context may edit always go to storage, so an
    /// edit never works on a cached instance. Otherwise the resident aggregate
    /// cache of the context's root wins, then a full-table cache, then the
    /// durable repository.
    pub(crate) fn resolve<T: Entity>(
        &self,
        shared: &Arc<Shared>,
        context: Option<&Context>,
    ) -> Result<Arc<dyn Repository<T>>> {
        if let Some(context) = context {
            if context.bypasses_cache() {
                return self.durable::<T>(shared);
            }
            if context
                .edit_closure()
                .is_some_and(|closure| closure.is_editable(T::TYPE))
            {
                return self.durable::<T>(shared);
            }
            if let (Some(root), Some(caches)) = (context.aggregate_root(), self.aggregate_caches()) {
                if caches.covers(T::TYPE) {
                    return Ok(Arc::new(AggregateCacheRepository::<T>::new(
                        Arc::downgrade(shared),
                        caches,
                        root,
                    )));
                }
            }
        }
        if let Some(cached) = self.full_typed::<T>() {
            return Ok(cached);
        }
        self.durable::<T>(shared)
    }

    /// The durable repository of `T`, registered on first request when the
    /// schema knows the type.
    pub(crate) fn durable<T: Entity>(&self, shared: &Arc<Shared>) -> Result<Arc<dyn Repository<T>>> {
        if let Some(existing) = self.durable.read().get(&T::TYPE) {
            if let Ok(repository) = Arc::clone(existing).downcast::<DurableRepository<T>>() {
                return Ok(repository);
            }
        }
        if !shared.schema.contains(T::TYPE) {
            return Err(PersistenceError::RepositoryNotFound(T::TYPE));
        }

        let mut durable = self.durable.write();
        let entry = durable.entry(T::TYPE).or_insert_with(|| {
            debug!(entity_type = %T::TYPE, "Registering durable repository");
            Arc::new(DurableRepository::<T>::new(Arc::downgrade(shared)))
        });
        Arc::clone(entry)
            .downcast::<DurableRepository<T>>()
            .map(|repository| repository as Arc<dyn Repository<T>>)
            .map_err(|_| PersistenceError::RepositoryNotFound(T::TYPE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextPurpose;
    use crate::entity::{EntityRef, Navigations};
    use crate::model::{CharacterClass, GameConfiguration, ItemDefinition, MonsterDefinition};
    use crate::test_support::memory_provider;
    use crate::types::Id;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Unregistered {
        id: Id,
    }

    impl Entity for Unregistered {
        const TYPE: EntityType = EntityType::new("Unregistered");

        fn id(&self) -> Id {
            self.id
        }

        fn set_id(&mut self, id: Id) {
            self.id = id;
        }

        fn navigations() -> Navigations<Self> {
            Navigations::new()
        }
    }

    #[test]
    fn test_unregistered_type_has_no_repository() {
        let provider = memory_provider();
        let context = provider.create_context(ContextPurpose::Configuration);
        assert!(matches!(
            context.repository::<Unregistered>(),
            Err(PersistenceError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn test_full_cache_preferred_outside_edit_closure() {
        let provider = memory_provider().with_full_cache::<CharacterClass>();
        let full = provider.full_cache::<CharacterClass>().unwrap();
        full.add_to_cache(EntityRef::new(CharacterClass::named("Summoner")));

        let context = provider.create_context(ContextPurpose::Player);
        assert_eq!(context.get_all::<CharacterClass>().unwrap().len(), 1);

        // Editing the whole configuration: character classes are editable, so
        // reads go to storage, which has none.
        let edit = provider
            .create_edit_context::<GameConfiguration>(None)
            .unwrap();
        assert!(edit.get_all::<CharacterClass>().unwrap().is_empty());
    }

    #[test]
    fn test_read_only_types_may_use_caches() {
        let provider = memory_provider().with_full_cache::<ItemDefinition>();
        let full = provider.full_cache::<ItemDefinition>().unwrap();
        full.add_to_cache(EntityRef::new(ItemDefinition::named("Jewel of Chaos")));

        let edit = provider.create_edit_context::<MonsterDefinition>(None).unwrap();
        assert_eq!(edit.get_all::<ItemDefinition>().unwrap().len(), 1);
    }
}
