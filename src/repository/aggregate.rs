//! Per-root aggregate caches
//!
//! Several instances of the aggregate root type can be resident at once (one
//! per hosted configuration, say). Each gets its own [`AggregateCache`]
//! holding every entity of its closure, so an entity created under one root
//! is never visible when reading under another.

use crate::context::edit::EditTypeClosure;
use crate::context::provider::Shared;
use crate::context::ContextPurpose;
use crate::entity::{Entity, EntityRef, ErasedRef};
use crate::error::{PersistenceError, Result};
use crate::propagation::CacheUpdater;
use crate::repository::cache::{typed, ErasedCache};
use crate::repository::journal::PopulationJournal;
use crate::repository::Repository;
use crate::schema::Schema;
use crate::types::{EntityType, Id};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info};

/// Cache of one resident aggregate instance.
pub struct AggregateCache {
    root: Id,
    schema: Arc<Schema>,
    closure: Arc<EditTypeClosure>,
    caches: RwLock<HashMap<EntityType, Arc<dyn ErasedCache>>>,
    journal: PopulationJournal,
}

impl AggregateCache {
    /// A new cache, already recording commits for its population.
    fn new(root: Id, schema: Arc<Schema>, closure: Arc<EditTypeClosure>) -> Self {
        let journal = PopulationJournal::new();
        journal.start_recording();
        AggregateCache {
            root,
            schema,
            closure,
            caches: RwLock::new(HashMap::new()),
            journal,
        }
    }

    pub fn root(&self) -> Id {
        self.root
    }

    /// False while the population is still running.
    pub fn is_ready(&self) -> bool {
        self.journal.is_live()
    }

    pub(crate) fn journal(&self) -> &PopulationJournal {
        &self.journal
    }

    /// Cache of `entity_type`, created on first use. `None` for types outside the aggregate.
    pub fn cache_for(&self, entity_type: EntityType) -> Option<Arc<dyn ErasedCache>> {
        if !self.closure.is_editable(entity_type) {
            return None;
        }
        if let Some(cache) = self.caches.read().get(&entity_type) {
            return Some(Arc::clone(cache));
        }
        let handle = self.schema.handle(entity_type).ok()?;
        let mut caches = self.caches.write();
        let cache = caches
            .entry(entity_type)
            .or_insert_with(|| handle.new_cache(self.schema.indexed_properties(entity_type)));
        Some(Arc::clone(cache))
    }

    pub fn get(&self, entity_type: EntityType, id: Id) -> Option<ErasedRef> {
        self.caches.read().get(&entity_type)?.get(id)
    }

    pub fn insert(&self, entity: ErasedRef) -> bool {
        self.cache_for(entity.entity_type())
            .is_some_and(|cache| cache.insert(entity))
    }

    pub fn remove(&self, entity_type: EntityType, id: Id) -> Option<ErasedRef> {
        self.caches.read().get(&entity_type)?.remove(id)
    }

    /// Number of cached entities across all types.
    pub fn len(&self) -> usize {
        self.caches.read().values().map(|cache| cache.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every resident aggregate cache of the schema's root type.
pub struct AggregateCaches {
    root_type: EntityType,
    closure: Arc<EditTypeClosure>,
    residents: RwLock<HashMap<Id, Arc<AggregateCache>>>,
    populate: Mutex<()>,
}

impl AggregateCaches {
    pub(crate) fn new(root_type: EntityType, closure: Arc<EditTypeClosure>) -> Self {
        AggregateCaches {
            root_type,
            closure,
            residents: RwLock::new(HashMap::new()),
            populate: Mutex::new(()),
        }
    }

    pub fn root_type(&self) -> EntityType {
        self.root_type
    }

    /// True when per-root caches serve `entity_type`.
    pub fn covers(&self, entity_type: EntityType) -> bool {
        self.closure.is_editable(entity_type)
    }

    /// The populated cache of `root`, if resident.
    pub fn resident(&self, root: Id) -> Option<Arc<AggregateCache>> {
        self.residents
            .read()
            .get(&root)
            .filter(|cache| cache.is_ready())
            .cloned()
    }

    /// Every populated resident cache.
    pub fn residents(&self) -> Vec<Arc<AggregateCache>> {
        self.residents
            .read()
            .values()
            .filter(|cache| cache.is_ready())
            .cloned()
            .collect()
    }

    /// Resident caches including one still populating; the cache updater
    /// must reach it so that its journal sees every commit.
    pub(crate) fn all_residents(&self) -> Vec<Arc<AggregateCache>> {
        self.residents.read().values().cloned().collect()
    }

    pub fn evict(&self, root: Id) -> Option<Arc<AggregateCache>> {
        let evicted = self.residents.write().remove(&root);
        if evicted.is_some() {
            info!(root = %root, "Evicted aggregate cache");
        }
        evicted
    }

    /// Make the aggregate rooted at `root` resident. Idempotent and safe to
    /// call concurrently: populations are serialized and the check is
    /// repeated once the lock is held, so a root is populated at most once.
    ///
    /// The cache is registered, recording, before storage is read. Commits
    /// landing during the scan are replayed onto it before it is handed out.
    pub(crate) fn ensure_cache_for(&self, shared: &Arc<Shared>, root: Id) -> Result<Arc<AggregateCache>> {
        if let Some(resident) = self.resident(root) {
            return Ok(resident);
        }
        let _populating = self.populate.lock();
        if let Some(resident) = self.resident(root) {
            return Ok(resident);
        }

        let cache = Arc::new(AggregateCache::new(
            root,
            Arc::clone(&shared.schema),
            Arc::clone(&self.closure),
        ));
        self.residents.write().insert(root, Arc::clone(&cache));
        match self.populate(shared, &cache) {
            Ok(()) => Ok(cache),
            Err(e) => {
                let mut residents = self.residents.write();
                if residents.get(&root).is_some_and(|current| Arc::ptr_eq(current, &cache)) {
                    residents.remove(&root);
                }
                Err(e)
            }
        }
    }

    fn populate(&self, shared: &Arc<Shared>, cache: &Arc<AggregateCache>) -> Result<()> {
        let root = cache.root;
        let started = Instant::now();
        debug!(root = %root, root_type = %self.root_type, "Populating aggregate cache");
        let context = shared.new_context(ContextPurpose::CacheLoad, Some(root), None);
        if context.durable_get_erased(self.root_type, root)?.is_none() {
            return Err(PersistenceError::InvalidAggregateScope {
                entity_type: self.root_type,
                id: root,
                root: Some(root),
            });
        }

        for entity in context.tracked_entities() {
            if self.closure.is_editable(entity.entity_type()) && !belongs_elsewhere(&entity, cache) {
                cache.insert(entity);
            }
        }
        let replayed = cache.journal.go_live(|entries| {
            CacheUpdater::replay_resident(shared, cache, entries);
        });

        let still_resident = self
            .residents
            .read()
            .get(&root)
            .is_some_and(|current| Arc::ptr_eq(current, cache));
        if !still_resident {
            // The root was deleted while the population ran.
            return Err(PersistenceError::InvalidAggregateScope {
                entity_type: self.root_type,
                id: root,
                root: Some(root),
            });
        }

        shared.statistics.record_aggregate_population();
        debug!(
            root = %root,
            count = cache.len(),
            replayed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Aggregate cache populated"
        );
        Ok(())
    }
}

/// An instance of the root type other than the resident root itself.
fn belongs_elsewhere(entity: &ErasedRef, cache: &AggregateCache) -> bool {
    entity.entity_type() == cache.closure.root && entity.id() != cache.root
}

/// Repository of `T` scoped to one resident aggregate.
pub struct AggregateCacheRepository<T> {
    shared: Weak<Shared>,
    caches: Arc<AggregateCaches>,
    root: Id,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> AggregateCacheRepository<T> {
    pub(crate) fn new(shared: Weak<Shared>, caches: Arc<AggregateCaches>, root: Id) -> Self {
        AggregateCacheRepository {
            shared,
            caches,
            root,
            _entity: PhantomData,
        }
    }

    fn with_cache<R>(&self, f: impl FnOnce(&crate::repository::cache::EntityCache<T>) -> R) -> Result<R> {
        let shared = self.shared.upgrade().ok_or(PersistenceError::ProviderDropped)?;
        let resident = self.caches.ensure_cache_for(&shared, self.root)?;
        let erased = resident
            .cache_for(T::TYPE)
            .ok_or(PersistenceError::RepositoryNotFound(T::TYPE))?;
        let cache = typed::<T>(erased.as_ref()).ok_or(PersistenceError::RepositoryNotFound(T::TYPE))?;
        Ok(f(cache))
    }
}

impl<T: Entity> Repository<T> for AggregateCacheRepository<T> {
    fn get_by_id(&self, id: Id) -> Result<Option<EntityRef<T>>> {
        match self.with_cache(|cache| cache.get(id))? {
            Some(entity) => Ok(Some(entity)),
            None => Err(PersistenceError::InvalidAggregateScope {
                entity_type: T::TYPE,
                id,
                root: Some(self.root),
            }),
        }
    }

    fn get_all(&self) -> Result<Vec<EntityRef<T>>> {
        self.with_cache(|cache| cache.all())
    }

    fn delete(&self, id: Id) -> Result<bool> {
        let Some(entity) = self.with_cache(|cache| cache.get(id))? else {
            return Ok(false);
        };
        let shared = self.shared.upgrade().ok_or(PersistenceError::ProviderDropped)?;
        crate::context::Context::current_or_transient(&shared, true, |context| {
            context.delete(&entity)?;
            Ok(true)
        })
    }

    fn load_by_property(&self, property: &str, value: Id) -> Result<Vec<EntityRef<T>>> {
        self.with_cache(|cache| cache.by_property(property, value))?
            .ok_or_else(|| PersistenceError::PropertyNotIndexed {
                entity_type: T::TYPE,
                property: property.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextProvider;
    use crate::model::{GameConfiguration, MonsterDefinition};
    use crate::test_support::memory_provider;

    fn seed_root(provider: &ContextProvider, monsters: &[&str]) -> Id {
        let context = provider.create_context(ContextPurpose::Configuration);
        let config = context
            .create_new::<GameConfiguration>(|c| c.name = "Season 6".to_string())
            .unwrap();
        for name in monsters {
            context
                .create_new::<MonsterDefinition>(|m| {
                    m.name = name.to_string();
                    m.game_configuration.set_id(Some(config.id()));
                })
                .unwrap();
        }
        context.save_changes().unwrap();
        config.id()
    }

    #[test]
    fn test_population_is_idempotent() {
        let provider = memory_provider().with_aggregate_cache().unwrap();
        let root = seed_root(&provider, &["Spider", "Budge Dragon"]);

        let first = provider.ensure_cache_for(root).unwrap();
        let second = provider.ensure_cache_for(root).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.statistics().aggregate_populations(), 1);
        // Root, two monsters.
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_missing_root_is_scope_error() {
        let provider = memory_provider().with_aggregate_cache().unwrap();
        assert!(matches!(
            provider.ensure_cache_for(Id::new()),
            Err(PersistenceError::InvalidAggregateScope { .. })
        ));
    }

    #[test]
    fn test_get_by_id_outside_aggregate_is_scope_error() {
        let provider = memory_provider().with_aggregate_cache().unwrap();
        let first = seed_root(&provider, &["Spider"]);
        let second = seed_root(&provider, &["Goblin"]);

        let context = provider.create_aggregate_context(first);
        let monsters = context.get_all::<MonsterDefinition>().unwrap();
        assert_eq!(monsters.len(), 1);

        let foreign = provider
            .create_aggregate_context(second)
            .get_all::<MonsterDefinition>()
            .unwrap();
        assert!(matches!(
            context.get_by_id::<MonsterDefinition>(foreign[0].id()),
            Err(PersistenceError::InvalidAggregateScope { .. })
        ));
    }
}
