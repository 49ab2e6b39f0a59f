//! Full-table cache repository

use crate::concurrency::{GateEntry, LoadGate, LoadingStatus};
use crate::context::provider::Shared;
use crate::context::{Context, ContextPurpose};
use crate::entity::{Entity, EntityRef};
use crate::error::{PersistenceError, Result};
use crate::propagation::CacheUpdater;
use crate::repository::cache::{EntityCache, ErasedCache};
use crate::repository::journal::PopulationJournal;
use crate::repository::Repository;
use crate::types::{EntityType, Id};
use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info};

/// Type-erased view of a [`CachedRepository`] for the provider and the cache updater.
pub trait FullCache: Send + Sync {
    fn entity_type(&self) -> EntityType;

    fn all_loaded(&self) -> bool;

    /// Commits seen while the population runs, replayed before it completes.
    fn journal(&self) -> &PopulationJournal;

    fn entries(&self) -> Arc<dyn ErasedCache>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Serves every entity of `T` from memory after one full scan.
///
/// The scan runs at most once: concurrent callers arriving while it is in
/// flight block on the gate until it completes and then read the same cache.
/// After that, the cache is kept current by change propagation only.
/// Commits that land during the scan are journaled and replayed onto the
/// scanned rows before the gate opens.
pub struct CachedRepository<T> {
    shared: Weak<Shared>,
    cache: Arc<EntityCache<T>>,
    gate: LoadGate,
    journal: PopulationJournal,
}

impl<T: Entity> CachedRepository<T> {
    pub fn new(shared: Weak<Shared>, indexed: Vec<&'static str>) -> Self {
        CachedRepository {
            shared,
            cache: Arc::new(EntityCache::new(indexed)),
            gate: LoadGate::new(),
            journal: PopulationJournal::new(),
        }
    }

    pub fn all_loaded(&self) -> bool {
        self.gate.status() == LoadingStatus::Loaded
    }

    pub fn cache(&self) -> &Arc<EntityCache<T>> {
        &self.cache
    }

    /// Populate the cache unless it already is. A failed population is
    /// retried by the next caller.
    pub fn ensure_loaded(&self) -> Result<()> {
        let ticket = match self.gate.enter(true) {
            GateEntry::Acquired(ticket) => ticket,
            // The loading thread itself sees whatever has been cached so far.
            GateEntry::Loaded | GateEntry::Reentrant => return Ok(()),
            GateEntry::Failed => {
                return Err(PersistenceError::LoadingFailed {
                    navigation: format!("{} full cache", T::TYPE),
                    reason: "previous population failed".to_string(),
                })
            }
        };

        self.journal.start_recording();
        match self.populate() {
            Ok(count) => {
                ticket.complete();
                info!(entity_type = %T::TYPE, count, "Full cache loaded");
                Ok(())
            }
            Err(e) => {
                self.journal.abandon();
                self.cache.clear();
                ticket.fail();
                Err(e)
            }
        }
    }

    fn populate(&self) -> Result<usize> {
        let shared = self.shared.upgrade().ok_or(PersistenceError::ProviderDropped)?;
        let started = Instant::now();
        debug!(entity_type = %T::TYPE, "Populating full cache");

        let context = shared.new_context(ContextPurpose::CacheLoad, None, None);
        let entities = context.durable_all::<T>()?;
        for entity in entities {
            self.cache.add(entity);
        }
        let replayed = self.journal.go_live(|entries| {
            CacheUpdater::replay_full(&shared, self.entries(), entries);
        });
        let count = self.cache.len();
        shared.statistics.record_full_load();
        debug!(
            entity_type = %T::TYPE,
            count,
            replayed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Full cache populated"
        );
        Ok(count)
    }

    pub fn add_to_cache(&self, entity: EntityRef<T>) -> bool {
        self.cache.add(entity)
    }

    pub fn remove_from_cache(&self, id: Id) -> Option<EntityRef<T>> {
        self.cache.take(id)
    }
}

impl<T: Entity> FullCache for CachedRepository<T> {
    fn entity_type(&self) -> EntityType {
        T::TYPE
    }

    fn all_loaded(&self) -> bool {
        CachedRepository::all_loaded(self)
    }

    fn journal(&self) -> &PopulationJournal {
        &self.journal
    }

    fn entries(&self) -> Arc<dyn ErasedCache> {
        Arc::clone(&self.cache) as Arc<dyn ErasedCache>
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T: Entity> Repository<T> for CachedRepository<T> {
    fn get_by_id(&self, id: Id) -> Result<Option<EntityRef<T>>> {
        self.ensure_loaded()?;
        Ok(self.cache.get(id))
    }

    fn get_all(&self) -> Result<Vec<EntityRef<T>>> {
        self.ensure_loaded()?;
        Ok(self.cache.all())
    }

    fn delete(&self, id: Id) -> Result<bool> {
        self.ensure_loaded()?;
        let Some(entity) = self.cache.get(id) else {
            return Ok(false);
        };
        let shared = self.shared.upgrade().ok_or(PersistenceError::ProviderDropped)?;
        // The cache entry itself leaves through change propagation after commit.
        Context::current_or_transient(&shared, true, |context| {
            context.delete(&entity)?;
            Ok(true)
        })
    }

    fn load_by_property(&self, property: &str, value: Id) -> Result<Vec<EntityRef<T>>> {
        self.ensure_loaded()?;
        self.cache
            .by_property(property, value)
            .ok_or_else(|| PersistenceError::PropertyNotIndexed {
                entity_type: T::TYPE,
                property: property.to_string(),
            })
    }
}
