//! Repositories
//!
//! One contract, three implementations: [`durable::DurableRepository`] reads
//! storage through the current unit of work, [`cached::CachedRepository`]
//! serves a whole table from memory, and [`aggregate::AggregateCacheRepository`]
//! serves one resident aggregate instance. [`provider::RepositoryProvider`]
//! picks between them for the active context.

pub mod aggregate;
pub mod cache;
pub mod cached;
pub mod durable;
pub mod index;
pub mod journal;
pub mod loader;
pub mod provider;

pub use aggregate::{AggregateCache, AggregateCacheRepository, AggregateCaches};
pub use cached::CachedRepository;
pub use durable::DurableRepository;
pub use provider::RepositoryProvider;

use crate::entity::{Entity, EntityRef};
use crate::error::Result;
use crate::types::Id;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait Repository<T: Entity>: Send + Sync {
    /// `None` when absent. Aggregate-scoped repositories raise
    /// `InvalidAggregateScope` instead.
    fn get_by_id(&self, id: Id) -> Result<Option<EntityRef<T>>>;

    fn get_all(&self) -> Result<Vec<EntityRef<T>>>;

    /// Stage the deletion of `id` (and its aggregate members) in the current
    /// unit of work, or commit it at once when there is none.
    fn delete(&self, id: Id) -> Result<bool>;

    fn delete_instance(&self, entity: &EntityRef<T>) -> Result<bool> {
        self.delete(entity.id())
    }

    fn load_by_property(&self, property: &str, value: Id) -> Result<Vec<EntityRef<T>>>;
}

/// Instrumentation counters of the cache layer.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    full_loads: AtomicU64,
    aggregate_populations: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub full_loads: u64,
    pub aggregate_populations: u64,
}

impl CacheStatistics {
    /// Completed full-table cache populations.
    pub fn full_loads(&self) -> u64 {
        self.full_loads.load(Ordering::SeqCst)
    }

    /// Completed per-root aggregate cache populations.
    pub fn aggregate_populations(&self) -> u64 {
        self.aggregate_populations.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            full_loads: self.full_loads(),
            aggregate_populations: self.aggregate_populations(),
        }
    }

    pub(crate) fn record_full_load(&self) {
        self.full_loads.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_aggregate_population(&self) {
        self.aggregate_populations.fetch_add(1, Ordering::SeqCst);
    }
}
