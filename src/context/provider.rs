//! Context provider
//!
//! Owns everything contexts share: the schema, the store, the registered
//! repositories and caches, the change listeners and the cache statistics.
//! Game-server components ask it for a context keyed by what they are about
//! to do.

use crate::config::GraphCacheConfig;
use crate::context::{stack, Context, EditTypeClosure};
use crate::entity::Entity;
use crate::error::{PersistenceError, Result, SchemaError};
use crate::propagation::broadcast::ChangeBroadcaster;
use crate::propagation::cache_updater::CacheUpdater;
use crate::propagation::ChangeListener;
use crate::repository::aggregate::{AggregateCache, AggregateCaches};
use crate::repository::cached::{CachedRepository, FullCache};
use crate::repository::{CacheStatistics, Repository, RepositoryProvider};
use crate::schema::Schema;
use crate::store::Store;
use crate::types::{EntityType, Id};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// What a context is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ContextPurpose {
    Account,
    Configuration,
    Player,
    Trade,
    FriendServer,
    GuildServer,
    /// Aggregate-scoped edit of the given root type.
    Edit(EntityType),
    /// Short-lived context opened by a repository call made outside any context.
    Transient,
    /// Population of a full-table or aggregate cache; always reads storage.
    CacheLoad,
}

impl fmt::Display for ContextPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextPurpose::Account => f.write_str("account"),
            ContextPurpose::Configuration => f.write_str("configuration"),
            ContextPurpose::Player => f.write_str("player"),
            ContextPurpose::Trade => f.write_str("trade"),
            ContextPurpose::FriendServer => f.write_str("friend-server"),
            ContextPurpose::GuildServer => f.write_str("guild-server"),
            ContextPurpose::Edit(root) => write!(f, "edit:{}", root),
            ContextPurpose::Transient => f.write_str("transient"),
            ContextPurpose::CacheLoad => f.write_str("cache-load"),
        }
    }
}

/// State shared by a provider and every context it creates.
pub struct Shared {
    pub(crate) schema: Arc<Schema>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) repositories: RepositoryProvider,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
    pub(crate) statistics: CacheStatistics,
    cache_updater_installed: AtomicBool,
}

impl Shared {
    pub(crate) fn new_context(
        self: &Arc<Self>,
        purpose: ContextPurpose,
        aggregate_root: Option<Id>,
        edit: Option<Arc<EditTypeClosure>>,
    ) -> Arc<Context> {
        Arc::new(Context::new(Arc::clone(self), purpose, aggregate_root, edit))
    }

    pub(crate) fn listeners(&self) -> Vec<Arc<dyn ChangeListener>> {
        self.listeners.read().clone()
    }

    /// The cache updater runs before every other listener.
    fn install_cache_updater(self: &Arc<Self>) {
        if !self.cache_updater_installed.swap(true, Ordering::SeqCst) {
            let updater: Arc<dyn ChangeListener> = Arc::new(CacheUpdater::new(Arc::downgrade(self)));
            self.listeners.write().insert(0, updater);
        }
    }
}

#[derive(Clone)]
pub struct ContextProvider {
    shared: Arc<Shared>,
    broadcaster: Option<Arc<ChangeBroadcaster>>,
}

impl fmt::Debug for ContextProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextProvider")
            .field("schema", &self.shared.schema)
            .field("statistics", &self.shared.statistics)
            .finish()
    }
}

impl ContextProvider {
    pub fn new(schema: impl Into<Arc<Schema>>, store: Arc<dyn Store>) -> Self {
        ContextProvider {
            shared: Arc::new(Shared {
                schema: schema.into(),
                store,
                repositories: RepositoryProvider::new(),
                listeners: RwLock::new(Vec::new()),
                statistics: CacheStatistics::default(),
                cache_updater_installed: AtomicBool::new(false),
            }),
            broadcaster: None,
        }
    }

    /// Open the configured store and enable the configured caches.
    pub fn from_config(schema: impl Into<Arc<Schema>>, config: &GraphCacheConfig) -> Result<Self> {
        let store = config.storage.open()?;
        let mut provider = ContextProvider::new(schema, store);

        if config.cache.aggregate_cache {
            if provider.schema().aggregate_root().is_some() {
                provider.enable_aggregate_cache()?;
            } else {
                warn!("Aggregate cache requested but the schema has no aggregate root");
            }
        }
        for name in &config.cache.full_cache_types {
            let entity_type = provider
                .schema()
                .find_type(name)
                .ok_or_else(|| PersistenceError::ConfigError(format!("Unknown entity type in cache.full_cache_types: {}", name)))?;
            provider.enable_full_cache(entity_type)?;
        }
        if config.cache.broadcast_capacity > 0 {
            provider = provider.with_broadcast(config.cache.broadcast_capacity);
        }

        info!(
            backend = ?config.storage.backend,
            aggregate_cache = config.cache.aggregate_cache,
            full_cache_types = config.cache.full_cache_types.len(),
            "Context provider ready"
        );
        Ok(provider)
    }

    pub fn with_aggregate_cache(self) -> Result<Self> {
        self.enable_aggregate_cache()?;
        Ok(self)
    }

    /// Serve the schema's aggregate root and its closure from per-root caches.
    pub fn enable_aggregate_cache(&self) -> Result<Arc<AggregateCaches>> {
        let schema = &self.shared.schema;
        let root = schema.aggregate_root().ok_or(SchemaError::NoAggregateRoot)?;
        let closure = schema.edit_closure(root)?;
        let caches = self
            .shared
            .repositories
            .set_aggregate(Arc::new(AggregateCaches::new(root, closure)));
        self.shared.install_cache_updater();
        Ok(caches)
    }

    /// Serve `T` from a full-table cache. Unregistered types are logged and ignored.
    pub fn with_full_cache<T: Entity>(self) -> Self {
        if let Err(e) = self.enable_full_cache(T::TYPE) {
            warn!(entity_type = %T::TYPE, error = %e, "Full cache not enabled");
        }
        self
    }

    pub fn enable_full_cache(&self, entity_type: EntityType) -> Result<Arc<dyn FullCache>> {
        let schema = &self.shared.schema;
        let handle = schema.handle(entity_type)?;
        let cache = handle.new_full_cache(
            Arc::downgrade(&self.shared),
            schema.indexed_properties(entity_type),
        );
        let registered = self.shared.repositories.register_full(cache);
        self.shared.install_cache_updater();
        Ok(registered)
    }

    /// Forward committed changes to a broadcast channel of `capacity` entries.
    pub fn with_broadcast(mut self, capacity: usize) -> Self {
        let broadcaster = Arc::new(ChangeBroadcaster::new(capacity));
        self.add_change_listener(broadcaster.clone());
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn broadcaster(&self) -> Option<&Arc<ChangeBroadcaster>> {
        self.broadcaster.as_ref()
    }

    pub fn add_change_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.shared.listeners.write().push(listener);
    }

    pub fn create_context(&self, purpose: ContextPurpose) -> Arc<Context> {
        self.shared.new_context(purpose, None, None)
    }

    /// Context reading through the resident aggregate cache of `root`.
    pub fn create_aggregate_context(&self, root: Id) -> Arc<Context> {
        self.shared
            .new_context(ContextPurpose::Configuration, Some(root), None)
    }

    /// Edit context scoped to the closure of `T`. With `aggregate_root`, types
    /// outside the closure are read from that root's cache and new entities
    /// are linked to it.
    pub fn create_edit_context<T: Entity>(&self, aggregate_root: Option<Id>) -> Result<Arc<Context>> {
        self.create_edit_context_for(T::TYPE, aggregate_root)
    }

    pub fn create_edit_context_for(&self, root: EntityType, aggregate_root: Option<Id>) -> Result<Arc<Context>> {
        let closure = self.shared.schema.edit_closure(root)?;
        Ok(self
            .shared
            .new_context(ContextPurpose::Edit(root), aggregate_root, Some(closure)))
    }

    /// Repository of `T` under the current context, or outside any context.
    pub fn repository<T: Entity>(&self) -> Result<Arc<dyn Repository<T>>> {
        let current = stack::current_context().filter(|context| context.belongs_to(&self.shared));
        self.shared
            .repositories
            .resolve::<T>(&self.shared, current.as_deref())
    }

    pub fn full_cache<T: Entity>(&self) -> Option<Arc<CachedRepository<T>>> {
        self.shared.repositories.full_typed::<T>()
    }

    /// Make the aggregate rooted at `root` resident.
    pub fn ensure_cache_for(&self, root: Id) -> Result<Arc<AggregateCache>> {
        let caches = self
            .shared
            .repositories
            .aggregate_caches()
            .ok_or_else(|| PersistenceError::ConfigError("Aggregate cache is not enabled".to_string()))?;
        caches.ensure_cache_for(&self.shared, root)
    }

    pub fn aggregate_caches(&self) -> Option<Arc<AggregateCaches>> {
        self.shared.repositories.aggregate_caches()
    }

    pub fn statistics(&self) -> &CacheStatistics {
        &self.shared.statistics
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.shared.schema
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.shared.store
    }

    #[cfg(test)]
    pub(crate) fn downgrade(&self) -> std::sync::Weak<Shared> {
        Arc::downgrade(&self.shared)
    }
}
