//! Incremental cache maintenance
//!
//! Applies committed changes to every cache that holds (or should hold) the
//! affected entity: the full-table caches and each resident aggregate cache.
//! Caches only ever receive value copies, never the committing context's
//! instance, and changed entities are updated in place so that holders of a
//! cached reference observe the new values.
//!
//! A cache that is still populating gets the change through its
//! [`PopulationJournal`](crate::repository::journal::PopulationJournal)
//! instead, and the population replays it before the cache goes live.

use crate::context::provider::Shared;
use crate::context::ContextPurpose;
use crate::entity::erased::aggregate_members;
use crate::entity::ErasedRef;
use crate::error::ListenerError;
use crate::propagation::{ChangeListener, ParentRef};
use crate::repository::aggregate::AggregateCache;
use crate::repository::cache::ErasedCache;
use crate::repository::journal::{Admission, JournalEntry};
use crate::types::{EntityType, Id};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// One consistency unit the updater maintains.
enum Domain {
    /// Every live full-table cache, by type.
    Full(HashMap<EntityType, Arc<dyn ErasedCache>>),
    Resident(Arc<AggregateCache>),
}

impl Domain {
    fn label(&self) -> String {
        match self {
            Domain::Full(_) => "full".to_string(),
            Domain::Resident(cache) => format!("aggregate:{}", cache.root()),
        }
    }

    fn get(&self, entity_type: EntityType, id: Id) -> Option<ErasedRef> {
        match self {
            Domain::Full(caches) => caches.get(&entity_type)?.get(id),
            Domain::Resident(cache) => cache.get(entity_type, id),
        }
    }

    fn insert(&self, entity: ErasedRef) -> bool {
        match self {
            Domain::Full(caches) => caches
                .get(&entity.entity_type())
                .is_some_and(|cache| cache.insert(entity)),
            Domain::Resident(cache) => cache.insert(entity),
        }
    }

    fn remove(&self, entity_type: EntityType, id: Id) -> Option<ErasedRef> {
        match self {
            Domain::Full(caches) => caches.get(&entity_type)?.remove(id),
            Domain::Resident(cache) => cache.remove(entity_type, id),
        }
    }

    fn reindex(&self, entity_type: EntityType, id: Id) {
        match self {
            Domain::Full(caches) => {
                if let Some(cache) = caches.get(&entity_type) {
                    cache.reindex(id);
                }
            }
            Domain::Resident(cache) => {
                if let Some(cache) = cache.cache_for(entity_type) {
                    cache.reindex(id);
                }
            }
        }
    }

    fn link_references(&self, entity: &ErasedRef) {
        entity.resolve_references(&|target, key| self.get(target, key));
    }

    fn cached_parent(&self, parent: Option<&ParentRef>) -> Option<ErasedRef> {
        parent.and_then(|parent| self.get(parent.entity_type(), parent.id()))
    }
}

/// The listener that keeps a provider's caches consistent with commits.
pub struct CacheUpdater {
    shared: Weak<Shared>,
}

impl CacheUpdater {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        CacheUpdater { shared }
    }

    fn shared(&self) -> Result<Arc<Shared>, ListenerError> {
        self.shared.upgrade().ok_or_else(|| ListenerError::Failed {
            listener: self.name(),
            reason: "context provider dropped".to_string(),
        })
    }

    fn live_full_caches(shared: &Shared) -> HashMap<EntityType, Arc<dyn ErasedCache>> {
        shared
            .repositories
            .full_caches()
            .into_iter()
            .filter(|cache| cache.journal().is_live())
            .map(|cache| (cache.entity_type(), cache.entries()))
            .collect()
    }

    /// Hand one change to every cache of `entity_type`: live caches get
    /// `apply` now, populating ones buffer `entry` for replay.
    fn route(
        shared: &Shared,
        entity_type: EntityType,
        entry: impl Fn() -> JournalEntry,
        mut apply: impl FnMut(&Domain) -> Result<(), ListenerError>,
    ) -> Result<(), ListenerError> {
        if let Some(full) = shared.repositories.full_cache(entity_type) {
            if full.journal().admit(&entry) == Admission::Apply {
                apply(&Domain::Full(Self::live_full_caches(shared)))?;
            }
        }
        if let Some(caches) = shared.repositories.aggregate_caches() {
            if caches.covers(entity_type) {
                for resident in caches.all_residents() {
                    if resident.journal().admit(&entry) == Admission::Apply {
                        apply(&Domain::Resident(resident))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Replay changes buffered while the full cache `populated` was loading.
    pub(crate) fn replay_full(shared: &Arc<Shared>, populated: Arc<dyn ErasedCache>, entries: Vec<JournalEntry>) {
        let mut caches = Self::live_full_caches(shared);
        caches.insert(populated.entity_type(), populated);
        Self::replay(shared, &Domain::Full(caches), entries);
    }

    /// Replay changes buffered while `resident` was populating.
    pub(crate) fn replay_resident(shared: &Arc<Shared>, resident: &Arc<AggregateCache>, entries: Vec<JournalEntry>) {
        Self::replay(shared, &Domain::Resident(Arc::clone(resident)), entries);
    }

    fn replay(shared: &Arc<Shared>, domain: &Domain, entries: Vec<JournalEntry>) {
        let root_type = shared.schema.aggregate_root();
        for entry in entries {
            trace!(domain = %domain.label(), entry = ?entry, "Replaying buffered change");
            match entry {
                JournalEntry::Added {
                    entity,
                    parent,
                    parent_collection,
                } => {
                    Self::apply_added(domain, root_type, &entity, parent.as_ref(), parent_collection);
                }
                JournalEntry::Removed {
                    entity_type,
                    id,
                    parent,
                    parent_collection,
                } => Self::apply_removed(domain, entity_type, id, parent.as_ref(), parent_collection),
                JournalEntry::Changed { entity, parent } => {
                    if let Err(e) = Self::apply_changed(shared, domain, &entity, parent.as_ref()) {
                        warn!(domain = %domain.label(), error = %e, "Failed to replay change");
                    }
                }
            }
        }
    }

    /// Insert a value copy of `entity` into `domain` and hang it under its cached parent.
    fn add_to(
        domain: &Domain,
        root_type: Option<EntityType>,
        entity: &ErasedRef,
        parent: Option<&ParentRef>,
        parent_collection: Option<&'static str>,
    ) -> bool {
        let (entity_type, id) = (entity.entity_type(), entity.id());
        let cached_parent = domain.cached_parent(parent);
        if let Domain::Resident(resident) = domain {
            // A resident cache only takes entities it can attribute to its own root.
            let belongs = if Some(entity_type) == root_type {
                id == resident.root()
            } else {
                cached_parent.is_some()
            };
            if !belongs {
                return false;
            }
        }

        let copy = entity.value_copy();
        copy.mark_collections_loaded();
        domain.link_references(&copy);
        if !domain.insert(Arc::clone(&copy)) {
            return false;
        }
        if let (Some(parent), Some(navigation)) = (cached_parent, parent_collection) {
            parent.attach_child(navigation, copy.as_ref());
        }
        trace!(domain = %domain.label(), entity_type = %entity_type, id = %id, "Cached new entity");
        true
    }

    fn apply_added(
        domain: &Domain,
        root_type: Option<EntityType>,
        entity: &ErasedRef,
        parent: Option<&ParentRef>,
        parent_collection: Option<&'static str>,
    ) -> bool {
        if domain.get(entity.entity_type(), entity.id()).is_some() {
            return false;
        }
        Self::add_to(domain, root_type, entity, parent, parent_collection)
    }

    fn apply_removed(
        domain: &Domain,
        entity_type: EntityType,
        id: Id,
        parent: Option<&ParentRef>,
        parent_collection: Option<&'static str>,
    ) {
        if domain.remove(entity_type, id).is_none() {
            return;
        }
        if let (Some(parent), Some(navigation)) = (domain.cached_parent(parent), parent_collection) {
            parent.detach_child(navigation, id);
        }
        trace!(domain = %domain.label(), entity_type = %entity_type, id = %id, "Evicted entity");
    }

    fn apply_changed(
        shared: &Arc<Shared>,
        domain: &Domain,
        entity: &ErasedRef,
        parent: Option<&ParentRef>,
    ) -> Result<(), ListenerError> {
        let schema = &shared.schema;
        let (entity_type, id) = (entity.entity_type(), entity.id());
        let link = schema.parent_link(entity_type);
        let navigation = link.and_then(|link| schema.parent_collection(entity_type, &link));

        let Some(cached) = domain.get(entity_type, id) else {
            // Not cached yet: an entity that moved into this domain.
            if Self::add_to(domain, schema.aggregate_root(), entity, parent, navigation) {
                if let Domain::Resident(resident) = domain {
                    Self::adopt_members(shared, domain, resident.root(), entity_type, id);
                }
            }
            return Ok(());
        };

        let old_parent = link.and_then(|link| cached.foreign_key(link.foreign_key));
        if !cached.same_instance(entity.as_ref()) && !cached.assign_from(entity.as_ref()) {
            return Err(ListenerError::Failed {
                listener: "cache-updater",
                reason: format!("cached {} {} has a different type", entity_type, id),
            });
        }
        domain.link_references(&cached);
        domain.reindex(entity_type, id);

        let new_parent = link.and_then(|link| cached.foreign_key(link.foreign_key));
        if old_parent != new_parent {
            if let (Some(link), Some(navigation)) = (link, navigation) {
                if let Some(old) = old_parent.and_then(|parent| domain.get(link.parent, parent)) {
                    old.detach_child(navigation, id);
                }
                match new_parent.and_then(|parent| domain.get(link.parent, parent)) {
                    Some(new) => {
                        new.attach_child(navigation, cached.as_ref());
                    }
                    None => Self::evict_subtree(domain, &cached),
                }
            }
        }
        trace!(domain = %domain.label(), entity_type = %entity_type, id = %id, "Updated cached entity");
        Ok(())
    }

    /// An entity moved out of a resident aggregate takes its members along.
    fn evict_subtree(domain: &Domain, cached: &ErasedRef) {
        if let Domain::Resident(_) = domain {
            let members = aggregate_members(cached);
            for member in &members {
                domain.remove(member.entity_type(), member.id());
            }
            debug!(
                domain = %domain.label(),
                entity_type = %cached.entity_type(),
                id = %cached.id(),
                members = members.len(),
                "Entity moved out of aggregate"
            );
        }
    }

    /// Cache the stored aggregate members of an entity that just moved into
    /// the resident aggregate of `root`. Parents precede their children.
    fn adopt_members(shared: &Arc<Shared>, domain: &Domain, root: Id, entity_type: EntityType, id: Id) {
        let context = shared.new_context(ContextPurpose::CacheLoad, Some(root), None);
        let loaded = match context.durable_get_erased(entity_type, id) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return,
            Err(e) => {
                warn!(root = %root, entity_type = %entity_type, id = %id, error = %e, "Failed to load moved members");
                return;
            }
        };

        let root_type = shared.schema.aggregate_root();
        let mut adopted = 0usize;
        for member in aggregate_members(&loaded).iter().skip(1) {
            let member_type = member.entity_type();
            let Some(link) = shared.schema.parent_link(member_type) else {
                continue;
            };
            let parent = member.foreign_key(link.foreign_key).map(|parent_id| ParentRef::Id {
                entity_type: link.parent,
                id: parent_id,
            });
            let navigation = shared.schema.parent_collection(member_type, &link);
            if Self::apply_added(domain, root_type, member, parent.as_ref(), navigation) {
                adopted += 1;
            }
        }
        debug!(domain = %domain.label(), entity_type = %entity_type, id = %id, adopted, "Entity moved into aggregate");
    }
}

impl ChangeListener for CacheUpdater {
    fn name(&self) -> &'static str {
        "cache-updater"
    }

    fn on_added(
        &self,
        entity_type: EntityType,
        id: Id,
        entity: &ErasedRef,
        parent: Option<&ParentRef>,
        parent_collection: Option<&'static str>,
    ) -> Result<(), ListenerError> {
        let shared = self.shared()?;
        let root_type = shared.schema.aggregate_root();
        let mut cached_in = 0usize;
        Self::route(
            &shared,
            entity_type,
            || JournalEntry::Added {
                entity: entity.value_copy(),
                parent: parent.cloned(),
                parent_collection,
            },
            |domain| {
                if Self::apply_added(domain, root_type, entity, parent, parent_collection) {
                    cached_in += 1;
                }
                Ok(())
            },
        )?;
        debug!(entity_type = %entity_type, id = %id, cached_in, "Propagated addition");
        Ok(())
    }

    fn on_removed(
        &self,
        entity_type: EntityType,
        id: Id,
        parent: Option<&ParentRef>,
        parent_collection: Option<&'static str>,
    ) -> Result<(), ListenerError> {
        let shared = self.shared()?;
        Self::route(
            &shared,
            entity_type,
            || JournalEntry::Removed {
                entity_type,
                id,
                parent: parent.cloned(),
                parent_collection,
            },
            |domain| {
                Self::apply_removed(domain, entity_type, id, parent, parent_collection);
                Ok(())
            },
        )?;

        if Some(entity_type) == shared.schema.aggregate_root() {
            if let Some(caches) = shared.repositories.aggregate_caches() {
                caches.evict(id);
            }
        }
        debug!(entity_type = %entity_type, id = %id, "Propagated removal");
        Ok(())
    }

    fn on_changed(
        &self,
        entity_type: EntityType,
        id: Id,
        entity: &ErasedRef,
        parent: Option<&ParentRef>,
    ) -> Result<(), ListenerError> {
        let shared = self.shared()?;
        Self::route(
            &shared,
            entity_type,
            || JournalEntry::Changed {
                entity: entity.value_copy(),
                parent: parent.cloned(),
            },
            |domain| Self::apply_changed(&shared, domain, entity, parent),
        )?;
        debug!(entity_type = %entity_type, id = %id, "Propagated change");
        Ok(())
    }
}
