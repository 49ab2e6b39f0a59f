//! Units of work
//!
//! A [`Context`] tracks the entities read and staged through it and commits
//! them as one batch. Contexts are created by a [`ContextProvider`], pushed
//! onto the context stack while in use, and found implicitly by repositories
//! and the navigation loader further down the call chain.

pub mod edit;
pub mod provider;
pub mod stack;
pub mod tracker;

pub use edit::EditTypeClosure;
pub use provider::{ContextProvider, ContextPurpose};
pub use stack::{current_context, scope_async, use_context, ContextScope};
pub use tracker::{ChangeTracker, EntryState, PendingChange};

use crate::concurrency::CancellationSignal;
use crate::context::provider::Shared;
use crate::entity::erased::aggregate_members;
use crate::entity::{downcast, Entity, EntityRef, ErasedRef};
use crate::error::{PersistenceError, Result};
use crate::propagation::{pipeline, ChangeKind, CommittedChange, ParentRef};
use crate::repository::loader::NavigationLoader;
use crate::repository::Repository;
use crate::schema::Schema;
use crate::store::WriteBatch;
use crate::types::{EntityType, Id};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One bounded sequence of reads and writes, committed as a whole.
///
/// Every entry point takes the context's operation lock, so a context is
/// used by one logical flow at a time; unrelated flows obtain their own.
/// The lock is re-entrant: loads triggered by a read of this context run on
/// the same thread and re-enter it.
pub struct Context {
    shared: Arc<Shared>,
    purpose: ContextPurpose,
    aggregate_root: Option<Id>,
    edit: Option<Arc<EditTypeClosure>>,
    operation: ReentrantMutex<()>,
    tracker: Mutex<ChangeTracker>,
    suspended: Arc<AtomicUsize>,
    cancellation: CancellationSignal,
    load_pass: Mutex<LoadPass>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("purpose", &self.purpose)
            .field("aggregate_root", &self.aggregate_root)
            .field("tracked", &self.tracker.lock().len())
            .finish()
    }
}

/// Re-enables change notifications when dropped.
#[must_use = "notifications resume as soon as the guard is dropped"]
pub struct NotificationSuspension {
    counter: Arc<AtomicUsize>,
}

impl Drop for NotificationSuspension {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Rows scanned by the outermost durable read in progress. Every collection
/// loaded under that read filters the same scan instead of reading the
/// table again; the rows are dropped when the read returns.
#[derive(Default)]
struct LoadPass {
    depth: usize,
    scanned: HashMap<EntityType, Arc<ScannedRows>>,
}

struct LoadPassGuard<'a> {
    pass: &'a Mutex<LoadPass>,
}

impl Drop for LoadPassGuard<'_> {
    fn drop(&mut self) {
        let mut pass = self.pass.lock();
        pass.depth -= 1;
        if pass.depth == 0 {
            pass.scanned.clear();
        }
    }
}

/// Decoded rows of one type, with per-property foreign key buckets built on
/// first use.
struct ScannedRows {
    rows: Vec<(Id, ErasedRef)>,
    ids: HashSet<Id>,
    by_key: Mutex<HashMap<String, HashMap<Id, Vec<usize>>>>,
}

impl ScannedRows {
    fn new(rows: Vec<(Id, ErasedRef)>) -> Self {
        let ids = rows.iter().map(|(id, _)| *id).collect();
        ScannedRows {
            rows,
            ids,
            by_key: Mutex::new(HashMap::new()),
        }
    }

    /// Positions of the rows whose stored `property` equals `value`.
    fn matching(&self, property: &str, value: Id) -> Vec<usize> {
        let mut by_key = self.by_key.lock();
        let buckets = by_key.entry(property.to_string()).or_insert_with(|| {
            let mut buckets: HashMap<Id, Vec<usize>> = HashMap::new();
            for (index, (_, entity)) in self.rows.iter().enumerate() {
                if let Some(key) = entity.foreign_key(property) {
                    buckets.entry(key).or_default().push(index);
                }
            }
            buckets
        });
        buckets.get(&value).cloned().unwrap_or_default()
    }
}

impl Context {
    pub(crate) fn new(
        shared: Arc<Shared>,
        purpose: ContextPurpose,
        aggregate_root: Option<Id>,
        edit: Option<Arc<EditTypeClosure>>,
    ) -> Self {
        Context {
            shared,
            purpose,
            aggregate_root,
            edit,
            operation: ReentrantMutex::new(()),
            tracker: Mutex::new(ChangeTracker::new()),
            suspended: Arc::new(AtomicUsize::new(0)),
            cancellation: CancellationSignal::new(),
            load_pass: Mutex::new(LoadPass::default()),
        }
    }

    pub fn purpose(&self) -> ContextPurpose {
        self.purpose
    }

    /// Id of the resident aggregate root this context reads through, if any.
    pub fn aggregate_root(&self) -> Option<Id> {
        self.aggregate_root
    }

    pub fn edit_closure(&self) -> Option<&Arc<EditTypeClosure>> {
        self.edit.as_ref()
    }

    /// Cache-population contexts read storage directly.
    pub fn bypasses_cache(&self) -> bool {
        self.purpose == ContextPurpose::CacheLoad
    }

    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancellation
    }

    /// Cancel pending and future durable reads of this context.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Make this the current context of the calling thread (or task) until
    /// the returned scope drops.
    pub fn scope(self: &Arc<Self>) -> ContextScope {
        stack::use_context(Arc::clone(self))
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    /// Run `f` in the current context when it belongs to `shared`, otherwise
    /// in a short-lived transient context that is committed afterwards when
    /// `write` is set.
    pub(crate) fn current_or_transient<R>(
        shared: &Arc<Shared>,
        write: bool,
        f: impl FnOnce(&Arc<Context>) -> Result<R>,
    ) -> Result<R> {
        if let Some(current) = stack::current_context() {
            if current.belongs_to(shared) {
                return f(&current);
            }
        }
        let context = shared.new_context(ContextPurpose::Transient, None, None);
        let _scope = context.scope();
        let result = f(&context)?;
        if write {
            context.save_changes()?;
        }
        Ok(result)
    }

    // Reads

    /// Repository serving `T` under this context.
    pub fn repository<T: Entity>(self: &Arc<Self>) -> Result<Arc<dyn Repository<T>>> {
        self.shared.repositories.resolve::<T>(&self.shared, Some(self))
    }

    pub fn get_by_id<T: Entity>(self: &Arc<Self>, id: Id) -> Result<Option<EntityRef<T>>> {
        let _operation = self.operation.lock();
        let _scope = self.scope();
        self.repository::<T>()?.get_by_id(id)
    }

    pub fn get_all<T: Entity>(self: &Arc<Self>) -> Result<Vec<EntityRef<T>>> {
        let _operation = self.operation.lock();
        let _scope = self.scope();
        self.repository::<T>()?.get_all()
    }

    pub fn load_by_property<T: Entity>(self: &Arc<Self>, property: &str, value: Id) -> Result<Vec<EntityRef<T>>> {
        let _operation = self.operation.lock();
        let _scope = self.scope();
        self.repository::<T>()?.load_by_property(property, value)
    }

    // Writes

    /// Construct a `T` through the schema's constructor table, let `init`
    /// fill it in, and stage it as added. Visible to `get_all` of this
    /// context right away; visible to caches after commit.
    pub fn create_new<T: Entity>(&self, init: impl FnOnce(&mut T)) -> Result<EntityRef<T>> {
        let _operation = self.operation.lock();
        let erased = self.shared.schema.handle(T::TYPE)?.create_default();
        let entity = downcast::<T>(erased.as_ref()).ok_or(PersistenceError::RepositoryNotFound(T::TYPE))?;
        init(&mut entity.write());
        erased.mark_collections_loaded();
        self.tracker.lock().stage_added(erased);
        Ok(entity)
    }

    /// Untyped variant of [`Context::create_new`] resolved by type key.
    pub fn create_new_of(&self, entity_type: EntityType) -> Result<ErasedRef> {
        let _operation = self.operation.lock();
        let erased = self.shared.schema.handle(entity_type)?.create_default();
        erased.mark_collections_loaded();
        self.tracker.lock().stage_added(Arc::clone(&erased));
        Ok(erased)
    }

    /// Stage a caller-constructed entity, together with its aggregate members, as added.
    pub fn add<T: Entity>(&self, entity: &EntityRef<T>) -> usize {
        let _operation = self.operation.lock();
        let root = entity.erase();
        let mut tracker = self.tracker.lock();
        aggregate_members(&root)
            .into_iter()
            .filter(|member| {
                member.mark_collections_loaded();
                tracker.stage_added(Arc::clone(member))
            })
            .count()
    }

    /// Force `entity` to be written on the next commit, whether or not its
    /// encoding changed.
    pub fn mark_modified<T: Entity>(&self, entity: &EntityRef<T>) -> Result<bool> {
        let _operation = self.operation.lock();
        let mut tracker = self.tracker.lock();
        let id = entity.id();
        if tracker.state(T::TYPE, id).is_none() {
            tracker.attach_unchanged(entity.erase())?;
        }
        Ok(tracker.mark_modified(T::TYPE, id))
    }

    /// Stop tracking `entity` and its aggregate members.
    pub fn detach<T: Entity>(&self, entity: &EntityRef<T>) -> usize {
        let _operation = self.operation.lock();
        let mut tracker = self.tracker.lock();
        aggregate_members(&entity.erase())
            .into_iter()
            .filter(|member| tracker.detach(member.entity_type(), member.id()))
            .count()
    }

    /// Stage the deletion of `entity` and everything reachable through its
    /// aggregate-member navigations. Entities that were never committed are
    /// detached instead.
    pub fn delete<T: Entity>(self: &Arc<Self>, entity: &EntityRef<T>) -> Result<()> {
        self.delete_erased(entity.erase())
    }

    pub fn delete_erased(self: &Arc<Self>, entity: ErasedRef) -> Result<()> {
        let _operation = self.operation.lock();
        let (entity_type, id) = (entity.entity_type(), entity.id());
        let tracked = self.tracker.lock().find(entity_type, id);
        let entity = tracked.map(|(tracked, _)| tracked).unwrap_or(entity);

        // Cascades only see populated collections.
        self.load_navigations(&entity);
        let members = aggregate_members(&entity);

        if let Some(link) = self.shared.schema.parent_link(entity_type) {
            let parent = entity
                .foreign_key(link.foreign_key)
                .and_then(|parent_id| self.tracker.lock().find(link.parent, parent_id));
            let navigation = self.shared.schema.parent_collection(entity_type, &link);
            if let (Some((parent, _)), Some(navigation)) = (parent, navigation) {
                parent.detach_child(navigation, id);
            }
        }

        let mut tracker = self.tracker.lock();
        for member in members.iter().rev() {
            tracker.mark_deleted(member)?;
        }
        debug!(entity_type = %entity_type, id = %id, members = members.len(), "Staged deletion");
        Ok(())
    }

    /// Delete the `T` with `id`. Returns false when there is none.
    pub fn delete_by_id<T: Entity>(self: &Arc<Self>, id: Id) -> Result<bool> {
        let _operation = self.operation.lock();
        match self.get_by_id::<T>(id)? {
            Some(entity) => {
                self.delete(&entity)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Commits made while the guard lives skip change listeners. Guards nest.
    pub fn suspend_change_notifications(&self) -> NotificationSuspension {
        self.suspended.fetch_add(1, Ordering::SeqCst);
        NotificationSuspension {
            counter: Arc::clone(&self.suspended),
        }
    }

    pub fn notifications_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst) > 0
    }

    /// Current tracking state of an entity in this context.
    pub fn entry_state(&self, entity_type: EntityType, id: Id) -> Option<EntryState> {
        self.tracker.lock().state(entity_type, id)
    }

    /// Persist every pending change in one batch.
    ///
    /// Returns false when there was nothing to write. Storage errors are
    /// returned unchanged and leave the pending changes in place. After a
    /// successful write the listeners see the committed delta (unless
    /// suspended) and the changes are accepted whether or not a listener
    /// failed, so storage and tracking never diverge.
    pub fn save_changes(self: &Arc<Self>) -> Result<bool> {
        let _operation = self.operation.lock();
        let _scope = self.scope();
        let started = Instant::now();
        let schema = Arc::clone(&self.shared.schema);

        let mut tracker = self.tracker.lock();
        tracker.detect_changes()?;
        let mut pending = tracker.pending();

        if let Some(closure) = &self.edit {
            let mut kept = Vec::with_capacity(pending.len());
            for change in pending {
                if closure.is_editable(change.entity_type()) {
                    kept.push(change);
                } else {
                    warn!(
                        entity_type = %change.entity_type(),
                        id = %change.id(),
                        state = ?change.state,
                        root = %closure.root,
                        "Dropping write outside the edit closure"
                    );
                    tracker.revert(change.entity_type(), change.id())?;
                }
            }
            pending = kept;
        }

        if pending.is_empty() {
            return Ok(false);
        }

        let mut linked = Vec::new();
        if let (Some(_), Some(root_id), Some(root_type)) =
            (&self.edit, self.aggregate_root, schema.aggregate_root())
        {
            for change in pending.iter().filter(|c| c.state == EntryState::Added) {
                let Some(link) = schema.parent_link(change.entity_type()) else {
                    continue;
                };
                if link.parent == root_type && change.entity.foreign_key(link.foreign_key).is_none() {
                    change.entity.set_foreign_key(link.foreign_key, Some(root_id));
                    linked.push((Arc::clone(&change.entity), link.foreign_key));
                    debug!(
                        entity_type = %change.entity_type(),
                        id = %change.id(),
                        root = %root_id,
                        "Linked new entity to aggregate root"
                    );
                }
            }
        }

        let staged = stage_commit(&tracker, &schema, &pending);
        drop(tracker);
        let written = staged.and_then(|staged| {
            self.shared.store.apply(staged.batch)?;
            Ok((staged.changes, staged.attachments))
        });
        let (changes, attachments) = match written {
            Ok(written) => written,
            Err(e) => {
                // Nothing was stored: new entities keep their unlinked state.
                for (entity, foreign_key) in &linked {
                    entity.set_foreign_key(foreign_key, None);
                }
                warn!(purpose = ?self.purpose, error = %e, "Commit failed");
                return Err(e);
            }
        };
        for (parent, navigation, child) in &attachments {
            parent.attach_child(navigation, child.as_ref());
        }

        let listeners = self.shared.listeners();
        if self.notifications_suspended() {
            debug!(changes = changes.len(), "Change notifications suspended");
        } else if !listeners.is_empty() {
            pipeline::propagate(&listeners, &changes, schema.aggregate_root());
        }

        self.tracker.lock().accept_all()?;
        info!(
            purpose = ?self.purpose,
            changes = changes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Committed changes"
        );
        Ok(true)
    }

    // Storage access used by the durable repository and cache population.

    pub(crate) fn durable_get_erased(self: &Arc<Self>, entity_type: EntityType, id: Id) -> Result<Option<ErasedRef>> {
        self.cancellation.check()?;
        let _operation = self.operation.lock();
        let _pass = self.begin_load_pass();
        let tracked = self.tracker.lock().find(entity_type, id);
        if let Some((entity, state)) = tracked {
            return Ok((state != EntryState::Deleted).then_some(entity));
        }
        let Some(bytes) = self.shared.store.get(entity_type, id)? else {
            return Ok(None);
        };
        let (entity, fresh) = self.materialize(entity_type, &bytes)?;
        if fresh {
            self.load_navigations(&entity);
        }
        Ok(Some(entity))
    }

    /// Every `entity_type` row, optionally only those whose foreign key
    /// `property` equals the given id, merged with this context's tracked state.
    pub(crate) fn durable_query(
        self: &Arc<Self>,
        entity_type: EntityType,
        filter: Option<(&str, Id)>,
    ) -> Result<Vec<ErasedRef>> {
        self.cancellation.check()?;
        let _operation = self.operation.lock();
        let _pass = self.begin_load_pass();
        let scanned = self.scanned_rows(entity_type)?;
        let wanted = |entity: &ErasedRef| match filter {
            Some((property, value)) => entity.foreign_key(property) == Some(value),
            None => true,
        };
        let candidates = match filter {
            Some((property, value)) => scanned.matching(property, value),
            None => (0..scanned.rows.len()).collect(),
        };

        let mut results = Vec::new();
        let mut fresh = Vec::new();
        let mut included = HashSet::new();
        for index in candidates {
            let (id, decoded) = &scanned.rows[index];
            let tracked = self.tracker.lock().find(entity_type, *id);
            match tracked {
                Some((_, EntryState::Deleted)) => {}
                Some((entity, _)) => {
                    if wanted(&entity) {
                        included.insert(*id);
                        results.push(entity);
                    }
                }
                None => {
                    let attached = self.tracker.lock().attach_unchanged(Arc::clone(decoded))?;
                    fresh.push(Arc::clone(&attached));
                    included.insert(*id);
                    results.push(attached);
                }
            }
        }

        // Tracked entities that match in memory only: new ones, or stored
        // ones whose key this context changed.
        let tracked = self.tracker.lock().of_type(entity_type);
        for (entity, state) in tracked {
            let id = entity.id();
            let visible = state == EntryState::Added || (state != EntryState::Deleted && scanned.ids.contains(&id));
            if visible && !included.contains(&id) && wanted(&entity) {
                results.push(entity);
            }
        }

        for entity in &fresh {
            self.load_navigations(entity);
        }
        Ok(results)
    }

    fn begin_load_pass(&self) -> LoadPassGuard<'_> {
        self.load_pass.lock().depth += 1;
        LoadPassGuard { pass: &self.load_pass }
    }

    /// Decoded rows of `entity_type`, scanned at most once per load pass.
    fn scanned_rows(&self, entity_type: EntityType) -> Result<Arc<ScannedRows>> {
        if let Some(scanned) = self.load_pass.lock().scanned.get(&entity_type) {
            return Ok(Arc::clone(scanned));
        }
        let handle = self.shared.schema.handle(entity_type)?;
        let rows = self
            .shared
            .store
            .scan(entity_type)?
            .into_iter()
            .map(|(id, bytes)| Ok((id, handle.decode(&bytes)?)))
            .collect::<Result<Vec<_>>>()?;
        let scanned = Arc::new(ScannedRows::new(rows));
        self.load_pass
            .lock()
            .scanned
            .insert(entity_type, Arc::clone(&scanned));
        Ok(scanned)
    }

    pub(crate) fn durable_get<T: Entity>(self: &Arc<Self>, id: Id) -> Result<Option<EntityRef<T>>> {
        Ok(self
            .durable_get_erased(T::TYPE, id)?
            .and_then(|entity| downcast::<T>(entity.as_ref())))
    }

    pub(crate) fn durable_all<T: Entity>(self: &Arc<Self>) -> Result<Vec<EntityRef<T>>> {
        Ok(typed(self.durable_query(T::TYPE, None)?))
    }

    pub(crate) fn durable_where<T: Entity>(self: &Arc<Self>, property: &str, value: Id) -> Result<Vec<EntityRef<T>>> {
        Ok(typed(self.durable_query(T::TYPE, Some((property, value)))?))
    }

    /// Decode and track a stored row. The flag is false when the identity map
    /// already held the entity and the decoded copy was discarded.
    fn materialize(&self, entity_type: EntityType, bytes: &[u8]) -> Result<(ErasedRef, bool)> {
        let decoded = self.shared.schema.handle(entity_type)?.decode(bytes)?;
        let attached = self.tracker.lock().attach_unchanged(Arc::clone(&decoded))?;
        let fresh = attached.same_instance(decoded.as_ref());
        Ok((attached, fresh))
    }

    pub(crate) fn load_navigations(self: &Arc<Self>, entity: &ErasedRef) {
        let _pass = self.begin_load_pass();
        NavigationLoader::new(Arc::clone(self)).load_erased(entity);
    }

    /// Every tracked entity not staged for deletion.
    pub(crate) fn tracked_entities(&self) -> Vec<ErasedRef> {
        self.tracker.lock().live_entities()
    }
}

/// The write batch and listener delta of one commit, plus the in-memory
/// parent links that take effect once the batch is stored.
struct StagedCommit {
    batch: WriteBatch,
    changes: Vec<CommittedChange>,
    attachments: Vec<(ErasedRef, &'static str, ErasedRef)>,
}

fn stage_commit(tracker: &ChangeTracker, schema: &Schema, pending: &[PendingChange]) -> Result<StagedCommit> {
    let mut staged = StagedCommit {
        batch: WriteBatch::new(),
        changes: Vec::with_capacity(pending.len()),
        attachments: Vec::new(),
    };
    for change in pending {
        let (entity_type, id) = (change.entity_type(), change.id());
        let (parent, parent_collection) = match schema.parent_link(entity_type) {
            Some(link) => match change.entity.foreign_key(link.foreign_key) {
                Some(parent_id) => {
                    let parent = match tracker.find(link.parent, parent_id) {
                        Some((parent, state)) if state != EntryState::Deleted => ParentRef::Entity(parent),
                        _ => ParentRef::Id {
                            entity_type: link.parent,
                            id: parent_id,
                        },
                    };
                    (Some(parent), schema.parent_collection(entity_type, &link))
                }
                None => (None, None),
            },
            None => (None, None),
        };

        let kind = match change.state {
            EntryState::Added => {
                if let (Some(ParentRef::Entity(parent)), Some(navigation)) = (&parent, parent_collection) {
                    staged
                        .attachments
                        .push((Arc::clone(parent), navigation, Arc::clone(&change.entity)));
                }
                staged.batch.put(entity_type, id, change.entity.encode()?);
                ChangeKind::Added
            }
            EntryState::Modified => {
                staged.batch.put(entity_type, id, change.entity.encode()?);
                ChangeKind::Changed
            }
            EntryState::Deleted => {
                staged.batch.delete(entity_type, id);
                ChangeKind::Removed
            }
            EntryState::Unchanged => continue,
        };
        staged.changes.push(CommittedChange {
            kind,
            entity_type,
            id,
            entity: Arc::clone(&change.entity),
            parent,
            parent_collection,
        });
    }
    Ok(staged)
}

fn typed<T: Entity>(entities: Vec<ErasedRef>) -> Vec<EntityRef<T>> {
    entities
        .iter()
        .filter_map(|entity| downcast::<T>(entity.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GameConfiguration, ItemDefinition, MonsterAttribute, MonsterDefinition};
    use crate::propagation::ChangeListener;
    use crate::error::{ListenerError, StorageError};
    use crate::store::{MemoryStore, Store};
    use crate::test_support::memory_provider;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(ChangeKind, EntityType)>>,
    }

    impl ChangeListener for Recorder {
        fn on_added(
            &self,
            entity_type: EntityType,
            _id: Id,
            _entity: &ErasedRef,
            _parent: Option<&ParentRef>,
            _parent_collection: Option<&'static str>,
        ) -> std::result::Result<(), ListenerError> {
            self.seen.lock().push((ChangeKind::Added, entity_type));
            Ok(())
        }

        fn on_removed(
            &self,
            entity_type: EntityType,
            _id: Id,
            _parent: Option<&ParentRef>,
            _parent_collection: Option<&'static str>,
        ) -> std::result::Result<(), ListenerError> {
            self.seen.lock().push((ChangeKind::Removed, entity_type));
            Ok(())
        }

        fn on_changed(
            &self,
            entity_type: EntityType,
            _id: Id,
            _entity: &ErasedRef,
            _parent: Option<&ParentRef>,
        ) -> std::result::Result<(), ListenerError> {
            self.seen.lock().push((ChangeKind::Changed, entity_type));
            Ok(())
        }
    }

    #[test]
    fn test_create_commit_and_read_back() {
        let provider = memory_provider();
        let context = provider.create_context(ContextPurpose::Configuration);
        let config = context
            .create_new::<GameConfiguration>(|c| c.name = "Season 6".to_string())
            .unwrap();
        assert_eq!(
            context.entry_state(GameConfiguration::TYPE, config.id()),
            Some(EntryState::Added)
        );
        assert!(context.save_changes().unwrap());
        assert!(!context.save_changes().unwrap());

        let reader = provider.create_context(ContextPurpose::Configuration);
        let loaded = reader.get_by_id::<GameConfiguration>(config.id()).unwrap().unwrap();
        assert_eq!(loaded.read().name, "Season 6");
        assert!(!loaded.ptr_eq(&config));
        // Identity map: the same context hands out the same instance.
        let again = reader.get_by_id::<GameConfiguration>(config.id()).unwrap().unwrap();
        assert!(loaded.ptr_eq(&again));
    }

    #[test]
    fn test_modification_detected_by_snapshot() {
        let provider = memory_provider();
        let context = provider.create_context(ContextPurpose::Configuration);
        let monster = context
            .create_new::<MonsterDefinition>(|m| m.name = "Lich".to_string())
            .unwrap();
        context.save_changes().unwrap();

        let editor = provider.create_context(ContextPurpose::Configuration);
        let loaded = editor.get_by_id::<MonsterDefinition>(monster.id()).unwrap().unwrap();
        loaded.write().level = 14;
        assert!(editor.save_changes().unwrap());

        let reader = provider.create_context(ContextPurpose::Configuration);
        let reread = reader.get_by_id::<MonsterDefinition>(monster.id()).unwrap().unwrap();
        assert_eq!(reread.read().level, 14);
    }

    #[test]
    fn test_delete_cascades_to_aggregate_members() {
        let provider = memory_provider();
        let context = provider.create_context(ContextPurpose::Configuration);
        let monster = context
            .create_new::<MonsterDefinition>(|m| m.name = "Golem".to_string())
            .unwrap();
        for name in ["Defense", "Level"] {
            let attribute = context
                .create_new::<MonsterAttribute>(|a| {
                    a.name = name.to_string();
                    a.monster_definition.set_id(Some(monster.id()));
                })
                .unwrap();
            monster.read().attributes.push(attribute);
        }
        context.save_changes().unwrap();

        let editor = provider.create_context(ContextPurpose::Configuration);
        let loaded = editor.get_by_id::<MonsterDefinition>(monster.id()).unwrap().unwrap();
        assert_eq!(loaded.read().attributes.len(), 2);
        editor.delete(&loaded).unwrap();
        editor.save_changes().unwrap();

        let store = provider.store();
        assert_eq!(store.count(MonsterDefinition::TYPE).unwrap(), 0);
        assert_eq!(store.count(MonsterAttribute::TYPE).unwrap(), 0);
    }

    #[test]
    fn test_deleting_uncommitted_entity_detaches() {
        let provider = memory_provider();
        let context = provider.create_context(ContextPurpose::Configuration);
        let item = context.create_new::<ItemDefinition>(|_| {}).unwrap();
        context.delete(&item).unwrap();
        assert_eq!(context.entry_state(ItemDefinition::TYPE, item.id()), None);
        assert!(!context.save_changes().unwrap());
    }

    #[test]
    fn test_suspended_notifications_still_commit() {
        let provider = memory_provider();
        let recorder = Arc::new(Recorder::default());
        provider.add_change_listener(recorder.clone());

        let context = provider.create_context(ContextPurpose::Configuration);
        {
            let _outer = context.suspend_change_notifications();
            let _inner = context.suspend_change_notifications();
            context.create_new::<ItemDefinition>(|_| {}).unwrap();
            context.save_changes().unwrap();
        }
        assert!(recorder.seen.lock().is_empty());
        assert_eq!(provider.store().count(ItemDefinition::TYPE).unwrap(), 1);

        context.create_new::<ItemDefinition>(|_| {}).unwrap();
        context.save_changes().unwrap();
        assert_eq!(
            *recorder.seen.lock(),
            vec![(ChangeKind::Added, ItemDefinition::TYPE)]
        );
    }

    #[test]
    fn test_edit_context_drops_writes_outside_closure() {
        let provider = memory_provider();
        let setup = provider.create_context(ContextPurpose::Configuration);
        let item = setup
            .create_new::<ItemDefinition>(|i| i.name = "Jewel of Bless".to_string())
            .unwrap();
        setup.save_changes().unwrap();

        let edit = provider.create_edit_context::<MonsterDefinition>(None).unwrap();
        let loaded = edit.get_by_id::<ItemDefinition>(item.id()).unwrap().unwrap();
        loaded.write().name = "Renamed".to_string();
        edit.create_new::<MonsterDefinition>(|m| m.name = "Yeti".to_string())
            .unwrap();
        assert!(edit.save_changes().unwrap());

        let reader = provider.create_context(ContextPurpose::Configuration);
        let stored = reader.get_by_id::<ItemDefinition>(item.id()).unwrap().unwrap();
        assert_eq!(stored.read().name, "Jewel of Bless");
        assert_eq!(reader.get_all::<MonsterDefinition>().unwrap().len(), 1);
    }

    #[test]
    fn test_edit_context_links_new_children_to_root() {
        let provider = memory_provider();
        let setup = provider.create_context(ContextPurpose::Configuration);
        let config = setup.create_new::<GameConfiguration>(|_| {}).unwrap();
        setup.save_changes().unwrap();

        let edit = provider
            .create_edit_context::<MonsterDefinition>(Some(config.id()))
            .unwrap();
        let monster = edit.create_new::<MonsterDefinition>(|_| {}).unwrap();
        edit.save_changes().unwrap();
        assert_eq!(monster.read().game_configuration.id(), Some(config.id()));
    }

    /// In-memory store whose writes can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: std::sync::atomic::AtomicBool,
    }

    impl Store for FlakyStore {
        fn get(&self, entity_type: EntityType, id: Id) -> std::result::Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(entity_type, id)
        }

        fn scan(&self, entity_type: EntityType) -> std::result::Result<Vec<(Id, Vec<u8>)>, StorageError> {
            self.inner.scan(entity_type)
        }

        fn apply(&self, batch: WriteBatch) -> std::result::Result<(), StorageError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("disk full".to_string()));
            }
            self.inner.apply(batch)
        }
    }

    #[test]
    fn test_failed_write_leaves_graph_untouched() {
        let store = Arc::new(FlakyStore::default());
        let provider = ContextProvider::new(crate::model::schema().unwrap(), store.clone());
        let setup = provider.create_context(ContextPurpose::Configuration);
        let config = setup.create_new::<GameConfiguration>(|_| {}).unwrap();
        setup.save_changes().unwrap();

        let edit = provider
            .create_edit_context::<MonsterDefinition>(Some(config.id()))
            .unwrap();
        let root = edit.get_by_id::<GameConfiguration>(config.id()).unwrap().unwrap();
        let monster = edit.create_new::<MonsterDefinition>(|m| m.name = "Yeti".to_string()).unwrap();

        store.failing.store(true, Ordering::SeqCst);
        assert!(matches!(edit.save_changes(), Err(PersistenceError::Storage(_))));
        assert_eq!(monster.read().game_configuration.id(), None);
        assert!(root.read().monsters.ids().is_empty());
        assert_eq!(edit.entry_state(MonsterDefinition::TYPE, monster.id()), Some(EntryState::Added));

        store.failing.store(false, Ordering::SeqCst);
        assert!(edit.save_changes().unwrap());
        assert_eq!(monster.read().game_configuration.id(), Some(config.id()));
        assert_eq!(root.read().monsters.ids(), vec![monster.id()]);
    }

    #[test]
    fn test_cancelled_context_rejects_reads() {
        let provider = memory_provider();
        let context = provider.create_context(ContextPurpose::Player);
        context.cancel();
        assert!(matches!(
            context.get_all::<ItemDefinition>(),
            Err(PersistenceError::Cancelled)
        ));
    }
}
