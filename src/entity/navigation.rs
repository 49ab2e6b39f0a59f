//! Typed navigation tables
//!
//! Each entity type describes its navigations once, as a list of typed
//! accessors. The tables drive lazy loading, cascades and cache fix-up, and
//! they are also the source of the type-level [`Relationship`] metadata.

use crate::concurrency::LoadingStatus;
use crate::entity::{downcast, AnyEntity, Collection, Entity, EntityRef, ErasedRef, Reference};
use crate::repository::loader::NavigationLoader;
use crate::schema::{Multiplicity, ParentLink, Relationship};
use crate::types::{EntityType, Id};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Type-erased scalar navigation of owner type `P`.
pub trait ReferenceNavigation<P>: Send + Sync {
    fn relationship(&self) -> Relationship;

    fn key(&self, owner: &P) -> Option<Id>;

    fn set_key(&self, owner: &mut P, value: Option<Id>);

    fn resolved(&self, owner: &P) -> Option<ErasedRef>;

    fn load(&self, owner: &EntityRef<P>, loader: &NavigationLoader);

    /// Resolve to `target` if it has the right type and matches the key.
    fn link(&self, owner: &P, target: &dyn AnyEntity) -> bool;

    /// Keep `from`'s resolved target on `into` when both carry the same key.
    fn carry_over(&self, from: &P, into: &P);
}

/// Type-erased collection navigation of owner type `P`.
pub trait CollectionNavigation<P>: Send + Sync {
    fn relationship(&self) -> Relationship;

    fn status(&self, owner: &P) -> LoadingStatus;

    fn mark_loaded(&self, owner: &P);

    fn children(&self, owner: &P) -> Vec<ErasedRef>;

    fn attach(&self, owner: &P, child: &dyn AnyEntity) -> bool;

    fn detach(&self, owner: &P, child: Id) -> bool;

    fn load(&self, owner: &EntityRef<P>, loader: &NavigationLoader);

    /// Move `from`'s collection state onto `into`.
    fn transplant(&self, from: &mut P, into: &mut P);
}

pub struct ReferenceNav<P, T> {
    field: &'static str,
    foreign_key: &'static str,
    access: fn(&P) -> &Reference<T>,
    access_mut: fn(&mut P) -> &mut Reference<T>,
    aggregate_member: bool,
    back_reference: bool,
}

impl<P: Entity, T: Entity> ReferenceNav<P, T> {
    pub fn new(
        field: &'static str,
        foreign_key: &'static str,
        access: fn(&P) -> &Reference<T>,
        access_mut: fn(&mut P) -> &mut Reference<T>,
    ) -> Self {
        ReferenceNav {
            field,
            foreign_key,
            access,
            access_mut,
            aggregate_member: false,
            back_reference: false,
        }
    }

    pub fn member_of_aggregate(mut self) -> Self {
        self.aggregate_member = true;
        self
    }

    pub fn back_reference(mut self) -> Self {
        self.back_reference = true;
        self
    }
}

impl<P: Entity, T: Entity> ReferenceNavigation<P> for ReferenceNav<P, T> {
    fn relationship(&self) -> Relationship {
        Relationship {
            field: self.field,
            target: T::TYPE,
            multiplicity: Multiplicity::One,
            foreign_key: self.foreign_key,
            aggregate_member: self.aggregate_member,
            back_reference: self.back_reference,
        }
    }

    fn key(&self, owner: &P) -> Option<Id> {
        (self.access)(owner).id()
    }

    fn set_key(&self, owner: &mut P, value: Option<Id>) {
        (self.access_mut)(owner).set_id(value);
    }

    fn resolved(&self, owner: &P) -> Option<ErasedRef> {
        (self.access)(owner).get().map(|target| target.erase())
    }

    fn load(&self, owner: &EntityRef<P>, loader: &NavigationLoader) {
        let (owner_id, reference) = {
            let guard = owner.read();
            (guard.id(), (self.access)(&guard).share())
        };
        loader.load_reference(P::TYPE, owner_id, self.field, &reference);
    }

    fn link(&self, owner: &P, target: &dyn AnyEntity) -> bool {
        let reference = (self.access)(owner);
        match downcast::<T>(target) {
            Some(target) if reference.id() == Some(target.id()) => {
                reference.resolve(target);
                true
            }
            _ => false,
        }
    }

    fn carry_over(&self, from: &P, into: &P) {
        let source = (self.access)(from);
        let target = (self.access)(into);
        if source.id() == target.id() {
            if let Some(resolved) = source.resolved_raw() {
                target.resolve(resolved);
            }
        }
    }
}

pub struct CollectionNav<P, C> {
    field: &'static str,
    foreign_key: &'static str,
    access: fn(&P) -> &Collection<C>,
    access_mut: fn(&mut P) -> &mut Collection<C>,
    aggregate_member: bool,
    back_reference: bool,
}

impl<P: Entity, C: Entity> CollectionNav<P, C> {
    /// `foreign_key` names the property on `C` that points back at the owner.
    pub fn new(
        field: &'static str,
        foreign_key: &'static str,
        access: fn(&P) -> &Collection<C>,
        access_mut: fn(&mut P) -> &mut Collection<C>,
    ) -> Self {
        CollectionNav {
            field,
            foreign_key,
            access,
            access_mut,
            aggregate_member: false,
            back_reference: false,
        }
    }

    pub fn member_of_aggregate(mut self) -> Self {
        self.aggregate_member = true;
        self
    }

    pub fn back_reference(mut self) -> Self {
        self.back_reference = true;
        self
    }
}

impl<P: Entity, C: Entity> CollectionNavigation<P> for CollectionNav<P, C> {
    fn relationship(&self) -> Relationship {
        Relationship {
            field: self.field,
            target: C::TYPE,
            multiplicity: Multiplicity::Many,
            foreign_key: self.foreign_key,
            aggregate_member: self.aggregate_member,
            back_reference: self.back_reference,
        }
    }

    fn status(&self, owner: &P) -> LoadingStatus {
        (self.access)(owner).status()
    }

    fn mark_loaded(&self, owner: &P) {
        (self.access)(owner).mark_loaded();
    }

    fn children(&self, owner: &P) -> Vec<ErasedRef> {
        (self.access)(owner)
            .items()
            .iter()
            .map(|child| child.erase())
            .collect()
    }

    fn attach(&self, owner: &P, child: &dyn AnyEntity) -> bool {
        match downcast::<C>(child) {
            Some(child) => (self.access)(owner).push(child),
            None => false,
        }
    }

    fn detach(&self, owner: &P, child: Id) -> bool {
        (self.access)(owner).remove(child).is_some()
    }

    fn load(&self, owner: &EntityRef<P>, loader: &NavigationLoader) {
        let (owner_id, collection) = {
            let guard = owner.read();
            (guard.id(), (self.access)(&guard).share())
        };
        loader.load_collection(P::TYPE, owner_id, self.field, self.foreign_key, &collection);
    }

    fn transplant(&self, from: &mut P, into: &mut P) {
        std::mem::swap((self.access_mut)(from), (self.access_mut)(into));
    }
}

/// Navigation table of one entity type.
pub struct Navigations<P> {
    references: Vec<Box<dyn ReferenceNavigation<P>>>,
    collections: Vec<Box<dyn CollectionNavigation<P>>>,
    parent_links: Vec<ParentLink>,
}

impl<P: Entity> Default for Navigations<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Entity> Navigations<P> {
    pub fn new() -> Self {
        Navigations {
            references: Vec::new(),
            collections: Vec::new(),
            parent_links: Vec::new(),
        }
    }

    pub fn with_reference<T: Entity>(mut self, navigation: ReferenceNav<P, T>) -> Self {
        self.references.push(Box::new(navigation));
        self
    }

    pub fn with_collection<C: Entity>(mut self, navigation: CollectionNav<P, C>) -> Self {
        self.collections.push(Box::new(navigation));
        self
    }

    /// Mark `foreign_key` as the link from this type to its owning parent.
    pub fn with_parent_link(mut self, foreign_key: &'static str, parent: EntityType) -> Self {
        self.parent_links.push(ParentLink {
            foreign_key,
            parent,
        });
        self
    }

    pub fn references(&self) -> &[Box<dyn ReferenceNavigation<P>>] {
        &self.references
    }

    pub fn collections(&self) -> &[Box<dyn CollectionNavigation<P>>] {
        &self.collections
    }

    pub fn parent_links(&self) -> &[ParentLink] {
        &self.parent_links
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.references
            .iter()
            .map(|nav| nav.relationship())
            .chain(self.collections.iter().map(|nav| nav.relationship()))
            .collect()
    }

    pub fn collection_named(&self, field: &str) -> Option<&dyn CollectionNavigation<P>> {
        self.collections
            .iter()
            .find(|nav| nav.relationship().field == field)
            .map(|nav| nav.as_ref())
    }

    pub(crate) fn reference_key(&self, owner: &P, property: &str) -> Option<Id> {
        self.references
            .iter()
            .find(|nav| nav.relationship().foreign_key == property)
            .and_then(|nav| nav.key(owner))
    }

    pub(crate) fn set_reference_key(&self, owner: &mut P, property: &str, value: Option<Id>) -> bool {
        match self
            .references
            .iter()
            .find(|nav| nav.relationship().foreign_key == property)
        {
            Some(nav) => {
                nav.set_key(owner, value);
                true
            }
            None => false,
        }
    }
}

type TableRegistry = RwLock<HashMap<TypeId, &'static (dyn Any + Send + Sync)>>;

/// The process-wide navigation table of `T`, built on first use.
pub fn navigations_of<T: Entity>() -> &'static Navigations<T> {
    static TABLES: OnceLock<TableRegistry> = OnceLock::new();
    let tables = TABLES.get_or_init(Default::default);

    let type_id = TypeId::of::<T>();
    if let Some(table) = tables.read().get(&type_id).copied() {
        return downcast_table(table);
    }

    // Built outside the lock; a racing builder drops its copy and only the
    // table that gets registered is leaked.
    let built = T::navigations();
    let table = *tables
        .write()
        .entry(type_id)
        .or_insert_with(|| Box::leak(Box::new(built)) as &'static (dyn Any + Send + Sync));
    downcast_table(table)
}

fn downcast_table<T: Entity>(table: &'static (dyn Any + Send + Sync)) -> &'static Navigations<T> {
    // Tables are keyed by their own type id, so the fallback never runs.
    table
        .downcast_ref::<Navigations<T>>()
        .unwrap_or_else(|| Box::leak(Box::new(T::navigations())))
}
