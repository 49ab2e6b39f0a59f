//! Many-to-many adapter over a collection of join rows.

use crate::entity::{Collection, Entity, EntityRef, Reference};
use crate::types::Id;

/// Collection view of `T` backed by join rows of type `J`.
///
/// Membership is decided by the foreign key each row carries, so a target is
/// never represented twice and lookups do not require the targets to be loaded.
pub struct JoinView<'a, T, J> {
    rows: &'a Collection<J>,
    extract: fn(&J) -> &Reference<T>,
    construct: Box<dyn Fn(&EntityRef<T>) -> J + 'a>,
}

impl<'a, T: Entity, J: Entity> JoinView<'a, T, J> {
    pub fn new(
        rows: &'a Collection<J>,
        extract: fn(&J) -> &Reference<T>,
        construct: impl Fn(&EntityRef<T>) -> J + 'a,
    ) -> Self {
        JoinView {
            rows,
            extract,
            construct: Box::new(construct),
        }
    }

    pub fn ids(&self) -> Vec<Id> {
        self.rows
            .items()
            .iter()
            .filter_map(|row| (self.extract)(&row.read()).id())
            .collect()
    }

    /// Resolved targets; rows whose target has not been loaded are skipped.
    pub fn items(&self) -> Vec<EntityRef<T>> {
        self.rows
            .items()
            .iter()
            .filter_map(|row| (self.extract)(&row.read()).get())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, target: Id) -> bool {
        self.row_for(target).is_some()
    }

    /// Create a join row for `target` unless one exists. The new row is
    /// returned so the caller can stage it in its unit of work.
    pub fn add(&self, target: &EntityRef<T>) -> Option<EntityRef<J>> {
        if self.contains(target.id()) {
            return None;
        }
        let row = EntityRef::new((self.construct)(target));
        self.rows.push(row.clone());
        Some(row)
    }

    /// Remove the join row for `target`, returning it for deletion.
    pub fn remove(&self, target: Id) -> Option<EntityRef<J>> {
        let row = self.row_for(target)?;
        self.rows.remove(row.id())
    }

    fn row_for(&self, target: Id) -> Option<EntityRef<J>> {
        self.rows
            .items()
            .into_iter()
            .find(|row| (self.extract)(&row.read()).id() == Some(target))
    }
}
