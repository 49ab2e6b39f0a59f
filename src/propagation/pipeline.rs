//! Dispatch of a committed delta to the listeners.

use crate::error::ListenerError;
use crate::propagation::{ChangeKind, ChangeListener, CommittedChange, ParentRef};
use crate::types::{EntityType, Id};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Notify every listener of `changes`.
///
/// Additions go out parents first, then changes, then removals children
/// first, so a listener always sees an entity's parent before the entity
/// and never sees a child outlive its parent. A parent of a committed entry
/// that is tracked, is not the aggregate root and is not itself part of the
/// commit gets one extra `on_changed`. Each listener call is isolated: an
/// error or panic is logged and the remaining calls proceed.
pub fn propagate(
    listeners: &[Arc<dyn ChangeListener>],
    changes: &[CommittedChange],
    aggregate_root: Option<EntityType>,
) {
    let ordered = dispatch_order(changes);
    for listener in listeners {
        let mut failures = 0usize;
        for change in &ordered {
            debug!(
                listener = listener.name(),
                kind = ?change.kind,
                entity_type = %change.entity_type,
                id = %change.id,
                "Dispatching change"
            );
            let result = guarded(listener.name(), || match change.kind {
                ChangeKind::Added => listener.on_added(
                    change.entity_type,
                    change.id,
                    &change.entity,
                    change.parent.as_ref(),
                    change.parent_collection,
                ),
                ChangeKind::Removed => listener.on_removed(
                    change.entity_type,
                    change.id,
                    change.parent.as_ref(),
                    change.parent_collection,
                ),
                ChangeKind::Changed => listener.on_changed(
                    change.entity_type,
                    change.id,
                    &change.entity,
                    change.parent.as_ref(),
                ),
            });
            if let Err(e) = result {
                failures += 1;
                warn!(
                    entity_type = %change.entity_type,
                    id = %change.id,
                    kind = ?change.kind,
                    error = %e,
                    "Change listener failed"
                );
            }
        }

        for parent in dirtied_parents(changes, aggregate_root) {
            let ParentRef::Entity(entity) = parent else {
                continue;
            };
            let result = guarded(listener.name(), || {
                listener.on_changed(entity.entity_type(), entity.id(), entity, None)
            });
            if let Err(e) = result {
                failures += 1;
                warn!(
                    entity_type = %entity.entity_type(),
                    id = %entity.id(),
                    error = %e,
                    "Change listener failed on parent"
                );
            }
        }

        if failures > 0 {
            warn!(
                listener = listener.name(),
                failures,
                changes = changes.len(),
                "Committed changes were not fully propagated"
            );
        }
    }
}

fn guarded(
    listener: &'static str,
    call: impl FnOnce() -> Result<(), ListenerError>,
) -> Result<(), ListenerError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(ListenerError::Panicked {
            listener,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Additions by depth, then changes, then removals by reverse depth. Depth
/// counts ancestors within the same commit; ties keep staging order.
fn dispatch_order(changes: &[CommittedChange]) -> Vec<&CommittedChange> {
    let index: HashMap<(EntityType, Id), usize> = changes
        .iter()
        .enumerate()
        .map(|(position, change)| ((change.entity_type, change.id), position))
        .collect();

    let depth = |start: usize| {
        let mut depth = 0usize;
        let mut current = start;
        while let Some(parent) = &changes[current].parent {
            match index.get(&(parent.entity_type(), parent.id())) {
                Some(&next) if depth < changes.len() => {
                    depth += 1;
                    current = next;
                }
                _ => break,
            }
        }
        depth
    };

    let mut added: Vec<(usize, usize)> = Vec::new();
    let mut changed = Vec::new();
    let mut removed: Vec<(usize, usize)> = Vec::new();
    for (position, change) in changes.iter().enumerate() {
        match change.kind {
            ChangeKind::Added => added.push((depth(position), position)),
            ChangeKind::Changed => changed.push(position),
            ChangeKind::Removed => removed.push((depth(position), position)),
        }
    }
    added.sort_by_key(|&(depth, position)| (depth, position));
    removed.sort_by_key(|&(depth, position)| (std::cmp::Reverse(depth), position));

    added
        .into_iter()
        .map(|(_, position)| position)
        .chain(changed)
        .chain(removed.into_iter().map(|(_, position)| position))
        .map(|position| &changes[position])
        .collect()
}

/// Tracked parents implicitly dirtied by a committed child, deduplicated.
fn dirtied_parents(changes: &[CommittedChange], aggregate_root: Option<EntityType>) -> Vec<&ParentRef> {
    let committed: HashSet<(EntityType, Id)> = changes
        .iter()
        .map(|change| (change.entity_type, change.id))
        .collect();
    let mut emitted = HashSet::new();
    changes
        .iter()
        .filter_map(|change| change.parent.as_ref())
        .filter(|parent| matches!(parent, ParentRef::Entity(_)))
        .filter(|parent| Some(parent.entity_type()) != aggregate_root)
        .filter(|parent| {
            let key = (parent.entity_type(), parent.id());
            !committed.contains(&key) && emitted.insert(key)
        })
        .collect()
}
