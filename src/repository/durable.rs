//! Durable repository: every call reaches storage through a unit of work.

use crate::context::provider::Shared;
use crate::context::Context;
use crate::entity::{Entity, EntityRef};
use crate::error::{PersistenceError, Result};
use crate::repository::Repository;
use crate::types::Id;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Uncached repository of `T`.
///
/// Reads run in the current context when it belongs to the same provider,
/// otherwise in a short-lived transient one. Results go through the
/// navigation loader and the context's identity map, and entities the
/// context has added but not yet committed are visible to `get_all`.
pub struct DurableRepository<T> {
    shared: Weak<Shared>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> DurableRepository<T> {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        DurableRepository {
            shared,
            _entity: PhantomData,
        }
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or(PersistenceError::ProviderDropped)
    }
}

impl<T: Entity> Repository<T> for DurableRepository<T> {
    fn get_by_id(&self, id: Id) -> Result<Option<EntityRef<T>>> {
        let shared = self.shared()?;
        Context::current_or_transient(&shared, false, |context| context.durable_get::<T>(id))
    }

    fn get_all(&self) -> Result<Vec<EntityRef<T>>> {
        let shared = self.shared()?;
        Context::current_or_transient(&shared, false, |context| context.durable_all::<T>())
    }

    fn delete(&self, id: Id) -> Result<bool> {
        let shared = self.shared()?;
        Context::current_or_transient(&shared, true, |context| {
            match context.durable_get::<T>(id)? {
                Some(entity) => {
                    context.delete(&entity)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn load_by_property(&self, property: &str, value: Id) -> Result<Vec<EntityRef<T>>> {
        let shared = self.shared()?;
        Context::current_or_transient(&shared, false, |context| {
            context.durable_where::<T>(property, value)
        })
    }
}
