//! Change propagation
//!
//! After a commit the context hands the committed delta to every registered
//! [`ChangeListener`]. The cache updater is the listener that keeps the
//! long-lived caches current; the broadcaster forwards notifications to other
//! processes. Listener failures are logged and never undo a commit.

pub mod broadcast;
pub mod cache_updater;
pub mod pipeline;

pub use broadcast::{ChangeBroadcaster, ChangeNotification};
pub use cache_updater::CacheUpdater;

use crate::entity::ErasedRef;
use crate::error::ListenerError;
use crate::types::{EntityType, Id};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// Parent of a committed entity: the tracked instance when the committing
/// context holds it, otherwise only its key.
#[derive(Clone)]
pub enum ParentRef {
    Entity(ErasedRef),
    Id { entity_type: EntityType, id: Id },
}

impl ParentRef {
    pub fn entity_type(&self) -> EntityType {
        match self {
            ParentRef::Entity(entity) => entity.entity_type(),
            ParentRef::Id { entity_type, .. } => *entity_type,
        }
    }

    pub fn id(&self) -> Id {
        match self {
            ParentRef::Entity(entity) => entity.id(),
            ParentRef::Id { id, .. } => *id,
        }
    }
}

impl fmt::Debug for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentRef::Entity(entity) => write!(f, "Entity({} {})", entity.entity_type(), entity.id()),
            ParentRef::Id { entity_type, id } => write!(f, "Id({} {})", entity_type, id),
        }
    }
}

/// One committed entry with its resolved parent linkage.
#[derive(Clone)]
pub struct CommittedChange {
    pub kind: ChangeKind,
    pub entity_type: EntityType,
    pub id: Id,
    pub entity: ErasedRef,
    pub parent: Option<ParentRef>,
    /// Collection navigation of the parent that holds the entity.
    pub parent_collection: Option<&'static str>,
}

impl fmt::Debug for CommittedChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommittedChange")
            .field("kind", &self.kind)
            .field("entity_type", &self.entity_type)
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("parent_collection", &self.parent_collection)
            .finish()
    }
}

/// Receiver of committed changes.
///
/// `entity` is the committing context's instance. Listeners that keep it
/// beyond the call must take a value copy.
pub trait ChangeListener: Send + Sync {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn on_added(
        &self,
        entity_type: EntityType,
        id: Id,
        entity: &ErasedRef,
        parent: Option<&ParentRef>,
        parent_collection: Option<&'static str>,
    ) -> Result<(), ListenerError>;

    fn on_removed(
        &self,
        entity_type: EntityType,
        id: Id,
        parent: Option<&ParentRef>,
        parent_collection: Option<&'static str>,
    ) -> Result<(), ListenerError>;

    fn on_changed(
        &self,
        entity_type: EntityType,
        id: Id,
        entity: &ErasedRef,
        parent: Option<&ParentRef>,
    ) -> Result<(), ListenerError>;
}
