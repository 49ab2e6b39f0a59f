//! Cross-process change notifications
//!
//! Forwards every committed change as a serializable [`ChangeNotification`]
//! over a tokio broadcast channel. Subscribers in other tasks (a message bus
//! bridge, a log shipper) receive them in commit order.

use crate::entity::ErasedRef;
use crate::error::ListenerError;
use crate::propagation::{ChangeKind, ChangeListener, ParentRef};
use crate::types::{EntityType, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    pub entity_type: String,
    pub id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Id>,
    pub committed_at: DateTime<Utc>,
}

impl ChangeNotification {
    fn new(kind: ChangeKind, entity_type: EntityType, id: Id, parent: Option<&ParentRef>) -> Self {
        ChangeNotification {
            kind,
            entity_type: entity_type.name().to_string(),
            id,
            parent: parent.map(ParentRef::id),
            committed_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub struct ChangeBroadcaster {
    sender: broadcast::Sender<ChangeNotification>,
}

impl ChangeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        ChangeBroadcaster { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn send(&self, notification: ChangeNotification) {
        // No subscribers is not an error.
        if let Err(broadcast::error::SendError(dropped)) = self.sender.send(notification) {
            trace!(id = %dropped.id, "No subscribers for change notification");
        }
    }
}

impl ChangeListener for ChangeBroadcaster {
    fn name(&self) -> &'static str {
        "broadcaster"
    }

    fn on_added(
        &self,
        entity_type: EntityType,
        id: Id,
        _entity: &ErasedRef,
        parent: Option<&ParentRef>,
        _parent_collection: Option<&'static str>,
    ) -> Result<(), ListenerError> {
        self.send(ChangeNotification::new(ChangeKind::Added, entity_type, id, parent));
        Ok(())
    }

    fn on_removed(
        &self,
        entity_type: EntityType,
        id: Id,
        parent: Option<&ParentRef>,
        _parent_collection: Option<&'static str>,
    ) -> Result<(), ListenerError> {
        self.send(ChangeNotification::new(ChangeKind::Removed, entity_type, id, parent));
        Ok(())
    }

    fn on_changed(
        &self,
        entity_type: EntityType,
        id: Id,
        _entity: &ErasedRef,
        parent: Option<&ParentRef>,
    ) -> Result<(), ListenerError> {
        self.send(ChangeNotification::new(ChangeKind::Changed, entity_type, id, parent));
        Ok(())
    }
}
