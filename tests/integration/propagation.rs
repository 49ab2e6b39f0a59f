//! Listener isolation and change broadcast

use super::test_utils::{memory_provider, seed_configuration};
use graphcache::context::ContextPurpose;
use graphcache::entity::ErasedRef;
use graphcache::error::ListenerError;
use graphcache::model::{MonsterAttribute, MonsterDefinition};
use graphcache::propagation::{ChangeKind, ChangeListener, ParentRef};
use graphcache::{Entity, EntityType, Id};
use parking_lot::Mutex;
use std::sync::Arc;

struct Failing;

impl ChangeListener for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn on_added(&self, _: EntityType, _: Id, _: &ErasedRef, _: Option<&ParentRef>, _: Option<&'static str>) -> Result<(), ListenerError> {
        Err(ListenerError::Failed {
            listener: "failing",
            reason: "bus unavailable".to_string(),
        })
    }

    fn on_removed(&self, _: EntityType, _: Id, _: Option<&ParentRef>, _: Option<&'static str>) -> Result<(), ListenerError> {
        panic!("listener bug")
    }

    fn on_changed(&self, _: EntityType, _: Id, _: &ErasedRef, _: Option<&ParentRef>) -> Result<(), ListenerError> {
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(ChangeKind, EntityType, Id)>>,
}

impl ChangeListener for Recorder {
    fn on_added(&self, ty: EntityType, id: Id, _: &ErasedRef, _: Option<&ParentRef>, _: Option<&'static str>) -> Result<(), ListenerError> {
        self.seen.lock().push((ChangeKind::Added, ty, id));
        Ok(())
    }

    fn on_removed(&self, ty: EntityType, id: Id, _: Option<&ParentRef>, _: Option<&'static str>) -> Result<(), ListenerError> {
        self.seen.lock().push((ChangeKind::Removed, ty, id));
        Ok(())
    }

    fn on_changed(&self, ty: EntityType, id: Id, _: &ErasedRef, _: Option<&ParentRef>) -> Result<(), ListenerError> {
        self.seen.lock().push((ChangeKind::Changed, ty, id));
        Ok(())
    }
}

/// A failing or panicking listener neither rolls back the commit nor starves others
#[test]
fn test_listener_failures_are_isolated() {
    let provider = memory_provider().with_aggregate_cache().unwrap();
    let recorder = Arc::new(Recorder::default());
    provider.add_change_listener(Arc::new(Failing));
    provider.add_change_listener(recorder.clone());

    let (root, monsters) = seed_configuration(&provider, "C", &["Ghost"]);
    assert_eq!(recorder.seen.lock().len(), 3);

    let edit = provider
        .create_edit_context::<MonsterDefinition>(Some(root))
        .unwrap();
    assert!(edit.delete_by_id::<MonsterDefinition>(monsters[0]).unwrap());
    assert!(edit.save_changes().unwrap());

    let removed: Vec<_> = recorder
        .seen
        .lock()
        .iter()
        .filter(|(kind, _, _)| *kind == ChangeKind::Removed)
        .map(|(_, ty, _)| *ty)
        .collect();
    // Children go before their parent.
    assert_eq!(removed, vec![MonsterAttribute::TYPE, MonsterDefinition::TYPE]);

    let context = provider.create_context(ContextPurpose::Configuration);
    assert!(context.get_by_id::<MonsterDefinition>(monsters[0]).unwrap().is_none());
}

/// Broadcast subscribers receive every committed change as JSON-ready notifications
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broadcast_reaches_subscriber_task() {
    let provider = memory_provider().with_broadcast(64);
    let mut receiver = provider.broadcaster().unwrap().subscribe();

    let collector = tokio::spawn(async move {
        let mut kinds = Vec::new();
        while let Ok(notification) = receiver.recv().await {
            assert!(notification.to_json().unwrap().contains(&notification.id.to_string()));
            kinds.push((notification.kind, notification.entity_type));
            if kinds.len() == 3 {
                break;
            }
        }
        kinds
    });

    let writer = provider.clone();
    tokio::task::spawn_blocking(move || seed_configuration(&writer, "C", &["Spider"]))
        .await
        .unwrap();

    let kinds = tokio::time::timeout(std::time::Duration::from_secs(5), collector)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        kinds,
        vec![
            (ChangeKind::Added, "GameConfiguration".to_string()),
            (ChangeKind::Added, "MonsterDefinition".to_string()),
            (ChangeKind::Added, "MonsterAttribute".to_string()),
        ]
    );
}

/// Suspended notifications still commit but reach no listener
#[test]
fn test_suspended_commit_is_silent() {
    let provider = memory_provider();
    let recorder = Arc::new(Recorder::default());
    provider.add_change_listener(recorder.clone());

    let context = provider.create_context(ContextPurpose::Configuration);
    let _quiet = context.suspend_change_notifications();
    context
        .create_new::<MonsterDefinition>(|m| m.name = "Silent".to_string())
        .unwrap();
    assert!(context.save_changes().unwrap());
    assert!(recorder.seen.lock().is_empty());
}
