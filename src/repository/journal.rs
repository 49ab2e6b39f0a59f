//! Commits observed while a cache is being populated.
//!
//! A population scans storage at one point in time, while commits keep
//! landing. Each cache therefore carries a journal: before its scan starts it
//! begins recording, every change the cache updater sees in the meantime is
//! buffered as a value copy, and the buffered changes are replayed onto the
//! populated cache before it goes live. Changes that reach the updater after
//! that are applied directly.

use crate::entity::ErasedRef;
use crate::propagation::ParentRef;
use crate::types::{EntityType, Id};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// One committed change, as captured for replay.
#[derive(Clone)]
pub enum JournalEntry {
    Added {
        entity: ErasedRef,
        parent: Option<ParentRef>,
        parent_collection: Option<&'static str>,
    },
    Removed {
        entity_type: EntityType,
        id: Id,
        parent: Option<ParentRef>,
        parent_collection: Option<&'static str>,
    },
    Changed {
        entity: ErasedRef,
        parent: Option<ParentRef>,
    },
}

impl JournalEntry {
    pub fn entity_type(&self) -> EntityType {
        match self {
            JournalEntry::Added { entity, .. } | JournalEntry::Changed { entity, .. } => entity.entity_type(),
            JournalEntry::Removed { entity_type, .. } => *entity_type,
        }
    }

    pub fn id(&self) -> Id {
        match self {
            JournalEntry::Added { entity, .. } | JournalEntry::Changed { entity, .. } => entity.id(),
            JournalEntry::Removed { id, .. } => *id,
        }
    }
}

impl fmt::Debug for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            JournalEntry::Added { .. } => "Added",
            JournalEntry::Removed { .. } => "Removed",
            JournalEntry::Changed { .. } => "Changed",
        };
        write!(f, "{}({} {})", kind, self.entity_type(), self.id())
    }
}

/// What the cache updater should do with a change for one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The cache is live: apply the change now.
    Apply,
    /// The cache is populating: the change was buffered for replay.
    Buffered,
    /// The cache has not started populating; its scan will see the change.
    Ignored,
}

enum JournalState {
    Idle,
    Recording(Vec<JournalEntry>),
    Live,
}

pub struct PopulationJournal {
    state: Mutex<JournalState>,
    /// Mirrors `JournalState::Live`; readable while the state is locked.
    live: AtomicBool,
}

impl Default for PopulationJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl PopulationJournal {
    pub fn new() -> Self {
        PopulationJournal {
            state: Mutex::new(JournalState::Idle),
            live: AtomicBool::new(false),
        }
    }

    /// Start buffering. Must be called before the population scans storage.
    pub fn start_recording(&self) {
        let mut state = self.state.lock();
        self.live.store(false, Ordering::SeqCst);
        *state = JournalState::Recording(Vec::new());
    }

    /// Drop anything buffered after a failed population.
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        self.live.store(false, Ordering::SeqCst);
        *state = JournalState::Idle;
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Decide how a change reaches this cache; `entry` is only built when it
    /// has to be buffered.
    pub fn admit(&self, entry: impl FnOnce() -> JournalEntry) -> Admission {
        let mut state = self.state.lock();
        match &mut *state {
            JournalState::Idle => Admission::Ignored,
            JournalState::Recording(buffered) => {
                buffered.push(entry());
                Admission::Buffered
            }
            JournalState::Live => Admission::Apply,
        }
    }

    /// Replay the buffered changes in commit order and go live. The journal
    /// stays locked during `replay`, so a concurrent commit waits and is then
    /// applied directly, after everything buffered before it.
    pub fn go_live(&self, replay: impl FnOnce(Vec<JournalEntry>)) -> usize {
        let mut state = self.state.lock();
        let buffered = match std::mem::replace(&mut *state, JournalState::Live) {
            JournalState::Recording(buffered) => buffered,
            JournalState::Idle | JournalState::Live => Vec::new(),
        };
        let count = buffered.len();
        replay(buffered);
        self.live.store(true, Ordering::SeqCst);
        count
    }
}
