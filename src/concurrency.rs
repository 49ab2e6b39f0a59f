//! Concurrency primitives
//!
//! `LoadGate` is the single-flight guard behind every lazily populated
//! structure: lazy collections and full-table / per-aggregate caches. Exactly
//! one thread performs the load; other threads block on a condition variable
//! until it finishes. The loading thread re-entering its own gate (a cycle in
//! the navigation graph) returns immediately instead of deadlocking.

use crate::error::{PersistenceError, Result};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Loading state of a lazily populated structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadingStatus {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug)]
struct GateState {
    status: LoadingStatus,
    loader: Option<ThreadId>,
}

/// Outcome of [`LoadGate::enter`].
#[must_use]
pub enum GateEntry<'a> {
    /// The caller owns the load and must complete or fail the ticket.
    Acquired(LoadTicket<'a>),
    /// Another load already finished successfully.
    Loaded,
    /// A previous load failed and the gate does not retry.
    Failed,
    /// The calling thread is already loading this gate further up its stack.
    Reentrant,
}

#[derive(Debug)]
pub struct LoadGate {
    state: Mutex<GateState>,
    ready: Condvar,
}

impl Default for LoadGate {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadGate {
    pub fn new() -> Self {
        Self::with_status(LoadingStatus::Unloaded)
    }

    pub fn with_status(status: LoadingStatus) -> Self {
        LoadGate {
            state: Mutex::new(GateState {
                status,
                loader: None,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn status(&self) -> LoadingStatus {
        self.state.lock().status
    }

    /// Enter the gate, blocking while another thread is loading.
    ///
    /// With `retry_failed`, a `Failed` gate is treated as `Unloaded` and the
    /// caller gets to load again.
    pub fn enter(&self, retry_failed: bool) -> GateEntry<'_> {
        let current = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.status {
                LoadingStatus::Loaded => return GateEntry::Loaded,
                LoadingStatus::Failed if !retry_failed => return GateEntry::Failed,
                LoadingStatus::Unloaded | LoadingStatus::Failed => {
                    state.status = LoadingStatus::Loading;
                    state.loader = Some(current);
                    return GateEntry::Acquired(LoadTicket {
                        gate: self,
                        finished: false,
                    });
                }
                LoadingStatus::Loading if state.loader == Some(current) => {
                    return GateEntry::Reentrant;
                }
                LoadingStatus::Loading => self.ready.wait(&mut state),
            }
        }
    }

    /// Mark as loaded without running a load (e.g. a freshly created owner has
    /// nothing in storage to load).
    pub fn mark_loaded(&self) {
        self.finish(LoadingStatus::Loaded);
    }

    /// Forget any previous outcome.
    pub fn reset(&self) {
        self.finish(LoadingStatus::Unloaded);
    }

    fn finish(&self, status: LoadingStatus) {
        let mut state = self.state.lock();
        state.status = status;
        state.loader = None;
        drop(state);
        self.ready.notify_all();
    }
}

/// Ownership of an in-flight load. Dropping it without completing resets the
/// gate to `Unloaded` so that a panicking loader never strands waiters.
pub struct LoadTicket<'a> {
    gate: &'a LoadGate,
    finished: bool,
}

impl LoadTicket<'_> {
    pub fn complete(mut self) {
        self.finished = true;
        self.gate.finish(LoadingStatus::Loaded);
    }

    pub fn fail(mut self) {
        self.finished = true;
        self.gate.finish(LoadingStatus::Failed);
    }
}

impl Drop for LoadTicket<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.gate.finish(LoadingStatus::Unloaded);
        }
    }
}

/// Cooperative cancellation flag checked at the entry of durable reads.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PersistenceError::Cancelled)
        } else {
            Ok(())
        }
    }
}
