//! Stack of active contexts
//!
//! Nested repository calls find their unit of work here instead of having it
//! passed through every signature. Each thread has its own stack; inside
//! [`scope_async`] a task-local stack takes precedence so that contexts
//! follow a task across runtime worker threads.

use crate::context::Context;
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static THREAD_STACK: RefCell<Vec<Arc<Context>>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_STACK: RefCell<Vec<Arc<Context>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackKind {
    Thread,
    Task,
}

/// Pops its context when dropped. Not `Send`: the scope belongs to the
/// thread (or task) that opened it.
#[must_use = "the context is popped as soon as the scope is dropped"]
pub struct ContextScope {
    context: Arc<Context>,
    kind: StackKind,
    _not_send: PhantomData<*const ()>,
}

/// Push `context`; the innermost pushed context wins until its scope drops.
pub fn use_context(context: Arc<Context>) -> ContextScope {
    let pushed = TASK_STACK.try_with(|stack| stack.borrow_mut().push(Arc::clone(&context)));
    let kind = if pushed.is_ok() {
        StackKind::Task
    } else {
        THREAD_STACK.with(|stack| stack.borrow_mut().push(Arc::clone(&context)));
        StackKind::Thread
    };
    ContextScope {
        context,
        kind,
        _not_send: PhantomData,
    }
}

/// The innermost active context, if any.
pub fn current_context() -> Option<Arc<Context>> {
    if let Ok(Some(context)) = TASK_STACK.try_with(|stack| stack.borrow().last().cloned()) {
        return Some(context);
    }
    THREAD_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Run `future` with a private context stack whose bottom entry is `context`.
pub async fn scope_async<F: Future>(context: Arc<Context>, future: F) -> F::Output {
    TASK_STACK.scope(RefCell::new(vec![context]), future).await
}

fn pop(stack: &RefCell<Vec<Arc<Context>>>, context: &Arc<Context>) {
    let mut stack = stack.borrow_mut();
    // Scopes normally drop in LIFO order; an out-of-order drop removes its own entry.
    if let Some(position) = stack.iter().rposition(|c| Arc::ptr_eq(c, context)) {
        stack.remove(position);
    }
    if stack.is_empty() {
        stack.shrink_to_fit();
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        match self.kind {
            StackKind::Task => {
                let _ = TASK_STACK.try_with(|stack| pop(stack, &self.context));
            }
            StackKind::Thread => {
                let _ = THREAD_STACK.try_with(|stack| pop(stack, &self.context));
            }
        }
    }
}

/// Depth of the calling thread's stack.
pub fn thread_depth() -> usize {
    THREAD_STACK.with(|stack| stack.borrow().len())
}
