//! Execution-context tags.
//!
//! Every callback remembers the context that registered it so the scheduler
//! can deliver it back there. A context is an OS thread: it comes into being
//! the first time the thread asks for its id and is gone once the thread
//! exits.
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);
static RETIRED: AtomicU64 = AtomicU64::new(0);

fn live_contexts() -> &'static Mutex<HashSet<ContextId>> {
    static LIVE: OnceLock<Mutex<HashSet<ContextId>>> = OnceLock::new();
    LIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

struct ThreadContext {
    id: ContextId,
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        log::trace!("context {} retired", self.id);
        live_contexts()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        RETIRED.fetch_add(1, Ordering::SeqCst);
    }
}

/// Number of contexts retired so far. Changes whenever a thread that had a
/// context exits.
pub(crate) fn retirements() -> u64 {
    RETIRED.load(Ordering::SeqCst)
}

thread_local! {
    static CURRENT: ThreadContext = {
        let id = ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed));
        live_contexts()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        ThreadContext { id }
    };
}

/// Identifies the thread a callback must run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Context of the calling thread.
    ///
    /// During thread teardown, when the thread-local slot is already gone,
    /// this returns a fresh id that is never alive.
    pub fn current() -> ContextId {
        CURRENT
            .try_with(|ctx| ctx.id)
            .unwrap_or_else(|_| ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed)))
    }

    /// Whether the owning thread is still running.
    pub fn is_alive(self) -> bool {
        live_contexts()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&self)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}
