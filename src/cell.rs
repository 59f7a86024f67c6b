//! The one-shot settlement cell shared by every handle of a promise, and the
//! registry of callbacks waiting on it.
use crate::context::ContextId;
use crate::error::PromiseError;
use crate::runtime::Runtime;
use crate::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};
use std::task::Waker;

pub(crate) type Callback<A> = Box<dyn FnOnce(A) + Send + 'static>;

struct Handler<A> {
    context: ContextId,
    callback: Callback<A>,
}

pub(crate) enum State<T> {
    Pending,
    Fulfilled(T),
    Rejected(PromiseError),
}

struct Registry<T> {
    on_fulfilled: Vec<Handler<T>>,
    on_rejected: Vec<Handler<PromiseError>>,
    // Futures awaiting the cell; woken directly on settlement.
    wakers: Vec<Waker>,
}

// Lock order: `registry` may be held while reading `state`, never the other
// way round.
pub(crate) struct Cell<T> {
    state: RwLock<State<T>>,
    registry: Mutex<Registry<T>>,
    runtime: Arc<Runtime>,
}

impl<T: Value> Cell<T> {
    pub(crate) fn new(runtime: Arc<Runtime>) -> Self {
        Cell {
            state: RwLock::new(State::Pending),
            registry: Mutex::new(Registry {
                on_fulfilled: Vec::new(),
                on_rejected: Vec::new(),
                wakers: Vec::new(),
            }),
            runtime,
        }
    }

    fn state(&self) -> RwLockReadGuard<'_, State<T>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self) -> MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(*self.state(), State::Pending)
    }

    pub(crate) fn is_fulfilled(&self) -> bool {
        matches!(*self.state(), State::Fulfilled(_))
    }

    pub(crate) fn is_rejected(&self) -> bool {
        matches!(*self.state(), State::Rejected(_))
    }

    pub(crate) fn outcome(&self) -> Option<Result<T, PromiseError>> {
        match &*self.state() {
            State::Pending => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(error) => Some(Err(error.clone())),
        }
    }

    /// Registers one callback per outcome for the calling context. Nothing
    /// fires until [`Cell::dispatch`] runs, even if the cell is settled.
    pub(crate) fn add_handlers(&self, on_fulfilled: Callback<T>, on_rejected: Callback<PromiseError>) {
        let context = ContextId::current();
        let mut registry = self.registry();
        registry.on_fulfilled.push(Handler {
            context,
            callback: on_fulfilled,
        });
        registry.on_rejected.push(Handler {
            context,
            callback: on_rejected,
        });
        log::trace!(
            "registered handlers from {} ({} waiting)",
            context,
            registry.on_fulfilled.len()
        );
    }

    /// Stores `waker` for the settlement. Returns false, without storing it,
    /// when the cell is already settled.
    pub(crate) fn add_waker(&self, waker: &Waker) -> bool {
        let mut registry = self.registry();
        if !matches!(*self.state(), State::Pending) {
            return false;
        }
        if !registry.wakers.iter().any(|w| w.will_wake(waker)) {
            registry.wakers.push(waker.clone());
        }
        true
    }

    /// Performs the Pending -> Fulfilled/Rejected transition and dispatches.
    /// Returns false, leaving the cell untouched, if it was already settled.
    pub(crate) fn settle(&self, outcome: Result<T, PromiseError>) -> bool {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !matches!(*state, State::Pending) {
                return false;
            }
            *state = match outcome {
                Ok(value) => State::Fulfilled(value),
                Err(error) => State::Rejected(error),
            };
        }
        let wakers = std::mem::take(&mut self.registry().wakers);
        log::trace!("cell settled, waking {} future(s)", wakers.len());
        for waker in wakers {
            waker.wake();
        }
        self.dispatch();
        true
    }

    /// Hands every registered callback for the settled outcome to the
    /// scheduler, in registration order, and clears both lists. No-op while
    /// pending.
    pub(crate) fn dispatch(&self) {
        let value = match &*self.state() {
            State::Pending => return,
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(error) => Err(error.clone()),
        };
        let (on_fulfilled, on_rejected) = {
            let mut registry = self.registry();
            (
                std::mem::take(&mut registry.on_fulfilled),
                std::mem::take(&mut registry.on_rejected),
            )
        };
        // Dropping the losing side may settle other cells; no lock is held.
        let scheduler = self.runtime.scheduler();
        match value {
            Ok(value) => {
                drop(on_rejected);
                log::trace!("dispatching {} fulfilment handler(s)", on_fulfilled.len());
                for Handler { context, callback } in on_fulfilled {
                    let value = value.clone();
                    scheduler.schedule(context, Box::new(move || callback(value)));
                }
            }
            Err(error) => {
                drop(on_fulfilled);
                log::trace!("dispatching {} rejection handler(s)", on_rejected.len());
                for Handler { context, callback } in on_rejected {
                    let error = error.clone();
                    scheduler.schedule(context, Box::new(move || callback(error)));
                }
            }
        }
    }
}

impl<T> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            State::Pending => f.write_str("Pending"),
            State::Fulfilled(_) => f.write_str("Fulfilled"),
            State::Rejected(error) => write!(f, "Rejected({error:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Cell;
    use crate::error::PromiseError;
    use crate::runtime::Runtime;
    use crate::scheduler::ManualScheduler;
    use std::sync::{Arc, Mutex};

    fn manual() -> (Arc<ManualScheduler>, Arc<Runtime>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let runtime = Runtime::builder().scheduler(scheduler.clone()).build();
        (scheduler, runtime)
    }

    #[test]
    fn test_settles_exactly_once() {
        let (_, runtime) = manual();
        let cell = Cell::<i32>::new(runtime);
        assert!(cell.is_pending());
        assert!(cell.settle(Ok(1)));
        assert!(!cell.settle(Ok(2)));
        assert!(!cell.settle(Err(PromiseError::new("late"))));
        assert!(cell.is_fulfilled());
        assert!(!cell.is_rejected());
        assert_eq!(cell.outcome().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_handlers_are_deferred_and_ordered() {
        let (scheduler, runtime) = manual();
        let cell = Cell::<i32>::new(runtime);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = seen.clone();
            cell.add_handlers(
                Box::new(move |v| seen.lock().unwrap().push(format!("{tag}{v}"))),
                Box::new(|_| panic!("not rejected")),
            );
        }
        cell.settle(Ok(7));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(scheduler.run_all(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["a7", "b7"]);
    }

    #[test]
    fn test_late_registration_fires_once_after_dispatch() {
        let (scheduler, runtime) = manual();
        let cell = Cell::<i32>::new(runtime);
        cell.settle(Err(PromiseError::new("foo")));
        let hits = Arc::new(Mutex::new(0));
        {
            let hits = hits.clone();
            cell.add_handlers(
                Box::new(|_| panic!("not fulfilled")),
                Box::new(move |e| {
                    assert_eq!(e.downcast::<&str>(), Some("foo"));
                    *hits.lock().unwrap() += 1;
                }),
            );
        }
        assert!(scheduler.is_empty());
        cell.dispatch();
        cell.dispatch();
        assert_eq!(scheduler.run_all(), 1);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_dispatch_while_pending_is_a_no_op() {
        let (scheduler, runtime) = manual();
        let cell = Cell::<()>::new(runtime);
        cell.add_handlers(Box::new(|_| ()), Box::new(|_| ()));
        cell.dispatch();
        assert!(scheduler.is_empty());
        assert!(format!("{cell:?}").starts_with("Pending"));
    }
}
