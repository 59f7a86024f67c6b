//! Binding of the external services a promise relies on.
//!
//! A cell captures the runtime that is current when it is created, and every
//! promise derived from it inherits that runtime, so settlement on a foreign
//! thread still reaches the right scheduler.
use crate::scheduler::{EventLoop, Scheduler};
use crate::timer::{Timer, TimerThread};
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const DEFAULT_WAIT_SLICE: Duration = Duration::from_millis(10);

pub struct Runtime {
    scheduler: Arc<dyn Scheduler>,
    timer: Arc<dyn Timer>,
    wait_slice: Duration,
    catch_panics: bool,
}

thread_local! {
    static ENTERED: RefCell<Vec<Arc<Runtime>>> = const { RefCell::new(Vec::new()) };
}

impl Runtime {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Process-wide runtime: an [`EventLoop`] and a [`TimerThread`].
    pub fn global() -> Arc<Runtime> {
        static GLOBAL: OnceLock<Arc<Runtime>> = OnceLock::new();
        GLOBAL.get_or_init(|| Runtime::builder().build()).clone()
    }

    /// The runtime most recently entered on this thread, else the global one.
    pub fn current() -> Arc<Runtime> {
        ENTERED
            .try_with(|entered| entered.borrow().last().cloned())
            .ok()
            .flatten()
            .unwrap_or_else(Runtime::global)
    }

    /// Makes `self` current on this thread until the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> EnterGuard {
        ENTERED.with(|entered| entered.borrow_mut().push(self.clone()));
        EnterGuard { _private: () }
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn timer(&self) -> &Arc<dyn Timer> {
        &self.timer
    }

    /// Longest single blocking pump performed by `Promise::wait`.
    pub fn wait_slice(&self) -> Duration {
        self.wait_slice
    }

    /// Whether panics in resolvers and handlers become rejections.
    pub fn catch_panics(&self) -> bool {
        self.catch_panics
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("wait_slice", &self.wait_slice)
            .field("catch_panics", &self.catch_panics)
            .finish_non_exhaustive()
    }
}

/// Restores the previously current runtime on drop.
#[must_use = "the runtime is only current while the guard is alive"]
pub struct EnterGuard {
    _private: (),
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let _ = ENTERED.try_with(|entered| entered.borrow_mut().pop());
    }
}

pub struct Builder {
    scheduler: Option<Arc<dyn Scheduler>>,
    timer: Option<Arc<dyn Timer>>,
    wait_slice: Duration,
    catch_panics: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            scheduler: None,
            timer: None,
            wait_slice: DEFAULT_WAIT_SLICE,
            catch_panics: true,
        }
    }
}

impl Builder {
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn wait_slice(mut self, slice: Duration) -> Self {
        self.wait_slice = slice;
        self
    }

    /// With `false`, a panicking handler unwinds through the scheduler
    /// instead of rejecting the downstream promise.
    pub fn catch_panics(mut self, catch: bool) -> Self {
        self.catch_panics = catch;
        self
    }

    pub fn build(self) -> Arc<Runtime> {
        Arc::new(Runtime {
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(EventLoop::new())),
            timer: self.timer.unwrap_or_else(|| Arc::new(TimerThread::new())),
            wait_slice: self.wait_slice,
            catch_panics: self.catch_panics,
        })
    }
}
