//! The promise handle, its settle capabilities and the chaining engine.
use crate::cell::Cell;
use crate::context::ContextId;
use crate::error::PromiseError;
use crate::resolution::{catch_panic, guarded, IntoResolution, Resolution};
use crate::runtime::Runtime;
use crate::{Error, Value};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::Waker;

/// Handle to the eventual result of an asynchronous operation.
///
/// Cloning a `Promise` shares its state; it does not copy it. Every callback
/// registered on a promise runs later, through the scheduler of the runtime
/// the promise was created in, on the thread that registered it.
///
/// # Examples
///
/// ```
/// use promise_chain::Promise;
///
/// let p = Promise::resolve(42)
///     .then(|v| v + 1)
///     .then(|v| v.to_string());
/// assert_eq!(p.wait().unwrap(), "43");
/// ```
pub struct Promise<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            cell: self.cell.clone(),
        }
    }
}

impl<T> PartialEq for Promise<T> {
    /// Handles are equal when they share one state.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T> Eq for Promise<T> {}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Promise").field(&self.cell).finish()
    }
}

struct Shared<T: Value> {
    promise: Promise<T>,
}

impl<T: Value> Drop for Shared<T> {
    /// If this is an unresolved producer, reject with an error.
    fn drop(&mut self) {
        if self.promise.cell.settle(Err(Error::ProducerDropped.into())) {
            log::debug!("every producer dropped before settling, rejected");
        }
    }
}

/// Shared right to settle one promise.
///
/// Clones settle the same promise; the first settlement wins and the others
/// are ignored. When the last clone goes away while the promise is still
/// pending, it rejects with [`Error::ProducerDropped`].
///
/// # Examples
///
/// ```
/// use promise_chain::Producer;
/// use std::thread;
///
/// let (producer, promise) = Producer::<String>::new();
/// thread::spawn(move || producer.resolve("Hi".into()));
/// assert_eq!(promise.wait().unwrap(), "Hi");
/// ```
pub struct Producer<T: Value> {
    shared: Arc<Shared<T>>,
}

impl<T: Value> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Producer {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Value> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").field("promise", &self.shared.promise).finish()
    }
}

impl<T: Value> Producer<T> {
    /// A pending promise and the producer that settles it.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Producer<T>, Promise<T>) {
        Self::in_runtime(Runtime::current())
    }

    pub(crate) fn in_runtime(runtime: Arc<Runtime>) -> (Producer<T>, Promise<T>) {
        let promise = Promise {
            cell: Arc::new(Cell::new(runtime)),
        };
        let producer = Producer {
            shared: Arc::new(Shared {
                promise: promise.clone(),
            }),
        };
        (producer, promise)
    }

    pub fn promise(&self) -> Promise<T> {
        self.shared.promise.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.shared.promise.is_pending()
    }

    pub fn resolve(self, value: T) {
        self.settle(Ok(value));
    }

    pub fn reject<E>(self, error: E)
    where
        E: Any + Send + Sync + fmt::Debug,
    {
        self.settle(Err(PromiseError::new(error)));
    }

    pub(crate) fn settle(self, outcome: Result<T, PromiseError>) {
        if !self.shared.promise.cell.settle(outcome) {
            log::trace!("ignoring settlement of an already settled promise");
        }
    }
}

/// Fulfilling half handed to a resolver function.
pub struct Resolve<T: Value>(Producer<T>);

/// Rejecting half handed to a resolver function.
pub struct Reject<T: Value>(Producer<T>);

impl<T: Value> Clone for Resolve<T> {
    fn clone(&self) -> Self {
        Resolve(self.0.clone())
    }
}

impl<T: Value> Clone for Reject<T> {
    fn clone(&self) -> Self {
        Reject(self.0.clone())
    }
}

impl<T: Value> Resolve<T> {
    pub fn resolve(self, value: T) {
        self.0.resolve(value);
    }

    /// Settles through the dispatch table, so a `Promise<T>` is adopted.
    pub fn resolve_with<R>(self, result: R)
    where
        R: IntoResolution<Value = T>,
    {
        self.0.resolve_with(result);
    }
}

impl<T: Value> Reject<T> {
    pub fn reject<E>(self, error: E)
    where
        E: Any + Send + Sync + fmt::Debug,
    {
        self.0.reject(error);
    }
}

impl<T: Value> Promise<T> {
    /// Runs `resolver` synchronously with the two settle capabilities. A
    /// panic escaping the resolver rejects the promise.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::Promise;
    /// use std::thread;
    ///
    /// let p = Promise::<i32>::new(|resolve, _reject| {
    ///     thread::spawn(move || resolve.resolve(42));
    /// });
    /// assert_eq!(p.wait().unwrap(), 42);
    /// ```
    pub fn new<F>(resolver: F) -> Self
    where
        F: FnOnce(Resolve<T>, Reject<T>),
    {
        let (producer, promise) = Producer::new();
        let resolve = Resolve(producer.clone());
        let reject = Reject(producer.clone());
        if let Err(error) = catch_panic(promise.runtime(), move || resolver(resolve, reject)) {
            producer.settle(Err(error));
        }
        promise
    }

    /// Single-capability form of [`Promise::new`].
    pub fn with_resolve<F>(resolver: F) -> Self
    where
        F: FnOnce(Resolve<T>),
    {
        Self::new(move |resolve, _| resolver(resolve))
    }

    /// Like [`Promise::new`], with an `Err` from the resolver rejecting the
    /// promise.
    pub fn try_new<F, E>(resolver: F) -> Self
    where
        F: FnOnce(Resolve<T>, Reject<T>) -> Result<(), E>,
        E: Any + Send + Sync + fmt::Debug,
    {
        Self::new(move |resolve, reject| {
            if let Err(error) = resolver(resolve, reject.clone()) {
                reject.reject(error);
            }
        })
    }

    /// An already fulfilled promise.
    pub fn resolve(value: T) -> Self {
        let (producer, promise) = Producer::new();
        producer.resolve(value);
        promise
    }

    /// An already rejected promise.
    pub fn reject<E>(error: E) -> Self
    where
        E: Any + Send + Sync + fmt::Debug,
    {
        let (producer, promise) = Producer::new();
        producer.reject(error);
        promise
    }

    pub(crate) fn runtime(&self) -> &Arc<Runtime> {
        self.cell.runtime()
    }

    pub fn is_pending(&self) -> bool {
        self.cell.is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.cell.is_fulfilled()
    }

    pub fn is_rejected(&self) -> bool {
        self.cell.is_rejected()
    }

    /// The settled outcome, or `None` while pending. Never blocks.
    pub fn outcome(&self) -> Option<Result<T, PromiseError>> {
        self.cell.outcome()
    }

    /// Pumps the calling thread's queue until the promise settles.
    ///
    /// Calling this from inside a handler risks a deadlock: the work that
    /// would settle the promise may be queued behind the running handler.
    pub fn wait(&self) -> Result<T, PromiseError> {
        let runtime = self.runtime().clone();
        let context = ContextId::current();
        let _depth = WaitDepth::enter(context);
        if self.is_pending() {
            // Settlement then always queues work on this context, which ends
            // the blocking pump below.
            self.observe(|_| {});
        }
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            runtime.scheduler().pump(context, runtime.wait_slice());
        }
    }

    /// Stores `waker` until settlement. False if already settled.
    pub(crate) fn add_waker(&self, waker: &Waker) -> bool {
        self.cell.add_waker(waker)
    }

    /// Calls `f` with the outcome once the promise settles.
    pub(crate) fn observe<F>(&self, f: F)
    where
        F: FnOnce(Result<T, PromiseError>) + Send + 'static,
    {
        // Exactly one of the two lists fires; the other is dropped unrun.
        let on_fulfilled = Arc::new(Mutex::new(Some(f)));
        let on_rejected = on_fulfilled.clone();
        self.cell.add_handlers(
            Box::new(move |value| {
                if let Some(f) = take(&on_fulfilled) {
                    f(Ok(value));
                }
            }),
            Box::new(move |error| {
                if let Some(f) = take(&on_rejected) {
                    f(Err(error));
                }
            }),
        );
        self.cell.dispatch();
    }

    /// Derives a new promise from the outcome of this one.
    pub(crate) fn chain<U, F, R>(&self, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(Result<T, PromiseError>) -> R + Send + 'static,
        R: IntoResolution<Value = U>,
    {
        let runtime = self.runtime().clone();
        let (producer, next) = Producer::in_runtime(runtime.clone());
        self.observe(move |outcome| producer.resolve_with(guarded(&runtime, move || f(outcome))));
        next
    }

    /// Maps the fulfilled value. Rejections pass through unchanged.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => Resolution::Fulfill(on_fulfilled(value)),
            Err(error) => Resolution::Reject(error),
        })
    }

    /// Chains a handler whose result goes through the dispatch table: a
    /// returned promise is adopted, an `Err` rejects.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::Promise;
    ///
    /// let p = Promise::resolve(2).and_then(|v| Promise::resolve(v * 2));
    /// assert_eq!(p.wait().unwrap(), 4);
    /// ```
    pub fn and_then<F, R>(&self, on_fulfilled: F) -> Promise<R::Value>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoResolution,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value).into_resolution(),
            Err(error) => Resolution::Reject(error),
        })
    }

    /// Two-handler form. `on_rejected` only sees errors whose payload is an
    /// `E`; other rejections pass through.
    pub fn then_catch<U, E, F, G, R, S>(&self, on_fulfilled: F, on_rejected: G) -> Promise<U>
    where
        U: Value,
        E: Any + Clone,
        F: FnOnce(T) -> R + Send + 'static,
        G: FnOnce(E) -> S + Send + 'static,
        R: IntoResolution<Value = U>,
        S: IntoResolution<Value = U>,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value).into_resolution(),
            Err(error) => match error.downcast::<E>() {
                Some(reason) => on_rejected(reason).into_resolution(),
                None => Resolution::Reject(error),
            },
        })
    }

    /// Recovers from rejections carrying an `E` payload. Ask for
    /// [`PromiseError`] to catch everything.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::Promise;
    ///
    /// let p = Promise::<String>::reject(String::from("foo"))
    ///     .then(|v| v)
    ///     .fail(|e: String| e + "!");
    /// assert_eq!(p.wait().unwrap(), "foo!");
    /// ```
    pub fn fail<E, F>(&self, on_rejected: F) -> Promise<T>
    where
        E: Any + Clone,
        F: FnOnce(E) -> T + Send + 'static,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => Resolution::Fulfill(value),
            Err(error) => match error.downcast::<E>() {
                Some(reason) => Resolution::Fulfill(on_rejected(reason)),
                None => Resolution::Reject(error),
            },
        })
    }

    /// Typed recovery whose result goes through the dispatch table.
    pub fn or_else<E, F, R>(&self, on_rejected: F) -> Promise<T>
    where
        E: Any + Clone,
        F: FnOnce(E) -> R + Send + 'static,
        R: IntoResolution<Value = T>,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => Resolution::Fulfill(value),
            Err(error) => match error.downcast::<E>() {
                Some(reason) => on_rejected(reason).into_resolution(),
                None => Resolution::Reject(error),
            },
        })
    }

    pub fn convert<U>(&self) -> Promise<U>
    where
        U: Value + From<T>,
    {
        self.then(U::from)
    }

    /// Same outcome, without the value.
    pub fn discard(&self) -> Promise<()> {
        self.then(|_| ())
    }

    /// Calls `f` and settles a new promise from whatever it returns.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::Promise;
    ///
    /// let p = Promise::attempt(|| "42".parse::<i32>());
    /// assert_eq!(p.wait().unwrap(), 42);
    /// ```
    pub fn attempt<F, R>(f: F) -> Promise<T>
    where
        F: FnOnce() -> R,
        R: IntoResolution<Value = T>,
    {
        Self::attempt_in(Runtime::current(), f)
    }

    pub(crate) fn attempt_in<F, R>(runtime: Arc<Runtime>, f: F) -> Promise<T>
    where
        F: FnOnce() -> R,
        R: IntoResolution<Value = T>,
    {
        let (producer, promise) = Producer::in_runtime(runtime);
        let resolution = guarded(promise.runtime(), f);
        producer.resolve_with(resolution);
        promise
    }
}

fn take<F>(slot: &Mutex<Option<F>>) -> Option<F> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

thread_local! {
    static WAIT_DEPTH: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

struct WaitDepth;

impl WaitDepth {
    fn enter(context: ContextId) -> WaitDepth {
        let depth = WAIT_DEPTH.with(|depth| {
            depth.set(depth.get() + 1);
            depth.get()
        });
        if depth > 1 {
            log::warn!("nested Promise::wait on {} (depth {}), this can deadlock", context, depth);
        }
        WaitDepth
    }
}

impl Drop for WaitDepth {
    fn drop(&mut self) {
        let _ = WAIT_DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}
