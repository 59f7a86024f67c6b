//! Bridges between promises and the rest of the async world: awaiting a
//! promise, turning a future into a promise, and adapting callback-style
//! sources.
use crate::context::ContextId;
use crate::error::PromiseError;
use crate::promise::{Producer, Promise, Reject, Resolve};
use crate::resolution::catch_panic;
use crate::runtime::Runtime;
use crate::Value;
use futures::future::{BoxFuture, FutureExt};
use futures::task::{waker_ref, ArcWake};
use std::any::Any;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

/// Future returned by `promise.into_future()` (or used implicitly by
/// `.await`).
///
/// Each poll first runs the callbacks queued for the polling thread, since
/// the promise may depend on them.
///
/// # Examples
///
/// ```
/// use futures::executor::block_on;
/// use promise_chain::Promise;
///
/// let p = Promise::resolve(20).then(|v| v + 1);
/// assert_eq!(block_on(async { p.await }).unwrap(), 21);
/// ```
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct PromiseFuture<T> {
    promise: Promise<T>,
}

impl<T: Value> Future for PromiseFuture<T> {
    type Output = Result<T, PromiseError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let promise = &self.promise;
        let scheduler = promise.runtime().scheduler();
        let context = ContextId::current();
        scheduler.pump(context, Duration::ZERO);
        if let Some(outcome) = promise.outcome() {
            return Poll::Ready(outcome);
        }
        if !promise.add_waker(cx.waker()) {
            // Settled between the two checks.
            if let Some(outcome) = promise.outcome() {
                return Poll::Ready(outcome);
            }
        }
        scheduler.watch(context, cx.waker().clone());
        Poll::Pending
    }
}

impl<T: Value> IntoFuture for Promise<T> {
    type Output = Result<T, PromiseError>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> PromiseFuture<T> {
        PromiseFuture { promise: self }
    }
}

/// Anything that reports completion through a pair of callbacks.
///
/// # Examples
///
/// ```
/// use promise_chain::{Promise, Reject, Resolve, Subscribe};
/// use std::thread;
///
/// struct Download(u32);
///
/// impl Subscribe<u32> for Download {
///     fn subscribe(self, resolve: Resolve<u32>, reject: Reject<u32>) {
///         thread::spawn(move || match self.0 {
///             0 => reject.reject(String::from("empty")),
///             n => resolve.resolve(n),
///         });
///     }
/// }
///
/// assert_eq!(Promise::from_source(Download(3)).wait().unwrap(), 3);
/// ```
pub trait Subscribe<T: Value> {
    /// Arranges for exactly one of the two capabilities to be called.
    /// Dropping both rejects the promise.
    fn subscribe(self, resolve: Resolve<T>, reject: Reject<T>);
}

struct FutureTask<T: Value> {
    future: Mutex<Option<BoxFuture<'static, Result<T, PromiseError>>>>,
    // Set by a poll that found the future already taken out, i.e. a wake-up
    // delivered while the future was being polled further up the stack.
    repoll: AtomicBool,
    producer: Producer<T>,
    context: ContextId,
    runtime: Arc<Runtime>,
}

impl<T: Value> FutureTask<T> {
    fn poll(self: &Arc<Self>) {
        let taken = self.future.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut future) = taken else {
            self.repoll.store(true, Ordering::SeqCst);
            return;
        };
        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        loop {
            self.repoll.store(false, Ordering::SeqCst);
            match catch_panic(&self.runtime, || future.as_mut().poll(&mut cx)) {
                Ok(Poll::Pending) if self.repoll.load(Ordering::SeqCst) => continue,
                Ok(Poll::Pending) => {
                    *self.future.lock().unwrap_or_else(PoisonError::into_inner) = Some(future);
                    return;
                }
                Ok(Poll::Ready(outcome)) => return self.producer.clone().settle(outcome),
                Err(error) => return self.producer.clone().settle(Err(error)),
            }
        }
    }
}

impl<T: Value> ArcWake for FutureTask<T> {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let task = arc_self.clone();
        arc_self
            .runtime
            .scheduler()
            .schedule(arc_self.context, Box::new(move || task.poll()));
    }
}

impl<T: Value> Promise<T> {
    /// Settles from a callback-style source.
    pub fn from_source<S>(source: S) -> Promise<T>
    where
        S: Subscribe<T>,
    {
        Promise::new(move |resolve, reject| source.subscribe(resolve, reject))
    }

    /// Drives `future` on the calling thread's queue and settles with its
    /// output. The first poll happens on the next pump, never inline.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::Promise;
    ///
    /// let p = Promise::from_future(async { "7".parse::<u8>() });
    /// assert_eq!(p.wait().unwrap(), 7);
    /// ```
    pub fn from_future<F, E>(future: F) -> Promise<T>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Any + Send + Sync + fmt::Debug,
    {
        let runtime = Runtime::current();
        let (producer, promise) = Producer::in_runtime(runtime.clone());
        let task = Arc::new(FutureTask {
            future: Mutex::new(Some(future.map(|r| r.map_err(PromiseError::new)).boxed())),
            repoll: AtomicBool::new(false),
            producer,
            context: ContextId::current(),
            runtime,
        });
        ArcWake::wake_by_ref(&task);
        promise
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, Producer, Promise, PromiseError, Reject, Resolve, Subscribe};
    use futures::executor::block_on;
    use std::future::IntoFuture;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_await_settled_and_pending() {
        assert_eq!(block_on(Promise::resolve(1).into_future()).unwrap(), 1);

        let (op, p) = Producer::<String>::new();
        let task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            op.resolve(String::from("later"));
        });
        assert_eq!(block_on(async { p.await }).unwrap(), "later");
        task.join().expect("The task thread has panicked");
    }

    #[test]
    fn test_await_runs_local_handlers() {
        let p = Promise::resolve(2)
            .delay(Duration::from_millis(10))
            .then(|v| v * 3)
            .and_then(|v| Promise::resolve(v + 1));
        assert_eq!(block_on(p.into_future()).unwrap(), 7);
    }

    #[test]
    fn test_await_rejection() {
        let p = Promise::<()>::reject(Error::Timeout);
        let error: PromiseError = block_on(async { p.await }).unwrap_err();
        assert_eq!(error.downcast::<Error>(), Some(Error::Timeout));
    }

    #[test]
    fn test_from_future_is_deferred() {
        let p = Promise::from_future(async { Ok::<_, String>(5) });
        assert!(p.is_pending());
        assert_eq!(p.wait().unwrap(), 5);

        let p = Promise::<i32>::from_future(async { Err::<i32, _>(String::from("bad")) });
        assert_eq!(p.wait().unwrap_err().downcast::<String>().as_deref(), Some("bad"));
    }

    #[test]
    fn test_from_future_awaits_promises() {
        let p = Promise::from_future(async {
            let a = Promise::resolve(2).delay(Duration::from_millis(10)).await?;
            let b = Promise::resolve(3).await?;
            Ok::<_, PromiseError>(a * b)
        });
        assert_eq!(p.wait().unwrap(), 6);
    }

    struct Never;

    impl Subscribe<i32> for Never {
        fn subscribe(self, _resolve: Resolve<i32>, _reject: Reject<i32>) {}
    }

    #[test]
    fn test_source_dropping_capabilities_rejects() {
        let p = Promise::from_source(Never);
        assert_eq!(p.wait().unwrap_err().downcast::<Error>(), Some(Error::ProducerDropped));
    }
}
