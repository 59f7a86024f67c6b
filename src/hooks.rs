//! Side-effect hooks that keep the original settlement.
use crate::error::PromiseError;
use crate::promise::Promise;
use crate::resolution::{IntoResolution, Resolution};
use crate::Value;
use std::any::Any;

/// Waits for a side effect, then restores `original`. A failing side effect
/// replaces it.
fn after<S: Value, T: Value>(side: Resolution<S>, original: Result<T, PromiseError>) -> Resolution<T> {
    match side {
        Resolution::Fulfill(_) => original.into_resolution(),
        Resolution::Reject(error) => Resolution::Reject(error),
        Resolution::Adopt(pending) => Resolution::Adopt(pending.chain(move |outcome| match outcome {
            Ok(_) => original.into_resolution(),
            Err(error) => Resolution::Reject(error),
        })),
    }
}

impl<T: Value> Promise<T> {
    /// Runs `handler` whichever way the promise settles, then settles like
    /// the original. If `handler` fails, or returns a promise that rejects,
    /// that error wins.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::Promise;
    ///
    /// let p = Promise::<i32>::reject(String::from("foo")).finally(|| ());
    /// assert_eq!(p.wait().unwrap_err().downcast::<String>().as_deref(), Some("foo"));
    /// ```
    pub fn finally<F, R>(&self, handler: F) -> Promise<T>
    where
        F: FnOnce() -> R + Send + 'static,
        R: IntoResolution,
    {
        self.chain(move |outcome| after(handler().into_resolution(), outcome))
    }

    /// Runs `handler` with the fulfilled value and passes the value on once
    /// its side effect completes. Rejections skip the handler.
    pub fn tap<F, R>(&self, handler: F) -> Promise<T>
    where
        F: FnOnce(&T) -> R + Send + 'static,
        R: IntoResolution,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => after(handler(&value).into_resolution(), Ok(value)),
            Err(error) => Resolution::Reject(error),
        })
    }

    /// Runs `handler` for rejections carrying an `E` payload, then rejects
    /// with the same error.
    pub fn tap_fail<E, F, R>(&self, handler: F) -> Promise<T>
    where
        E: Any + Clone,
        F: FnOnce(E) -> R + Send + 'static,
        R: IntoResolution,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => Resolution::Fulfill(value),
            Err(error) => match error.downcast::<E>() {
                Some(reason) => after(handler(reason).into_resolution(), Err(error)),
                None => Resolution::Reject(error),
            },
        })
    }
}
