//! How the return value of a handler settles the promise downstream of it.
//!
//! The shape of a handler's return value is known at the call site, so each
//! chaining method converts it into one [`Resolution`] and the producer of
//! the downstream promise acts on that variant:
//!
//! | handler returns | downstream promise                   |
//! | --------------- | ------------------------------------ |
//! | `U`             | fulfils with the value (`then`)      |
//! | `()`            | fulfils with no value                |
//! | `Promise<U>`    | adopts the inner promise's outcome   |
//! | `Result<U, E>`  | fulfils, or rejects with `E`         |
//! | a panic         | rejects with [`Error::Panicked`]     |
use crate::error::PromiseError;
use crate::promise::{Producer, Promise};
use crate::runtime::Runtime;
use crate::{Error, Value};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

pub enum Resolution<T> {
    Fulfill(T),
    Adopt(Promise<T>),
    Reject(PromiseError),
}

impl<T: Value> Resolution<T> {
    pub fn reject<E>(error: E) -> Self
    where
        E: Any + Send + Sync + fmt::Debug,
    {
        Resolution::Reject(PromiseError::new(error))
    }
}

impl<T> fmt::Debug for Resolution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Fulfill(_) => f.write_str("Fulfill(..)"),
            Resolution::Adopt(_) => f.write_str("Adopt(..)"),
            Resolution::Reject(error) => f.debug_tuple("Reject").field(error).finish(),
        }
    }
}

/// Return types a handler may produce when its downstream promise is
/// derived through the dispatch table above.
pub trait IntoResolution {
    /// Value type of the downstream promise.
    type Value: Value;

    fn into_resolution(self) -> Resolution<Self::Value>;
}

impl<T: Value> IntoResolution for Resolution<T> {
    type Value = T;

    fn into_resolution(self) -> Resolution<T> {
        self
    }
}

impl<T: Value> IntoResolution for Promise<T> {
    type Value = T;

    fn into_resolution(self) -> Resolution<T> {
        Resolution::Adopt(self)
    }
}

impl<T, E> IntoResolution for Result<T, E>
where
    T: Value,
    E: Any + Send + Sync + fmt::Debug,
{
    type Value = T;

    fn into_resolution(self) -> Resolution<T> {
        match self {
            Ok(value) => Resolution::Fulfill(value),
            Err(error) => Resolution::Reject(PromiseError::new(error)),
        }
    }
}

impl IntoResolution for () {
    type Value = ();

    fn into_resolution(self) -> Resolution<()> {
        Resolution::Fulfill(())
    }
}

impl<T: Value> Producer<T> {
    /// Settles the promise from a handler result, adopting nested promises.
    pub fn resolve_with<R>(self, result: R)
    where
        R: IntoResolution<Value = T>,
    {
        match result.into_resolution() {
            Resolution::Fulfill(value) => self.settle(Ok(value)),
            Resolution::Reject(error) => self.settle(Err(error)),
            Resolution::Adopt(inner) => {
                if inner == self.promise() {
                    log::debug!("promise asked to adopt itself");
                    self.settle(Err(Error::Cycle.into()));
                    return;
                }
                inner.observe(move |outcome| self.settle(outcome));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}

/// Runs `f`, turning a panic into a rejection reason when the runtime asks
/// for it.
pub(crate) fn catch_panic<R>(runtime: &Runtime, f: impl FnOnce() -> R) -> Result<R, PromiseError> {
    if !runtime.catch_panics() {
        return Ok(f());
    }
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(&*payload);
        log::debug!("handler panicked: {}", message);
        Error::Panicked(message).into()
    })
}

/// Runs a handler and dispatches on whatever it produced.
pub(crate) fn guarded<R>(runtime: &Runtime, f: impl FnOnce() -> R) -> Resolution<R::Value>
where
    R: IntoResolution,
{
    match catch_panic(runtime, f) {
        Ok(result) => result.into_resolution(),
        Err(error) => Resolution::Reject(error),
    }
}
