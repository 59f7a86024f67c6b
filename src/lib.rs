//! Chainable promises.
//!
//! A [`Promise`] is a shared handle to a value that will be available later.
//! Handlers attached with [`Promise::then`], [`Promise::fail`] and friends
//! never run inline: they are handed to a [`Scheduler`] and run on the thread
//! that attached them, once the promise settles.
//!
//! ```
//! use promise_chain::{map, Promise};
//! use std::time::Duration;
//!
//! let doubled = map(vec![1_u64, 2, 3], |v, _| {
//!     Promise::resolve(v * 2).delay(Duration::from_millis(v))
//! });
//! assert_eq!(doubled.wait().unwrap(), vec![2, 4, 6]);
//! ```
//!
//! The thread that calls [`Promise::wait`] (or `.await`s a promise) drives
//! the callbacks registered from it; a host with its own event loop plugs it
//! in through [`Runtime::builder`].
mod cell;
pub mod combinators;
pub mod context;
mod error;
pub mod future;
mod hooks;
pub mod join;
mod promise;
pub mod resolution;
pub mod runtime;
pub mod scheduler;
pub mod timer;
mod timing;

pub use combinators::{all, each, filter, map, map_values, reduce};
pub use context::ContextId;
pub use error::PromiseError;
pub use future::{PromiseFuture, Subscribe};
pub use join::{join, Join};
pub use promise::{Producer, Promise, Reject, Resolve};
pub use resolution::{IntoResolution, Resolution};
pub use runtime::Runtime;
pub use scheduler::{EventLoop, ManualScheduler, Scheduler, Task};
pub use timer::{Timer, TimerThread};

/// Bound on every promise value. Values are cloned once per handler.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}

/// Rejection reasons produced by the library itself. They reach handlers
/// boxed in a [`PromiseError`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("producer dropped before settling the promise")]
    ProducerDropped,
    #[error("promise timed out")]
    Timeout,
    #[error("a promise cannot adopt itself")]
    Cycle,
    #[error("handler panicked: {0}")]
    Panicked(String),
}
