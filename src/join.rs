//! Joining a fixed number of promises of different types into one promise
//! of a tuple.
use crate::promise::{Producer, Promise};
use crate::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// Tuples of promises that can be awaited together.
///
/// # Examples
///
/// ```
/// use promise_chain::{Join, Promise};
///
/// let p = (Promise::resolve(42), Promise::resolve(String::from("foo")))
///     .join()
///     .spread(|n, s| format!("{s}{n}"));
/// assert_eq!(p.wait().unwrap(), "foo42");
/// ```
pub trait Join {
    type Output: Value;

    /// Fulfils once every member fulfils; rejects with the first rejection.
    fn join(self) -> Promise<Self::Output>;
}

/// Free-function spelling of [`Join::join`].
pub fn join<J: Join>(promises: J) -> Promise<J::Output> {
    promises.join()
}

struct Slots<S> {
    remaining: Option<usize>,
    values: S,
}

macro_rules! impl_join {
    ($($ty:ident $var:ident $index:tt),+) => {
        impl<$($ty),+> Slots<($(Option<$ty>,)+)> {
            /// Moves the values out once every slot is filled.
            fn take_complete(&mut self) -> Option<($($ty,)+)> {
                match std::mem::take(&mut self.values) {
                    ($(Some($var),)+) => Some(($($var,)+)),
                    _ => None,
                }
            }
        }

        impl<$($ty: Value),+> Join for ($(Promise<$ty>,)+) {
            type Output = ($($ty,)+);

            fn join(self) -> Promise<Self::Output> {
                let (producer, output) = Producer::in_runtime(self.0.runtime().clone());
                let slots = Arc::new(Mutex::new(Slots {
                    remaining: Some([$(stringify!($var)),+].len()),
                    values: ($(None::<$ty>,)+),
                }));
                $({
                    let producer = producer.clone();
                    let slots = slots.clone();
                    self.$index.observe(move |outcome| {
                        let mut guard = slots.lock().unwrap_or_else(PoisonError::into_inner);
                        let slots = &mut *guard;
                        let Some(remaining) = slots.remaining.as_mut() else {
                            return;
                        };
                        match outcome {
                            Ok(value) => {
                                slots.values.$index = Some(value);
                                *remaining -= 1;
                                if *remaining == 0 {
                                    slots.remaining = None;
                                    let values = slots.take_complete();
                                    drop(guard);
                                    if let Some(values) = values {
                                        producer.resolve(values);
                                    }
                                }
                            }
                            Err(error) => {
                                slots.remaining = None;
                                drop(guard);
                                producer.settle(Err(error));
                            }
                        }
                    });
                })+
                output
            }
        }

        impl<$($ty: Value),+> Promise<($($ty,)+)> {
            /// Calls `f` with the tuple members as separate arguments.
            pub fn spread<U, F>(&self, f: F) -> Promise<U>
            where
                U: Value,
                F: FnOnce($($ty),+) -> U + Send + 'static,
            {
                self.then(move |($($var,)+)| f($($var),+))
            }
        }
    };
}

impl_join!(T0 v0 0, T1 v1 1);
impl_join!(T0 v0 0, T1 v1 1, T2 v2 2);
impl_join!(T0 v0 0, T1 v1 1, T2 v2 2, T3 v3 3);
impl_join!(T0 v0 0, T1 v1 1, T2 v2 2, T3 v3 3, T4 v4 4);
impl_join!(T0 v0 0, T1 v1 1, T2 v2 2, T3 v3 3, T4 v4 4, T5 v5 5);
