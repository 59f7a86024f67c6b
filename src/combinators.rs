//! Aggregate combinators over sequences of values and promises.
//!
//! Everything here is built from the public chaining surface; the combinators
//! reach into no promise internals beyond settling their own output.
//!
//! Outputs derived from input promises live in the runtime of the first
//! input. The free functions that start from plain values use the current
//! runtime; the `Promise<Vec<T>>` methods use the runtime of `self`.
use crate::promise::{Producer, Promise};
use crate::resolution::{IntoResolution, Resolution};
use crate::runtime::Runtime;
use crate::Value;
use std::sync::{Arc, Mutex, PoisonError};

struct Gather<T> {
    // `None` once the output has settled; later arrivals are ignored.
    remaining: Option<usize>,
    results: Vec<Option<T>>,
}

/// Fulfils with every value, in input order, once all `promises` fulfil.
/// Rejects with the first rejection to arrive. An empty input fulfils with an
/// empty vector.
///
/// # Examples
///
/// ```
/// use promise_chain::{all, Promise};
/// use std::time::Duration;
///
/// let slow = Promise::resolve(1).delay(Duration::from_millis(20));
/// let fast = Promise::resolve(2);
/// assert_eq!(all(vec![slow, fast]).wait().unwrap(), vec![1, 2]);
/// ```
pub fn all<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: Value,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<Promise<T>> = promises.into_iter().collect();
    let runtime = promises
        .first()
        .map_or_else(Runtime::current, |first| first.runtime().clone());
    gather(runtime, promises)
}

fn gather<T: Value>(runtime: Arc<Runtime>, promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
    let (producer, output) = Producer::in_runtime(runtime);
    if promises.is_empty() {
        producer.resolve(Vec::new());
        return output;
    }

    let gather = Arc::new(Mutex::new(Gather {
        remaining: Some(promises.len()),
        results: promises.iter().map(|_| None).collect(),
    }));
    for (index, promise) in promises.iter().enumerate() {
        let producer = producer.clone();
        let gather = gather.clone();
        promise.observe(move |outcome| {
            let mut guard = gather.lock().unwrap_or_else(PoisonError::into_inner);
            let gather = &mut *guard;
            let Some(remaining) = gather.remaining.as_mut() else {
                log::trace!("all: ignoring late settlement of #{}", index);
                return;
            };
            match outcome {
                Ok(value) => {
                    gather.results[index] = Some(value);
                    *remaining -= 1;
                    if *remaining == 0 {
                        gather.remaining = None;
                        let values = gather.results.drain(..).flatten().collect();
                        drop(guard);
                        producer.resolve(values);
                    }
                }
                Err(error) => {
                    gather.remaining = None;
                    gather.results.clear();
                    drop(guard);
                    producer.settle(Err(error));
                }
            }
        });
    }
    output
}

/// Calls `mapper` on every value right away and gathers the results like
/// [`all`]. The mapper may return a promise, a `Result` or a [`Resolution`];
/// a mapper that computes a plain value belongs in [`map_values`].
///
/// # Examples
///
/// ```
/// use promise_chain::{map, Promise};
///
/// let parsed = map(vec!["1", "2"], |s, _| s.parse::<i32>());
/// assert_eq!(parsed.wait().unwrap(), vec![1, 2]);
///
/// let doubled = map(vec![1, 2], |v, _| Promise::resolve(v * 2));
/// assert_eq!(doubled.wait().unwrap(), vec![2, 4]);
/// ```
pub fn map<V, F, R>(values: impl IntoIterator<Item = V>, mapper: F) -> Promise<Vec<R::Value>>
where
    F: FnMut(V, usize) -> R,
    R: IntoResolution,
{
    map_in(Runtime::current(), values, mapper)
}

fn map_in<V, F, R>(
    runtime: Arc<Runtime>,
    values: impl IntoIterator<Item = V>,
    mut mapper: F,
) -> Promise<Vec<R::Value>>
where
    F: FnMut(V, usize) -> R,
    R: IntoResolution,
{
    let promises: Vec<Promise<R::Value>> = values
        .into_iter()
        .enumerate()
        .map(|(index, value)| Promise::attempt_in(runtime.clone(), || mapper(value, index)))
        .collect();
    gather(runtime, promises)
}

/// [`map`] for a mapper that returns the new value itself. A panicking
/// mapper rejects the output.
///
/// # Examples
///
/// ```
/// use promise_chain::map_values;
///
/// let labels = map_values(vec![10, 20], |v, i| format!("{i}:{v}"));
/// assert_eq!(labels.wait().unwrap(), vec!["0:10", "1:20"]);
/// ```
pub fn map_values<V, U, F>(values: impl IntoIterator<Item = V>, mapper: F) -> Promise<Vec<U>>
where
    U: Value,
    F: FnMut(V, usize) -> U,
{
    Promise::attempt(|| Resolution::Fulfill(map_each(values, mapper)))
}

fn map_each<V, U>(values: impl IntoIterator<Item = V>, mut mapper: impl FnMut(V, usize) -> U) -> Vec<U> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| mapper(value, index))
        .collect()
}

/// Keeps the values whose predicate resolves to `true`, in input order.
pub fn filter<V, F, R>(values: impl IntoIterator<Item = V>, predicate: F) -> Promise<Vec<V>>
where
    V: Value,
    F: FnMut(&V, usize) -> R,
    R: IntoResolution<Value = bool>,
{
    filter_in(Runtime::current(), values, predicate)
}

fn filter_in<V, F, R>(
    runtime: Arc<Runtime>,
    values: impl IntoIterator<Item = V>,
    mut predicate: F,
) -> Promise<Vec<V>>
where
    V: Value,
    F: FnMut(&V, usize) -> R,
    R: IntoResolution<Value = bool>,
{
    let values: Vec<V> = values.into_iter().collect();
    let flags: Vec<Promise<bool>> = values
        .iter()
        .enumerate()
        .map(|(index, value)| Promise::attempt_in(runtime.clone(), || predicate(value, index)))
        .collect();
    gather(runtime, flags).then(move |flags| {
        values
            .into_iter()
            .zip(flags)
            .filter_map(|(value, keep)| keep.then_some(value))
            .collect()
    })
}

/// Runs `f` on every value and, once every side effect has completed,
/// fulfils with the values unchanged.
pub fn each<V, F, R>(values: impl IntoIterator<Item = V>, f: F) -> Promise<Vec<V>>
where
    V: Value,
    F: FnMut(&V, usize) -> R,
    R: IntoResolution,
{
    each_in(Runtime::current(), values, f)
}

fn each_in<V, F, R>(runtime: Arc<Runtime>, values: impl IntoIterator<Item = V>, mut f: F) -> Promise<Vec<V>>
where
    V: Value,
    F: FnMut(&V, usize) -> R,
    R: IntoResolution,
{
    let values: Vec<V> = values.into_iter().collect();
    let done: Vec<Promise<()>> = values
        .iter()
        .enumerate()
        .map(|(index, value)| Promise::attempt_in(runtime.clone(), || f(value, index)).discard())
        .collect();
    gather(runtime, done).then(move |_| values)
}

/// Sequential left fold. `reducer` is only called for a value once the
/// accumulator from the previous step has settled.
///
/// # Examples
///
/// ```
/// use promise_chain::{reduce, Promise};
///
/// let sum = reduce(vec![2, 4, 8], |acc, v, _| Promise::resolve(acc + v), 0);
/// assert_eq!(sum.wait().unwrap(), 14);
/// ```
pub fn reduce<V, A, F, R>(values: impl IntoIterator<Item = V>, reducer: F, initial: A) -> Promise<A>
where
    V: Value,
    A: Value,
    F: Fn(A, V, usize) -> R + Send + Sync + 'static,
    R: IntoResolution<Value = A>,
{
    reduce_in(Runtime::current(), values, reducer, initial)
}

fn reduce_in<V, A, F, R>(
    runtime: Arc<Runtime>,
    values: impl IntoIterator<Item = V>,
    reducer: F,
    initial: A,
) -> Promise<A>
where
    V: Value,
    A: Value,
    F: Fn(A, V, usize) -> R + Send + Sync + 'static,
    R: IntoResolution<Value = A>,
{
    let (seed, start) = Producer::in_runtime(runtime);
    seed.resolve(initial);
    let reducer = Arc::new(reducer);
    values.into_iter().enumerate().fold(start, |acc, (index, value)| {
        let reducer = reducer.clone();
        acc.and_then(move |acc| reducer(acc, value, index))
    })
}

/// The combinators again, applied to the vector a promise fulfils with.
impl<T: Value> Promise<Vec<T>> {
    pub fn map<F, R>(&self, mapper: F) -> Promise<Vec<R::Value>>
    where
        F: FnMut(T, usize) -> R + Send + 'static,
        R: IntoResolution,
    {
        let runtime = self.runtime().clone();
        self.and_then(move |values| map_in(runtime, values, mapper))
    }

    pub fn map_values<U, F>(&self, mapper: F) -> Promise<Vec<U>>
    where
        U: Value,
        F: FnMut(T, usize) -> U + Send + 'static,
    {
        self.then(move |values| map_each(values, mapper))
    }

    pub fn filter<F, R>(&self, predicate: F) -> Promise<Vec<T>>
    where
        F: FnMut(&T, usize) -> R + Send + 'static,
        R: IntoResolution<Value = bool>,
    {
        let runtime = self.runtime().clone();
        self.and_then(move |values| filter_in(runtime, values, predicate))
    }

    pub fn each<F, R>(&self, f: F) -> Promise<Vec<T>>
    where
        F: FnMut(&T, usize) -> R + Send + 'static,
        R: IntoResolution,
    {
        let runtime = self.runtime().clone();
        self.and_then(move |values| each_in(runtime, values, f))
    }

    pub fn reduce<A, F, R>(&self, reducer: F, initial: A) -> Promise<A>
    where
        A: Value,
        F: Fn(A, T, usize) -> R + Send + Sync + 'static,
        R: IntoResolution<Value = A>,
    {
        let runtime = self.runtime().clone();
        self.and_then(move |values| reduce_in(runtime, values, reducer, initial))
    }
}
