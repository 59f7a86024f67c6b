//! `delay` and `timeout`, built on the runtime's [`Timer`](crate::Timer).
use crate::error::PromiseError;
use crate::promise::{Producer, Promise};
use crate::{Error, Value};
use std::any::Any;
use std::fmt;
use std::time::Duration;

impl<T: Value> Promise<T> {
    /// Settles like this promise, `duration` after it settles. Rejections
    /// are delayed too.
    pub fn delay(&self, duration: Duration) -> Promise<T> {
        let runtime = self.runtime().clone();
        let (producer, delayed) = Producer::in_runtime(runtime.clone());
        self.observe(move |outcome| {
            runtime
                .timer()
                .schedule_after(duration, Box::new(move || producer.settle(outcome)));
        });
        delayed
    }

    /// Rejects with [`Error::Timeout`] unless this promise settles within
    /// `duration` of the call.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::{Error, Promise};
    /// use std::time::Duration;
    ///
    /// let slow = Promise::resolve(1).delay(Duration::from_millis(200));
    /// let error = slow.timeout(Duration::from_millis(10)).wait().unwrap_err();
    /// assert_eq!(error.downcast::<Error>(), Some(Error::Timeout));
    /// ```
    pub fn timeout(&self, duration: Duration) -> Promise<T> {
        self.timeout_with(duration, Error::Timeout)
    }

    /// Like [`Promise::timeout`], rejecting with `error` on expiry. A late
    /// settlement of this promise is ignored, and so is the timer firing
    /// after this promise won.
    pub fn timeout_with<E>(&self, duration: Duration, error: E) -> Promise<T>
    where
        E: Any + Send + Sync + fmt::Debug,
    {
        let runtime = self.runtime().clone();
        let (producer, raced) = Producer::in_runtime(runtime.clone());
        let expired = producer.clone();
        let error = PromiseError::new(error);
        runtime.timer().schedule_after(
            duration,
            Box::new(move || {
                if expired.is_pending() {
                    log::debug!("promise timed out after {:?}", duration);
                }
                expired.settle(Err(error));
            }),
        );
        self.observe(move |outcome| producer.settle(outcome));
        raced
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, Producer, Promise};
    use std::time::{Duration, Instant};

    #[test]
    fn test_delay_fulfilled() {
        let start = Instant::now();
        let p = Promise::resolve(42).delay(Duration::from_millis(50));
        assert!(p.is_pending());
        assert_eq!(p.wait().unwrap(), 42);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_delay_rejected() {
        let start = Instant::now();
        let p = Promise::<i32>::reject(String::from("foo")).delay(Duration::from_millis(50));
        assert_eq!(p.wait().unwrap_err().downcast::<String>().as_deref(), Some("foo"));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_delay_counts_from_settlement() {
        let (op, source) = Producer::<i32>::new();
        let delayed = source.delay(Duration::from_millis(30));
        std::thread::sleep(Duration::from_millis(40));
        assert!(delayed.is_pending());
        let settled_at = Instant::now();
        op.resolve(1);
        assert_eq!(delayed.wait().unwrap(), 1);
        assert!(settled_at.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_timeout_source_wins() {
        let p = Promise::resolve(42).timeout(Duration::from_millis(100));
        assert_eq!(p.wait().unwrap(), 42);
        // The timer firing later leaves the settled promise alone.
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(p.outcome().unwrap().unwrap(), 42);
    }

    #[test]
    fn test_timeout_expires() {
        let (op, source) = Producer::<i32>::new();
        let p = source.timeout(Duration::from_millis(20));
        assert_eq!(p.wait().unwrap_err().downcast::<Error>(), Some(Error::Timeout));
        op.resolve(1);
        assert!(p.is_rejected());
    }

    #[test]
    fn test_unbounded_timeout_never_expires() {
        let p = Promise::resolve(7).timeout(Duration::MAX);
        assert_eq!(p.wait().unwrap(), 7);
    }

    #[test]
    fn test_timeout_with_custom_error() {
        let (_op, source) = Producer::<i32>::new();
        let p = source.timeout_with(Duration::from_millis(10), String::from("too slow"));
        assert_eq!(p.wait().unwrap_err().downcast::<String>().as_deref(), Some("too slow"));
    }
}
