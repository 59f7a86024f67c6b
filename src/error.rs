//! The type-erased rejection reason carried by every rejected promise.
//!
//! A [`PromiseError`] can hold any `Any + Send + Sync + Debug` value. Rejection
//! handlers ask for the payload type they understand; when the payload is of a
//! different type the handler is skipped and the error keeps travelling down
//! the chain.
use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

trait Payload: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<E: Any + Send + Sync + fmt::Debug> Payload for E {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        any::type_name::<E>()
    }
}

/// Cheaply clonable, immutable box around a rejection payload.
///
/// # Examples
///
/// ```
/// use promise_chain::PromiseError;
///
/// let error = PromiseError::new(String::from("boom"));
/// assert!(error.is::<String>());
/// assert_eq!(error.downcast::<String>().as_deref(), Some("boom"));
/// assert_eq!(error.downcast::<i32>(), None);
/// ```
#[derive(Clone)]
pub struct PromiseError {
    payload: Arc<dyn Payload>,
}

impl PromiseError {
    /// Boxes `error`. Boxing a `PromiseError` returns it as is.
    pub fn new<E>(error: E) -> Self
    where
        E: Any + Send + Sync + fmt::Debug,
    {
        if let Some(boxed) = (&error as &dyn Any).downcast_ref::<PromiseError>() {
            return boxed.clone();
        }
        Self {
            payload: Arc::new(error),
        }
    }

    fn payload(&self) -> &dyn Payload {
        &*self.payload
    }

    /// Whether the payload is an `E`.
    pub fn is<E: Any>(&self) -> bool {
        self.payload().as_any().is::<E>()
    }

    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.payload().as_any().downcast_ref::<E>()
    }

    /// Owned copy of the payload if it is an `E`.
    ///
    /// Asking for `PromiseError` itself always succeeds and yields a clone of
    /// `self`, which is how catch-all handlers are expressed.
    pub fn downcast<E: Any + Clone>(&self) -> Option<E> {
        if let Some(me) = (self as &dyn Any).downcast_ref::<E>() {
            return Some(me.clone());
        }
        self.downcast_ref::<E>().cloned()
    }

    /// Name of the payload type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.payload().type_name()
    }

    /// Whether both errors share the same payload allocation.
    pub fn ptr_eq(&self, other: &PromiseError) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for PromiseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PromiseError").field(&self.payload).finish()
    }
}

impl fmt::Display for PromiseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.payload)
    }
}

impl std::error::Error for PromiseError {}

impl From<crate::Error> for PromiseError {
    fn from(error: crate::Error) -> Self {
        PromiseError::new(error)
    }
}

#[cfg(test)]
mod tests {
    use super::PromiseError;
    use crate::Error;

    #[derive(Debug, Clone, PartialEq)]
    struct Custom {
        code: u16,
    }

    #[test]
    fn test_downcast_matches_payload_type() {
        let error = PromiseError::new(Custom { code: 404 });
        assert!(error.is::<Custom>());
        assert!(!error.is::<String>());
        assert_eq!(error.downcast::<Custom>(), Some(Custom { code: 404 }));
        assert_eq!(error.downcast_ref::<Custom>().map(|c| c.code), Some(404));
        assert!(error.type_name().ends_with("Custom"));
    }

    #[test]
    fn test_rewrapping_keeps_the_same_box() {
        let error = PromiseError::new("foo");
        let again = PromiseError::new(error.clone());
        assert!(again.ptr_eq(&error));
        assert_eq!(again.downcast::<&str>(), Some("foo"));
    }

    #[test]
    fn test_catch_all_downcast() {
        let error = PromiseError::new(42_i32);
        let all = error.downcast::<PromiseError>().expect("catch-all always matches");
        assert!(all.ptr_eq(&error));
    }

    #[test]
    fn test_display_and_crate_errors() {
        let error: PromiseError = Error::Timeout.into();
        assert_eq!(error.downcast::<Error>(), Some(Error::Timeout));
        assert_eq!(PromiseError::new("foo").to_string(), "\"foo\"");
    }
}
