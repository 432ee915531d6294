//! Opaque argument and return values.
//!
//! The engine never knows the signature of the functions it intercepts.
//! Arguments and return values travel as [`Value`]s: shared, type-erased
//! handles that still support structural equality, debugging output and
//! checked narrowing back to the concrete type.
//!
//! # Example
//!
//! ```rust
//! use testkit_rendezvous::Value;
//!
//! let v = Value::new(42_i32);
//! assert_eq!(v, Value::new(42_i32));
//! assert_ne!(v, Value::new(42_i64));
//! assert_eq!(v.downcast_ref::<i32>(), Some(&42));
//! ```

use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Object-safe view of a comparable, debuggable value.
///
/// Implemented for every `T: PartialEq + Debug + Send + Sync + 'static`.
pub trait DynValue: Any + fmt::Debug + Send + Sync {
    /// Borrow as [`Any`] for narrowing.
    fn as_any(&self) -> &dyn Any;

    /// Convert a shared handle into a shared [`Any`] handle.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Structural equality across the type erasure.
    ///
    /// Values of different concrete types are never equal.
    fn dyn_eq(&self, other: &dyn DynValue) -> bool;

    /// Name of the concrete type.
    fn type_name(&self) -> &'static str;
}

impl<T> DynValue for T
where
    T: PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn dyn_eq(&self, other: &dyn DynValue) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|o| self == o)
    }

    fn type_name(&self) -> &'static str {
        any::type_name::<T>()
    }
}

/// Marker recorded when a panic payload is neither a [`Value`] nor a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpaquePayload;

/// A type-erased argument, return value or panic payload.
///
/// Cloning is cheap; clones share the underlying value.
#[derive(Clone)]
pub struct Value(Arc<dyn DynValue>);

impl Value {
    /// Wrap a concrete value.
    pub fn new<T>(value: T) -> Self
    where
        T: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(value))
    }

    /// The unit value, for functions without a meaningful result.
    #[must_use]
    pub fn unit() -> Self {
        Self::new(())
    }

    /// Convert a caught panic payload into a value.
    ///
    /// A payload raised with `std::panic::panic_any(value)` is unwrapped to
    /// the original [`Value`]. String payloads (from `panic!("...")`, or a
    /// wrapped `&str`) become `String` values. Anything else becomes
    /// [`OpaquePayload`].
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<Value>() {
            Ok(value) => {
                return match value.downcast_ref::<&'static str>() {
                    Some(message) => Self::new((*message).to_string()),
                    None => *value,
                }
            }
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<String>() {
            Ok(message) => return Self::new(*message),
            Err(payload) => payload,
        };
        match payload.downcast::<&'static str>() {
            Ok(message) => Self::new((*message).to_string()),
            Err(_) => Self::new(OpaquePayload),
        }
    }

    /// The text of a `String` or `&'static str` value.
    pub(crate) fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| self.downcast_ref::<&'static str>().copied())
    }

    /// Returns `true` if the value holds a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        (*self.0).as_any().is::<T>()
    }

    /// Borrow the value as a `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).as_any().downcast_ref::<T>()
    }

    /// Clone the value out as a `T`, if it is one.
    #[must_use]
    pub fn cloned<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Move the value out as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the value is not a `T`, and
    /// [`Error::SharedValue`] if other clones of this value are still alive.
    pub fn downcast<T>(self) -> Result<T>
    where
        T: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        let actual = self.type_name();
        if !self.is::<T>() {
            return Err(Error::TypeMismatch {
                expected: any::type_name::<T>(),
                actual,
            });
        }
        let typed = self
            .0
            .into_any()
            .downcast::<T>()
            .map_err(|_| Error::TypeMismatch {
                expected: any::type_name::<T>(),
                actual,
            })?;
        Arc::try_unwrap(typed).map_err(|_| Error::SharedValue(actual))
    }

    /// Name of the concrete type held.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        (*self.0).type_name()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        (*self.0).dyn_eq(&*other.0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// Render values as a comma-separated argument list.
pub(crate) fn render_list(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| format!("{v:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build a `Vec<Value>` from expressions.
///
/// ```rust
/// use testkit_rendezvous::{values, Value};
///
/// let args = values![1_i32, "a".to_string()];
/// assert_eq!(args, vec![Value::new(1_i32), Value::new("a".to_string())]);
/// ```
#[macro_export]
macro_rules! values {
    ($($value:expr),* $(,)?) => {
        ::std::vec![$($crate::Value::new($value)),*]
    };
}
