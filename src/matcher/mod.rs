//! Pluggable value comparison for arguments, return values and panics.
//!
//! The [`Matcher`] trait is the single extension point. Built-in matchers:
//!
//! - [`exactly`] - structural equality with an expected [`Value`]
//! - [`any`] - wildcard, matches everything
//! - [`satisfies`] - typed predicate, with a checked type narrowing first
//! - [`typed`] - adapts any [`TypedMatcher`] (see [`typed`](mod@typed))
//!
//! Any third-party assertion library can plug in with a thin wrapper that
//! implements [`Matcher`].
//!
//! # Example
//!
//! ```rust
//! use testkit_rendezvous::matcher::{any, exactly, satisfies, Matcher};
//! use testkit_rendezvous::Value;
//!
//! let v = Value::new(4_i32);
//! assert_eq!(exactly(4_i32).matches(&v), Ok(true));
//! assert_eq!(any().matches(&v), Ok(true));
//! assert_eq!(satisfies("is even", |x: &i32| x % 2 == 0).matches(&v), Ok(true));
//! assert!(satisfies("is empty", |s: &String| s.is_empty()).matches(&v).is_err());
//! ```

pub mod typed;

use std::any::{self, Any};
use std::fmt;
use std::marker::PhantomData;

use thiserror::Error;

use crate::value::Value;

pub use typed::{
    all_of, any_of, contains_str, eq, gt, gte, lt, lte, ne, not, starts_with, typed, Typed,
    TypedMatcher,
};

/// Why a matcher could not evaluate a value.
///
/// Distinct from a clean non-match, which is `Ok(false)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// The value is not of the type the matcher inspects.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Type the matcher inspects.
        expected: &'static str,
        /// Type of the actual value.
        actual: &'static str,
    },

    /// Matcher-specific evaluation failure.
    #[error("{0}")]
    Failed(String),
}

/// A value-comparison strategy.
pub trait Matcher: Send + Sync {
    /// Check the actual value.
    ///
    /// # Errors
    ///
    /// Returns a [`MatchError`] when the value cannot be evaluated at all,
    /// for example because it has the wrong type.
    fn matches(&self, actual: &Value) -> Result<bool, MatchError>;

    /// Explain why `actual` did not match.
    fn failure_message(&self, actual: &Value) -> String;

    /// Describe what this matcher expects.
    fn describe(&self) -> String {
        "<matcher>".to_string()
    }
}

impl Matcher for Box<dyn Matcher> {
    fn matches(&self, actual: &Value) -> Result<bool, MatchError> {
        (**self).matches(actual)
    }

    fn failure_message(&self, actual: &Value) -> String {
        (**self).failure_message(actual)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Matcher for structural equality with an expected value.
#[derive(Debug, Clone, PartialEq)]
pub struct Exact(Value);

/// Create an equality matcher.
pub fn exactly<T>(expected: T) -> Exact
where
    T: PartialEq + fmt::Debug + Send + Sync + 'static,
{
    Exact(Value::new(expected))
}

impl From<Value> for Exact {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl Matcher for Exact {
    fn matches(&self, actual: &Value) -> Result<bool, MatchError> {
        Ok(actual == &self.0)
    }

    fn failure_message(&self, actual: &Value) -> String {
        format!("expected {:?}, got {actual:?}", self.0)
    }

    fn describe(&self) -> String {
        format!("{:?}", self.0)
    }
}

/// Matcher that accepts any value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Wildcard;

/// Create a wildcard matcher.
#[must_use]
pub fn any() -> Wildcard {
    Wildcard
}

impl Matcher for Wildcard {
    fn matches(&self, _actual: &Value) -> Result<bool, MatchError> {
        Ok(true)
    }

    fn failure_message(&self, _actual: &Value) -> String {
        String::new()
    }

    fn describe(&self) -> String {
        "_".to_string()
    }
}

/// Matcher that narrows to `T` and applies a predicate.
pub struct Predicate<T, F> {
    predicate: F,
    description: String,
    _phantom: PhantomData<fn(&T)>,
}

/// Create a predicate matcher.
pub fn satisfies<T, F>(description: &str, predicate: F) -> Predicate<T, F>
where
    T: Any,
    F: Fn(&T) -> bool + Send + Sync,
{
    Predicate {
        predicate,
        description: description.to_string(),
        _phantom: PhantomData,
    }
}

impl<T, F> Matcher for Predicate<T, F>
where
    T: Any,
    F: Fn(&T) -> bool + Send + Sync,
{
    fn matches(&self, actual: &Value) -> Result<bool, MatchError> {
        let value = actual
            .downcast_ref::<T>()
            .ok_or_else(|| MatchError::TypeMismatch {
                expected: any::type_name::<T>(),
                actual: actual.type_name(),
            })?;
        Ok((self.predicate)(value))
    }

    fn failure_message(&self, actual: &Value) -> String {
        format!("{actual:?} does not satisfy: {}", self.description)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl<T, F> fmt::Debug for Predicate<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("description", &self.description)
            .field("type", &any::type_name::<T>())
            .finish()
    }
}

/// Build a `Vec<Box<dyn Matcher>>` from matcher expressions.
///
/// ```rust
/// use testkit_rendezvous::matcher::{any, exactly};
/// use testkit_rendezvous::matchers;
///
/// let m = matchers![exactly(2_i32), any()];
/// assert_eq!(m.len(), 2);
/// ```
#[macro_export]
macro_rules! matchers {
    ($($matcher:expr),* $(,)?) => {
        ::std::vec![$(::std::boxed::Box::new($matcher) as ::std::boxed::Box<dyn $crate::matcher::Matcher>),*]
    };
}

/// Describe a matcher list the way an argument list is rendered.
pub(crate) fn describe_all(matchers: &[Box<dyn Matcher>]) -> String {
    matchers
        .iter()
        .map(|m| m.describe())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compare values slot by slot with structural equality.
///
/// `label` names a slot in messages, e.g. `"argument"`.
pub(crate) fn compare_exact(
    label: &str,
    expected: &[Value],
    actual: &[Value],
) -> Result<(), String> {
    check_count(label, expected.len(), actual.len())?;
    for (i, (want, got)) in expected.iter().zip(actual).enumerate() {
        if want != got {
            return Err(format!("{label} {i}: expected {want:?}, got {got:?}"));
        }
    }
    Ok(())
}

/// Compare values slot by slot with one matcher per slot.
pub(crate) fn compare_matching(
    label: &str,
    matchers: &[Box<dyn Matcher>],
    actual: &[Value],
) -> Result<(), String> {
    check_count(label, matchers.len(), actual.len())?;
    for (i, (matcher, got)) in matchers.iter().zip(actual).enumerate() {
        check_one(&format!("{label} {i}"), &**matcher, got)?;
    }
    Ok(())
}

/// Apply a single matcher, rendering failures under `slot`.
pub(crate) fn check_one(slot: &str, matcher: &dyn Matcher, actual: &Value) -> Result<(), String> {
    match matcher.matches(actual) {
        Ok(true) => Ok(()),
        Ok(false) => Err(format!("{slot}: {}", matcher.failure_message(actual))),
        Err(err) => Err(format!("{slot}: {err}")),
    }
}

fn check_count(label: &str, expected: usize, actual: usize) -> Result<(), String> {
    if expected == actual {
        Ok(())
    } else {
        Err(format!("expected {expected} {label}s, got {actual}"))
    }
}
