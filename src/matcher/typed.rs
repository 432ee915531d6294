// Allow must_use_candidate for matcher factory functions since returning the matcher
// without using it is the common pattern for test setup
#![allow(clippy::must_use_candidate)]

//! Typed matchers and their adapter into the untyped [`Matcher`] contract.
//!
//! A [`TypedMatcher<T>`] inspects a concrete `T`. Wrapping one with
//! [`typed`] produces a [`Matcher`] that first narrows the [`Value`] to `T`
//! and reports a type mismatch separately from a failed match.
//!
//! - Comparisons: [`eq`], [`ne`], [`gt`], [`gte`], [`lt`], [`lte`]
//! - Strings: [`contains_str`], [`starts_with`]
//! - Combinators: [`all_of`], [`any_of`], [`not`]
//!
//! # Example
//!
//! ```rust
//! use testkit_rendezvous::matcher::{gt, not, typed, eq, Matcher, TypedMatcher};
//! use testkit_rendezvous::Value;
//!
//! assert!(gt(10).matches(&20));
//!
//! let m = typed(not(eq(0_i32)));
//! assert_eq!(m.matches(&Value::new(1_i32)), Ok(true));
//! assert!(m.matches(&Value::new("one")).is_err());
//! ```

use std::any::{self, Any};
use std::fmt::Debug;
use std::marker::PhantomData;

use super::{MatchError, Matcher};
use crate::value::Value;

/// A matcher over a concrete type.
///
/// # Implementing Custom Matchers
///
/// ```rust
/// use testkit_rendezvous::matcher::TypedMatcher;
///
/// struct IsEven;
///
/// impl TypedMatcher<i32> for IsEven {
///     fn matches(&self, value: &i32) -> bool {
///         value % 2 == 0
///     }
///
///     fn describe(&self) -> String {
///         "is even".to_string()
///     }
///
///     fn describe_mismatch(&self, value: &i32) -> String {
///         format!("{} is not even", value)
///     }
/// }
///
/// assert!(IsEven.matches(&4));
/// assert!(!IsEven.matches(&3));
/// ```
pub trait TypedMatcher<T: ?Sized>: Send + Sync {
    /// Check if the value matches.
    fn matches(&self, value: &T) -> bool;

    /// Describe what this matcher expects.
    fn describe(&self) -> String;

    /// Describe why a value didn't match.
    fn describe_mismatch(&self, value: &T) -> String;
}

impl<T: ?Sized> TypedMatcher<T> for Box<dyn TypedMatcher<T>> {
    fn matches(&self, value: &T) -> bool {
        (**self).matches(value)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn describe_mismatch(&self, value: &T) -> String {
        (**self).describe_mismatch(value)
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Adapts a [`TypedMatcher<T>`] into a [`Matcher`].
pub struct Typed<T, M> {
    inner: M,
    _phantom: PhantomData<fn(&T)>,
}

/// Wrap a typed matcher so it can inspect [`Value`]s.
pub fn typed<T, M>(matcher: M) -> Typed<T, M>
where
    T: Any,
    M: TypedMatcher<T>,
{
    Typed {
        inner: matcher,
        _phantom: PhantomData,
    }
}

impl<T, M> Typed<T, M>
where
    T: Any,
{
    fn narrow<'v>(&self, actual: &'v Value) -> Result<&'v T, MatchError> {
        actual
            .downcast_ref::<T>()
            .ok_or_else(|| MatchError::TypeMismatch {
                expected: any::type_name::<T>(),
                actual: actual.type_name(),
            })
    }
}

impl<T, M> Matcher for Typed<T, M>
where
    T: Any,
    M: TypedMatcher<T>,
{
    fn matches(&self, actual: &Value) -> Result<bool, MatchError> {
        Ok(self.inner.matches(self.narrow(actual)?))
    }

    fn failure_message(&self, actual: &Value) -> String {
        match self.narrow(actual) {
            Ok(value) => self.inner.describe_mismatch(value),
            Err(err) => err.to_string(),
        }
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

// =============================================================================
// Built-in Matchers
// =============================================================================

/// Create an equality matcher.
pub fn eq<T: PartialEq + Debug + Send + Sync>(expected: T) -> EqMatcher<T> {
    EqMatcher { expected }
}

/// Matcher for equality.
pub struct EqMatcher<T> {
    expected: T,
}

impl<T: PartialEq + Debug + Send + Sync> TypedMatcher<T> for EqMatcher<T> {
    fn matches(&self, value: &T) -> bool {
        value == &self.expected
    }

    fn describe(&self) -> String {
        format!("equals {:?}", self.expected)
    }

    fn describe_mismatch(&self, value: &T) -> String {
        format!("{:?} does not equal {:?}", value, self.expected)
    }
}

/// Create an inequality matcher.
pub fn ne<T: PartialEq + Debug + Send + Sync>(unexpected: T) -> NeMatcher<T> {
    NeMatcher { unexpected }
}

/// Matcher for inequality.
pub struct NeMatcher<T> {
    unexpected: T,
}

impl<T: PartialEq + Debug + Send + Sync> TypedMatcher<T> for NeMatcher<T> {
    fn matches(&self, value: &T) -> bool {
        value != &self.unexpected
    }

    fn describe(&self) -> String {
        format!("differs from {:?}", self.unexpected)
    }

    fn describe_mismatch(&self, value: &T) -> String {
        format!("{value:?} equals {:?}", self.unexpected)
    }
}

/// Ordering relation checked by [`OrdMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `value > threshold`
    Greater,
    /// `value >= threshold`
    GreaterOrEqual,
    /// `value < threshold`
    Less,
    /// `value <= threshold`
    LessOrEqual,
}

impl Relation {
    fn phrase(self) -> &'static str {
        match self {
            Self::Greater => "greater than",
            Self::GreaterOrEqual => "greater than or equal to",
            Self::Less => "less than",
            Self::LessOrEqual => "less than or equal to",
        }
    }
}

/// Matcher for ordering comparisons against a threshold.
pub struct OrdMatcher<T> {
    threshold: T,
    relation: Relation,
}

/// Create a greater-than matcher.
pub fn gt<T: PartialOrd + Debug + Send + Sync>(threshold: T) -> OrdMatcher<T> {
    OrdMatcher {
        threshold,
        relation: Relation::Greater,
    }
}

/// Create a greater-than-or-equal matcher.
pub fn gte<T: PartialOrd + Debug + Send + Sync>(threshold: T) -> OrdMatcher<T> {
    OrdMatcher {
        threshold,
        relation: Relation::GreaterOrEqual,
    }
}

/// Create a less-than matcher.
pub fn lt<T: PartialOrd + Debug + Send + Sync>(threshold: T) -> OrdMatcher<T> {
    OrdMatcher {
        threshold,
        relation: Relation::Less,
    }
}

/// Create a less-than-or-equal matcher.
pub fn lte<T: PartialOrd + Debug + Send + Sync>(threshold: T) -> OrdMatcher<T> {
    OrdMatcher {
        threshold,
        relation: Relation::LessOrEqual,
    }
}

impl<T: PartialOrd + Debug + Send + Sync> TypedMatcher<T> for OrdMatcher<T> {
    fn matches(&self, value: &T) -> bool {
        match self.relation {
            Relation::Greater => value > &self.threshold,
            Relation::GreaterOrEqual => value >= &self.threshold,
            Relation::Less => value < &self.threshold,
            Relation::LessOrEqual => value <= &self.threshold,
        }
    }

    fn describe(&self) -> String {
        format!("is {} {:?}", self.relation.phrase(), self.threshold)
    }

    fn describe_mismatch(&self, value: &T) -> String {
        format!(
            "{:?} is not {} {:?}",
            value,
            self.relation.phrase(),
            self.threshold
        )
    }
}

/// Create a substring contains matcher for strings.
pub fn contains_str(substring: &str) -> ContainsStrMatcher {
    ContainsStrMatcher {
        substring: substring.to_string(),
    }
}

/// Matcher for string contains.
pub struct ContainsStrMatcher {
    substring: String,
}

impl TypedMatcher<String> for ContainsStrMatcher {
    fn matches(&self, value: &String) -> bool {
        value.contains(&self.substring)
    }

    fn describe(&self) -> String {
        format!("contains {:?}", self.substring)
    }

    fn describe_mismatch(&self, value: &String) -> String {
        format!("{:?} does not contain {:?}", value, self.substring)
    }
}

/// Create a starts-with matcher for strings.
pub fn starts_with(prefix: &str) -> StartsWithMatcher {
    StartsWithMatcher {
        prefix: prefix.to_string(),
    }
}

/// Matcher for string starts-with.
pub struct StartsWithMatcher {
    prefix: String,
}

impl TypedMatcher<String> for StartsWithMatcher {
    fn matches(&self, value: &String) -> bool {
        value.starts_with(&self.prefix)
    }

    fn describe(&self) -> String {
        format!("starts with {:?}", self.prefix)
    }

    fn describe_mismatch(&self, value: &String) -> String {
        format!("{:?} does not start with {:?}", value, self.prefix)
    }
}

// =============================================================================
// Combinators
// =============================================================================

/// Create a matcher that matches when all boxed matchers match.
pub fn all_of<T: Debug>(matchers: Vec<Box<dyn TypedMatcher<T>>>) -> AllOfMatcher<T> {
    AllOfMatcher { matchers }
}

/// Matcher that requires all inner matchers to match.
pub struct AllOfMatcher<T: ?Sized> {
    matchers: Vec<Box<dyn TypedMatcher<T>>>,
}

impl<T: Debug> TypedMatcher<T> for AllOfMatcher<T> {
    fn matches(&self, value: &T) -> bool {
        self.matchers.iter().all(|m| m.matches(value))
    }

    fn describe(&self) -> String {
        let descriptions: Vec<_> = self.matchers.iter().map(|m| m.describe()).collect();
        format!("all of [{}]", descriptions.join(", "))
    }

    fn describe_mismatch(&self, value: &T) -> String {
        let failures: Vec<_> = self
            .matchers
            .iter()
            .filter(|m| !m.matches(value))
            .map(|m| m.describe_mismatch(value))
            .collect();
        format!("failed: {}", failures.join("; "))
    }
}

/// Create a matcher that matches when any boxed matcher matches.
pub fn any_of<T: Debug>(matchers: Vec<Box<dyn TypedMatcher<T>>>) -> AnyOfMatcher<T> {
    AnyOfMatcher { matchers }
}

/// Matcher that requires at least one inner matcher to match.
pub struct AnyOfMatcher<T: ?Sized> {
    matchers: Vec<Box<dyn TypedMatcher<T>>>,
}

impl<T: Debug> TypedMatcher<T> for AnyOfMatcher<T> {
    fn matches(&self, value: &T) -> bool {
        self.matchers.iter().any(|m| m.matches(value))
    }

    fn describe(&self) -> String {
        let descriptions: Vec<_> = self.matchers.iter().map(|m| m.describe()).collect();
        format!("any of [{}]", descriptions.join(", "))
    }

    fn describe_mismatch(&self, value: &T) -> String {
        let descriptions: Vec<_> = self.matchers.iter().map(|m| m.describe()).collect();
        format!("{:?} matched none of [{}]", value, descriptions.join(", "))
    }
}

/// Create a negating matcher.
pub fn not<T, M: TypedMatcher<T> + 'static>(matcher: M) -> NotMatcher<T> {
    NotMatcher {
        inner: Box::new(matcher),
    }
}

/// Matcher that negates another matcher.
pub struct NotMatcher<T: ?Sized> {
    inner: Box<dyn TypedMatcher<T>>,
}

impl<T: Debug> TypedMatcher<T> for NotMatcher<T> {
    fn matches(&self, value: &T) -> bool {
        !self.inner.matches(value)
    }

    fn describe(&self) -> String {
        format!("not {}", self.inner.describe())
    }

    fn describe_mismatch(&self, value: &T) -> String {
        format!("{:?} unexpectedly matched: {}", value, self.inner.describe())
    }
}
