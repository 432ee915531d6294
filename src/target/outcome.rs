//! What an execution produced, and what a test expects it to produce.

use std::fmt;

use crate::matcher::{check_one, compare_exact, compare_matching, Matcher};
use crate::value::{render_list, Value};

/// How code under test finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// It returned these values.
    Returned(Vec<Value>),
    /// It panicked with this payload.
    Panicked(Value),
}

impl Outcome {
    /// Returns `true` for a normal return.
    #[must_use]
    pub fn is_return(&self) -> bool {
        matches!(self, Outcome::Returned(_))
    }

    /// Returns `true` for a panic.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, Outcome::Panicked(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Returned(values) => write!(f, "returned ({})", render_list(values)),
            Outcome::Panicked(payload) => write!(f, "panicked with {payload:?}"),
        }
    }
}

pub(crate) enum ExpectedOutcome {
    Return(Vec<Value>),
    ReturnMatching(Vec<Box<dyn Matcher>>),
    Panic(Value),
    PanicMatching(Box<dyn Matcher>),
}

impl ExpectedOutcome {
    /// Compare against the actual outcome; `Err` carries the reason.
    pub(crate) fn check(&self, actual: &Outcome) -> Result<(), String> {
        match (self, actual) {
            (ExpectedOutcome::Return(expected), Outcome::Returned(values)) => {
                compare_exact("return value", expected, values)
            }
            (ExpectedOutcome::ReturnMatching(matchers), Outcome::Returned(values)) => {
                compare_matching("return value", matchers, values)
            }
            (ExpectedOutcome::Panic(expected), Outcome::Panicked(payload)) => {
                let same_text = matches!(
                    (expected.as_str(), payload.as_str()),
                    (Some(a), Some(b)) if a == b
                );
                if expected == payload || same_text {
                    Ok(())
                } else {
                    Err(format!("panic value: expected {expected:?}, got {payload:?}"))
                }
            }
            (ExpectedOutcome::PanicMatching(matcher), Outcome::Panicked(payload)) => {
                check_one("panic value", &**matcher, payload)
            }
            (
                ExpectedOutcome::Return(_) | ExpectedOutcome::ReturnMatching(_),
                Outcome::Panicked(payload),
            ) => Err(format!("expected return but got panic: {payload:?}")),
            (
                ExpectedOutcome::Panic(_) | ExpectedOutcome::PanicMatching(_),
                Outcome::Returned(values),
            ) => Err(format!(
                "expected panic but got normal return: ({})",
                render_list(values)
            )),
        }
    }
}

impl fmt::Debug for ExpectedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedOutcome::Return(values) => write!(f, "Return({})", render_list(values)),
            ExpectedOutcome::ReturnMatching(matchers) => {
                write!(f, "ReturnMatching({})", crate::matcher::describe_all(matchers))
            }
            ExpectedOutcome::Panic(payload) => write!(f, "Panic({payload:?})"),
            ExpectedOutcome::PanicMatching(matcher) => {
                write!(f, "PanicMatching({})", matcher.describe())
            }
        }
    }
}
