//! Error definitions
//!
//! This module provides the error type shared by the relay, the expectation
//! layer and the completion layer.

use std::time::Duration;

use thiserror::Error;

/// Main error type for testkit-rendezvous
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No matching call arrived before the deadline.
    #[error("timeout waiting for call {expected} after {timeout:?}")]
    Timeout {
        /// Description of the expected call.
        expected: String,
        /// How long the waiter waited.
        timeout: Duration,
    },

    /// An ordered expectation saw a different call than the one it expected.
    #[error("unexpected call: expected {expected}, got {actual}: {reason}")]
    OrderedMismatch {
        /// Description of the expected call.
        expected: String,
        /// The call that actually arrived.
        actual: String,
        /// Why the validator rejected it.
        reason: String,
    },

    /// The wrong number of return values was injected.
    #[error("wrong number of return values for {method}: expected {expected}, got {actual}")]
    ReturnCount {
        /// Method the values were injected into.
        method: String,
        /// Declared number of return values.
        expected: usize,
        /// Number of values actually injected.
        actual: usize,
    },

    /// A response was injected twice into the same expectation.
    #[error("response already injected for {0}")]
    AlreadyInjected(String),

    /// An execution outcome did not satisfy its assertion.
    #[error("outcome mismatch: {0}")]
    OutcomeMismatch(String),

    /// The call-site stopped waiting before its response was written.
    #[error("call-site for {0} is gone; response dropped")]
    CallSiteGone(String),

    /// The response sink was dropped without a response being written.
    #[error("call to {0} was abandoned without a response")]
    Abandoned(String),

    /// The relay's dispatch worker has stopped.
    #[error("call relay is closed")]
    RelayClosed,

    /// An operation that spawns tasks was used outside a Tokio runtime.
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(String),

    /// A value did not have the requested concrete type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Requested type.
        expected: &'static str,
        /// Type actually held.
        actual: &'static str,
    },

    /// A value could not be moved out because other handles still share it.
    #[error("value of type {0} is still shared")]
    SharedValue(&'static str),
}

impl Error {
    /// Create an outcome mismatch error.
    #[must_use]
    pub fn outcome_mismatch(message: impl Into<String>) -> Self {
        Self::OutcomeMismatch(message.into())
    }

    /// Create an already-injected error.
    #[must_use]
    pub fn already_injected(method: impl Into<String>) -> Self {
        Self::AlreadyInjected(method.into())
    }

    /// Returns `true` for failures of the code under test, as opposed to
    /// misuse of the engine itself.
    #[must_use]
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::OrderedMismatch { .. }
                | Self::ReturnCount { .. }
                | Self::AlreadyInjected(_)
                | Self::OutcomeMismatch(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
