//! Per-test configuration.
//!
//! # Example
//!
//! ```rust
//! use testkit_rendezvous::{Config, MatchMode};
//! use std::time::Duration;
//!
//! let config = Config::new()
//!     .timeout(Duration::from_millis(250))
//!     .eventually();
//!
//! assert_eq!(config.timeout, Some(Duration::from_millis(250)));
//! assert_eq!(config.mode, MatchMode::Eventual);
//! ```

use std::fmt;
use std::time::Duration;

/// Matching discipline for blocking expectations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MatchMode {
    /// Calls must arrive in exactly the expected sequence; any deviation
    /// fails immediately.
    #[default]
    Ordered,
    /// Calls may arrive in any order; unmatched calls wait in the backlog.
    Eventual,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Ordered => write!(f, "ordered"),
            MatchMode::Eventual => write!(f, "eventual"),
        }
    }
}

/// Configuration for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Deadline for ordered expectations. `None` waits until matched.
    ///
    /// Eventual expectations never time out.
    pub timeout: Option<Duration>,
    /// Default matching discipline for new [`Method`](crate::Method)s.
    pub mode: MatchMode,
}

impl Config {
    /// Create a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline for ordered expectations.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use eventual matching by default.
    #[must_use]
    pub fn eventually(self) -> Self {
        self.mode(MatchMode::Eventual)
    }

    /// Set the default matching discipline.
    #[must_use]
    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }
}
