//! # testkit-rendezvous
//!
//! > Interactive call interception and outcome assertions for concurrent tests
//!
//! **testkit-rendezvous** lets a test stand in for the dependencies of the
//! code it exercises. The code under test runs concurrently; each call it
//! makes to an intercepted dependency blocks until the test has matched it
//! against an expectation and injected a response.
//!
//! ## Quick Start
//!
//! ```rust
//! use testkit_rendezvous::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let coordinator = Coordinator::new(RecordingReporter::new()).unwrap();
//! let add = coordinator.call_site("Add");
//!
//! // Code under test: calls Add(2, 3) and doubles the result.
//! let execution = coordinator
//!     .targets()
//!     .start(
//!         move |_: Vec<Value>| {
//!             let sum = add.invoke(values![2, 3])[0].cloned::<i32>().unwrap();
//!             values![sum * 2]
//!         },
//!         vec![],
//!     )
//!     .unwrap();
//!
//! let call = coordinator.method("Add").expect_exactly(values![2, 3]).await.unwrap();
//! call.inject_return(values![5]).unwrap();
//!
//! execution.expect_return(values![10]).await.unwrap();
//! # }
//! ```
//!
//! ## Features
//!
//! - **Ordered matching** - calls must arrive in sequence; a deviation fails at once
//! - **Eventual matching** - calls may arrive in any order and wait in a backlog
//! - **Asynchronous expectations** - register now, answer whenever
//! - **Outcome assertions** - race return against panic, assert before or after
//! - **Pluggable matchers** - one trait for any comparison strategy

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod expect;
pub mod matcher;
pub mod relay;
pub mod reporter;
pub mod sync;
pub mod target;
pub mod value;

/// Prelude for convenient imports
///
/// ```rust
/// use testkit_rendezvous::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{Config, MatchMode};
    pub use crate::error::{Error, Result};
    pub use crate::expect::{Coordinator, MatchedCall, Method, PendingExpectation};
    pub use crate::matcher::{any, exactly, satisfies, typed, Matcher};
    pub use crate::relay::CallSite;
    pub use crate::reporter::{PanicReporter, RecordingReporter, TestReporter};
    pub use crate::target::{Execution, Invoke, Outcome, PendingCompletion, TargetController};
    pub use crate::value::Value;
    pub use crate::{matchers, values};
}

// Re-exports
pub use config::{Config, MatchMode};
pub use error::{Error, Result};
pub use expect::{Coordinator, MatchedCall, Method, PendingExpectation};
pub use reporter::{PanicReporter, RecordingReporter, TestReporter};
pub use target::{Execution, Invoke, Outcome, PendingCompletion, TargetController};
pub use value::Value;

// Re-export the test macro when macros feature is enabled
#[cfg(feature = "macros")]
pub use testkit_rendezvous_macros::test;
