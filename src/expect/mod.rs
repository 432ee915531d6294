//! The expectation layer: what test code uses to intercept calls.
//!
//! A [`Coordinator`] is created once per test and passed around explicitly.
//! It owns the [`Relay`], the reporter and the registry of asynchronous
//! expectations, and hands out one [`Method`] per intercepted dependency
//! method.
//!
//! # Example
//!
//! ```rust
//! use testkit_rendezvous::{values, Coordinator, RecordingReporter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let coordinator = Coordinator::new(RecordingReporter::new()).unwrap();
//! let get = coordinator.call_site("Get");
//!
//! // Register first, answer later; the call may arrive at any point.
//! let pending = coordinator.method("Get").expect_exactly_async(values!["k".to_string()]);
//! pending.inject_return(values![42_u32]).unwrap();
//!
//! assert_eq!(get.invoke_async(values!["k".to_string()]).await, values![42_u32]);
//! coordinator.wait().await;
//! # }
//! ```

mod method;
mod pending;

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;

use crate::config::Config;
use crate::error::Result;
use crate::relay::{CallSite, Relay, Validator};
use crate::reporter::TestReporter;
use crate::target::TargetController;

pub use method::{MatchedCall, Method};
pub use pending::PendingExpectation;

use pending::{PendingInner, PendingRegistry};

struct Inner {
    relay: Relay,
    config: Config,
    pending: Arc<PendingRegistry>,
    targets: TargetController,
}

/// Per-test owner of the relay, the reporter and all expectations.
///
/// Cloning is cheap and shares everything.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Create a coordinator with the default [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`](crate::Error::NoRuntime) outside a Tokio
    /// runtime.
    pub fn new(reporter: impl TestReporter + 'static) -> Result<Self> {
        Self::with_config(reporter, Config::default())
    }

    /// Create a coordinator with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`](crate::Error::NoRuntime) outside a Tokio
    /// runtime.
    pub fn with_config(reporter: impl TestReporter + 'static, config: Config) -> Result<Self> {
        let reporter: Arc<dyn TestReporter> = Arc::new(reporter);
        let relay = Relay::new(Arc::clone(&reporter))?;
        let pending = Arc::new(PendingRegistry::default());
        relay.set_claim(pending.clone());
        let targets = TargetController::new(reporter);
        tracing::debug!(mode = %config.mode, timeout = ?config.timeout, "coordinator created");
        Ok(Self {
            inner: Arc::new(Inner {
                relay,
                config,
                pending,
                targets,
            }),
        })
    }

    /// Expectations for calls to `name`, using the configured defaults.
    #[must_use]
    pub fn method(&self, name: impl Into<String>) -> Method {
        Method::new(self.clone(), name.into())
    }

    /// An interception point for `name`, for adapters and call-site code.
    #[must_use]
    pub fn call_site(&self, name: impl Into<String>) -> CallSite {
        CallSite::new(&self.inner.relay, name)
    }

    /// The controller for code under test started by this test.
    #[must_use]
    pub fn targets(&self) -> TargetController {
        self.inner.targets.clone()
    }

    /// The underlying relay.
    #[must_use]
    pub fn relay(&self) -> &Relay {
        &self.inner.relay
    }

    /// The configuration this coordinator was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The reporter failures are sent to.
    #[must_use]
    pub fn reporter(&self) -> &Arc<dyn TestReporter> {
        self.inner.relay.reporter()
    }

    /// Number of asynchronous expectations not yet complete.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.outstanding().len()
    }

    /// Wait until every asynchronous expectation registered so far has been
    /// matched and answered.
    ///
    /// Expectations registered while waiting are waited for too. There is no
    /// internal deadline.
    pub async fn wait(&self) {
        loop {
            let outstanding = self.inner.pending.outstanding();
            if outstanding.is_empty() {
                break;
            }
            tracing::debug!(count = outstanding.len(), "waiting for pending expectations");
            join_all(outstanding.iter().map(|p| p.done.wait())).await;
        }
    }

    pub(crate) fn register_pending(
        &self,
        method: &str,
        validator: Validator,
        returns: Option<usize>,
    ) -> PendingExpectation {
        let inner = Arc::new(PendingInner::new(method, validator, returns));
        self.inner.pending.register(&self.inner.relay, Arc::clone(&inner));
        PendingExpectation::new(inner, Arc::clone(self.reporter()))
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("relay", &self.inner.relay)
            .field("config", &self.inner.config)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}
