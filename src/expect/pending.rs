//! Asynchronous expectations.
//!
//! Two events complete a pending expectation: a matching call arrives, and
//! the test injects a response. They may happen in either order. Whichever
//! comes second writes the response and opens the latch, under the
//! expectation's own lock, so it happens exactly once.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::expect::method::check_return_count;
use crate::relay::{Call, CallClaim, Relay, Response, Validator};
use crate::reporter::{report, TestReporter};
use crate::sync::Latch;
use crate::value::Value;

#[derive(Default)]
struct PendingState {
    call: Option<Call>,
    args: Option<Vec<Value>>,
    response: Option<Response>,
    injected: bool,
}

pub(crate) struct PendingInner {
    method: String,
    validator: Validator,
    returns: Option<usize>,
    state: Mutex<PendingState>,
    pub(crate) done: Latch,
}

impl PendingInner {
    pub(crate) fn new(method: &str, validator: Validator, returns: Option<usize>) -> Self {
        Self {
            method: method.to_string(),
            validator,
            returns,
            state: Mutex::new(PendingState::default()),
            done: Latch::new(),
        }
    }

    fn on_match(&self, call: Call) {
        let mut state = self.state.lock();
        tracing::debug!(
            call = %call.id(),
            expected = %self.validator.description(),
            "pending expectation matched"
        );
        state.args = Some(call.args().to_vec());
        match state.response.take() {
            Some(response) => self.complete(call, response),
            None => state.call = Some(call),
        }
    }

    fn inject(&self, response: Response) -> Result<()> {
        let mut state = self.state.lock();
        if state.injected {
            return Err(Error::already_injected(self.validator.description()));
        }
        state.injected = true;
        match state.call.take() {
            Some(call) => self.complete(call, response),
            None => state.response = Some(response),
        }
        Ok(())
    }

    fn complete(&self, call: Call, response: Response) {
        if let Err(err) = call.respond(response) {
            tracing::warn!(error = %err, "response for pending expectation dropped");
        }
        self.done.open();
    }

    fn is_matched(&self) -> bool {
        self.state.lock().args.is_some()
    }
}

/// Unmatched pending expectations, consulted before any waiter.
#[derive(Default)]
pub(crate) struct PendingRegistry {
    unmatched: Mutex<Vec<Arc<PendingInner>>>,
    all: Mutex<Vec<Arc<PendingInner>>>,
}

impl PendingRegistry {
    /// Match against the backlog, or start listening for new calls.
    ///
    /// Both happen under the relay lock, so a call is either already queued
    /// or will be offered to this expectation.
    pub(crate) fn register(&self, relay: &Relay, pending: Arc<PendingInner>) {
        self.all.lock().push(Arc::clone(&pending));
        let found = relay.claim_backlog_or(&pending.validator, || {
            tracing::debug!(
                expected = %pending.validator.description(),
                "pending expectation registered"
            );
            self.unmatched.lock().push(Arc::clone(&pending));
        });
        if let Some(call) = found {
            pending.on_match(call);
        }
    }

    /// Expectations that have not completed yet.
    pub(crate) fn outstanding(&self) -> Vec<Arc<PendingInner>> {
        let mut all = self.all.lock();
        all.retain(|p| !p.done.is_open());
        all.clone()
    }
}

impl CallClaim for PendingRegistry {
    fn claim(&self, call: Call) -> Option<Call> {
        let mut unmatched = self.unmatched.lock();
        let Some(pos) = unmatched
            .iter()
            .position(|p| p.validator.check(&call).is_ok())
        else {
            return Some(call);
        };
        let pending = unmatched.remove(pos);
        drop(unmatched);
        pending.on_match(call);
        None
    }
}

/// Handle to an expectation registered without waiting.
///
/// Returned by [`Method::expect_exactly_async`](crate::Method::expect_exactly_async)
/// and [`Method::expect_matching_async`](crate::Method::expect_matching_async).
/// Clones share the expectation.
#[derive(Clone)]
pub struct PendingExpectation {
    inner: Arc<PendingInner>,
    reporter: Arc<dyn TestReporter>,
}

impl PendingExpectation {
    pub(crate) fn new(inner: Arc<PendingInner>, reporter: Arc<dyn TestReporter>) -> Self {
        Self { inner, reporter }
    }

    /// Name of the expected method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Make the matched call return `values`, now or once it arrives.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInjected`] on a second injection and
    /// [`Error::ReturnCount`] for the wrong number of values; both reported.
    pub fn inject_return(&self, values: Vec<Value>) -> Result<()> {
        check_return_count(
            self.reporter.as_ref(),
            &self.inner.method,
            self.inner.returns,
            values.len(),
        )?;
        self.inject(Response::Return(values))
    }

    /// Make the matched call panic with `payload`, now or once it arrives.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInjected`] on a second injection, reported.
    pub fn inject_panic(&self, payload: Value) -> Result<()> {
        self.inject(Response::Panic(payload))
    }

    /// Returns `true` once a matching call has arrived.
    #[must_use]
    pub fn is_matched(&self) -> bool {
        self.inner.is_matched()
    }

    /// Returns `true` once the call has been matched and answered.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.done.is_open()
    }

    /// Arguments of the matched call, if it has arrived.
    #[must_use]
    pub fn args(&self) -> Option<Vec<Value>> {
        self.inner.state.lock().args.clone()
    }

    /// Wait until the call has been matched and answered.
    pub async fn wait(&self) {
        self.inner.done.wait().await;
    }

    fn inject(&self, response: Response) -> Result<()> {
        self.reporter.helper();
        self.inner
            .inject(response)
            .map_err(|err| report(self.reporter.as_ref(), err))
    }
}

impl fmt::Debug for PendingExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingExpectation")
            .field("expected", &self.inner.validator.description())
            .field("matched", &self.is_matched())
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}
