//! How assertion failures reach the host test framework.
//!
//! The engine never decides how a failed expectation ends a test. It calls
//! [`TestReporter::fatal`] and returns an error; the reporter decides what
//! "fatal" means:
//!
//! - [`PanicReporter`] - panics in the calling task, failing a `#[test]`
//! - [`RecordingReporter`] - records messages so tests can inspect them

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;

/// Minimal contract a host test framework must satisfy.
pub trait TestReporter: Send + Sync {
    /// Mark the current frame as test infrastructure.
    fn helper(&self) {}

    /// Report a test-ending assertion failure.
    fn fatal(&self, message: &str);
}

/// Report `err` as fatal and hand it back for propagation.
pub(crate) fn report(reporter: &dyn TestReporter, err: Error) -> Error {
    tracing::warn!(error = %err, "expectation failed");
    reporter.helper();
    reporter.fatal(&err.to_string());
    err
}

/// Reporter that panics with the failure message.
///
/// Fatal failures are always reported from the task that called the
/// failing expectation, so the panic fails the test that made it.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicReporter;

impl TestReporter for PanicReporter {
    #[track_caller]
    fn fatal(&self, message: &str) {
        panic!("{message}");
    }
}

/// Reporter that records failures instead of aborting.
///
/// Clones share the same record.
///
/// # Example
///
/// ```rust
/// use testkit_rendezvous::reporter::{RecordingReporter, TestReporter};
///
/// let reporter = RecordingReporter::new();
/// reporter.fatal("expected Add(2, 3)");
/// assert!(reporter.has_failed());
/// assert_eq!(reporter.failures(), vec!["expected Add(2, 3)".to_string()]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct RecordingReporter {
    failures: Arc<Mutex<Vec<String>>>,
    helper_calls: Arc<AtomicUsize>,
}

impl RecordingReporter {
    /// Create an empty recording reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded failure messages, oldest first.
    #[must_use]
    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().clone()
    }

    /// The most recent failure message.
    #[must_use]
    pub fn last_failure(&self) -> Option<String> {
        self.failures.lock().last().cloned()
    }

    /// Check if any failure was recorded.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        !self.failures.lock().is_empty()
    }

    /// Number of times [`TestReporter::helper`] was called.
    #[must_use]
    pub fn helper_calls(&self) -> usize {
        self.helper_calls.load(Ordering::SeqCst)
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        self.failures.lock().clear();
        self.helper_calls.store(0, Ordering::SeqCst);
    }
}

impl TestReporter for RecordingReporter {
    fn helper(&self) {
        self.helper_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn fatal(&self, message: &str) {
        self.failures.lock().push(message.to_string());
    }
}
