//! A running piece of code under test and the assertions on its outcome.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::matcher::Matcher;
use crate::reporter::{report, TestReporter};
use crate::sync::Latch;
use crate::target::outcome::{ExpectedOutcome, Outcome};
use crate::target::TargetController;
use crate::value::Value;

/// Unique identifier for a started execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecutionId(u64);

impl ExecutionId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Execution({})", self.0)
    }
}

#[derive(Default)]
struct ExecState {
    result: Option<Result<Outcome>>,
    completions: Vec<Arc<CompletionInner>>,
}

struct ExecInner {
    id: ExecutionId,
    state: Mutex<ExecState>,
    done: Latch,
    controller: TargetController,
}

/// Handle to code under test started by a [`TargetController`].
///
/// Cloning shares the execution.
#[derive(Clone)]
pub struct Execution {
    inner: Arc<ExecInner>,
}

impl Execution {
    pub(crate) fn new(controller: TargetController) -> Self {
        Self {
            inner: Arc::new(ExecInner {
                id: ExecutionId::new(),
                state: Mutex::new(ExecState::default()),
                done: Latch::new(),
                controller,
            }),
        }
    }

    /// This execution's id.
    #[must_use]
    pub fn id(&self) -> ExecutionId {
        self.inner.id
    }

    /// Returns `true` once the target has returned or panicked.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.done.is_open()
    }

    /// The outcome, if the target has finished.
    #[must_use]
    pub fn try_outcome(&self) -> Option<Outcome> {
        match &self.inner.state.lock().result {
            Some(Ok(outcome)) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Wait for the target to finish.
    ///
    /// # Errors
    ///
    /// [`Error::Abandoned`] if the target was torn down without returning
    /// or panicking, e.g. by a runtime shutdown.
    pub async fn outcome(&self) -> Result<Outcome> {
        self.inner.done.wait().await;
        self.inner
            .state
            .lock()
            .result
            .clone()
            .unwrap_or_else(|| Err(Error::Abandoned(self.inner.id.to_string())))
    }

    /// Wait for the target and assert it returned exactly `values`.
    ///
    /// # Errors
    ///
    /// [`Error::OutcomeMismatch`], reported before returning.
    pub async fn expect_return(&self, values: Vec<Value>) -> Result<()> {
        self.assert(ExpectedOutcome::Return(values)).await
    }

    /// Wait for the target and assert its return values satisfy `matchers`.
    ///
    /// # Errors
    ///
    /// [`Error::OutcomeMismatch`], reported before returning.
    pub async fn expect_return_matching(&self, matchers: Vec<Box<dyn Matcher>>) -> Result<()> {
        self.assert(ExpectedOutcome::ReturnMatching(matchers)).await
    }

    /// Wait for the target and assert it panicked with `payload`.
    ///
    /// String panic messages compare equal to `String` values.
    ///
    /// # Errors
    ///
    /// [`Error::OutcomeMismatch`], reported before returning.
    pub async fn expect_panic(&self, payload: Value) -> Result<()> {
        self.assert(ExpectedOutcome::Panic(payload)).await
    }

    /// Wait for the target and assert its panic payload satisfies `matcher`.
    ///
    /// # Errors
    ///
    /// [`Error::OutcomeMismatch`], reported before returning.
    pub async fn expect_panic_matching(&self, matcher: impl Matcher + 'static) -> Result<()> {
        self.assert(ExpectedOutcome::PanicMatching(Box::new(matcher)))
            .await
    }

    /// Register a return assertion without waiting.
    #[must_use]
    pub fn expect_return_async(&self, values: Vec<Value>) -> PendingCompletion {
        self.register(ExpectedOutcome::Return(values))
    }

    /// Register a matcher-based return assertion without waiting.
    #[must_use]
    pub fn expect_return_matching_async(
        &self,
        matchers: Vec<Box<dyn Matcher>>,
    ) -> PendingCompletion {
        self.register(ExpectedOutcome::ReturnMatching(matchers))
    }

    /// Register a panic assertion without waiting.
    #[must_use]
    pub fn expect_panic_async(&self, payload: Value) -> PendingCompletion {
        self.register(ExpectedOutcome::Panic(payload))
    }

    /// Register a matcher-based panic assertion without waiting.
    #[must_use]
    pub fn expect_panic_matching_async(&self, matcher: impl Matcher + 'static) -> PendingCompletion {
        self.register(ExpectedOutcome::PanicMatching(Box::new(matcher)))
    }

    pub(crate) fn resolve(&self, result: Result<Outcome>) {
        let mut state = self.inner.state.lock();
        if state.result.is_some() {
            return;
        }
        match &result {
            Ok(outcome) => {
                tracing::debug!(execution = %self.inner.id, %outcome, "execution finished");
            }
            Err(err) => tracing::error!(
                execution = %self.inner.id,
                error = %err,
                "execution ended without an outcome"
            ),
        }
        for completion in state.completions.drain(..) {
            completion.complete(&result);
        }
        state.result = Some(result);
        drop(state);
        self.inner.done.open();
    }

    async fn assert(&self, expected: ExpectedOutcome) -> Result<()> {
        let reporter = self.inner.controller.reporter();
        reporter.helper();
        let outcome = self
            .outcome()
            .await
            .map_err(|err| report(reporter.as_ref(), err))?;
        expected
            .check(&outcome)
            .map_err(|reason| report(reporter.as_ref(), Error::OutcomeMismatch(reason)))
    }

    fn register(&self, expected: ExpectedOutcome) -> PendingCompletion {
        let completion = Arc::new(CompletionInner::new(expected));
        {
            let mut state = self.inner.state.lock();
            match &state.result {
                Some(result) => completion.complete(result),
                None => state.completions.push(Arc::clone(&completion)),
            }
        }
        let pending = PendingCompletion {
            inner: completion,
            reporter: Arc::clone(self.inner.controller.reporter()),
        };
        self.inner.controller.track(pending.clone());
        pending
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.inner.id)
            .field("outcome", &self.try_outcome())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct CompletionState {
    verdict: Option<Result<()>>,
    reported: bool,
}

struct CompletionInner {
    expected: ExpectedOutcome,
    state: Mutex<CompletionState>,
    done: Latch,
}

impl CompletionInner {
    fn new(expected: ExpectedOutcome) -> Self {
        Self {
            expected,
            state: Mutex::new(CompletionState::default()),
            done: Latch::new(),
        }
    }

    fn complete(&self, result: &Result<Outcome>) {
        let mut state = self.state.lock();
        if state.verdict.is_some() {
            return;
        }
        let verdict = match result {
            Ok(outcome) => self.expected.check(outcome).map_err(Error::OutcomeMismatch),
            Err(err) => Err(err.clone()),
        };
        tracing::debug!(expected = ?self.expected, passed = verdict.is_ok(), "completion resolved");
        state.verdict = Some(verdict);
        drop(state);
        self.done.open();
    }
}

/// An outcome assertion registered before or after the target finished.
///
/// The comparison runs once, as soon as both the assertion and the outcome
/// exist. Failures are reported when the test waits on it.
#[derive(Clone)]
pub struct PendingCompletion {
    inner: Arc<CompletionInner>,
    reporter: Arc<dyn TestReporter>,
}

impl PendingCompletion {
    /// Returns `true` once the comparison has run.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.done.is_open()
    }

    /// The comparison's result, if it has run.
    #[must_use]
    pub fn verdict(&self) -> Option<Result<()>> {
        self.inner.state.lock().verdict.clone()
    }

    /// Wait for the comparison and report a failed verdict.
    ///
    /// A failure is reported at most once, however many times this is
    /// awaited.
    ///
    /// # Errors
    ///
    /// [`Error::OutcomeMismatch`] if the outcome did not satisfy the
    /// assertion, [`Error::Abandoned`] if the target never finished.
    pub async fn wait(&self) -> Result<()> {
        self.inner.done.wait().await;
        let (verdict, first) = {
            let mut state = self.inner.state.lock();
            let first = !state.reported;
            state.reported = true;
            (state.verdict.clone().unwrap_or(Ok(())), first)
        };
        match verdict {
            Err(err) if first => Err(report(self.reporter.as_ref(), err)),
            other => other,
        }
    }
}

impl fmt::Debug for PendingCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCompletion")
            .field("expected", &self.inner.expected)
            .field("verdict", &self.verdict())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::RecordingReporter;
    use crate::values;

    fn execution() -> (Execution, RecordingReporter) {
        let reporter = RecordingReporter::new();
        let controller = TargetController::new(Arc::new(reporter.clone()));
        (Execution::new(controller), reporter)
    }

    #[tokio::test]
    async fn test_assertion_registered_before_outcome() {
        let (execution, reporter) = execution();
        let pending = execution.expect_return_async(values![1]);
        assert!(!pending.is_complete());

        execution.resolve(Ok(Outcome::Returned(values![1])));

        assert!(pending.is_complete());
        assert_eq!(pending.wait().await, Ok(()));
        assert!(!reporter.has_failed());
    }

    #[tokio::test]
    async fn test_assertion_registered_after_outcome() {
        let (execution, reporter) = execution();
        execution.resolve(Ok(Outcome::Panicked(Value::new("boom".to_string()))));

        let pending = execution.expect_return_async(values![1]);
        assert!(pending.is_complete());

        let err = pending.wait().await.unwrap_err();
        assert_eq!(
            err,
            Error::OutcomeMismatch("expected return but got panic: \"boom\"".to_string())
        );
        // Reported once, however often it is awaited.
        assert!(pending.wait().await.is_err());
        assert_eq!(reporter.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_second_resolution_is_ignored() {
        let (execution, _reporter) = execution();
        execution.resolve(Ok(Outcome::Returned(vec![])));
        execution.resolve(Ok(Outcome::Panicked(Value::unit())));

        assert_eq!(execution.try_outcome(), Some(Outcome::Returned(vec![])));
        assert_eq!(execution.outcome().await, Ok(Outcome::Returned(vec![])));
    }

    #[tokio::test]
    async fn test_abandoned_execution() {
        let (execution, reporter) = execution();
        let pending = execution.expect_panic_async(Value::unit());
        execution.resolve(Err(Error::Abandoned(execution.id().to_string())));

        assert!(execution.is_finished());
        assert_eq!(execution.try_outcome(), None);
        assert!(matches!(pending.wait().await, Err(Error::Abandoned(_))));
        assert!(execution.expect_return(vec![]).await.is_err());
        assert_eq!(reporter.failures().len(), 2);
    }
}
