//! Blocking expectations for one intercepted method.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::MatchMode;
use crate::error::{Error, Result};
use crate::expect::{Coordinator, PendingExpectation};
use crate::matcher::{compare_exact, compare_matching, describe_all, Matcher};
use crate::relay::{Call, CallId, Response, Validator};
use crate::reporter::{report, TestReporter};
use crate::value::{render_list, Value};

/// Expectations for calls to one dependency method.
///
/// Created with [`Coordinator::method`]. The builder methods return a new
/// `Method`; the original keeps its settings.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use testkit_rendezvous::matcher::{any, exactly};
/// use testkit_rendezvous::{matchers, values, Coordinator, RecordingReporter};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let coordinator = Coordinator::new(RecordingReporter::new()).unwrap();
/// let site = coordinator.call_site("Div");
/// let caller = tokio::spawn(async move { site.invoke_async(values![7, 2]).await });
///
/// let call = coordinator
///     .method("Div")
///     .within(Duration::from_secs(1))
///     .returning(2)
///     .expect_matching(matchers![exactly(7), any()])
///     .await
///     .unwrap();
/// call.inject_return(values![3, 1]).unwrap();
///
/// assert_eq!(caller.await.unwrap(), values![3, 1]);
/// # }
/// ```
#[derive(Clone)]
pub struct Method {
    coordinator: Coordinator,
    name: String,
    mode: MatchMode,
    timeout: Option<Duration>,
    returns: Option<usize>,
}

impl Method {
    pub(crate) fn new(coordinator: Coordinator, name: String) -> Self {
        let config = coordinator.config();
        let (mode, timeout) = (config.mode, config.timeout);
        Self {
            coordinator,
            name,
            mode,
            timeout,
            returns: None,
        }
    }

    /// Name of the intercepted method.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current matching discipline.
    #[must_use]
    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Match calls in any order; wait without a deadline.
    #[must_use]
    pub fn eventually(mut self) -> Self {
        self.mode = MatchMode::Eventual;
        self
    }

    /// Match calls strictly in arrival order and fail fast on a mismatch.
    #[must_use]
    pub fn ordered(mut self) -> Self {
        self.mode = MatchMode::Ordered;
        self
    }

    /// Deadline for ordered expectations.
    #[must_use]
    pub fn within(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Declare how many values the method returns, so injections can be
    /// checked.
    #[must_use]
    pub fn returning(mut self, count: usize) -> Self {
        self.returns = Some(count);
        self
    }

    /// Wait for a call whose arguments equal `args`.
    ///
    /// # Errors
    ///
    /// Ordered mode: [`Error::OrderedMismatch`] or [`Error::Timeout`].
    /// Errors are reported to the coordinator's reporter before returning.
    pub async fn expect_exactly(&self, args: Vec<Value>) -> Result<MatchedCall> {
        self.expect(exact_validator(&self.name, args)).await
    }

    /// Wait for a call whose arguments satisfy `matchers`, one per argument.
    ///
    /// # Errors
    ///
    /// Same as [`Method::expect_exactly`].
    pub async fn expect_matching(&self, matchers: Vec<Box<dyn Matcher>>) -> Result<MatchedCall> {
        self.expect(matching_validator(&self.name, matchers)).await
    }

    /// Register an expectation for a call whose arguments equal `args`,
    /// without waiting.
    ///
    /// The call may already have arrived, or arrive later; the response may
    /// be injected before or after that.
    #[must_use]
    pub fn expect_exactly_async(&self, args: Vec<Value>) -> PendingExpectation {
        self.coordinator
            .register_pending(&self.name, exact_validator(&self.name, args), self.returns)
    }

    /// Register an expectation for a call matching `matchers`, without
    /// waiting.
    #[must_use]
    pub fn expect_matching_async(&self, matchers: Vec<Box<dyn Matcher>>) -> PendingExpectation {
        self.coordinator.register_pending(
            &self.name,
            matching_validator(&self.name, matchers),
            self.returns,
        )
    }

    async fn expect(&self, validator: Validator) -> Result<MatchedCall> {
        let relay = self.coordinator.relay();
        let call = match self.mode {
            MatchMode::Ordered => relay.get_call_ordered(validator, self.timeout).await?,
            MatchMode::Eventual => relay.get_call_eventually(validator).await?,
        };
        tracing::debug!(call = %call.id(), method = %self.name, mode = %self.mode, "expectation matched");
        Ok(MatchedCall {
            call,
            returns: self.returns,
            reporter: Arc::clone(self.coordinator.reporter()),
        })
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// A call matched by a blocking expectation, waiting for its response.
///
/// Dropping it without injecting leaves the call-site to see the call as
/// abandoned.
pub struct MatchedCall {
    call: Call,
    returns: Option<usize>,
    reporter: Arc<dyn TestReporter>,
}

impl MatchedCall {
    /// Id of the matched call.
    #[must_use]
    pub fn id(&self) -> CallId {
        self.call.id()
    }

    /// Name of the called method.
    #[must_use]
    pub fn method(&self) -> &str {
        self.call.method()
    }

    /// The arguments the call was made with.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        self.call.args()
    }

    /// Argument at `index`.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.call.args().get(index)
    }

    /// Make the call return `values`.
    ///
    /// # Errors
    ///
    /// [`Error::ReturnCount`] (reported) when the method declared a
    /// different number of return values; [`Error::CallSiteGone`] when the
    /// caller stopped waiting.
    pub fn inject_return(self, values: Vec<Value>) -> Result<()> {
        check_return_count(self.reporter.as_ref(), self.call.method(), self.returns, values.len())?;
        self.call.respond(Response::Return(values))
    }

    /// Make the call panic with `payload`.
    ///
    /// # Errors
    ///
    /// [`Error::CallSiteGone`] when the caller stopped waiting.
    pub fn inject_panic(self, payload: Value) -> Result<()> {
        self.call.respond(Response::Panic(payload))
    }
}

impl fmt::Debug for MatchedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchedCall")
            .field("call", &self.call)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

pub(crate) fn check_return_count(
    reporter: &dyn TestReporter,
    method: &str,
    declared: Option<usize>,
    actual: usize,
) -> Result<()> {
    match declared {
        Some(expected) if expected != actual => Err(report(
            reporter,
            Error::ReturnCount {
                method: method.to_string(),
                expected,
                actual,
            },
        )),
        _ => Ok(()),
    }
}

fn check_method(expected: &str, call: &Call) -> std::result::Result<(), String> {
    if call.method() == expected {
        Ok(())
    } else {
        Err(format!("expected method {expected}, got {}", call.method()))
    }
}

fn exact_validator(method: &str, expected: Vec<Value>) -> Validator {
    let description = format!("{method}({})", render_list(&expected));
    let method = method.to_string();
    Validator::new(description, move |call| {
        check_method(&method, call)?;
        compare_exact("argument", &expected, call.args())
    })
}

fn matching_validator(method: &str, matchers: Vec<Box<dyn Matcher>>) -> Validator {
    let description = format!("{method}({})", describe_all(&matchers));
    let method = method.to_string();
    Validator::new(description, move |call| {
        check_method(&method, call)?;
        compare_matching("argument", &matchers, call.args())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{any, exactly, satisfies};
    use crate::reporter::RecordingReporter;
    use crate::{matchers, values};

    fn coordinator() -> (Coordinator, RecordingReporter) {
        let reporter = RecordingReporter::new();
        let coordinator = Coordinator::new(reporter.clone()).unwrap();
        (coordinator, reporter)
    }

    #[test]
    fn test_exact_validator_reasons() {
        let validator = exact_validator("Add", values![2, 3]);
        assert_eq!(validator.description(), "Add(2, 3)");

        let (ok, _p1) = Call::new("Add", values![2, 3]);
        let (wrong_method, _p2) = Call::new("Sub", values![2, 3]);
        let (wrong_count, _p3) = Call::new("Add", values![2]);
        let (wrong_arg, _p4) = Call::new("Add", values![2, 4]);

        assert!(validator.check(&ok).is_ok());
        assert_eq!(
            validator.check(&wrong_method).unwrap_err(),
            "expected method Add, got Sub"
        );
        assert_eq!(
            validator.check(&wrong_count).unwrap_err(),
            "expected 2 arguments, got 1"
        );
        assert_eq!(
            validator.check(&wrong_arg).unwrap_err(),
            "argument 1: expected 3, got 4"
        );
    }

    #[test]
    fn test_matching_validator_type_mismatch() {
        let validator = matching_validator(
            "Log",
            matchers![any(), satisfies("is short", |s: &String| s.len() < 4)],
        );
        assert_eq!(validator.description(), "Log(_, is short)");

        let (call, _pending) = Call::new("Log", values![1, 2]);
        let reason = validator.check(&call).unwrap_err();
        assert!(reason.starts_with("argument 1: type mismatch"), "{reason}");
    }

    #[tokio::test]
    async fn test_expect_exactly_round_trip() {
        let (coordinator, reporter) = coordinator();
        let site = coordinator.call_site("Add");
        let caller = tokio::spawn(async move { site.invoke_async(values![2, 3]).await });

        let call = coordinator.method("Add").expect_exactly(values![2, 3]).await.unwrap();
        assert_eq!(call.method(), "Add");
        assert_eq!(call.arg(1), Some(&Value::new(3)));
        assert_eq!(call.arg(2), None);
        call.inject_return(values![5]).unwrap();

        assert_eq!(caller.await.unwrap(), values![5]);
        assert!(!reporter.has_failed());
    }

    #[tokio::test]
    async fn test_ordered_mismatch_is_reported() {
        let (coordinator, reporter) = coordinator();
        let site = coordinator.call_site("Add");
        let pending = site.submit(values![5, 5]).unwrap();

        let err = coordinator
            .method("Add")
            .expect_exactly(values![2, 3])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::OrderedMismatch { .. }));
        let message = reporter.last_failure().unwrap();
        assert!(message.contains("Add(2, 3)"), "{message}");
        assert!(message.contains("Add(5, 5)"), "{message}");
        assert_eq!(
            pending.wait().await.unwrap_err(),
            Error::Abandoned("Add".to_string())
        );
    }

    #[tokio::test]
    async fn test_ordered_timeout_is_reported() {
        let (coordinator, reporter) = coordinator();
        let err = coordinator
            .method("Add")
            .within(Duration::from_millis(20))
            .expect_exactly(values![1])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert!(reporter.last_failure().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_eventual_skips_other_calls() {
        let (coordinator, reporter) = coordinator();
        let site = coordinator.call_site("Put");
        let _first = site.submit(values![1]).unwrap();
        let second = site.submit(values![2]).unwrap();

        let call = coordinator
            .method("Put")
            .eventually()
            .expect_matching(matchers![exactly(2)])
            .await
            .unwrap();
        call.inject_return(vec![]).unwrap();

        assert_eq!(second.wait().await.unwrap(), Response::Return(vec![]));
        assert_eq!(coordinator.relay().backlog_len(), 1);
        assert!(!reporter.has_failed());
    }

    #[tokio::test]
    async fn test_wrong_return_count_is_reported() {
        let (coordinator, reporter) = coordinator();
        let site = coordinator.call_site("Pair");
        let _pending = site.submit(vec![]).unwrap();

        let call = coordinator
            .method("Pair")
            .returning(2)
            .expect_exactly(vec![])
            .await
            .unwrap();
        let err = call.inject_return(values![1]).unwrap_err();

        assert_eq!(
            err,
            Error::ReturnCount {
                method: "Pair".to_string(),
                expected: 2,
                actual: 1
            }
        );
        assert!(reporter.has_failed());
    }

    #[tokio::test]
    async fn test_inject_panic_reaches_call_site() {
        let (coordinator, _reporter) = coordinator();
        let site = coordinator.call_site("Load");
        let pending = site.submit(vec![]).unwrap();

        let call = coordinator.method("Load").expect_exactly(vec![]).await.unwrap();
        call.inject_panic(Value::new("disk full".to_string())).unwrap();

        assert_eq!(
            pending.wait().await.unwrap(),
            Response::Panic(Value::new("disk full".to_string()))
        );
    }
}
