//! The call relay: matches intercepted calls against waiting expectations.
//!
//! A [`Relay`] is the single authority for the many-producer/many-consumer
//! matching problem. Call-sites [`submit`](Relay::submit) calls; one
//! dispatch worker routes each call, in arrival order, to:
//!
//! 1. the installed [`CallClaim`] hook (asynchronous expectations),
//! 2. the oldest ordered waiter, which takes the call or fails on it,
//! 3. the first non-ordered waiter whose validator accepts it,
//! 4. otherwise the backlog of unclaimed calls.
//!
//! Backlog, waiters and hook live behind one mutex. The lock is never held
//! across an await; matched calls cross tasks only through one-shot channels.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use testkit_rendezvous::relay::{CallSite, Relay, Validator};
//! use testkit_rendezvous::{values, RecordingReporter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let relay = Relay::new(Arc::new(RecordingReporter::new())).unwrap();
//! let site = CallSite::new(&relay, "Ping");
//! let pending = site.submit(values![1]).unwrap();
//!
//! let call = relay.get_call_eventually(Validator::method("Ping")).await.unwrap();
//! assert_eq!(call.args(), values![1].as_slice());
//! # }
//! ```

mod call;
mod waiter;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::reporter::{report, TestReporter};

pub use call::{Call, CallId, CallSite, PendingResponse, Response};
pub use waiter::{Validator, WaiterState};

use waiter::{Delivery, WaiterTicket, Waiters};

/// Pre-emption hook consulted before any waiter.
///
/// The relay invokes it under its own lock, so whatever the hook registers
/// is atomic with respect to routing and backlog scans.
pub trait CallClaim: Send + Sync {
    /// Take the call, or give it back.
    fn claim(&self, call: Call) -> Option<Call>;
}

#[derive(Default)]
struct RelayState {
    backlog: VecDeque<Call>,
    waiters: Waiters,
    claim: Option<Arc<dyn CallClaim>>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<RelayState>,
}

impl Shared {
    fn dispatch(&self, call: Call) {
        let id = call.id();
        let mut state = self.state.lock();

        let call = match state.claim.clone() {
            Some(claim) => match claim.claim(call) {
                Some(call) => call,
                None => {
                    tracing::debug!(call = %id, "claimed by pending expectation");
                    return;
                }
            },
            None => call,
        };

        if let Some(call) = state.waiters.route(call) {
            tracing::debug!(
                call = %id,
                method = %call.method(),
                backlog = state.backlog.len() + 1,
                "no waiter matched; queued"
            );
            state.backlog.push_back(call);
        }
    }
}

async fn run_dispatcher(shared: Arc<Shared>, mut inbox: mpsc::UnboundedReceiver<Call>) {
    while let Some(call) = inbox.recv().await {
        shared.dispatch(call);
    }
    tracing::debug!("relay inbox closed; dispatcher stopping");
}

fn take_matching(backlog: &mut VecDeque<Call>, validator: &Validator) -> Option<Call> {
    let pos = backlog.iter().position(|c| validator.check(c).is_ok())?;
    backlog.remove(pos)
}

/// Dispatcher for intercepted calls.
///
/// Cloning a `Relay` shares it. The dispatch worker stops once every clone
/// has been dropped.
#[derive(Clone)]
pub struct Relay {
    inbox: mpsc::UnboundedSender<Call>,
    shared: Arc<Shared>,
    reporter: Arc<dyn TestReporter>,
}

impl Relay {
    /// Create a relay and spawn its dispatch worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] when called outside a Tokio runtime.
    pub fn new(reporter: Arc<dyn TestReporter>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|err| Error::NoRuntime(err.to_string()))?;
        let (inbox, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        runtime.spawn(run_dispatcher(Arc::clone(&shared), rx));
        Ok(Self {
            inbox,
            shared,
            reporter,
        })
    }

    /// Install the pre-emption hook, replacing any previous one.
    pub fn set_claim(&self, claim: Arc<dyn CallClaim>) {
        self.shared.state.lock().claim = Some(claim);
    }

    /// Hand a call to the dispatch worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelayClosed`] if the worker has stopped; the call is
    /// dropped and its call-site sees it as abandoned.
    pub fn submit(&self, call: Call) -> Result<()> {
        tracing::debug!(call = %call.id(), method = %call.method(), "call submitted");
        self.inbox.send(call).map_err(|_| Error::RelayClosed)
    }

    /// Wait for the next call in strict order.
    ///
    /// With calls already queued, only the oldest one is considered: it is
    /// removed and either returned or rejected. Otherwise an ordered waiter
    /// is registered and sees every new call before anything else does.
    ///
    /// # Errors
    ///
    /// [`Error::OrderedMismatch`] if the next call does not match,
    /// [`Error::Timeout`] if none arrives in time. Both are reported as
    /// fatal first.
    pub async fn get_call_ordered(
        &self,
        validator: Validator,
        timeout: Option<Duration>,
    ) -> Result<Call> {
        self.reporter.helper();
        let ticket = {
            let mut state = self.shared.state.lock();
            let head = state.backlog.pop_front();
            match head {
                Some(call) => {
                    drop(state);
                    return match validator.check(&call) {
                        Ok(()) => Ok(call),
                        Err(reason) => Err(self.fail(Error::OrderedMismatch {
                            expected: validator.description().to_string(),
                            actual: call.to_string(),
                            reason,
                        })),
                    };
                }
                None => state.waiters.register(true, validator),
            }
        };
        self.await_ticket(ticket, timeout).await
    }

    /// Wait for a matching call in any order, without a deadline.
    ///
    /// The whole backlog is scanned first.
    ///
    /// # Errors
    ///
    /// Only if the relay shuts down while waiting.
    pub async fn get_call_eventually(&self, validator: Validator) -> Result<Call> {
        self.get_call(validator, None).await
    }

    /// Wait for a matching call in any order, with an optional deadline.
    ///
    /// Non-matching calls are left alone; there is no fail-fast.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`], reported as fatal first.
    pub async fn get_call(&self, validator: Validator, timeout: Option<Duration>) -> Result<Call> {
        self.reporter.helper();
        let ticket = {
            let mut state = self.shared.state.lock();
            if let Some(call) = take_matching(&mut state.backlog, &validator) {
                tracing::debug!(call = %call.id(), "matched from backlog");
                return Ok(call);
            }
            state.waiters.register(false, validator)
        };
        self.await_ticket(ticket, timeout).await
    }

    /// Number of calls waiting in the backlog.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.shared.state.lock().backlog.len()
    }

    /// Number of registered waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Take a matching call from the backlog, or run `register` while the
    /// relay is still locked, so no call can slip past in between.
    pub(crate) fn claim_backlog_or<F: FnOnce()>(
        &self,
        validator: &Validator,
        register: F,
    ) -> Option<Call> {
        let mut state = self.shared.state.lock();
        let found = take_matching(&mut state.backlog, validator);
        if found.is_none() {
            register();
        }
        found
    }

    pub(crate) fn reporter(&self) -> &Arc<dyn TestReporter> {
        &self.reporter
    }

    async fn await_ticket(
        &self,
        mut ticket: WaiterTicket,
        timeout: Option<Duration>,
    ) -> Result<Call> {
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, &mut ticket.rx).await.ok(),
            None => Some((&mut ticket.rx).await),
        };

        let delivery = match received {
            Some(Ok(delivery)) => delivery,
            Some(Err(_)) => return Err(self.fail(Error::RelayClosed)),
            None => {
                let withdrawn = self.shared.state.lock().waiters.withdraw(ticket.id);
                if withdrawn {
                    ticket.transition(WaiterState::TimedOut);
                    tracing::debug!(waiter = ticket.id, "waiter withdrawn");
                    return Err(self.fail(Error::Timeout {
                        expected: ticket.description,
                        timeout: timeout.unwrap_or_default(),
                    }));
                }
                // Delivered while the deadline fired; the delivery wins.
                match ticket.rx.try_recv() {
                    Ok(delivery) => delivery,
                    Err(_) => return Err(self.fail(Error::RelayClosed)),
                }
            }
        };

        ticket.transition(delivery.state());
        match delivery {
            Delivery::Matched(call) => Ok(call),
            Delivery::Rejected { call, reason } => Err(self.fail(Error::OrderedMismatch {
                expected: ticket.description,
                actual: call.to_string(),
                reason,
            })),
        }
    }

    fn fail(&self, err: Error) -> Error {
        report(self.reporter.as_ref(), err)
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Relay")
            .field("backlog", &state.backlog.len())
            .field("waiters", &state.waiters.len())
            .field("claim", &state.claim.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::RecordingReporter;
    use crate::values;

    fn relay() -> (Relay, RecordingReporter) {
        let reporter = RecordingReporter::new();
        let relay = Relay::new(Arc::new(reporter.clone())).unwrap();
        (relay, reporter)
    }

    async fn until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition never became true");
    }

    fn exact(method: &'static str, arg: i32) -> Validator {
        Validator::new(format!("{method}({arg})"), move |call| {
            if call.method() == method && call.args() == values![arg].as_slice() {
                Ok(())
            } else {
                Err(format!("expected {method}({arg}), got {call}"))
            }
        })
    }

    #[tokio::test]
    async fn test_ordered_match_after_waiter_registered() {
        let (relay, reporter) = relay();
        let waiting = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.get_call_ordered(exact("A", 1), None).await })
        };
        until(|| relay.waiter_count() == 1).await;

        let site = CallSite::new(&relay, "A");
        let _pending = site.submit(values![1]).unwrap();

        let call = waiting.await.unwrap().unwrap();
        assert_eq!(call.to_string(), "A(1)");
        assert!(!reporter.has_failed());
        assert_eq!(relay.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_ordered_considers_only_head_of_backlog() {
        let (relay, reporter) = relay();
        let _a = CallSite::new(&relay, "A").submit(values![1]).unwrap();
        let _b = CallSite::new(&relay, "B").submit(values![2]).unwrap();
        until(|| relay.backlog_len() == 2).await;

        let err = relay.get_call_ordered(exact("B", 2), None).await.unwrap_err();

        assert!(matches!(err, Error::OrderedMismatch { .. }));
        let message = reporter.last_failure().unwrap();
        assert!(message.contains("B(2)"), "{message}");
        assert!(message.contains("A(1)"), "{message}");
        // The rejected head is gone, not requeued.
        assert_eq!(relay.backlog_len(), 1);
    }

    #[tokio::test]
    async fn test_ordered_mismatch_on_arrival_is_not_queued() {
        let (relay, reporter) = relay();
        let waiting = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.get_call_ordered(exact("A", 1), None).await })
        };
        until(|| relay.waiter_count() == 1).await;

        let pending = CallSite::new(&relay, "A").submit(values![9]).unwrap();

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::OrderedMismatch { ref actual, .. } if actual == "A(9)"));
        assert_eq!(reporter.failures().len(), 1);
        assert_eq!(relay.backlog_len(), 0);
        assert_eq!(
            pending.wait().await.unwrap_err(),
            Error::Abandoned("A".to_string())
        );
    }

    #[tokio::test]
    async fn test_ordered_timeout_withdraws_waiter() {
        let (relay, reporter) = relay();
        let err = relay
            .get_call_ordered(exact("A", 1), Some(Duration::from_millis(20)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert!(reporter.last_failure().unwrap().contains("timeout waiting for call"));
        assert_eq!(relay.waiter_count(), 0);

        // A late call is queued instead of reaching the departed waiter.
        let _pending = CallSite::new(&relay, "A").submit(values![1]).unwrap();
        until(|| relay.backlog_len() == 1).await;
    }

    #[tokio::test]
    async fn test_eventual_scans_whole_backlog() {
        let (relay, reporter) = relay();
        for (method, arg) in [("A", 1), ("B", 2), ("C", 3)] {
            let _ = CallSite::new(&relay, method).submit(values![arg]).unwrap();
        }
        until(|| relay.backlog_len() == 3).await;

        let call = relay.get_call_eventually(exact("C", 3)).await.unwrap();
        assert_eq!(call.method(), "C");
        assert_eq!(relay.backlog_len(), 2);

        let call = relay.get_call_ordered(exact("A", 1), None).await.unwrap();
        assert_eq!(call.method(), "A");
        assert!(!reporter.has_failed());
    }

    #[tokio::test]
    async fn test_eventual_leaves_unmatched_calls_queued() {
        let (relay, reporter) = relay();
        let _b = CallSite::new(&relay, "B").submit(values![2]).unwrap();
        until(|| relay.backlog_len() == 1).await;

        let err = relay
            .get_call(exact("A", 1), Some(Duration::from_millis(20)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert!(reporter.has_failed());
        assert_eq!(relay.backlog_len(), 1);
    }

    struct ClaimAll(Mutex<Vec<Call>>);

    impl CallClaim for ClaimAll {
        fn claim(&self, call: Call) -> Option<Call> {
            self.0.lock().push(call);
            None
        }
    }

    #[tokio::test]
    async fn test_claim_hook_runs_before_waiters() {
        let (relay, _reporter) = relay();
        let hook = Arc::new(ClaimAll(Mutex::new(Vec::new())));
        relay.set_claim(hook.clone());

        let waiting = {
            let relay = relay.clone();
            tokio::spawn(async move {
                relay
                    .get_call(Validator::method("A"), Some(Duration::from_millis(50)))
                    .await
            })
        };
        until(|| relay.waiter_count() == 1).await;
        let _pending = CallSite::new(&relay, "A").submit(values![1]).unwrap();

        assert!(waiting.await.unwrap().is_err());
        assert_eq!(hook.0.lock().len(), 1);
        assert_eq!(relay.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_relay_requires_runtime_only_at_construction() {
        let (relay, _reporter) = relay();
        let debug = format!("{relay:?}");
        assert!(debug.contains("backlog"));
    }

    #[test]
    fn test_relay_outside_runtime() {
        let err = Relay::new(Arc::new(RecordingReporter::new())).unwrap_err();
        assert!(matches!(err, Error::NoRuntime(_)));
    }
}
