//! Waiters: registered, blocking requests to match an incoming call.
//!
//! Each waiter moves through a small state machine:
//!
//! ```text
//! Pending ──▶ Matched     validator accepted a call
//!    │   ──▶ Failed      ordered waiter rejected the call it was offered
//!    └───▶ TimedOut     deadline passed; waiter withdrew itself
//! ```
//!
//! [`Waiters`] keeps them in registration order and owns the routing rule:
//! the oldest ordered waiter sees every incoming call first and either takes
//! it or fails; only then are non-ordered waiters scanned.

use std::fmt;

use tokio::sync::oneshot;

use crate::relay::Call;

type Check = dyn Fn(&Call) -> Result<(), String> + Send + Sync;

/// Decides whether a call satisfies an expectation.
pub struct Validator {
    description: String,
    check: Box<Check>,
}

impl Validator {
    /// Create a validator.
    ///
    /// `check` returns `Err(reason)` describing the mismatch.
    pub fn new<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Call) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            check: Box::new(check),
        }
    }

    /// A validator accepting every call to `method`.
    pub fn method(method: impl Into<String>) -> Self {
        let method = method.into();
        let description = format!("{method}(..)");
        Self::new(description, move |call| {
            if call.method() == method {
                Ok(())
            } else {
                Err(format!("expected method {method}, got {}", call.method()))
            }
        })
    }

    /// Check a call.
    ///
    /// # Errors
    ///
    /// Returns the reason the call does not match.
    pub fn check(&self, call: &Call) -> Result<(), String> {
        (self.check)(call)
    }

    /// Human-readable description of the expected call.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a waiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaiterState {
    /// Registered, waiting for a call.
    Pending,
    /// A matching call was delivered.
    Matched,
    /// An ordered waiter was offered a call it rejected.
    Failed,
    /// The deadline passed before any call matched.
    TimedOut,
}

impl fmt::Display for WaiterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaiterState::Pending => write!(f, "Pending"),
            WaiterState::Matched => write!(f, "Matched"),
            WaiterState::Failed => write!(f, "Failed"),
            WaiterState::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// What the dispatcher hands a waiter.
#[derive(Debug)]
pub(crate) enum Delivery {
    Matched(Call),
    Rejected { call: Call, reason: String },
}

impl Delivery {
    fn into_call(self) -> Call {
        match self {
            Delivery::Matched(call) | Delivery::Rejected { call, .. } => call,
        }
    }

    pub(crate) fn state(&self) -> WaiterState {
        match self {
            Delivery::Matched(_) => WaiterState::Matched,
            Delivery::Rejected { .. } => WaiterState::Failed,
        }
    }
}

/// A registered waiter, as held in the relay's list.
pub(crate) struct Waiter {
    id: u64,
    ordered: bool,
    validator: Validator,
    sink: oneshot::Sender<Delivery>,
}

impl Waiter {
    /// Hand a delivery over; gives the call back if the receiver is gone.
    fn deliver(self, delivery: Delivery) -> Result<(), Call> {
        tracing::debug!(
            waiter = self.id,
            ordered = self.ordered,
            state = %delivery.state(),
            "delivering call to waiter"
        );
        self.sink.send(delivery).map_err(Delivery::into_call)
    }
}

/// The receiving side of a registered waiter.
#[derive(Debug)]
pub(crate) struct WaiterTicket {
    pub(crate) id: u64,
    pub(crate) description: String,
    pub(crate) rx: oneshot::Receiver<Delivery>,
    pub(crate) state: WaiterState,
}

impl WaiterTicket {
    /// Leave `Pending` for a terminal state. A waiter settles once.
    pub(crate) fn transition(&mut self, next: WaiterState) {
        debug_assert_eq!(
            self.state,
            WaiterState::Pending,
            "waiter {} already settled",
            self.id
        );
        debug_assert_ne!(next, WaiterState::Pending);
        tracing::trace!(waiter = self.id, from = %self.state, to = %next, "waiter settled");
        self.state = next;
    }
}

/// Registered waiters in registration order.
#[derive(Default)]
pub(crate) struct Waiters {
    list: Vec<Waiter>,
    next_id: u64,
}

impl Waiters {
    /// Register a waiter and return the ticket its owner waits on.
    pub(crate) fn register(&mut self, ordered: bool, validator: Validator) -> WaiterTicket {
        let id = self.next_id;
        self.next_id += 1;
        let (sink, rx) = oneshot::channel();
        let description = validator.description().to_string();
        tracing::trace!(waiter = id, ordered, expected = %description, "waiter registered");
        self.list.push(Waiter {
            id,
            ordered,
            validator,
            sink,
        });
        WaiterTicket {
            id,
            description,
            rx,
            state: WaiterState::Pending,
        }
    }

    /// Remove a waiter that gave up. Returns `false` if it was already
    /// removed by a delivery.
    pub(crate) fn withdraw(&mut self, id: u64) -> bool {
        match self.list.iter().position(|w| w.id == id) {
            Some(pos) => {
                self.list.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Number of registered waiters.
    pub(crate) fn len(&self) -> usize {
        self.list.len()
    }

    /// Position of the oldest ordered waiter, if any.
    fn oldest_ordered_pos(&self) -> Option<usize> {
        self.list.iter().position(|w| w.ordered)
    }

    #[cfg(test)]
    fn oldest_ordered(&self) -> Option<u64> {
        self.oldest_ordered_pos().map(|pos| self.list[pos].id)
    }

    /// Route a call to a waiter.
    ///
    /// The oldest ordered waiter takes priority: it receives the call as a
    /// match or as a rejection, and nothing else is considered. Without an
    /// ordered waiter, the first non-ordered waiter whose validator accepts
    /// the call receives it. Returns the call if nobody took it.
    pub(crate) fn route(&mut self, mut call: Call) -> Option<Call> {
        loop {
            if let Some(pos) = self.oldest_ordered_pos() {
                let waiter = self.list.remove(pos);
                let delivery = match waiter.validator.check(&call) {
                    Ok(()) => Delivery::Matched(call),
                    Err(reason) => Delivery::Rejected { call, reason },
                };
                match waiter.deliver(delivery) {
                    Ok(()) => return None,
                    Err(returned) => {
                        call = returned;
                        continue;
                    }
                }
            }

            let Some(pos) = self
                .list
                .iter()
                .position(|w| w.validator.check(&call).is_ok())
            else {
                return Some(call);
            };
            let waiter = self.list.remove(pos);
            match waiter.deliver(Delivery::Matched(call)) {
                Ok(()) => return None,
                Err(returned) => call = returned,
            }
        }
    }
}
