//! Intercepted calls and their responses.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::relay::Relay;
use crate::value::{render_list, Value};

/// Unique identifier for an intercepted call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallId(u64);

impl CallId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Call({})", self.0)
    }
}

/// What the test tells an intercepted call-site to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Return these values.
    Return(Vec<Value>),
    /// Panic with this payload.
    Panic(Value),
}

impl Response {
    /// Resolve at the call-site: return the values or raise the panic.
    ///
    /// # Panics
    ///
    /// Panics with the injected payload for [`Response::Panic`]. The payload
    /// is the original [`Value`], so [`Value::from_panic`] recovers it.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Response::Return(values) => values,
            Response::Panic(payload) => std::panic::panic_any(payload),
        }
    }
}

/// One intercepted invocation awaiting a response.
///
/// The response sink travels with the `Call`. [`Call::respond`] consumes
/// it, so a call can be answered at most once.
pub struct Call {
    id: CallId,
    method: String,
    args: Vec<Value>,
    sink: oneshot::Sender<Response>,
}

impl Call {
    /// Create a call and the handle its call-site waits on.
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> (Self, PendingResponse) {
        let method = method.into();
        let (sink, rx) = oneshot::channel();
        let id = CallId::new();
        let pending = PendingResponse {
            id,
            method: method.clone(),
            rx,
        };
        (
            Self {
                id,
                method,
                args,
                sink,
            },
            pending,
        )
    }

    /// The call's unique id.
    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Name of the intercepted method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Arguments in declaration order.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Returns `true` if the call-site stopped waiting.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.sink.is_closed()
    }

    /// Write the response, unblocking the call-site.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CallSiteGone`] if the call-site stopped waiting.
    pub fn respond(self, response: Response) -> Result<()> {
        let Call {
            id, method, sink, ..
        } = self;
        tracing::debug!(call = %id, method = %method, "writing response");
        sink.send(response).map_err(|_| Error::CallSiteGone(method))
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.method, render_list(&self.args))
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("args", &self.args)
            .finish()
    }
}

/// The call-site's half of a [`Call`]: resolves once a response is written.
#[derive(Debug)]
pub struct PendingResponse {
    id: CallId,
    method: String,
    rx: oneshot::Receiver<Response>,
}

impl PendingResponse {
    /// The id of the call this response belongs to.
    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Wait for the response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Abandoned`] if the call was dropped unanswered, for
    /// example after an ordered mismatch rejected it.
    pub async fn wait(self) -> Result<Response> {
        self.rx.await.map_err(|_| Error::Abandoned(self.method))
    }

    /// Block the current thread until the response arrives.
    ///
    /// Must not be called from within an async context; use it from
    /// synchronous code under test running on a blocking thread.
    ///
    /// # Errors
    ///
    /// Same as [`PendingResponse::wait`].
    pub fn blocking_wait(self) -> Result<Response> {
        self.rx
            .blocking_recv()
            .map_err(|_| Error::Abandoned(self.method))
    }
}

/// Interception point for one dependency method.
///
/// Adapters generated for a dependency hold one `CallSite` per method and
/// route every invocation through it.
///
/// # Example
///
/// ```rust
/// use testkit_rendezvous::{values, Coordinator, RecordingReporter};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let coordinator = Coordinator::new(RecordingReporter::new()).unwrap();
/// let add = coordinator.call_site("Add");
///
/// let caller = tokio::spawn(async move { add.invoke_async(values![2, 3]).await });
///
/// let call = coordinator.method("Add").expect_exactly(values![2, 3]).await.unwrap();
/// call.inject_return(values![5]).unwrap();
///
/// assert_eq!(caller.await.unwrap(), values![5]);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct CallSite {
    relay: Relay,
    method: String,
}

impl CallSite {
    /// Create a call-site submitting to `relay`.
    pub fn new(relay: &Relay, method: impl Into<String>) -> Self {
        Self {
            relay: relay.clone(),
            method: method.into(),
        }
    }

    /// Name of the intercepted method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Submit a call and return the handle to wait on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelayClosed`] if the relay has shut down.
    pub fn submit(&self, args: Vec<Value>) -> Result<PendingResponse> {
        let (call, pending) = Call::new(self.method.clone(), args);
        self.relay.submit(call)?;
        Ok(pending)
    }

    /// Submit a call and block until its response arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay is closed or the call is abandoned.
    pub fn try_invoke(&self, args: Vec<Value>) -> Result<Response> {
        self.submit(args)?.blocking_wait()
    }

    /// Submit a call and block until it is answered, from synchronous code.
    ///
    /// # Panics
    ///
    /// Resumes an injected panic. Also panics if the call can never be
    /// answered, because the intercepted signature has no way to report it.
    pub fn invoke(&self, args: Vec<Value>) -> Vec<Value> {
        match self.try_invoke(args) {
            Ok(response) => response.into_values(),
            Err(err) => panic!("intercepted call to {} failed: {err}", self.method),
        }
    }

    /// Submit a call and await its response, from async code.
    ///
    /// # Panics
    ///
    /// Same as [`CallSite::invoke`].
    pub async fn invoke_async(&self, args: Vec<Value>) -> Vec<Value> {
        let response = match self.submit(args) {
            Ok(pending) => pending.wait().await,
            Err(err) => Err(err),
        };
        match response {
            Ok(response) => response.into_values(),
            Err(err) => panic!("intercepted call to {} failed: {err}", self.method),
        }
    }
}
