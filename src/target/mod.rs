//! The completion layer: run code under test and assert on how it ends.
//!
//! [`TargetController::start`] runs a synchronous target on Tokio's blocking
//! pool; [`TargetController::start_future`] runs an async one as a task.
//! Either way, a watcher races the "returned" channel against the
//! "panicked" channel and resolves the [`Execution`] with whichever fires.
//! Outcome assertions can be made before or after that happens.
//!
//! # Example
//!
//! ```rust
//! use testkit_rendezvous::{values, Coordinator, RecordingReporter, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let coordinator = Coordinator::new(RecordingReporter::new()).unwrap();
//! let targets = coordinator.targets();
//!
//! let execution = targets
//!     .start(|args: Vec<Value>| -> Vec<Value> { panic!("boom: {:?}", args) }, values![1])
//!     .unwrap();
//!
//! execution
//!     .expect_panic(Value::new("boom: [1]".to_string()))
//!     .await
//!     .unwrap();
//! # }
//! ```

mod execution;
mod outcome;

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::reporter::TestReporter;
use crate::value::Value;

pub use execution::{Execution, ExecutionId, PendingCompletion};
pub use outcome::Outcome;

/// Code under test, invoked with its arguments.
///
/// Implemented for every `Fn(Vec<Value>) -> Vec<Value>` closure; adapters
/// wrap real functions in one.
pub trait Invoke: Send + Sync {
    /// Run the target.
    fn invoke(&self, args: Vec<Value>) -> Vec<Value>;
}

impl<F> Invoke for F
where
    F: Fn(Vec<Value>) -> Vec<Value> + Send + Sync,
{
    fn invoke(&self, args: Vec<Value>) -> Vec<Value> {
        self(args)
    }
}

struct Shared {
    reporter: Arc<dyn TestReporter>,
    completions: Mutex<Vec<PendingCompletion>>,
}

/// Starts code under test and tracks the outcome assertions made on it.
///
/// Cloning shares the controller.
#[derive(Clone)]
pub struct TargetController {
    shared: Arc<Shared>,
}

impl TargetController {
    /// Create a controller reporting failures to `reporter`.
    #[must_use]
    pub fn new(reporter: Arc<dyn TestReporter>) -> Self {
        Self {
            shared: Arc::new(Shared {
                reporter,
                completions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Run a synchronous target on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] outside a Tokio runtime.
    pub fn start<T>(&self, target: T, args: Vec<Value>) -> Result<Execution>
    where
        T: Invoke + 'static,
    {
        let runtime = current_runtime()?;
        let execution = Execution::new(self.clone());
        let (returned, panicked, watch) = channels(execution.clone());
        tracing::debug!(execution = %execution.id(), args = args.len(), "starting target");

        runtime.spawn_blocking(move || {
            match panic::catch_unwind(AssertUnwindSafe(|| target.invoke(args))) {
                Ok(values) => {
                    let _ = returned.send(values);
                }
                Err(payload) => {
                    let _ = panicked.send(Value::from_panic(payload));
                }
            }
        });
        runtime.spawn(watch);
        Ok(execution)
    }

    /// Run an async target as a Tokio task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] outside a Tokio runtime.
    pub fn start_future<F>(&self, future: F) -> Result<Execution>
    where
        F: Future<Output = Vec<Value>> + Send + 'static,
    {
        let runtime = current_runtime()?;
        let execution = Execution::new(self.clone());
        let (returned, panicked, watch) = channels(execution.clone());
        tracing::debug!(execution = %execution.id(), "starting async target");

        runtime.spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(values) => {
                    let _ = returned.send(values);
                }
                Err(payload) => {
                    let _ = panicked.send(Value::from_panic(payload));
                }
            }
        });
        runtime.spawn(watch);
        Ok(execution)
    }

    /// Number of registered assertions whose comparison has not run yet.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared
            .completions
            .lock()
            .iter()
            .filter(|c| !c.is_complete())
            .count()
    }

    /// Wait for every registered assertion and report failed ones.
    ///
    /// Assertions registered while waiting are waited for too.
    ///
    /// # Errors
    ///
    /// The first failed verdict, after all have been reported.
    pub async fn wait(&self) -> Result<()> {
        let mut first_err = None;
        loop {
            let batch = std::mem::take(&mut *self.shared.completions.lock());
            if batch.is_empty() {
                break;
            }
            for result in join_all(batch.iter().map(|c| c.wait())).await {
                if let Err(err) = result {
                    first_err.get_or_insert(err);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub(crate) fn reporter(&self) -> &Arc<dyn TestReporter> {
        &self.shared.reporter
    }

    pub(crate) fn track(&self, completion: PendingCompletion) {
        self.shared.completions.lock().push(completion);
    }
}

impl fmt::Debug for TargetController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetController")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|err| Error::NoRuntime(err.to_string()))
}

type Watch = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

/// The two private outcome channels, plus the watcher racing them.
fn channels(
    execution: Execution,
) -> (oneshot::Sender<Vec<Value>>, oneshot::Sender<Value>, Watch) {
    let (returned_tx, returned_rx) = oneshot::channel();
    let (panicked_tx, panicked_rx) = oneshot::channel();
    let watch = async move {
        let result = tokio::select! {
            Ok(values) = returned_rx => Ok(Outcome::Returned(values)),
            Ok(payload) = panicked_rx => Ok(Outcome::Panicked(payload)),
            else => Err(Error::Abandoned(execution.id().to_string())),
        };
        execution.resolve(result);
    };
    (returned_tx, panicked_tx, Box::pin(watch))
}
