//! Single-consumption jobs.
//!
//! A [`Job`] is the receiving side of a computation that runs on its own thread.
//! The computation produces exactly one value, and that value is handed to
//! exactly one successful waiter. Job handles can be cloned and shared freely;
//! once the value has been claimed, every other wait (concurrent or later)
//! fails with `AlreadyConsumed` rather than blocking.
//!
//! ## Lifecycle
//!
//! 1. **Pending**: the computation is running or queued on a worker.
//! 2. **Ready**: the computation returned (or panicked). The value, if any, sits
//!    in a single-slot channel.
//! 3. **Consumed**: a waiter took the value. This state is permanent.
//!
//! A wait abandoned because its context fired leaves the job untouched, so a
//! later wait can still claim the value.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, TryRecvError, select};
use ctxsync_common::{Error, Result};
use ctxsync_context::{Context, Signal};

use crate::worker_pool::Task;

/// Runs `f` on a new thread and returns the job that will receive its value.
///
/// The computation starts immediately and is not bounded by any pool. Use
/// [`run_at_worker`](crate::worker_pool::run_at_worker) to limit concurrency.
pub fn run<F, V>(f: F) -> Job<V>
where
    F: FnOnce() -> V + Send + 'static,
    V: Send + 'static,
{
    let (job, task) = new_job(f);
    thread::Builder::new()
        .name("ctxsync-job".into())
        .spawn(task)
        .expect("spawn job thread");
    job
}

/// Wraps a fallible computation so that its error travels inside the job value.
pub fn wrap_error_func<F, V, E>(f: F) -> impl FnOnce() -> WithError<V, E>
where
    F: FnOnce() -> std::result::Result<V, E>,
{
    move || WithError(f())
}

/// Creates a job together with the task that fulfils it.
///
/// The task may run on any thread. Dropping it without running it closes the
/// job, and waiters then fail with `ReceiverClosed`.
pub(crate) fn new_job<F, V>(f: F) -> (Job<V>, Task)
where
    F: FnOnce() -> V + Send + 'static,
    V: Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    let shared = Arc::new(JobShared::new());
    let guard = ReadyGuard(shared.clone());

    let task: Task = Box::new(move || {
        let value = f();
        match tx.send(value) {
            Ok(()) => guard.0.delivered.store(true, Ordering::Release),
            Err(_) => log::trace!("job value discarded, no handle left"),
        }
        // Readiness must be visible before the channel disconnects.
        drop(guard);
        drop(tx);
    });

    (Job { rx, shared }, task)
}

/// A handle to a single-valued computation.
pub struct Job<V> {
    rx: Receiver<V>,
    shared: Arc<JobShared>,
}

struct JobShared {
    ready: Signal,
    consumed: Signal,
    delivered: AtomicBool,
}

impl JobShared {
    fn new() -> JobShared {
        JobShared {
            ready: Signal::new(),
            consumed: Signal::new(),
            delivered: AtomicBool::new(false),
        }
    }
}

/// Fires the ready signal when the computation ends, including by panic.
struct ReadyGuard(Arc<JobShared>);

impl Drop for ReadyGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            log::warn!("job computation panicked before delivering its value");
        }
        self.0.ready.fire();
    }
}

impl<V> Job<V> {
    /// Blocks until the value is available and claims it.
    ///
    /// Equivalent to [`wait_context`](Self::wait_context) with a background
    /// context.
    pub fn wait(&self) -> Result<V> {
        self.wait_context(&Context::background())
    }

    /// Blocks until the value is available or `ctx` is cancelled.
    ///
    /// # Returns
    ///
    /// - `Ok(value)` for the one waiter that claims the value.
    /// - `AlreadyConsumed` if another waiter claimed it.
    /// - `ReceiverClosed` if the computation ended without a value.
    /// - The cancellation error of `ctx` if it fires first. An already cancelled
    ///   context fails before any attempt to claim, and the job is left as is.
    pub fn wait_context(&self, ctx: &Context) -> Result<V> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        select! {
            recv(self.rx) -> msg => match msg {
                Ok(value) => Ok(self.claim(value)),
                Err(_) => Err(self.exhausted_error()),
            },
            recv(ctx.done()) -> _ => Err(ctx.cancel_error()),
        }
    }

    /// Claims the value if it is available, without blocking.
    ///
    /// Returns `Ok(None)` while the computation is still running.
    pub fn try_wait(&self) -> Result<Option<V>> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(self.claim(value))),
            Err(TryRecvError::Empty) if !self.is_ready() => Ok(None),
            Err(_) => Err(self.exhausted_error()),
        }
    }

    /// Returns `true` once the computation has finished, whether or not its
    /// value has been claimed.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.is_fired()
    }

    /// Returns `true` once some waiter has claimed the value.
    pub fn is_consumed(&self) -> bool {
        self.shared.consumed.is_fired()
    }

    /// Returns a receiver that disconnects when the computation finishes.
    ///
    /// The channel never carries a message; a completed receive means the job
    /// is ready. It can be combined with other channels in `select!`.
    pub fn ready(&self) -> &Receiver<()> {
        self.shared.ready.receiver()
    }

    /// Returns a receiver that disconnects once a waiter has claimed the value.
    pub fn consumed(&self) -> &Receiver<()> {
        self.shared.consumed.receiver()
    }

    fn claim(&self, value: V) -> V {
        self.shared.consumed.fire();
        log::trace!("job value claimed");
        value
    }

    fn exhausted_error(&self) -> Error {
        if self.shared.delivered.load(Ordering::Acquire) {
            Error::already_consumed()
        } else {
            Error::receiver_closed()
        }
    }
}

impl<V> Clone for Job<V> {
    fn clone(&self) -> Self {
        Job {
            rx: self.rx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<V> std::fmt::Debug for Job<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("ready", &self.is_ready())
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// The value of a fallible computation, produced by [`wrap_error_func`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithError<V, E>(pub std::result::Result<V, E>);

impl<V, E> WithError<V, E> {
    pub fn is_ok(&self) -> bool {
        self.0.is_ok()
    }

    pub fn value(&self) -> Option<&V> {
        self.0.as_ref().ok()
    }

    pub fn error(&self) -> Option<&E> {
        self.0.as_ref().err()
    }

    pub fn into_result(self) -> std::result::Result<V, E> {
        self.0
    }
}

impl<V, E> From<std::result::Result<V, E>> for WithError<V, E> {
    fn from(result: std::result::Result<V, E>) -> Self {
        WithError(result)
    }
}
