//! # ctxsync: context-cancellable concurrency primitives
//!
//! ctxsync provides blocking, thread-based building blocks whose every wait can be
//! abandoned through a cancellation [`Context`]:
//!
//! * **Jobs**: a computation started with [`run`] or [`run_at_worker`] delivers its
//!   value to exactly one waiter. Other waiters fail with `AlreadyConsumed` instead
//!   of blocking forever.
//! * **Combinators**: [`first`] races jobs, [`maybe_all`] joins them.
//! * **Worker pools**: [`WorkerPool`] bounds how many computations run at once,
//!   either with persistent threads or with threads spawned on demand.
//! * **Locks**: [`Lock`] and the writer-priority [`SharableLock`] return an
//!   idempotent [`Unlock`] handle that can also be tied to a context.
//!
//! Cancellation is cooperative. A fired context unblocks the waiter but never
//! interrupts a running computation, and a cancelled wait leaves the job's value in
//! place for a later waiter.
//!
//! ## Module Organization
//!
//! * [`common`] - Error and result types shared by all components
//! * [`workflow`] - Jobs, combinators and worker pools
//!
//! ### Support Modules
//!
//! * [`support::context`] - Cancellation contexts and fire-once signals
//! * [`support::lock`] - Context-aware locks

pub use ctxsync_common as common;
pub use ctxsync_workflow as workflow;

pub mod support {
    pub use ctxsync_context as context;
    pub use ctxsync_lock as lock;
}

pub use ctxsync_common::{CancelCause, Error, ErrorKind, Result};
pub use ctxsync_context::{CancelHandle, Context, Signal};
pub use ctxsync_lock::{Lock, SharableLock, Unlock};
pub use ctxsync_workflow::{
    combinators::{first, first_context, maybe_all, maybe_all_context},
    job::{Job, WithError, run, wrap_error_func},
    worker_pool::{Dispatch, PoolMode, Task, WorkerPool, WorkerPoolBuilder, run_at_worker},
};
