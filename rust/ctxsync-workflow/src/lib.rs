//! Single-consumption jobs, race/join combinators and worker pools.
//!
//! Every blocking operation in this crate takes a [`Context`](ctxsync_context::Context)
//! and returns early with a cancellation error when the context fires. Cancelling a
//! wait never stops the underlying computation; it only abandons the waiting.
//!
//! # Key Components
//!
//! ## Jobs
//!
//! - [`job::Job`] - A handle to a computation running on its own thread. The value
//!   is delivered to exactly one successful waiter; every other wait fails with
//!   `AlreadyConsumed` instead of blocking.
//! - [`job::run`] - Starts a computation on a fresh thread.
//! - [`job::wrap_error_func`] - Adapts a fallible closure so it can be `run`.
//!
//! ## Combinators
//!
//! - [`combinators::first`] - Races several jobs and claims whichever becomes
//!   ready first.
//! - [`combinators::maybe_all`] - Waits for every job, reporting a positional
//!   result per job.
//!
//! ## Worker Pools
//!
//! - [`worker_pool::WorkerPool`] - Either `n` persistent worker threads (eager) or
//!   up to `n` short-lived threads spawned on demand (lazy).
//! - [`worker_pool::Dispatch`] - The seam used by [`worker_pool::run_at_worker`];
//!   custom executors implement it to produce jobs.

pub mod combinators;
pub mod job;
pub mod worker_pool;
