//! Race and join over several jobs.
//!
//! [`first`] claims the value of whichever job becomes ready first, skipping
//! jobs whose values went elsewhere. [`maybe_all`] waits for every job and keeps
//! going when individual jobs fail.

use crossbeam_channel::Select;
use ctxsync_common::{Error, Result};
use ctxsync_context::Context;

use crate::job::Job;

/// Waits for the first job that yields a value.
///
/// See [`first_context`].
pub fn first<V>(jobs: &[Job<V>]) -> Result<V> {
    first_context(&Context::background(), jobs)
}

/// Waits for the first job that yields a value, or until `ctx` is cancelled.
///
/// Jobs that are already consumed are skipped up front. A job that becomes
/// ready but loses its value to another waiter (or ends without a value) is
/// dropped from the race and the wait continues with the rest.
///
/// # Returns
///
/// - `Ok(value)` claimed from one of the jobs. Which one wins among jobs that
///   finish at nearly the same time is unspecified.
/// - `AlreadyConsumed` if no job is left to yield a value, including when
///   `jobs` is empty.
/// - `ReceiverClosed` if every job ended without ever producing a value.
/// - The cancellation error of `ctx` if it fires first.
pub fn first_context<V>(ctx: &Context, jobs: &[Job<V>]) -> Result<V> {
    if let Some(err) = ctx.err() {
        return Err(err);
    }

    // One readiness registration per live job. The registrations live in
    // `select` and are gone as soon as this function returns.
    let mut select = Select::new();
    let mut observed = jobs
        .iter()
        .filter(|job| !job.is_consumed())
        .map(|job| (select.recv(job.ready()), job))
        .collect::<Vec<_>>();
    let cancel_index = select.recv(ctx.done());
    let mut any_consumed = jobs.is_empty() || observed.len() < jobs.len();

    while !observed.is_empty() {
        let oper = select.select();
        let index = oper.index();
        if index == cancel_index {
            let _ = oper.recv(ctx.done());
            return Err(ctx.cancel_error());
        }

        let pos = observed
            .iter()
            .position(|(i, _)| *i == index)
            .expect("selected operation belongs to an observed job");
        let job = observed[pos].1;
        let _ = oper.recv(job.ready());

        match job.try_wait() {
            Ok(Some(value)) => return Ok(value),
            // Ready but exhausted: it can never yield a value again.
            res => {
                any_consumed |= res.is_ok() || job.is_consumed();
                select.remove(index);
                observed.swap_remove(pos);
            }
        }
    }
    log::trace!("first: all {} jobs exhausted", jobs.len());
    if any_consumed {
        Err(Error::already_consumed())
    } else {
        Err(Error::receiver_closed())
    }
}

/// Waits for every job and returns their outcomes in input order.
pub fn maybe_all<V>(jobs: &[Job<V>]) -> Vec<Result<V>> {
    maybe_all_context(&Context::background(), jobs)
}

/// Waits for every job under `ctx` and returns their outcomes in input order.
///
/// A failing job does not stop the others from being waited. Once `ctx` is
/// cancelled, the remaining jobs report the cancellation error and keep their
/// values.
pub fn maybe_all_context<V>(ctx: &Context, jobs: &[Job<V>]) -> Vec<Result<V>> {
    jobs.iter().map(|job| job.wait_context(ctx)).collect()
}
