//! Cancellation context.
//!
//! A [`Context`] is a cheap-to-clone handle to a shared cancellation state.
//! Contexts form a tree: [`Context::with_cancel`], [`Context::with_timeout`]
//! and [`Context::with_deadline`] derive children that are cancelled together
//! with their parent, while cancelling a child leaves the parent untouched.
//!
//! ## Lifecycle
//!
//! 1. **Live**: `is_done()` is `false` and `err()` is `None`.
//! 2. **Done**: the first cancellation wins. Its [`CancelCause`] is recorded,
//!    the [`done`](Context::done) channel disconnects, children are cancelled
//!    with the same cause and the callbacks registered with
//!    [`after_func`](Context::after_func) are started.

use std::{
    sync::{Arc, Mutex, PoisonError, Weak},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, select};
use ctxsync_common::{CancelCause, Error};

use crate::signal::Signal;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
pub struct Context(Arc<ContextInner>);

/// Cancels the context it was created with.
///
/// Dropping the handle does not cancel the context.
#[derive(Clone)]
pub struct CancelHandle(Context);

struct ContextInner {
    done: Signal,
    deadline: Option<Instant>,
    state: Mutex<ContextState>,
}

#[derive(Default)]
struct ContextState {
    cause: Option<CancelCause>,
    children: Vec<Weak<ContextInner>>,
    callbacks: Vec<Callback>,
}

impl Context {
    /// Returns a context that is never cancelled and has no deadline.
    pub fn background() -> Context {
        Context::with_inner(None)
    }

    /// Derives a child context that can be cancelled through the returned handle.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let child = Context::with_inner(self.deadline());
        self.attach(&child);
        (child.clone(), CancelHandle(child))
    }

    /// Derives a child context that is cancelled with
    /// [`CancelCause::DeadlineExceeded`] after `timeout`.
    ///
    /// A timeout too large to be represented as an [`Instant`] sets no deadline
    /// of its own; the child then behaves as if made by [`with_cancel`](Self::with_cancel).
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelHandle) {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.with_cancel(),
        }
    }

    /// Derives a child context that is cancelled with
    /// [`CancelCause::DeadlineExceeded`] at `deadline`.
    ///
    /// If the parent already has an earlier deadline, the child inherits it and
    /// relies on the parent to cancel it.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelHandle) {
        let inherited = self.deadline().filter(|parent| *parent <= deadline);
        let child = Context::with_inner(Some(inherited.unwrap_or(deadline)));
        self.attach(&child);

        if inherited.is_none() {
            if deadline <= Instant::now() {
                child.cancel(CancelCause::DeadlineExceeded);
            } else {
                child.watch_deadline(deadline);
            }
        }
        (child.clone(), CancelHandle(child))
    }

    /// Returns the receiver that disconnects when this context is done.
    ///
    /// The channel never carries a message, so any completed receive on it
    /// means the context has been cancelled.
    pub fn done(&self) -> &Receiver<()> {
        self.0.done.receiver()
    }

    pub fn is_done(&self) -> bool {
        self.0.done.is_fired()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.0.deadline
    }

    /// Returns the cancellation cause, or `None` while the context is live.
    pub fn cause(&self) -> Option<CancelCause> {
        if !self.is_done() {
            return None;
        }
        self.0.lock_state().cause.clone()
    }

    /// Returns the cancellation error, or `None` while the context is live.
    pub fn err(&self) -> Option<Error> {
        self.cause().map(Error::cancelled)
    }

    /// Returns the cancellation error of a context that is known to be done.
    ///
    /// Intended for the `recv(ctx.done())` arm of a `select!`.
    pub fn cancel_error(&self) -> Error {
        self.err()
            .unwrap_or_else(|| Error::cancelled(CancelCause::Canceled))
    }

    /// Runs `f` on its own thread once this context is done.
    ///
    /// If the context is already done, `f` is started immediately. If the
    /// context is never cancelled, `f` never runs.
    pub fn after_func<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.0.lock_state();
            if state.cause.is_none() {
                state.callbacks.push(Box::new(f));
                return;
            }
        }
        spawn_callback(Box::new(f));
    }

    fn with_inner(deadline: Option<Instant>) -> Context {
        Context(Arc::new(ContextInner {
            done: Signal::new(),
            deadline,
            state: Mutex::new(ContextState::default()),
        }))
    }

    fn attach(&self, child: &Context) {
        let mut state = self.0.lock_state();
        match state.cause.clone() {
            Some(cause) => {
                drop(state);
                child.cancel(cause);
            }
            None => {
                state.children.retain(|weak| weak.strong_count() > 0);
                state.children.push(Arc::downgrade(&child.0));
            }
        }
    }

    fn watch_deadline(&self, deadline: Instant) {
        let ctx = self.clone();
        thread::Builder::new()
            .name("ctxsync-deadline".into())
            .spawn(move || {
                select! {
                    recv(ctx.done()) -> _ => {}
                    recv(crossbeam_channel::at(deadline)) -> _ => {
                        ctx.cancel(CancelCause::DeadlineExceeded);
                    }
                }
            })
            .expect("spawn deadline watcher");
    }

    fn cancel(&self, cause: CancelCause) {
        let (children, callbacks) = {
            let mut state = self.0.lock_state();
            if state.cause.is_some() {
                return;
            }
            state.cause = Some(cause.clone());
            (
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.callbacks),
            )
        };
        log::trace!("context cancelled: {cause}");

        self.0.done.fire();
        for child in children.iter().filter_map(Weak::upgrade) {
            Context(child).cancel(cause.clone());
        }
        callbacks.into_iter().for_each(spawn_callback);
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline())
            .field("cause", &self.cause())
            .finish()
    }
}

impl ContextInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CancelHandle {
    /// Cancels the context with [`CancelCause::Canceled`].
    ///
    /// Has no effect if the context is already done.
    pub fn cancel(&self) {
        self.0.cancel(CancelCause::Canceled);
    }

    /// Cancels the context with a custom cause.
    pub fn cancel_with_cause(&self, cause: impl Into<String>) {
        self.0.cancel(CancelCause::Custom(cause.into()));
    }

    pub fn context(&self) -> &Context {
        &self.0
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CancelHandle").field(&self.0).finish()
    }
}

fn spawn_callback(f: Callback) {
    if let Err(err) = thread::Builder::new()
        .name("ctxsync-after-func".into())
        .spawn(f)
    {
        log::error!("failed to start context callback: {err}");
    }
}
