//! Cancellation contexts and fire-once signals.
//!
//! Every blocking ctxsync operation takes a [`Context`]. A context is a
//! cancellation token that may additionally carry a deadline; it is cancelled
//! explicitly through its [`CancelHandle`], when its deadline passes, or when
//! its parent context is cancelled. Cancellation is cooperative: it unblocks
//! waiters but never interrupts running computations.
//!
//! Both [`Context::done`] and [`Signal::receiver`] expose a
//! `crossbeam_channel::Receiver<()>` that disconnects when the event happens,
//! so they can be combined with other channel operations in
//! `crossbeam_channel::select!`.

pub mod context;
pub mod signal;

pub use context::{CancelHandle, Context};
pub use signal::Signal;
