//! Context-aware locks.
//!
//! [`Lock`] is a binary exclusive lock and [`SharableLock`] a reader/writer lock
//! that gives pending writers priority over new readers. Acquisition blocks
//! under a [`Context`](ctxsync_context::Context) and fails with its cancellation
//! error when the context fires, leaving the lock as if the call never happened.
//!
//! A successful acquisition returns an [`Unlock`] handle instead of a borrowed
//! guard, so the release can be handed to other threads or tied to a context
//! with [`Unlock::unlock_on_cancel`].

pub mod lock;
pub mod sharable_lock;
pub mod unlock;

pub use lock::Lock;
pub use sharable_lock::SharableLock;
pub use unlock::Unlock;
