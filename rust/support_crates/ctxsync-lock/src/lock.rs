use crossbeam_channel::{Receiver, Sender, select};
use ctxsync_common::Result;
use ctxsync_context::Context;

use crate::unlock::Unlock;

/// An exclusive lock whose acquisition can be cancelled.
///
/// The lock is a single-slot channel: acquiring puts a token into the slot and
/// releasing takes it out. Cloning a `Lock` returns another handle to the same
/// lock.
#[derive(Clone)]
pub struct Lock {
    slot_tx: Sender<()>,
    slot_rx: Receiver<()>,
}

impl Lock {
    pub fn new() -> Lock {
        let (slot_tx, slot_rx) = crossbeam_channel::bounded(1);
        Lock { slot_tx, slot_rx }
    }

    /// Blocks until the lock is acquired or `ctx` is cancelled.
    ///
    /// An already cancelled context fails without trying to acquire, even if the
    /// lock is free.
    pub fn acquire(&self, ctx: &Context) -> Result<Unlock> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        select! {
            send(self.slot_tx, ()) -> _ => Ok(self.unlocker()),
            recv(ctx.done()) -> _ => Err(ctx.cancel_error()),
        }
    }

    /// Acquires the lock if it is free right now.
    pub fn try_acquire(&self) -> Option<Unlock> {
        self.slot_tx.try_send(()).ok().map(|()| self.unlocker())
    }

    pub fn is_locked(&self) -> bool {
        self.slot_tx.is_full()
    }

    /// The slot sender, for callers that race the acquisition against other
    /// channel operations. A completed send must be paired with [`unlocker`](Self::unlocker).
    pub(crate) fn slot(&self) -> &Sender<()> {
        &self.slot_tx
    }

    pub(crate) fn unlocker(&self) -> Unlock {
        let slot = self.slot_rx.clone();
        Unlock::new(move || {
            if slot.try_recv().is_err() {
                log::error!("released a lock that was not held");
            }
        })
    }
}

impl Default for Lock {
    fn default() -> Self {
        Lock::new()
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("locked", &self.is_locked())
            .finish()
    }
}
