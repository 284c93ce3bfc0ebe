//! A reader/writer lock with writer priority.
//!
//! [`SharableLock`] is built from two [`Lock`]s and a reader tracker:
//!
//! - The underlying lock is held either by one writer or, on behalf of all
//!   readers, by a tracker thread.
//! - The writer gate is raised by a writer before it waits for the underlying
//!   lock. Readers must pass the gate to be admitted, so once a writer is
//!   waiting no new reader gets in ahead of it. An entering reader also holds
//!   the gate briefly, so writers are counted separately.
//! - The first reader claims the underlying lock and starts the tracker. Later
//!   readers register with the tracker over a rendezvous channel and never
//!   touch the underlying lock. When the last reader leaves, the tracker
//!   releases it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, Sender, select};
use ctxsync_common::Result;
use ctxsync_context::Context;

use crate::{lock::Lock, unlock::Unlock};

/// A context-aware lock shared by readers and exclusive to writers.
///
/// Cloning returns another handle to the same lock.
#[derive(Clone)]
pub struct SharableLock {
    lock: Lock,
    writer_gate: Lock,
    writers: Arc<AtomicUsize>,
    readers: ReaderChannels,
}

#[derive(Clone)]
struct ReaderChannels {
    join_tx: Sender<()>,
    join_rx: Receiver<()>,
    leave_tx: Sender<()>,
    leave_rx: Receiver<()>,
}

impl SharableLock {
    pub fn new() -> SharableLock {
        let (join_tx, join_rx) = crossbeam_channel::bounded(0);
        let (leave_tx, leave_rx) = crossbeam_channel::bounded(0);
        SharableLock {
            lock: Lock::new(),
            writer_gate: Lock::new(),
            writers: Arc::new(AtomicUsize::new(0)),
            readers: ReaderChannels {
                join_tx,
                join_rx,
                leave_tx,
                leave_rx,
            },
        }
    }

    /// Acquires the lock for reading.
    ///
    /// Waits while a writer holds the lock or is waiting for it. The returned
    /// handle releases this reader's share.
    pub fn shared_lock(&self, ctx: &Context) -> Result<Unlock> {
        let gate = self.writer_gate.acquire(ctx)?;
        select! {
            send(self.readers.join_tx, ()) -> _ => {}
            send(self.lock.slot(), ()) -> _ => self.start_tracker(),
            recv(ctx.done()) -> _ => return Err(ctx.cancel_error()),
        }
        drop(gate);

        let leave = self.readers.leave_tx.clone();
        Ok(Unlock::new(move || {
            let _ = leave.send(());
        }))
    }

    /// Acquires the lock for writing.
    ///
    /// New readers are held back from the moment this call starts waiting;
    /// readers already admitted are waited out.
    pub fn exclusive_lock(&self, ctx: &Context) -> Result<Unlock> {
        let gate = self.writer_gate.acquire(ctx)?;
        let writer = self.register_writer();
        let unlock = self.lock.acquire(ctx)?;
        Ok(Unlock::chain(unlock, Unlock::chain(writer, gate)))
    }

    /// Returns `true` while a reader or a writer holds the lock.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Returns `true` while a writer holds the lock or waits for readers to leave.
    ///
    /// Readers passing the gate on their way in are not counted.
    pub fn is_write_pending(&self) -> bool {
        self.writers.load(Ordering::Acquire) > 0
    }

    /// Counts a writer in until the returned handle is released or dropped.
    fn register_writer(&self) -> Unlock {
        self.writers.fetch_add(1, Ordering::AcqRel);
        let writers = self.writers.clone();
        Unlock::new(move || {
            writers.fetch_sub(1, Ordering::AcqRel);
        })
    }

    fn start_tracker(&self) {
        let unlock = self.lock.unlocker();
        let readers = self.readers.clone();
        thread::Builder::new()
            .name("ctxsync-readers".into())
            .spawn(move || readers.track(unlock))
            .expect("spawn reader tracker");
    }
}

impl ReaderChannels {
    /// Counts readers in and out, then releases the underlying lock.
    ///
    /// Starts with the reader that claimed the lock. Holding `self` keeps both
    /// channels connected for as long as the tracker runs.
    fn track(self, unlock: Unlock) {
        log::debug!("reader tracker started");
        let mut readers = 1usize;
        while readers > 0 {
            select! {
                recv(self.join_rx) -> msg => {
                    msg.expect("BUG: reader join channel closed");
                    readers += 1;
                }
                recv(self.leave_rx) -> msg => {
                    msg.expect("BUG: reader leave channel closed");
                    readers -= 1;
                }
            }
        }
        unlock.unlock();
        log::debug!("last reader left, lock released");
    }
}

impl Default for SharableLock {
    fn default() -> Self {
        SharableLock::new()
    }
}

impl std::fmt::Debug for SharableLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharableLock")
            .field("locked", &self.is_locked())
            .field("write_pending", &self.is_write_pending())
            .finish()
    }
}
