//! A fire-once event.
//!
//! A [`Signal`] starts unfired, can be fired exactly once, and stays fired
//! forever after. Waiters observe it through a receiver that never carries a
//! message and disconnects when the signal fires.

use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use crossbeam_channel::{Receiver, Sender};

pub struct Signal {
    fired: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl Signal {
    pub fn new() -> Signal {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Signal {
            fired: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Fires the signal, waking every current and future waiter.
    ///
    /// Returns `true` for the call that actually fired it, `false` if it had
    /// already been fired.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Dropping the only sender disconnects the channel.
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Returns the receiver that disconnects once the signal fires.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Blocks until the signal fires.
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }
}

impl Default for Signal {
    fn default() -> Self {
        Signal::new()
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("fired", &self.is_fired())
            .finish()
    }
}
