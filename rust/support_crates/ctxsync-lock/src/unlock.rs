use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use ctxsync_context::Context;

/// Releases a held lock.
///
/// `Unlock` is cheap to clone and all clones release the same acquisition. The
/// release happens exactly once: on the first call to [`unlock`](Self::unlock)
/// from any clone, or when the last clone is dropped. Further calls, including
/// concurrent ones, have no effect.
#[must_use = "dropping the last Unlock releases the lock immediately"]
#[derive(Clone)]
pub struct Unlock(Arc<UnlockInner>);

struct UnlockInner {
    released: AtomicBool,
    release: Box<dyn Fn() + Send + Sync>,
}

impl UnlockInner {
    fn release(&self) {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            (self.release)();
        }
    }
}

impl Drop for UnlockInner {
    fn drop(&mut self) {
        self.release();
    }
}

impl Unlock {
    pub(crate) fn new(release: impl Fn() + Send + Sync + 'static) -> Unlock {
        Unlock(Arc::new(UnlockInner {
            released: AtomicBool::new(false),
            release: Box::new(release),
        }))
    }

    /// Releases `first`, then `then`, as a single acquisition.
    pub(crate) fn chain(first: Unlock, then: Unlock) -> Unlock {
        Unlock::new(move || {
            first.unlock();
            then.unlock();
        })
    }

    pub fn unlock(&self) {
        self.0.release();
    }

    pub fn is_unlocked(&self) -> bool {
        self.0.released.load(Ordering::Acquire)
    }

    /// Releases the lock once `ctx` is cancelled, or right away if it already is.
    ///
    /// The context keeps a clone of this handle until it fires, so the lock stays
    /// held even if every other clone is dropped.
    pub fn unlock_on_cancel(&self, ctx: &Context) {
        let unlock = self.clone();
        ctx.after_func(move || unlock.unlock());
    }
}

impl std::fmt::Debug for Unlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unlock")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}
