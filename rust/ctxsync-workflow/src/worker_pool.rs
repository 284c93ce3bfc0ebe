//! Context-bound worker pools.
//!
//! A [`WorkerPool`] accepts tasks over a rendezvous channel: [`send`](Dispatch::send)
//! returns only once a worker has taken the task, so a pool never queues work
//! beyond its concurrency limit. Two flavours are available:
//!
//! - **Eager** ([`WorkerPool::new`]): `n` worker threads are started up front and
//!   live until the pool shuts down.
//! - **Lazy** ([`WorkerPool::new_lazy`]): a dispatcher thread hands each task to a
//!   fresh thread, admitting at most `n` of them at a time. Task threads exit as
//!   soon as their task returns.
//!
//! ## Shutdown
//!
//! Every pool runs under a child of the context it was created with. The pool
//! shuts down when that context is cancelled (through the parent or through
//! [`WorkerPool::shutdown`]), or when the last pool handle is dropped. Workers
//! finish the task they are running and then exit; further sends fail with
//! `AlreadyShutdown`.

use std::{panic::AssertUnwindSafe, sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, select};
use ctxsync_common::{Error, Result, verify_arg};
use ctxsync_context::{CancelHandle, Context};

use crate::job::{Job, new_job};

/// A boxed unit of work executed by a worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

type ThreadNameFn = Arc<dyn Fn(usize) -> String + Send + Sync>;

/// Anything that can take a task and run it somewhere.
///
/// [`run_at_worker`] builds jobs on top of this trait, so custom executors only
/// need to implement `send`.
pub trait Dispatch {
    /// Hands `task` over for execution.
    ///
    /// May block until the executor can accept the task; `ctx` bounds that wait
    /// and has no effect on the task once accepted.
    fn send(&self, ctx: &Context, task: Task) -> Result<()>;
}

/// Runs `f` through `worker` and returns the job that receives its value.
///
/// `ctx` bounds only the hand-over to the worker. If the hand-over fails, the
/// error is returned and no job is created.
pub fn run_at_worker<D, F, V>(ctx: &Context, worker: &D, f: F) -> Result<Job<V>>
where
    D: Dispatch + ?Sized,
    F: FnOnce() -> V + Send + 'static,
    V: Send + 'static,
{
    let (job, task) = new_job(f);
    worker.send(ctx, task)?;
    Ok(job)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolMode {
    /// A fixed set of persistent worker threads.
    #[default]
    Eager,
    /// One short-lived thread per task, capped at the pool size.
    Lazy,
}

/// A pool of worker threads bound to a cancellation context.
///
/// `WorkerPool` is cheap to clone and all clones share the same workers.
#[derive(Clone)]
pub struct WorkerPool(Arc<PoolInner>);

struct PoolInner {
    tx: Sender<Task>,
    /// Disconnects once every worker thread has exited.
    exit: Receiver<()>,
    ctx: Context,
    cancel: CancelHandle,
    mode: PoolMode,
    size: usize,
}

impl WorkerPool {
    /// Creates an eager pool with `num_workers` persistent threads.
    ///
    /// # Panics
    ///
    /// Panics if `num_workers` is 0.
    pub fn new(ctx: &Context, num_workers: usize) -> WorkerPool {
        Self::with_mode(ctx, num_workers, PoolMode::Eager)
    }

    /// Creates a lazy pool running at most `max_workers` tasks at a time.
    ///
    /// # Panics
    ///
    /// Panics if `max_workers` is 0.
    pub fn new_lazy(ctx: &Context, max_workers: usize) -> WorkerPool {
        Self::with_mode(ctx, max_workers, PoolMode::Lazy)
    }

    /// Creates a pool of the given mode.
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0. Use [`WorkerPoolBuilder`] to get an error instead.
    pub fn with_mode(ctx: &Context, size: usize, mode: PoolMode) -> WorkerPool {
        assert_ne!(size, 0);
        Self::start(ctx, size, mode, Arc::new(|_| String::new()))
    }

    pub fn mode(&self) -> PoolMode {
        self.0.mode
    }

    pub fn size(&self) -> usize {
        self.0.size
    }

    /// Hands `task` to an idle worker without blocking.
    ///
    /// Fails with `NoIdleWorker` when no worker is waiting for work right now,
    /// and with `AlreadyShutdown` once the pool is shut down.
    pub fn try_send(&self, task: Task) -> Result<()> {
        if self.0.ctx.is_done() {
            return Err(Error::already_shutdown());
        }
        self.0.tx.try_send(task).map_err(|err| match err {
            TrySendError::Full(_) => Error::no_idle_worker(),
            TrySendError::Disconnected(_) => Error::already_shutdown(),
        })
    }

    /// Stops accepting tasks and lets the workers exit.
    ///
    /// Running tasks are not interrupted. Use [`wait_shutdown`](Self::wait_shutdown)
    /// to wait for them.
    pub fn shutdown(&self) {
        self.0.cancel.cancel_with_cause("worker pool shut down");
    }

    /// Returns `true` once every worker thread has exited.
    pub fn is_shutdown(&self) -> bool {
        matches!(self.0.exit.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until every worker thread has exited.
    ///
    /// Only returns after the pool's context is cancelled, so this is normally
    /// preceded by [`shutdown`](Self::shutdown) or by cancelling the parent.
    pub fn wait_shutdown(&self) {
        let _ = self.0.exit.recv();
    }

    fn start(
        ctx: &Context,
        size: usize,
        mode: PoolMode,
        thread_name: ThreadNameFn,
    ) -> WorkerPool {
        let (pool_ctx, cancel) = ctx.with_cancel();
        let (tx, rx) = crossbeam_channel::bounded::<Task>(0);
        let (exit_tx, exit_rx) = crossbeam_channel::bounded::<()>(0);

        log::debug!("starting {mode:?} worker pool of size {size}");
        match mode {
            PoolMode::Eager => {
                for index in 0..size {
                    let rx = rx.clone();
                    let ctx = pool_ctx.clone();
                    let exit = exit_tx.clone();
                    named_thread(thread_name(index))
                        .spawn(move || Self::worker_fn(index, rx, ctx, exit))
                        .expect("spawn thread");
                }
            }
            PoolMode::Lazy => {
                let ctx = pool_ctx.clone();
                thread::Builder::new()
                    .name("ctxsync-lazy-dispatch".into())
                    .spawn(move || Self::dispatch_fn(size, rx, ctx, exit_tx, thread_name))
                    .expect("spawn thread");
            }
        }

        WorkerPool(Arc::new(PoolInner {
            tx,
            exit: exit_rx,
            ctx: pool_ctx,
            cancel,
            mode,
            size,
        }))
    }

    /// Eager worker loop: runs tasks until the queue closes or the context fires.
    fn worker_fn(index: usize, rx: Receiver<Task>, ctx: Context, _exit: Sender<()>) {
        loop {
            select! {
                recv(rx) -> task => match task {
                    Ok(task) => run_task(task),
                    Err(_) => break,
                },
                recv(ctx.done()) -> _ => break,
            }
        }
        log::trace!("worker {index} exited");
    }

    /// Lazy dispatcher loop.
    ///
    /// A slot is reserved before a task is accepted, so the number of task
    /// threads alive at any time never exceeds `size`.
    fn dispatch_fn(
        size: usize,
        rx: Receiver<Task>,
        ctx: Context,
        exit: Sender<()>,
        thread_name: ThreadNameFn,
    ) {
        let (slot_tx, slot_rx) = crossbeam_channel::bounded::<()>(size);
        let mut spawned = 0usize;
        loop {
            select! {
                send(slot_tx, ()) -> _ => {}
                recv(ctx.done()) -> _ => break,
            }
            let task = select! {
                recv(rx) -> task => match task {
                    Ok(task) => task,
                    Err(_) => break,
                },
                recv(ctx.done()) -> _ => break,
            };

            let permit = Permit {
                slots: slot_rx.clone(),
                _exit: exit.clone(),
            };
            let spawn = named_thread(thread_name(spawned)).spawn(move || {
                let _permit = permit;
                run_task(task);
            });
            // On failure the closure is dropped, which releases the slot and
            // closes the job.
            if let Err(err) = spawn {
                log::error!("failed to start lazy worker thread: {err}");
            }
            spawned += 1;
        }
        log::debug!("lazy dispatcher exited after {spawned} tasks");
    }
}

impl Dispatch for WorkerPool {
    /// Blocks until a worker takes `task`.
    ///
    /// # Returns
    ///
    /// - `Ok(())` once a worker has accepted the task.
    /// - `AlreadyShutdown` if the pool is shut down, before or during the wait.
    /// - The cancellation error of `ctx` if it fires first. An already cancelled
    ///   context fails without touching the pool.
    fn send(&self, ctx: &Context, task: Task) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let inner = &self.0;
        if inner.ctx.is_done() {
            return Err(Error::already_shutdown());
        }
        select! {
            send(inner.tx, task) -> res => res.map_err(|_| Error::already_shutdown()),
            recv(inner.ctx.done()) -> _ => Err(Error::already_shutdown()),
            recv(ctx.done()) -> _ => Err(ctx.cancel_error()),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("mode", &self.0.mode)
            .field("size", &self.0.size)
            .field("shut_down", &self.0.ctx.is_done())
            .finish()
    }
}

/// Configures and starts a [`WorkerPool`].
pub struct WorkerPoolBuilder {
    size: usize,
    mode: PoolMode,
    thread_name: ThreadNameFn,
}

impl WorkerPoolBuilder {
    pub fn new(size: usize) -> WorkerPoolBuilder {
        WorkerPoolBuilder {
            size,
            mode: PoolMode::default(),
            thread_name: Arc::new(|_| String::new()),
        }
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn mode(mut self, mode: PoolMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the function naming worker threads after their index.
    ///
    /// Threads for which it returns an empty string are left unnamed. In lazy
    /// mode the index counts task threads spawned so far.
    pub fn thread_name(
        mut self,
        thread_name: impl Fn(usize) -> String + Send + Sync + 'static,
    ) -> Self {
        self.thread_name = Arc::new(thread_name);
        self
    }

    pub fn build(self, ctx: &Context) -> Result<WorkerPool> {
        let size = self.size;
        verify_arg!(size, size > 0);
        Ok(WorkerPool::start(ctx, size, self.mode, self.thread_name))
    }
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        let size = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8);
        WorkerPoolBuilder::new(size)
    }
}

/// A lazy pool slot, held by a task thread for as long as it runs.
struct Permit {
    slots: Receiver<()>,
    _exit: Sender<()>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.slots.try_recv();
    }
}

fn named_thread(name: String) -> thread::Builder {
    let builder = thread::Builder::new();
    if name.is_empty() {
        builder
    } else {
        builder.name(name)
    }
}

/// Runs a task, keeping the worker alive if it panics.
fn run_task(task: Task) {
    if std::panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        log::warn!("worker task panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::{Duration, Instant},
    };

    use ctxsync_context::Context;

    use super::{Dispatch, PoolMode, Task, WorkerPool, WorkerPoolBuilder, run_at_worker};
    use crate::combinators::maybe_all;

    const MODES: [PoolMode; 2] = [PoolMode::Eager, PoolMode::Lazy];

    /// Runs tasks on the calling thread.
    struct Inline;

    impl Dispatch for Inline {
        fn send(&self, _ctx: &Context, task: Task) -> ctxsync_common::Result<()> {
            task();
            Ok(())
        }
    }

    #[test]
    fn test_run_at_worker() {
        for mode in MODES {
            let pool = WorkerPool::with_mode(&Context::background(), 4, mode);
            let jobs = (0..16)
                .map(|i| run_at_worker(&Context::background(), &pool, move || i * 2).unwrap())
                .collect::<Vec<_>>();
            for (i, res) in maybe_all(&jobs).into_iter().enumerate() {
                assert_eq!(res.unwrap(), i * 2);
            }
        }
    }

    #[test]
    #[should_panic]
    fn test_new_pool_zero_workers() {
        WorkerPool::new(&Context::background(), 0);
    }

    #[test]
    fn test_pool_bound() {
        for mode in MODES {
            let ctx = Context::background();
            let pool = WorkerPool::with_mode(&ctx, 3, mode);
            let running = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let (started_tx, started_rx) = crossbeam_channel::unbounded::<()>();
            let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();

            let submitter = {
                let pool = pool.clone();
                let running = running.clone();
                let peak = peak.clone();
                std::thread::spawn(move || {
                    (0..4)
                        .map(|_| {
                            let running = running.clone();
                            let peak = peak.clone();
                            let started = started_tx.clone();
                            let release = release_rx.clone();
                            run_at_worker(&Context::background(), &pool, move || {
                                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                started.send(()).unwrap();
                                let _ = release.recv();
                                running.fetch_sub(1, Ordering::SeqCst);
                            })
                            .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            };

            for _ in 0..3 {
                started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            }
            assert!(started_rx.recv_timeout(Duration::from_millis(50)).is_err());

            release_tx.send(()).unwrap();
            started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            for _ in 0..3 {
                release_tx.send(()).unwrap();
            }

            let jobs = submitter.join().unwrap();
            assert!(maybe_all(&jobs).iter().all(|r| r.is_ok()));
            assert_eq!(peak.load(Ordering::SeqCst), 3, "{mode:?}");
        }
    }

    #[test]
    fn test_send_cancelled_while_busy() {
        for mode in MODES {
            let pool = WorkerPool::with_mode(&Context::background(), 1, mode);
            let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
            let busy = run_at_worker(&Context::background(), &pool, move || {
                let _ = release_rx.recv();
            })
            .unwrap();

            let (ctx, _cancel) = Context::background().with_timeout(Duration::from_millis(20));
            let err = run_at_worker(&ctx, &pool, || ()).unwrap_err();
            assert!(err.is_cancelled(), "{mode:?}");

            drop(release_tx);
            busy.wait().unwrap();
            let job = run_at_worker(&Context::background(), &pool, || 1).unwrap();
            assert_eq!(job.wait().unwrap(), 1);
        }
    }

    #[test]
    fn test_try_send() {
        for mode in MODES {
            let pool = WorkerPool::with_mode(&Context::background(), 1, mode);
            let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
            pool.send(
                &Context::background(),
                Box::new(move || {
                    let _ = release_rx.recv();
                }),
            )
            .unwrap();

            let err = pool.try_send(Box::new(|| ())).unwrap_err();
            assert_eq!(err.to_string(), "no idle worker is available");

            drop(release_tx);
            let deadline = Instant::now() + Duration::from_secs(5);
            while pool.try_send(Box::new(|| ())).is_err() {
                assert!(Instant::now() < deadline, "{mode:?}: worker never became idle");
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    #[test]
    fn test_shutdown() {
        for mode in MODES {
            let pool = WorkerPool::with_mode(&Context::background(), 2, mode);
            let job = run_at_worker(&Context::background(), &pool, || 5).unwrap();
            assert_eq!(job.wait().unwrap(), 5);

            pool.shutdown();
            pool.wait_shutdown();
            assert!(pool.is_shutdown());

            let err = run_at_worker(&Context::background(), &pool, || ()).unwrap_err();
            assert!(err.is_shutdown(), "{mode:?}");
            assert!(pool.try_send(Box::new(|| ())).unwrap_err().is_shutdown());
        }
    }

    #[test]
    fn test_pool_on_cancelled_context() {
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        for mode in MODES {
            let pool = WorkerPool::with_mode(&ctx, 2, mode);
            let err = run_at_worker(&Context::background(), &pool, || ()).unwrap_err();
            assert!(err.is_shutdown(), "{mode:?}");
            pool.wait_shutdown();
        }
    }

    #[test]
    fn test_parent_cancel_shuts_down_pool() {
        for mode in MODES {
            let (ctx, cancel) = Context::background().with_cancel();
            let pool = WorkerPool::with_mode(&ctx, 2, mode);
            assert!(!pool.is_shutdown());

            cancel.cancel();
            pool.wait_shutdown();
            let err = pool.send(&Context::background(), Box::new(|| ())).unwrap_err();
            assert!(err.is_shutdown());
        }
    }

    #[test]
    fn test_panicking_task_keeps_worker() {
        for mode in MODES {
            let pool = WorkerPool::with_mode(&Context::background(), 1, mode);
            let broken = run_at_worker(&Context::background(), &pool, || -> usize {
                panic!("task failed")
            })
            .unwrap();
            assert!(!broken.wait().unwrap_err().is_already_consumed());

            let job = run_at_worker(&Context::background(), &pool, || 9).unwrap();
            assert_eq!(job.wait().unwrap(), 9, "{mode:?}");
        }
    }

    #[test]
    fn test_builder() {
        let err = WorkerPoolBuilder::new(0)
            .build(&Context::background())
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid argument size: size > 0");

        let pool = WorkerPoolBuilder::new(1)
            .mode(PoolMode::Eager)
            .thread_name(|i| format!("worker-{i}"))
            .build(&Context::background())
            .unwrap();
        assert_eq!(pool.mode(), PoolMode::Eager);
        assert_eq!(pool.size(), 1);

        let job = run_at_worker(&Context::background(), &pool, || {
            std::thread::current().name().map(String::from)
        })
        .unwrap();
        assert_eq!(job.wait().unwrap().as_deref(), Some("worker-0"));
    }

    #[test]
    fn test_custom_dispatch() {
        let job = run_at_worker(&Context::background(), &Inline, || "inline").unwrap();
        assert!(job.is_ready());
        assert_eq!(job.wait().unwrap(), "inline");

        let dispatch: &dyn Dispatch = &Inline;
        let job = run_at_worker(&Context::background(), dispatch, || 1).unwrap();
        assert_eq!(job.try_wait().unwrap(), Some(1));
    }
}
