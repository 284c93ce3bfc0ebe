//! Pool command implementation

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context as _, Result, ensure};
use ctxsync::{Context, PoolMode, WorkerPoolBuilder, maybe_all, run_at_worker};
use serde::Serialize;

use crate::commands::emit;

#[derive(Serialize)]
struct PoolReport {
    mode: String,
    workers: usize,
    jobs: usize,
    completed: usize,
    peak_concurrency: usize,
    elapsed_ms: f64,
}

/// Run the pool command
pub fn run(workers: usize, jobs: usize, lazy: bool, task_ms: u64, json: bool) -> Result<()> {
    let mode = if lazy { PoolMode::Lazy } else { PoolMode::Eager };
    let ctx = Context::background();
    let pool = WorkerPoolBuilder::new(workers)
        .mode(mode)
        .thread_name(|i| format!("ctxsync-worker-{i}"))
        .build(&ctx)
        .with_context(|| "Failed to start worker pool")?;
    log::info!("submitting {jobs} tasks to {mode:?} pool of {workers} workers");

    let start = Instant::now();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handles = (0..jobs)
        .map(|_| {
            let running = running.clone();
            let peak = peak.clone();
            run_at_worker(&ctx, &pool, move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(task_ms));
                running.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect::<ctxsync::Result<Vec<_>>>()
        .with_context(|| "Failed to submit task")?;

    let completed = maybe_all(&handles).iter().filter(|r| r.is_ok()).count();
    pool.shutdown();
    pool.wait_shutdown();

    let peak = peak.load(Ordering::SeqCst);
    ensure!(
        peak <= workers,
        "observed {peak} concurrent tasks on a pool of {workers}"
    );

    let report = PoolReport {
        mode: format!("{mode:?}"),
        workers,
        jobs,
        completed,
        peak_concurrency: peak,
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    };
    emit(&report, json, |r| {
        println!("Pool run completed:");
        println!("  Mode: {}", r.mode);
        println!("  Workers: {}", r.workers);
        println!("  Completed: {}/{}", r.completed, r.jobs);
        println!("  Peak concurrency: {}", r.peak_concurrency);
        println!("  Total time: {:.3} ms", r.elapsed_ms);
    })
}
