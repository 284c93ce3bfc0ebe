//! Lock command implementation

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Result, anyhow, ensure};
use ctxsync::{Context, SharableLock};
use serde::Serialize;

use crate::commands::emit;

#[derive(Serialize)]
struct LockReport {
    readers: usize,
    writers: usize,
    duration_ms: u64,
    shared_acquisitions: usize,
    exclusive_acquisitions: usize,
    violations: usize,
}

#[derive(Default)]
struct Counters {
    active_readers: AtomicUsize,
    active_writers: AtomicUsize,
    shared: AtomicUsize,
    exclusive: AtomicUsize,
    violations: AtomicUsize,
}

/// Run the lock command
pub fn run(readers: usize, writers: usize, duration_ms: u64, json: bool) -> Result<()> {
    log::info!("contending a sharable lock: {readers} readers, {writers} writers, {duration_ms} ms");

    let lock = SharableLock::new();
    let counters = Arc::new(Counters::default());
    let (ctx, _cancel) = Context::background().with_timeout(Duration::from_millis(duration_ms));

    let threads = (0..readers)
        .map(|_| (false, lock.clone(), counters.clone(), ctx.clone()))
        .chain((0..writers).map(|_| (true, lock.clone(), counters.clone(), ctx.clone())))
        .map(|(writer, lock, counters, ctx)| {
            thread::spawn(move || {
                if writer {
                    write_loop(&lock, &counters, &ctx)
                } else {
                    read_loop(&lock, &counters, &ctx)
                }
            })
        })
        .collect::<Vec<_>>();
    for t in threads {
        t.join().map_err(|_| anyhow!("lock worker thread panicked"))?;
    }

    let report = LockReport {
        readers,
        writers,
        duration_ms,
        shared_acquisitions: counters.shared.load(Ordering::SeqCst),
        exclusive_acquisitions: counters.exclusive.load(Ordering::SeqCst),
        violations: counters.violations.load(Ordering::SeqCst),
    };
    emit(&report, json, |r| {
        println!("Lock contention completed:");
        println!("  Shared acquisitions: {}", r.shared_acquisitions);
        println!("  Exclusive acquisitions: {}", r.exclusive_acquisitions);
        println!("  Exclusion violations: {}", r.violations);
    })?;
    ensure!(
        report.violations == 0,
        "readers and writers overlapped {} times",
        report.violations
    );
    Ok(())
}

fn read_loop(lock: &SharableLock, counters: &Counters, ctx: &Context) {
    while let Ok(unlock) = lock.shared_lock(ctx) {
        counters.active_readers.fetch_add(1, Ordering::SeqCst);
        if counters.active_writers.load(Ordering::SeqCst) != 0 {
            counters.violations.fetch_add(1, Ordering::SeqCst);
        }
        counters.shared.fetch_add(1, Ordering::SeqCst);
        thread::yield_now();
        counters.active_readers.fetch_sub(1, Ordering::SeqCst);
        unlock.unlock();
    }
}

fn write_loop(lock: &SharableLock, counters: &Counters, ctx: &Context) {
    while let Ok(unlock) = lock.exclusive_lock(ctx) {
        let writers = counters.active_writers.fetch_add(1, Ordering::SeqCst);
        if writers != 0 || counters.active_readers.load(Ordering::SeqCst) != 0 {
            counters.violations.fetch_add(1, Ordering::SeqCst);
        }
        counters.exclusive.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_micros(100));
        counters.active_writers.fetch_sub(1, Ordering::SeqCst);
        unlock.unlock();
    }
}
