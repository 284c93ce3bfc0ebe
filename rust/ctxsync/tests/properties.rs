use std::{
    collections::HashSet,
    sync::{Arc, Barrier, Mutex},
    time::{Duration, Instant},
};

use ctxsync::{
    CancelCause, Context, Job, Lock, PoolMode, SharableLock, WorkerPool, first, first_context,
    maybe_all, run, run_at_worker,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn timeout(ms: u64) -> Context {
    Context::background()
        .with_timeout(Duration::from_millis(ms))
        .0
}

fn numbered_jobs(n: usize) -> Vec<Job<usize>> {
    (0..n)
        .map(|i| {
            run(move || {
                std::thread::sleep(Duration::from_millis((i % 4) as u64 * 5));
                i
            })
        })
        .collect()
}

#[test]
fn run_then_wait_twice() {
    init_logging();
    let job = run(|| 1);
    assert_eq!(job.wait().unwrap(), 1);
    assert!(job.wait().unwrap_err().is_already_consumed());
}

#[test]
fn single_delivery_among_concurrent_waiters() {
    init_logging();
    const WAITERS: usize = 16;

    for _ in 0..10 {
        let job = run(|| String::from("payload"));
        let barrier = Arc::new(Barrier::new(WAITERS));
        let waiters = (0..WAITERS)
            .map(|_| {
                let job = job.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    job.wait()
                })
            })
            .collect::<Vec<_>>();

        let results = waiters
            .into_iter()
            .map(|w| w.join().unwrap())
            .collect::<Vec<_>>();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let consumed = results
            .iter()
            .filter(|r| r.as_ref().is_err_and(|e| e.is_already_consumed()))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(consumed, WAITERS - 1);
    }
}

#[test]
fn race_exhaustion() {
    init_logging();
    const N: usize = 20;

    let jobs = numbered_jobs(N);
    let values = (0..N)
        .map(|_| first(&jobs).unwrap())
        .collect::<HashSet<_>>();
    assert_eq!(values, (0..N).collect::<HashSet<_>>());
    assert!(first(&jobs).unwrap_err().is_already_consumed());
}

#[test]
fn race_is_partition_agnostic() {
    init_logging();
    const N: usize = 17;

    let jobs = numbered_jobs(N);
    let (left, right) = jobs.split_at(N / 3);
    let mut claimed = 0;
    for half in [left, right] {
        loop {
            match first(half) {
                Ok(_) => claimed += 1,
                Err(err) => {
                    assert!(err.is_already_consumed());
                    break;
                }
            }
        }
    }
    assert_eq!(claimed, N);
}

#[test]
fn join_total_recall() {
    init_logging();
    const N: usize = 12;

    let jobs = numbered_jobs(N);
    let values = maybe_all(&jobs)
        .into_iter()
        .map(|r| r.unwrap())
        .collect::<Vec<_>>();
    assert_eq!(values, (0..N).collect::<Vec<_>>());

    let again = maybe_all(&jobs);
    assert_eq!(again.len(), N);
    assert!(again.iter().all(|r| r.as_ref().unwrap_err().is_already_consumed()));
}

#[test]
fn race_respects_deadline() {
    init_logging();
    let jobs = (0..3)
        .map(|_| {
            run(|| {
                std::thread::sleep(Duration::from_millis(300));
            })
        })
        .collect::<Vec<_>>();

    let start = Instant::now();
    let err = first_context(&timeout(20), &jobs).unwrap_err();
    assert_eq!(err.cancel_cause(), Some(&CancelCause::DeadlineExceeded));
    assert!(start.elapsed() < Duration::from_millis(250));
    assert!(first(&jobs).is_ok());
}

#[test]
fn cancelled_wait_on_long_job() {
    init_logging();
    let job = run(|| {
        std::thread::sleep(Duration::from_secs(1));
        "done"
    });

    let start = Instant::now();
    let err = job.wait_context(&timeout(1)).unwrap_err();
    assert!(err.is_cancelled());
    assert!(start.elapsed() < Duration::from_millis(500));

    assert_eq!(job.wait().unwrap(), "done");
}

#[test]
fn pool_never_exceeds_its_size() {
    init_logging();
    const SIZE: usize = 4;
    let hold = Duration::from_millis(80);

    for mode in [PoolMode::Eager, PoolMode::Lazy] {
        let pool = WorkerPool::with_mode(&Context::background(), SIZE, mode);
        let jobs = (0..SIZE + 1)
            .map(|_| {
                run_at_worker(&Context::background(), &pool, move || {
                    let start = Instant::now();
                    std::thread::sleep(hold);
                    (start, Instant::now())
                })
                .unwrap()
            })
            .collect::<Vec<_>>();

        let mut spans = maybe_all(&jobs)
            .into_iter()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>();
        spans.sort();

        let first_end = spans.iter().map(|(_, end)| *end).min().unwrap();
        let (last_start, _) = spans[SIZE];
        assert!(last_start >= first_end, "{mode:?}: extra job started early");

        for (start, _) in &spans {
            let running = spans
                .iter()
                .filter(|(s, e)| s <= start && start < e)
                .count();
            assert!(running <= SIZE, "{mode:?}: {running} tasks overlapped");
        }
    }
}

#[test]
fn lock_mutual_exclusion() {
    init_logging();
    let lock = Lock::new();
    let section = Arc::new(Mutex::new(Vec::new()));

    let threads = (0..8)
        .map(|t| {
            let lock = lock.clone();
            let section = section.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    let unlock = lock.acquire(&Context::background()).unwrap();
                    // Never contended while the ctxsync lock is held.
                    section
                        .try_lock()
                        .expect("critical section entered twice")
                        .push((t, i));
                    unlock.unlock();
                }
            })
        })
        .collect::<Vec<_>>();
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(section.lock().unwrap().len(), 200);
}

#[test]
fn reader_writer_exclusion() {
    init_logging();
    let lock = SharableLock::new();

    let reader = lock.shared_lock(&timeout(10)).unwrap();
    assert!(lock.exclusive_lock(&timeout(10)).unwrap_err().is_cancelled());
    reader.unlock();
    let writer = lock.exclusive_lock(&timeout(1000)).unwrap();

    assert!(lock.shared_lock(&timeout(10)).unwrap_err().is_cancelled());
    writer.unlock();
    lock.shared_lock(&timeout(1000)).unwrap().unlock();
}

#[test]
fn pending_writer_goes_before_later_reader() {
    init_logging();
    let lock = SharableLock::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let first_reader = lock.shared_lock(&Context::background()).unwrap();

    let writer = {
        let lock = lock.clone();
        let order = order.clone();
        std::thread::spawn(move || {
            let unlock = lock.exclusive_lock(&Context::background()).unwrap();
            order.lock().unwrap().push("writer");
            std::thread::sleep(Duration::from_millis(10));
            unlock.unlock();
        })
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    while !lock.is_write_pending() {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(1));
    }

    let late_reader = {
        let lock = lock.clone();
        let order = order.clone();
        std::thread::spawn(move || {
            let unlock = lock.shared_lock(&Context::background()).unwrap();
            order.lock().unwrap().push("reader");
            unlock.unlock();
        })
    };

    std::thread::sleep(Duration::from_millis(30));
    assert!(order.lock().unwrap().is_empty());
    first_reader.unlock();

    writer.join().unwrap();
    late_reader.join().unwrap();
    assert_eq!(*order.lock().unwrap(), ["writer", "reader"]);
}

#[test]
fn pool_tasks_share_a_lock() {
    init_logging();
    let (ctx, cancel) = Context::background().with_cancel();
    let pool = WorkerPool::new(&ctx, 3);
    let lock = Lock::new();
    let total = Arc::new(Mutex::new(0usize));

    let jobs = (0..9)
        .map(|i| {
            let lock = lock.clone();
            let total = total.clone();
            run_at_worker(&ctx, &pool, move || {
                let unlock = lock.acquire(&Context::background())?;
                *total.try_lock().expect("lock held by another task") += i;
                unlock.unlock();
                Ok::<_, ctxsync::Error>(i)
            })
            .unwrap()
        })
        .collect::<Vec<_>>();

    for res in maybe_all(&jobs) {
        res.unwrap().unwrap();
    }
    assert_eq!(*total.lock().unwrap(), (0..9).sum());

    cancel.cancel();
    pool.wait_shutdown();
    assert!(run_at_worker(&Context::background(), &pool, || ()).unwrap_err().is_shutdown());
}
