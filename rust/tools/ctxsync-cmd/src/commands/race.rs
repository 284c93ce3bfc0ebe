//! Race command implementation

use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, bail, ensure};
use serde::Serialize;

use crate::commands::emit;

#[derive(Serialize)]
struct RaceReport {
    jobs: usize,
    claimed: usize,
    elapsed_ms: f64,
}

/// Run the race command
pub fn run(jobs: usize, json: bool) -> Result<()> {
    ensure!(jobs > 0, "--jobs must be greater than 0");
    log::info!("racing {jobs} jobs");

    let start = Instant::now();
    let handles = (0..jobs)
        .map(|i| {
            ctxsync::run(move || {
                thread::sleep(Duration::from_millis((i * 7919 % 13) as u64));
                i
            })
        })
        .collect::<Vec<_>>();

    let mut claimed = 0;
    loop {
        match ctxsync::first(&handles) {
            Ok(value) => {
                log::debug!("claimed job {value}");
                claimed += 1;
            }
            Err(err) if err.is_already_consumed() => break,
            Err(err) => bail!("race failed after {claimed} jobs: {err}"),
        }
    }
    ensure!(claimed == jobs, "claimed {claimed} values from {jobs} jobs");

    let report = RaceReport {
        jobs,
        claimed,
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    };
    emit(&report, json, |r| {
        println!("Race completed:");
        println!("  Jobs: {}", r.jobs);
        println!("  Claimed: {}", r.claimed);
        println!("  Total time: {:.3} ms", r.elapsed_ms);
    })
}
