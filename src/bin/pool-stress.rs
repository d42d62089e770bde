use std::process::exit;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;

use taskpool::{PoolError, TaskError, ThreadPool};

const OK_LINE: &str = "OK: thread pool + task queue works (futures + shutdown + stress)";

#[derive(Parser)]
#[command(name = "pool-stress", version, about = "Stress test for the taskpool thread pool")]
struct Cli {
    /// Number of worker threads [default: max(2, logical CPUs)]
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Number of counter increment tasks
    #[arg(long, default_value_t = 20_000, value_name = "N")]
    tasks: usize,

    /// Number of mixed CPU/sleep checksum tasks
    #[arg(long, default_value_t = 10_000, value_name = "M")]
    batch: usize,

    /// Seed for the randomized workload
    #[arg(long, default_value_t = 12345)]
    seed: u64,

    /// Print the run report as JSON instead of the summary line
    #[arg(long)]
    json: bool,
}

#[derive(Error, Debug)]
enum StressError {
    #[error("{0}")]
    Pool(#[from] PoolError),

    #[error("FAIL: {0}")]
    Check(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Numbers observed during one stress run.
#[derive(Debug, Serialize)]
struct StressReport {
    threads: usize,
    counter_tasks: usize,
    counter: i64,
    sum: i32,
    panic_message: String,
    checksum_tasks: usize,
    checksum: i64,
    results_total: i64,
    elapsed_ms: u128,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        exit(1);
    }
}

fn run(cli: Cli) -> Result<(), StressError> {
    let threads = cli.threads.unwrap_or_else(|| num_cpus::get().max(2));
    info!("pool-stress {}", env!("CARGO_PKG_VERSION"));
    info!("Workers: {}, seed: {}", threads, cli.seed);

    let started = Instant::now();
    let pool = ThreadPool::new(threads)?;

    let counter = count_increments(&pool, cli.tasks)?;
    let sum = pool.submit_with(|(a, b): (i32, i32)| a + b, (7, 35))?.get();
    require(sum == 42, format!("future return value incorrect: {sum}"))?;
    let panic_message = propagate_panic(&pool)?;
    let (checksum, results_total) = mixed_checksum(&pool, cli.batch, cli.seed)?;

    pool.stop();
    let rejected = matches!(pool.submit(|| ()), Err(PoolError::Stopped));
    require(rejected, "submit after stop was accepted")?;
    pool.shutdown();

    let report = StressReport {
        threads,
        counter_tasks: cli.tasks,
        counter,
        sum,
        panic_message,
        checksum_tasks: cli.batch,
        checksum,
        results_total,
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!("Finished in {} ms", report.elapsed_ms);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{OK_LINE}");
    }
    Ok(())
}

fn require(cond: bool, msg: impl Into<String>) -> Result<(), StressError> {
    if cond {
        Ok(())
    } else {
        Err(StressError::Check(msg.into()))
    }
}

/// Many tasks increment one shared counter.
fn count_increments(pool: &ThreadPool, n: usize) -> Result<i64, StressError> {
    let counter = Arc::new(AtomicI64::new(0));
    let handles = (0..n)
        .map(|_| {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    for handle in handles {
        handle.get();
    }

    let total = counter.load(Ordering::Relaxed);
    require(total == n as i64, format!("counter increments incorrect: {total} != {n}"))?;
    Ok(total)
}

/// A panicking task must hand its original payload back through the handle.
fn propagate_panic(pool: &ThreadPool) -> Result<String, StressError> {
    let handle = pool.submit(|| -> i32 { panic!("boom") })?;
    match handle.join() {
        Ok(_) => Err(StressError::Check("panic should have propagated".to_owned())),
        Err(TaskError::Panicked(payload)) => match payload.downcast::<&'static str>() {
            Ok(msg) if *msg == "boom" => Ok((*msg).to_owned()),
            _ => Err(StressError::Check("wrong panic payload propagated".to_owned())),
        },
        Err(e) => Err(StressError::Check(format!("wrong failure propagated: {e}"))),
    }
}

/// Mixed CPU work and short sleeps; per-task results must add up to the
/// shared checksum.
fn mixed_checksum(pool: &ThreadPool, m: usize, seed: u64) -> Result<(i64, i64), StressError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let checksum = Arc::new(AtomicI64::new(0));

    let mut handles = Vec::with_capacity(m);
    for _ in 0..m {
        let work: i64 = rng.gen_range(1..=200);
        let pause: u64 = rng.gen_range(0..=50);
        let checksum = Arc::clone(&checksum);
        handles.push(pool.submit(move || {
            let local: i64 = (1..=work).sum();
            if pause > 0 {
                thread::sleep(Duration::from_micros(pause));
            }
            checksum.fetch_add(local, Ordering::Relaxed);
            local
        })?);
    }

    let results_total: i64 = handles.into_iter().map(|h| h.get()).sum();
    let checksum = checksum.load(Ordering::Relaxed);
    require(
        results_total == checksum,
        format!("checksum mismatch: {results_total} != {checksum}"),
    )?;
    Ok((checksum, results_total))
}
