//! The core benchmark functionality.
//!
//! A benchmark is a list of tests that are run sequentially. Each test runs a number of **trials**
//! of one operation type, and every trial is carried out by its own [`Runner`].
//!
//! ## Scheduling
//!
//! A test goes through the following steps:
//!
//! 1. One runner is created per trial. If any of them cannot be created, the test is aborted.
//! 2. All runners are prepared at once, each on its own thread. The test waits for every one of
//! them, and if any preparation failed, it is aborted before a single trial runs. Runners are
//! still cleaned up in that case.
//! 3. A pool of `concurrency` worker threads takes the runners in trial order and runs them. Each
//! call to [`Runner::run`] is timed by the worker. A failed trial is recorded in its result and
//! does not affect the other trials.
//! 4. Unless `cleanup` is disabled, the same pool cleans up all runners. A failed cleanup is only
//! logged.
//!
//! The result of a trial is always stored at the index of its runner, so `trial_results[i]` is the
//! outcome of the `i`-th trial no matter in which order the workers finish.
//!
//! A test that is aborted stops the whole benchmark, and no results are reported for it or the
//! tests after it.
//!
//! ## Output Format
//!
//! Results are written as a JSON array with one entry per test, in the order of the
//! configuration:
//!
//! ```json
//! [
//!   {
//!     "test_type": "put-blob-monolithic",
//!     "trial_results": [
//!       { "bytes": 1048576, "duration_nanos": 15003214, "error": "" },
//!       { "bytes": 0, "duration_nanos": 2104551, "error": "uploading blob: expected created or accepted, got 503" }
//!     ]
//!   }
//! ]
//! ```
//!
//! Where:
//!
//! - `bytes`: the number of bytes the trial sent or received, 0 if it failed early.
//! - `duration_nanos`: the wall-clock time of the measured operation, in nanoseconds. It is also
//! recorded for failed trials.
//! - `error`: empty for a successful trial, or the reason the trial failed.

use crate::client::ProtocolClient;
use crate::config::{Config, TestConfig, TestType};
use crate::error::{Error, Result};
use crate::runners::Registry;
use crate::Runner;
use log::{debug, info, warn};
use parking_lot::Mutex;
use quanta::Instant;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

// {{{ results

/// The outcome of a single trial.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TrialResult {
    pub bytes: u64,

    #[serde(rename = "duration_nanos", with = "nanos")]
    pub duration: Duration,

    /// Empty if and only if the trial succeeded.
    #[serde(default)]
    pub error: String,
}

impl TrialResult {
    pub fn is_failure(&self) -> bool {
        !self.error.is_empty()
    }
}

/// The outcomes of all trials of a test, in trial order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TestResult {
    pub test_type: TestType,
    pub trial_results: Vec<TrialResult>,
}

mod nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_nanos().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }
}

// }}} results

// {{{ bencher

/// Calls `f` for every index in `0..n` from a pool of `concurrency` scoped threads.
///
/// Indices are handed out in increasing order from a shared counter, so at most `concurrency`
/// calls are in flight and each index is visited exactly once.
fn pool(n: usize, concurrency: usize, f: impl Fn(usize) + Sync) {
    let next = AtomicUsize::new(0);
    let workers = concurrency.min(n);
    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                if i >= n {
                    break;
                }
                f(i);
            });
        }
    });
}

/// Prepares all runners in parallel and returns the first failure in trial order.
fn prepare_all(runners: &[Mutex<Box<dyn Runner>>], client: &dyn ProtocolClient) -> Result<()> {
    let outcomes: Vec<Result<()>> = thread::scope(|s| {
        let handles: Vec<_> = runners
            .iter()
            .map(|runner| s.spawn(move || runner.lock().prepare(client)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });
    for (index, outcome) in outcomes.into_iter().enumerate() {
        if let Err(e) = outcome {
            warn!("Preparing trial {} failed: {}", index, e);
            return Err(Error::Setup {
                index,
                source: Box::new(e),
            });
        }
    }
    Ok(())
}

fn cleanup_all(
    runners: &[Mutex<Box<dyn Runner>>],
    concurrency: usize,
    client: &dyn ProtocolClient,
) {
    debug!("Cleaning up {} trials", runners.len());
    pool(runners.len(), concurrency, |i| {
        if let Err(e) = runners[i].lock().cleanup(client) {
            warn!("Cleaning up trial {} failed: {}", i, e);
        }
    });
}

fn run_trial(runner: &mut dyn Runner, index: usize, client: &dyn ProtocolClient) -> TrialResult {
    debug!("Starting trial {}", index);
    let start = Instant::now();
    let outcome = runner.run(client);
    let duration = start.elapsed();
    let result = match outcome {
        Ok(bytes) => TrialResult {
            bytes,
            duration,
            error: String::new(),
        },
        Err(e) => {
            warn!("Trial {} failed: {}", index, e);
            TrialResult {
                bytes: e.bytes_transferred(),
                duration,
                error: e.to_string(),
            }
        }
    };
    debug!("Trial {} completed in {:?}", index, duration);
    result
}

/// Runs all trials of one test and collects their results.
///
/// Only failures that prevent the trials from running at all are returned as errors: a zero
/// concurrency, an unknown operation type, a constructor failure, or a failed preparation.
pub fn run_test(
    cfg: &TestConfig,
    registry: &Registry,
    client: &dyn ProtocolClient,
    cleanup: bool,
) -> Result<TestResult> {
    if cfg.concurrency == 0 {
        return Err(Error::Config(format!(
            "{} test: concurrency should be positive",
            cfg.test_type
        )));
    }
    info!(
        "Starting {} test run with {} trials and concurrency {}",
        cfg.test_type, cfg.trials, cfg.concurrency
    );

    let runners: Vec<Mutex<Box<dyn Runner>>> = (0..cfg.trials)
        .map(|_| registry.create(cfg).map(Mutex::new))
        .collect::<Result<_>>()?;

    if let Err(e) = prepare_all(&runners, client) {
        // the trials that did prepare may have pushed content
        if cleanup {
            cleanup_all(&runners, cfg.concurrency, client);
        }
        return Err(e);
    }

    let slots: Vec<Mutex<Option<TrialResult>>> =
        (0..runners.len()).map(|_| Mutex::new(None)).collect();

    pool(runners.len(), cfg.concurrency, |i| {
        let mut runner = runners[i].lock();
        let result = run_trial(&mut **runner, i, client);
        *slots[i].lock() = Some(result);
    });

    if cleanup {
        cleanup_all(&runners, cfg.concurrency, client);
    }

    let trial_results = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.into_inner().ok_or(Error::MissingResult { index }))
        .collect::<Result<Vec<_>>>()?;

    Ok(TestResult {
        test_type: cfg.test_type,
        trial_results,
    })
}

/// Runs every test of `config` in order, stopping at the first test that cannot be run.
///
/// Every test type is looked up before the first test starts, so a typo in the last test does not
/// waste the run of the earlier ones.
pub fn run(
    config: &Config,
    client: &dyn ProtocolClient,
    registry: &Registry,
) -> Result<Vec<TestResult>> {
    if let Some(test) = config.tests.iter().find(|t| !registry.contains(t.test_type)) {
        return Err(Error::UnknownOperationType(test.test_type));
    }
    debug!("Running {} tests", config.tests.len());
    config
        .tests
        .iter()
        .map(|test| run_test(test, registry, client, config.cleanup))
        .collect()
}

// }}} bencher

// {{{ tests


// }}} tests
