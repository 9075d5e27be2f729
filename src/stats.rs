//! Summaries of benchmark results.
//!
//! The `bench-stats` binary reads a result document (see [`mod@crate::bench`]) and prints one
//! block per test:
//!
//! ```txt
//! ---
//! Test type: put-blob-monolithic
//! Number of trials: 4
//! Number of failures: 1
//! Mean duration for successful trials: 20ms
//! Median duration for successful trials: 20ms
//!
//! Mean duration for all trials: 18.75ms
//! Median duration for all trials: 17.5ms
//!
//! Latency of all trials: min 10ms max 30ms p95 30ms p99 30ms
//! Throughput of successful trials: 0.15 MiB/s
//! ```
//!
//! Durations of failed trials count towards the "all trials" figures. When there is no trial to
//! compute a figure from, for example the mean of successful trials when every trial failed, it is
//! printed as `n/a`.
//!
//! Percentiles come from a histogram with three significant digits, so they may differ from the
//! exact durations in the last digits. Throughput is the number of bytes moved by successful
//! trials divided by the time they took, i.e., what a single trial achieves on average.

use crate::bench::TestResult;
use crate::config::TestType;
use hdrhistogram::Histogram;
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

/// Mean and median of a set of durations, `None` when the set is empty.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Durations {
    pub mean: Option<Duration>,
    pub median: Option<Duration>,
}

impl Durations {
    pub fn new(durations: &[Duration]) -> Self {
        Self {
            mean: mean(durations),
            median: median(durations),
        }
    }
}

/// Distribution of trial durations, in nanoseconds precision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Latency {
    pub min: Duration,
    pub max: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl Latency {
    /// `None` when `durations` is empty.
    pub fn new(durations: &[Duration]) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        let mut hdr = Histogram::<u64>::new(3).ok()?;
        for d in durations {
            hdr.record(nanos(*d)).ok()?;
        }
        Some(Self {
            min: Duration::from_nanos(hdr.min()),
            max: Duration::from_nanos(hdr.max()),
            p95: Duration::from_nanos(hdr.value_at_quantile(0.95)),
            p99: Duration::from_nanos(hdr.value_at_quantile(0.99)),
        })
    }
}

/// Aggregated figures of one test.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub test_type: TestType,
    pub trials: usize,
    pub failures: usize,
    pub success: Durations,
    pub all: Durations,
    pub latency: Option<Latency>,
    /// Bytes per second of successful trials.
    pub throughput: Option<f64>,
}

impl Summary {
    pub fn new(result: &TestResult) -> Self {
        let all: Vec<Duration> = result.trial_results.iter().map(|t| t.duration).collect();
        let successful: Vec<_> = result
            .trial_results
            .iter()
            .filter(|t| !t.is_failure())
            .collect();
        let success: Vec<Duration> = successful.iter().map(|t| t.duration).collect();

        let bytes: u64 = successful.iter().map(|t| t.bytes).sum();
        let elapsed: Duration = success.iter().sum();
        let throughput = match elapsed.is_zero() {
            true => None,
            false => Some(bytes as f64 / elapsed.as_secs_f64()),
        };

        Self {
            test_type: result.test_type,
            trials: all.len(),
            failures: all.len() - success.len(),
            success: Durations::new(&success),
            all: Durations::new(&all),
            latency: Latency::new(&all),
            throughput,
        }
    }
}

fn nanos(d: Duration) -> u64 {
    d.as_nanos().try_into().unwrap_or(u64::MAX)
}

fn mean(durations: &[Duration]) -> Option<Duration> {
    if durations.is_empty() {
        return None;
    }
    let total: u128 = durations.iter().map(|d| d.as_nanos()).sum();
    let mean = total / durations.len() as u128;
    Some(Duration::from_nanos(mean.try_into().unwrap_or(u64::MAX)))
}

/// The middle value, or the average of the two middle values for an even number of durations.
fn median(durations: &[Duration]) -> Option<Duration> {
    let mut sorted = durations.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2),
    }
}

/// Formats a figure that may be missing.
struct Figure(Option<Duration>);

impl fmt::Display for Figure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(d) => write!(f, "{:?}", d),
            None => write!(f, "n/a"),
        }
    }
}

/// Writes the human-readable summary of one test.
pub fn write_summary(out: &mut impl Write, summary: &Summary) -> io::Result<()> {
    writeln!(out, "---")?;
    writeln!(out, "Test type: {}", summary.test_type)?;
    writeln!(out, "Number of trials: {}", summary.trials)?;
    writeln!(out, "Number of failures: {}", summary.failures)?;
    writeln!(
        out,
        "Mean duration for successful trials: {}",
        Figure(summary.success.mean)
    )?;
    writeln!(
        out,
        "Median duration for successful trials: {}",
        Figure(summary.success.median)
    )?;
    writeln!(out)?;
    writeln!(out, "Mean duration for all trials: {}", Figure(summary.all.mean))?;
    writeln!(
        out,
        "Median duration for all trials: {}",
        Figure(summary.all.median)
    )?;
    writeln!(out)?;
    match summary.latency {
        Some(l) => writeln!(
            out,
            "Latency of all trials: min {:?} max {:?} p95 {:?} p99 {:?}",
            l.min, l.max, l.p95, l.p99
        )?,
        None => writeln!(out, "Latency of all trials: n/a")?,
    }
    match summary.throughput {
        Some(t) => writeln!(
            out,
            "Throughput of successful trials: {:.2} MiB/s",
            t / (1024.0 * 1024.0)
        )?,
        None => writeln!(out, "Throughput of successful trials: n/a")?,
    }
    Ok(())
}

/// Writes the summaries of all tests, in order.
pub fn write_results(out: &mut impl Write, results: &[TestResult]) -> io::Result<()> {
    for result in results {
        write_summary(out, &Summary::new(result))?;
    }
    Ok(())
}
