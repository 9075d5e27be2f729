#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! A benchmark tool for container registries that implement the distribution HTTP API.
//!
//! A benchmark is a list of tests. Each test exercises one registry operation (pushing a blob in
//! one request, streaming a blob through an upload session, pushing a manifest, ...) a number of
//! times, called **trials**, with a bounded number of trials in flight at once. Every trial
//! records how many bytes it transferred, how long it took and, if it failed, why.
//!
//! You can define a benchmark in a JSON document, see [`mod@config`] for the format. Results are
//! written as JSON and can be summarized with the `bench-stats` binary, see [`mod@stats`].
//!
//! A few key design choices include:
//!
//! - Every trial gets its own [`Runner`] instance, so per-trial state (pre-generated content,
//! digests, tags) is never shared between trials.
//! - Operation types are looked up in an explicit [`Registry`] that maps a [`TestType`] to a
//! constructor. New operation types can be added by registering a constructor, without touching
//! the executor.
//! - Large payloads are generated on the fly and digested while they are sent, see
//! [`mod@content`].
//!
//! More detailed usage could be found in the module-level rustdocs:
//!
//! - [`mod@config`] for the configuration format.
//! - [`mod@bench`] for how trials are scheduled and the result format.
//! - [`mod@runners`] for the available operation types and their parameters.

use crate::client::ProtocolClient;
use crate::error::Result;

/// One trial of a registry operation.
///
/// A runner goes through three phases, driven by the executor in [`mod@bench`]:
///
/// 1. [`Runner::prepare`] sets up any remote state the operation needs, such as a blob that is
///    fetched later. It is called for all trials of a test in parallel, before any of them runs.
/// 2. [`Runner::run`] performs exactly the operation under measurement. It is timed by the
///    executor and called once per runner.
/// 3. [`Runner::cleanup`] reverses durable side effects of the earlier phases, such as deleting a
///    pushed manifest.
///
/// Runners are used from worker threads, one thread at a time, and share one protocol client.
pub trait Runner: Send {
    fn prepare(&mut self, _client: &dyn ProtocolClient) -> Result<()> {
        Ok(())
    }

    /// Runs the operation, returning the number of bytes sent or received.
    ///
    /// A failure after some data already went over the wire is wrapped in [`Error::partial`], so
    /// the trial still records those bytes.
    fn run(&mut self, client: &dyn ProtocolClient) -> Result<u64>;

    fn cleanup(&mut self, _client: &dyn ProtocolClient) -> Result<()> {
        Ok(())
    }
}

pub mod bench;
pub mod client;
pub mod cmdline;
pub mod config;
pub mod content;
pub mod digest;
pub mod error;
pub mod runners;
pub mod stats;

#[cfg(test)]
pub(crate) mod mock;

pub use bench::{TestResult, TrialResult};
pub use config::{Config, TestConfig, TestType};
pub use error::Error;
pub use runners::Registry;
