//! The benchmark configuration document.
//!
//! ## Configuration Format
//!
//! A configuration is a JSON document. It names the registry to connect to and a list of tests
//! that are run sequentially, each with its own number of trials and concurrency:
//!
//! ```json
//! {
//!   "registry": {
//!     "root_url": "https://registry.example.com",
//!     "username": "bench",
//!     "password": "secret",
//!     "namespace": "bench/run1"
//!   },
//!   "tests": [
//!     { "type": "base", "trials": 100, "concurrency": 10 },
//!     {
//!       "type": "put-blob-streaming",
//!       "trials": 20,
//!       "concurrency": 4,
//!       "parameters": { "size_bytes": 10485760, "delay": "5ms" }
//!     }
//!   ],
//!   "debug": false
//! }
//! ```
//!
//! The `root_url` must not include the `/v2` prefix of the distribution API. When `namespace` is
//! empty or missing, a random namespace with two path components is generated. `parameters` is
//! handed untouched to the constructor of the test type, see [`mod@crate::runners`] for the
//! options each type accepts.
//!
//! Other options:
//!
//! - `registry.retries`: how many times a failed request is re-issued. Default: 2.
//! - `cleanup`: delete what the trials pushed once a test finishes. Default: true.
//!
//! Any option can be overridden with an environment variable prefixed by `DISTRIBUTION_BENCH_`,
//! using `__` to descend into sections. For example, `DISTRIBUTION_BENCH_REGISTRY__PASSWORD`
//! overrides `registry.password` without changing the file.

use crate::error::{Error, Result};
use figment::providers::{Env, Format, Json};
use figment::Figment;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

const ENV_PREFIX: &str = "DISTRIBUTION_BENCH_";

/// The kind of registry interaction a test measures.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TestType {
    /// Fetch the base route, which has no practical utility besides measuring overhead.
    Base,
    /// Download a manifest.
    GetManifest,
    /// Upload a config blob and a manifest referencing it.
    PutManifest,
    /// Download a blob.
    GetBlob,
    /// Upload a blob in a single request.
    PutBlobMonolithic,
    /// Upload a blob as a streamed `PATCH` followed by a finalizing `PUT`.
    PutBlobStreaming,
}

impl TestType {
    pub const ALL: [TestType; 6] = [
        TestType::Base,
        TestType::GetManifest,
        TestType::PutManifest,
        TestType::GetBlob,
        TestType::PutBlobMonolithic,
        TestType::PutBlobStreaming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Base => "base",
            TestType::GetManifest => "get-manifest",
            TestType::PutManifest => "put-manifest",
            TestType::GetBlob => "get-blob",
            TestType::PutBlobMonolithic => "put-blob-monolithic",
            TestType::PutBlobStreaming => "put-blob-streaming",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access to the registry under test. Shared read-only by every trial of a run.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct RegistryConfig {
    /// Root URL of the registry, without the `/v2` prefix.
    pub root_url: String,

    /// Username for basic authentication. Authentication is not used if this is missing.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for basic authentication.
    #[serde(default)]
    pub password: Option<String>,

    /// Namespace to push to. Some registries need it to be created up front.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Number of times a failed request is re-issued by the client.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_retries() -> u32 {
    2
}

/// The configuration of a single test.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct TestConfig {
    /// The type of the test.
    #[serde(rename = "type")]
    pub test_type: TestType,

    /// Total number of trials. Trials may run concurrently depending on `concurrency`.
    pub trials: usize,

    /// How many trials run at the same time.
    pub concurrency: usize,

    /// Test-specific parameters, interpreted only by the constructor of `test_type`.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl TestConfig {
    fn sanity(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config(format!(
                "{} test: concurrency should be positive",
                self.test_type
            )));
        }
        Ok(())
    }
}

/// The whole configuration document.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub registry: RegistryConfig,

    pub tests: Vec<TestConfig>,

    /// Log every request and response of the protocol client.
    #[serde(default)]
    pub debug: bool,

    /// Delete pushed artifacts after each test.
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,
}

fn default_cleanup() -> bool {
    true
}

impl Config {
    /// Parses a JSON document, applies environment overrides and validates the result.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Json::string(text))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        debug!("Parsed configuration: {:?}", config.tests);
        config.sanity()?;
        Ok(config)
    }

    fn sanity(&self) -> Result<()> {
        reqwest::Url::parse(&self.registry.root_url).map_err(|e| {
            Error::Config(format!("root_url {:?}: {}", self.registry.root_url, e))
        })?;
        for test in self.tests.iter() {
            test.sanity()?;
        }
        Ok(())
    }
}
