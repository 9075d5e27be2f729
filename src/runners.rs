//! Trial runners for the built-in operation types, and the registry they are created from.
//!
//! ## Built-in Operation Types
//!
//! | `type` | Parameters | Measured operation |
//! |---|---|---|
//! | `base` | none | `GET /v2/` |
//! | `put-blob-monolithic` | `size_bytes` | `POST` of the whole blob to the upload endpoint |
//! | `put-blob-streaming` | `size_bytes`, `delay` | `POST` + streamed `PATCH` + finalizing `PUT` |
//! | `get-blob` | `size_bytes` | `GET` of a blob pushed during preparation |
//! | `put-manifest` | none | push of a config blob and a manifest referencing it |
//! | `get-manifest` | none | `GET` of a manifest pushed during preparation |
//!
//! `delay` is a duration string such as `"10ms"`. When given, the upload body pauses for that
//! long before every read after the first one, to simulate a slow sender.
//!
//! ## Registering New Operation Types
//!
//! An operation type is a [`Runner`] implementation plus a constructor with the signature
//! `fn(&TestConfig) -> Result<Box<dyn Runner>>`. The constructor is called once per trial and
//! receives the whole test configuration, including the opaque `parameters`. Register it with
//! [`Registry::register`] before the benchmark starts. [`Registry::with_builtins`] registers all
//! the types above.

use crate::config::{TestConfig, TestType};
use crate::error::{Error, Result};
use crate::Runner;
use hashbrown::HashMap;
use log::debug;
use serde::de::DeserializeOwned;

pub mod base;
pub mod blob;
pub mod manifest;

/// Creates a fresh runner for one trial of a test.
pub type Constructor = Box<dyn Fn(&TestConfig) -> Result<Box<dyn Runner>> + Send + Sync>;

/// Maps an operation type to the constructor of its runners.
///
/// The registry is built once at startup and then only read, so it can be shared by reference
/// with everything that runs the benchmark.
#[derive(Default)]
pub struct Registry {
    constructors: HashMap<TestType, Constructor>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with all built-in operation types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        base::register(&mut registry);
        blob::register(&mut registry);
        manifest::register(&mut registry);
        registry
    }

    /// Registers `constructor` for `test_type`. A later registration of the same type replaces
    /// the earlier one.
    pub fn register(
        &mut self,
        test_type: TestType,
        constructor: impl Fn(&TestConfig) -> Result<Box<dyn Runner>> + Send + Sync + 'static,
    ) {
        debug!("Adding supported test type: {}", test_type);
        self.constructors.insert(test_type, Box::new(constructor));
    }

    /// Creates a runner for one trial of `cfg`.
    pub fn create(&self, cfg: &TestConfig) -> Result<Box<dyn Runner>> {
        let f = self
            .constructors
            .get(&cfg.test_type)
            .ok_or(Error::UnknownOperationType(cfg.test_type))?;
        f(cfg)
    }

    /// All registered types, in a stable order.
    pub fn types(&self) -> Vec<TestType> {
        TestType::ALL
            .into_iter()
            .filter(|t| self.constructors.contains_key(t))
            .collect()
    }

    pub fn contains(&self, test_type: TestType) -> bool {
        self.constructors.contains_key(&test_type)
    }
}

/// Decodes the `parameters` of a test into the option struct of its runner.
pub(crate) fn parameters<T: DeserializeOwned>(cfg: &TestConfig) -> Result<T> {
    serde_json::from_value(cfg.parameters.clone())
        .map_err(|e| Error::Config(format!("{} test parameters: {}", cfg.test_type, e)))
}

pub(crate) const MEDIA_TYPE_OCTET_STREAM: &str = "application/octet-stream";
pub(crate) const MEDIA_TYPE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub(crate) const MEDIA_TYPE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

pub(crate) const UPLOADS: &str = "/v2/<name>/blobs/uploads/";
pub(crate) const BLOB: &str = "/v2/<name>/blobs/<reference>";
pub(crate) const MANIFEST: &str = "/v2/<name>/manifests/<reference>";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ProtocolClient;
    use crate::mock::MockRegistry;
    use serde_json::json;

    fn cfg(test_type: TestType, parameters: serde_json::Value) -> TestConfig {
        TestConfig {
            test_type,
            trials: 1,
            concurrency: 1,
            parameters,
        }
    }

    /// Goes through all three phases of a fresh runner and returns the bytes of its trial.
    pub(crate) fn lifecycle(
        registry: &Registry,
        client: &dyn ProtocolClient,
        cfg: &TestConfig,
    ) -> u64 {
        let mut runner = registry.create(cfg).unwrap();
        runner.prepare(client).unwrap();
        let bytes = runner.run(client).unwrap();
        runner.cleanup(client).unwrap();
        bytes
    }

    #[test]
    fn builtins_are_registered() {
        let registry = Registry::with_builtins();
        assert_eq!(registry.types(), TestType::ALL.to_vec());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let registry = Registry::new();
        let err = registry.create(&cfg(TestType::Base, json!(null))).err().unwrap();
        assert!(matches!(err, Error::UnknownOperationType(TestType::Base)));
        assert_eq!(err.to_string(), "invalid test type: base");
    }

    #[test]
    fn last_registration_wins() {
        struct Fixed(u64);
        impl Runner for Fixed {
            fn run(&mut self, _client: &dyn ProtocolClient) -> Result<u64> {
                Ok(self.0)
            }
        }

        let mut registry = Registry::new();
        registry.register(TestType::Base, |_| Ok(Box::new(Fixed(1))));
        registry.register(TestType::Base, |_| Ok(Box::new(Fixed(2))));
        assert_eq!(registry.types(), vec![TestType::Base]);

        let client = MockRegistry::new();
        let bytes = lifecycle(&registry, &client, &cfg(TestType::Base, json!(null)));
        assert_eq!(bytes, 2);
    }

    #[test]
    fn bad_parameters_are_config_errors() {
        let registry = Registry::with_builtins();
        let cfg = cfg(TestType::PutBlobMonolithic, json!({ "size": 10 }));
        assert!(matches!(registry.create(&cfg), Err(Error::Config(_))));
    }
}
