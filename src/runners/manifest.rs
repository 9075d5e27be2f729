//! Manifest uploads and downloads.
//!
//! Every runner builds a minimal image: an image config blob for `linux/amd64` with no layers,
//! and an OCI image manifest referencing it, tagged with a random 10-letter tag. Neither type
//! takes parameters.

use crate::client::{ProtocolClient, Request};
use crate::config::{TestConfig, TestType};
use crate::content::random_string;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::runners::blob::push_blob;
use crate::runners::{Registry, BLOB, MANIFEST, MEDIA_TYPE_CONFIG, MEDIA_TYPE_MANIFEST};
use crate::Runner;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Serialize;

#[derive(Serialize)]
struct RootFs {
    #[serde(rename = "type")]
    fs_type: &'static str,
    diff_ids: Vec<String>,
}

#[derive(Serialize)]
struct ImageConfig {
    architecture: &'static str,
    os: &'static str,
    rootfs: RootFs,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    media_type: &'static str,
    digest: Digest,
    size: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    schema_version: u32,
    media_type: &'static str,
    config: Descriptor,
    layers: Vec<Descriptor>,
}

/// A generated image: config blob and manifest, both serialized.
struct Image {
    reference: String,
    config: Bytes,
    config_digest: Digest,
    manifest: Bytes,
    manifest_digest: Digest,
}

impl Image {
    fn generate() -> Result<Self> {
        let config = ImageConfig {
            architecture: "amd64",
            os: "linux",
            rootfs: RootFs {
                fs_type: "layers",
                diff_ids: Vec::new(),
            },
        };
        let config = Bytes::from(serde_json::to_vec_pretty(&config)?);
        let config_digest = Digest::from_bytes(&config);

        let manifest = Manifest {
            schema_version: 2,
            media_type: MEDIA_TYPE_MANIFEST,
            config: Descriptor {
                media_type: MEDIA_TYPE_CONFIG,
                digest: config_digest.clone(),
                size: config.len() as u64,
            },
            layers: Vec::new(),
        };
        let manifest = Bytes::from(serde_json::to_vec_pretty(&manifest)?);
        let manifest_digest = Digest::from_bytes(&manifest);

        Ok(Self {
            reference: random_string(10),
            config,
            config_digest,
            manifest,
            manifest_digest,
        })
    }

    fn len(&self) -> u64 {
        (self.config.len() + self.manifest.len()) as u64
    }

    /// Pushes the config blob, then the manifest under the tag.
    fn push(&self, client: &dyn ProtocolClient) -> Result<()> {
        push_blob(client, &self.config, &self.config_digest, "uploading config")?;
        let request = Request::new(Method::PUT, MANIFEST)
            .reference(self.reference.as_str())
            .header(CONTENT_TYPE, MEDIA_TYPE_MANIFEST)
            .body(self.manifest.clone());
        // the config blob is already in, a failed manifest still moved its bytes
        client
            .execute(request)
            .and_then(|r| r.expect("uploading manifest", "created", &[StatusCode::CREATED]))
            .map_err(|e| Error::partial(self.config.len() as u64, e))?;
        Ok(())
    }

    /// Deletes the manifest by digest, then the config blob.
    ///
    /// All trials of a test generate the same config and manifest, so another trial may have
    /// deleted them already. A 404 counts as deleted.
    fn delete(&self, client: &dyn ProtocolClient) -> Result<()> {
        let accepted = [StatusCode::ACCEPTED, StatusCode::OK, StatusCode::NOT_FOUND];
        let request =
            Request::new(Method::DELETE, MANIFEST).reference(self.manifest_digest.as_str());
        client
            .execute(request)?
            .expect("deleting manifest", "accepted", &accepted)?;
        let request = Request::new(Method::DELETE, BLOB).reference(self.config_digest.as_str());
        client
            .execute(request)?
            .expect("deleting config", "accepted", &accepted)?;
        Ok(())
    }
}

// {{{ put-manifest

pub struct PutManifestTest {
    image: Image,
    pushed: bool,
}

impl PutManifestTest {
    pub fn create(_cfg: &TestConfig) -> Result<Box<dyn Runner>> {
        Ok(Box::new(Self {
            image: Image::generate()?,
            pushed: false,
        }))
    }
}

impl Runner for PutManifestTest {
    fn run(&mut self, client: &dyn ProtocolClient) -> Result<u64> {
        self.image.push(client)?;
        self.pushed = true;
        Ok(self.image.len())
    }

    fn cleanup(&mut self, client: &dyn ProtocolClient) -> Result<()> {
        if self.pushed {
            self.image.delete(client)?;
            self.pushed = false;
        }
        Ok(())
    }
}

// }}} put-manifest

// {{{ get-manifest

pub struct GetManifestTest {
    image: Image,
    pushed: bool,
}

impl GetManifestTest {
    pub fn create(_cfg: &TestConfig) -> Result<Box<dyn Runner>> {
        Ok(Box::new(Self {
            image: Image::generate()?,
            pushed: false,
        }))
    }
}

impl Runner for GetManifestTest {
    fn prepare(&mut self, client: &dyn ProtocolClient) -> Result<()> {
        if !self.pushed {
            self.image.push(client)?;
            self.pushed = true;
        }
        Ok(())
    }

    fn run(&mut self, client: &dyn ProtocolClient) -> Result<u64> {
        let request = Request::new(Method::GET, MANIFEST)
            .reference(self.image.reference.as_str())
            .header(ACCEPT, MEDIA_TYPE_MANIFEST);
        let response =
            client
                .execute(request)?
                .expect("fetching manifest", "ok", &[StatusCode::OK])?;
        Ok(response.body.len() as u64)
    }

    fn cleanup(&mut self, client: &dyn ProtocolClient) -> Result<()> {
        if self.pushed {
            self.image.delete(client)?;
            self.pushed = false;
        }
        Ok(())
    }
}

// }}} get-manifest

pub(crate) fn register(registry: &mut Registry) {
    registry.register(TestType::PutManifest, PutManifestTest::create);
    registry.register(TestType::GetManifest, GetManifestTest::create);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRegistry;
    use crate::runners::tests::lifecycle;

    fn cfg(test_type: TestType) -> TestConfig {
        TestConfig {
            test_type,
            trials: 1,
            concurrency: 1,
            parameters: serde_json::Value::Null,
        }
    }

    #[test]
    fn manifest_references_config() {
        let image = Image::generate().unwrap();
        let manifest: serde_json::Value = serde_json::from_slice(&image.manifest).unwrap();
        assert_eq!(manifest["schemaVersion"], 2);
        assert_eq!(manifest["mediaType"], MEDIA_TYPE_MANIFEST);
        assert_eq!(manifest["config"]["mediaType"], MEDIA_TYPE_CONFIG);
        assert_eq!(manifest["config"]["digest"], image.config_digest.as_str());
        assert_eq!(manifest["config"]["size"], image.config.len() as u64);
        assert_eq!(manifest["layers"], serde_json::json!([]));

        let config: serde_json::Value = serde_json::from_slice(&image.config).unwrap();
        assert_eq!(config["os"], "linux");
        assert_eq!(config["rootfs"]["type"], "layers");

        assert_eq!(image.reference.len(), 10);
        assert_eq!(image.manifest_digest, Digest::from_bytes(&image.manifest));
    }

    #[test]
    fn put_manifest() {
        let client = MockRegistry::new();
        let image_len = {
            let mut runner = PutManifestTest {
                image: Image::generate().unwrap(),
                pushed: false,
            };
            let len = runner.image.len();
            assert_eq!(runner.run(&client).unwrap(), len);
            assert_eq!(client.blob_count(), 1);
            // stored under the tag and the digest
            assert_eq!(client.manifest_count(), 2);
            runner.cleanup(&client).unwrap();
            len
        };
        assert!(image_len > 0);
        assert_eq!(client.blob_count(), 0);
        assert_eq!(client.manifest_count(), 0);

        let log = client.log();
        assert_eq!(log[0], "POST /v2/mock/repo/blobs/uploads/");
        assert!(log[1].starts_with("PUT /v2/mock/repo/manifests/"));
        assert!(log[2].starts_with("DELETE /v2/mock/repo/manifests/sha256:"));
        assert!(log[3].starts_with("DELETE /v2/mock/repo/blobs/sha256:"));
    }

    #[test]
    fn put_manifest_reports_config_failure() {
        let client = MockRegistry::new();
        client.force_status(Method::POST, StatusCode::FORBIDDEN);
        let mut runner = PutManifestTest::create(&cfg(TestType::PutManifest)).unwrap();
        let err = runner.run(&client).unwrap_err();
        assert_eq!(
            err.to_string(),
            "uploading config: expected created or accepted, got 403"
        );
        assert_eq!(client.manifest_count(), 0);
        assert_eq!(err.bytes_transferred(), 0);
    }

    #[test]
    fn put_manifest_failure_counts_config_bytes() {
        let client = MockRegistry::new();
        client.force_status(Method::PUT, StatusCode::BAD_REQUEST);
        let image = Image::generate().unwrap();
        let err = image.push(&client).unwrap_err();
        assert_eq!(
            err.to_string(),
            "uploading manifest: expected created, got 400"
        );
        assert_eq!(err.bytes_transferred(), image.config.len() as u64);
        assert_eq!(client.manifest_count(), 0);
        assert_eq!(client.blob_count(), 1);
    }

    #[test]
    fn get_manifest() {
        let client = MockRegistry::new();
        let bytes = lifecycle(
            &Registry::with_builtins(),
            &client,
            &cfg(TestType::GetManifest),
        );
        assert!(bytes > 0);
        let log = client.log();
        assert_eq!(log.len(), 5);
        assert!(log[2].starts_with("GET /v2/mock/repo/manifests/"));
        assert_eq!(client.manifest_count(), 0);
        assert_eq!(client.blob_count(), 0);
    }

    #[test]
    fn shared_content_is_deleted_once() {
        let client = MockRegistry::new();
        let registry = Registry::with_builtins();
        let mut runners: Vec<_> = (0..2)
            .map(|_| registry.create(&cfg(TestType::PutManifest)).unwrap())
            .collect();
        for runner in runners.iter_mut() {
            runner.run(&client).unwrap();
        }
        // one config blob, one digest entry and two tags
        assert_eq!(client.blob_count(), 1);
        assert_eq!(client.manifest_count(), 3);
        for runner in runners.iter_mut() {
            runner.cleanup(&client).unwrap();
        }
        assert_eq!(client.blob_count(), 0);
        assert_eq!(client.manifest_count(), 0);
    }
}
