//! Blob uploads and downloads.
//!
//! ## Parameters
//!
//! ```json
//! { "size_bytes": 1048576, "delay": "10ms" }
//! ```
//!
//! `size_bytes` is the size of the blob. `delay` only applies to `put-blob-streaming` and is the
//! pause between reads of the upload body.
//!
//! A monolithic upload sends content generated when the runner is created, so its content and
//! digest are the same for every attempt of the request. A streamed upload generates content
//! while sending it: if the transport has to re-issue the `PATCH`, the body is generated again
//! from scratch with a new digest.

use crate::client::{Body, ProtocolClient, Request, Response};
use crate::config::{TestConfig, TestType};
use crate::content::{self, random_bytes, DigestCell};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::runners::{parameters, Registry, BLOB, MEDIA_TYPE_OCTET_STREAM, UPLOADS};
use crate::Runner;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct BlobOpt {
    /// Total size of the blob, in bytes.
    pub size_bytes: u64,

    /// Pause between reads of a streamed upload body.
    #[serde(default, with = "humantime_serde")]
    pub delay: Option<Duration>,
}

impl BlobOpt {
    fn delay(&self) -> Duration {
        self.delay.unwrap_or(Duration::ZERO)
    }
}

/// Uploads `content` in a single request to the upload endpoint.
pub(crate) fn push_blob(
    client: &dyn ProtocolClient,
    content: &Bytes,
    digest: &Digest,
    context: &'static str,
) -> Result<()> {
    let request = Request::new(Method::POST, UPLOADS)
        .header(CONTENT_TYPE, MEDIA_TYPE_OCTET_STREAM)
        .query("digest", digest.as_str())
        .body(content.clone());
    client.execute(request)?.expect(
        context,
        "created or accepted",
        &[StatusCode::CREATED, StatusCode::ACCEPTED],
    )?;
    Ok(())
}

pub(crate) fn delete_blob(client: &dyn ProtocolClient, digest: &Digest) -> Result<()> {
    let request = Request::new(Method::DELETE, BLOB).reference(digest.as_str());
    client.execute(request)?.expect(
        "deleting blob",
        "accepted",
        &[StatusCode::ACCEPTED, StatusCode::OK],
    )?;
    Ok(())
}

/// Random content and its digest, generated up front.
struct Content {
    body: Bytes,
    digest: Digest,
}

impl Content {
    fn generate(size: u64) -> Result<Self> {
        let body = Bytes::from(random_bytes(size)?);
        let digest = Digest::from_bytes(&body);
        Ok(Self { body, digest })
    }
}

// {{{ put-blob-monolithic

pub struct PutBlobMonolithicTest {
    content: Content,
    pushed: bool,
}

impl PutBlobMonolithicTest {
    pub fn create(cfg: &TestConfig) -> Result<Box<dyn Runner>> {
        let opt: BlobOpt = parameters(cfg)?;
        Ok(Box::new(Self {
            content: Content::generate(opt.size_bytes)?,
            pushed: false,
        }))
    }
}

impl Runner for PutBlobMonolithicTest {
    fn run(&mut self, client: &dyn ProtocolClient) -> Result<u64> {
        push_blob(client, &self.content.body, &self.content.digest, "uploading blob")?;
        self.pushed = true;
        Ok(self.content.body.len() as u64)
    }

    fn cleanup(&mut self, client: &dyn ProtocolClient) -> Result<()> {
        if self.pushed {
            delete_blob(client, &self.content.digest)?;
            self.pushed = false;
        }
        Ok(())
    }
}

// }}} put-blob-monolithic

// {{{ put-blob-streaming

pub struct PutBlobStreamingTest {
    opt: BlobOpt,
    /// Digest of the uploaded blob, once the upload is finalized.
    digest: Option<Digest>,
}

impl PutBlobStreamingTest {
    pub fn create(cfg: &TestConfig) -> Result<Box<dyn Runner>> {
        let opt: BlobOpt = parameters(cfg)?;
        Ok(Box::new(Self { opt, digest: None }))
    }

    /// Commits the upload session under the digest of the streamed body.
    fn finalize(
        &mut self,
        client: &dyn ProtocolClient,
        response: &Response,
        digest: &Mutex<DigestCell>,
    ) -> Result<()> {
        let location = response.location().ok_or(Error::MissingLocation {
            context: "uploading data",
        })?;
        let digest = digest.lock().get().ok_or(Error::Digest)?;

        let request = Request::located(Method::PUT, location)
            .header(CONTENT_TYPE, MEDIA_TYPE_OCTET_STREAM)
            .query("digest", digest.as_str())
            .body(Bytes::new());
        client.execute(request)?.expect(
            "finalizing upload",
            "created",
            &[StatusCode::CREATED],
        )?;
        self.digest = Some(digest);
        Ok(())
    }
}

impl Runner for PutBlobStreamingTest {
    fn run(&mut self, client: &dyn ProtocolClient) -> Result<u64> {
        let response = client.execute(Request::new(Method::POST, UPLOADS))?.expect(
            "initiating upload",
            "created or accepted",
            &[StatusCode::CREATED, StatusCode::ACCEPTED],
        )?;
        let location = response.location().ok_or(Error::MissingLocation {
            context: "initiating upload",
        })?;

        let size = self.opt.size_bytes;
        let delay = self.opt.delay();
        let stream = content::generate(size, delay);
        // the retry hook swaps in the digest of the regenerated stream
        let digest = Arc::new(Mutex::new(stream.digest_cell()));
        let hook_digest = digest.clone();
        let request = Request::located(Method::PATCH, location)
            .header(CONTENT_TYPE, MEDIA_TYPE_OCTET_STREAM)
            .body(Body::stream(stream, size))
            .on_retry(move || {
                let stream = content::generate(size, delay);
                *hook_digest.lock() = stream.digest_cell();
                Body::stream(stream, size)
            });
        let response = client.execute(request)?.expect(
            "uploading data",
            "accepted",
            &[StatusCode::ACCEPTED],
        )?;
        // the body went out, later failures still report it
        self.finalize(client, &response, &digest)
            .map_err(|e| Error::partial(size, e))?;

        Ok(size)
    }

    fn cleanup(&mut self, client: &dyn ProtocolClient) -> Result<()> {
        if let Some(digest) = self.digest.take() {
            delete_blob(client, &digest)?;
        }
        Ok(())
    }
}

// }}} put-blob-streaming

// {{{ get-blob

pub struct GetBlobTest {
    content: Content,
    pushed: bool,
}

impl GetBlobTest {
    pub fn create(cfg: &TestConfig) -> Result<Box<dyn Runner>> {
        let opt: BlobOpt = parameters(cfg)?;
        Ok(Box::new(Self {
            content: Content::generate(opt.size_bytes)?,
            pushed: false,
        }))
    }
}

impl Runner for GetBlobTest {
    fn prepare(&mut self, client: &dyn ProtocolClient) -> Result<()> {
        if !self.pushed {
            push_blob(client, &self.content.body, &self.content.digest, "pushing blob")?;
            self.pushed = true;
        }
        Ok(())
    }

    fn run(&mut self, client: &dyn ProtocolClient) -> Result<u64> {
        let request = Request::new(Method::GET, BLOB).reference(self.content.digest.as_str());
        let response =
            client
                .execute(request)?
                .expect("fetching blob", "ok", &[StatusCode::OK])?;
        Ok(response.body.len() as u64)
    }

    fn cleanup(&mut self, client: &dyn ProtocolClient) -> Result<()> {
        if self.pushed {
            delete_blob(client, &self.content.digest)?;
            self.pushed = false;
        }
        Ok(())
    }
}

// }}} get-blob

pub(crate) fn register(registry: &mut Registry) {
    registry.register(TestType::PutBlobMonolithic, PutBlobMonolithicTest::create);
    registry.register(TestType::PutBlobStreaming, PutBlobStreamingTest::create);
    registry.register(TestType::GetBlob, GetBlobTest::create);
}
