//! The protocol client used by trial runners to talk to a registry.
//!
//! Runners only see the [`ProtocolClient`] trait: they build a [`Request`] against a path
//! template of the distribution API and hand it to [`ProtocolClient::execute`]. The template may
//! contain `<name>`, replaced by the namespace of the run, and `<reference>`, replaced by the
//! request's own reference (a tag or a digest).
//!
//! [`HttpClient`] is the real implementation on top of [`reqwest::blocking`]. It owns everything
//! about the exchange with the registry: root URL, basic authentication, user agent and retries.
//! A request is re-issued after a transport error or a `429`/`5xx` answer. In-memory bodies are
//! replayed as is; a streamed body can only be replayed if the request carries a retry hook that
//! produces a fresh body.

use crate::config::RegistryConfig;
use crate::content::random_string;
use crate::error::{Error, Result};
use bytes::Bytes;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Method, StatusCode, Url};
use std::fmt;
use std::io::Read;

/// The body of a request.
pub enum Body {
    Empty,
    /// An in-memory body that can be sent any number of times.
    Bytes(Bytes),
    /// A single-use body of known length, read while the request is sent.
    Stream {
        reader: Box<dyn Read + Send>,
        len: u64,
    },
}

impl Body {
    pub fn stream(reader: impl Read + Send + 'static, len: u64) -> Self {
        Body::Stream {
            reader: Box::new(reader),
            len,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Bytes(b) => b.len() as u64,
            Body::Stream { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the body for re-sending it, unless it is a stream.
    fn try_clone(&self) -> Option<Body> {
        match self {
            Body::Empty => Some(Body::Empty),
            Body::Bytes(b) => Some(Body::Bytes(b.clone())),
            Body::Stream { .. } => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(b) => write!(f, "Bytes({})", b.len()),
            Body::Stream { len, .. } => write!(f, "Stream({})", len),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(v))
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

/// Produces a fresh body before a request is re-issued.
pub type RetryHook = Box<dyn FnMut() -> Body + Send>;

/// A request against a path template of the distribution API.
pub struct Request {
    pub method: Method,
    pub path: String,
    pub reference: Option<String>,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Body,
    /// The path came from a `Location` header and is resolved against the host of the root URL.
    pub located: bool,
    pub(crate) on_retry: Option<RetryHook>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            reference: None,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: Body::Empty,
            located: false,
            on_retry: None,
        }
    }

    /// A request to a location handed out by the registry, such as an upload session.
    ///
    /// Template paths are appended to the root URL, including any path prefix it has. A location
    /// already carries that prefix, so it replaces the whole path of the root URL instead.
    pub fn located(method: Method, location: impl Into<String>) -> Self {
        Self {
            located: true,
            ..Self::new(method, location)
        }
    }

    /// The value substituted for `<reference>` in the path.
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Registers a hook that is called for a new body every time the request is re-issued.
    ///
    /// Streams are exhausted by a failed attempt, so a streamed request needs this to be retried
    /// at all.
    pub fn on_retry(mut self, hook: impl FnMut() -> Body + Send + 'static) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// The path with `<name>` and `<reference>` substituted.
    pub fn expand_path(&self, namespace: &str) -> String {
        let path = self.path.replace("<name>", namespace);
        match self.reference.as_deref() {
            Some(reference) => path.replace("<reference>", reference),
            None => path,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("reference", &self.reference)
            .field("query", &self.query)
            .field("located", &self.located)
            .field("body", &self.body)
            .finish()
    }
}

/// A response from the registry, with the whole body read.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    /// The `Location` header reduced to path and query, so that it can be used as the path of a
    /// follow-up request.
    pub fn location(&self) -> Option<String> {
        let location = self.headers.get(LOCATION)?.to_str().ok()?;
        match Url::parse(location) {
            Ok(url) => Some(match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            }),
            Err(_) => Some(location.to_string()),
        }
    }

    /// Fails with a protocol error unless the status is one of `expected`.
    pub fn expect(
        self,
        context: &'static str,
        expected_desc: &'static str,
        expected: &[StatusCode],
    ) -> Result<Self> {
        if expected.contains(&self.status) {
            Ok(self)
        } else {
            Err(Error::Protocol {
                context,
                expected: expected_desc,
                status: self.status(),
            })
        }
    }
}

/// The capability of exchanging requests with a registry.
///
/// One client is shared by all trials of a run, from many threads at once.
pub trait ProtocolClient: Send + Sync {
    fn execute(&self, request: Request) -> Result<Response>;
}

/// A random namespace with two path components.
pub fn random_namespace() -> String {
    format!("{}/{}", random_string(10), random_string(10))
}

/// A [`ProtocolClient`] speaking HTTP through a blocking [`reqwest`] client.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::blocking::Client,
    root: Url,
    namespace: String,
    auth: Option<(String, Option<String>)>,
    retries: u32,
    debug: bool,
}

const USER_AGENT: &str = "distribution-bench";

impl HttpClient {
    pub fn new(opt: &RegistryConfig, debug: bool) -> Result<Self> {
        let root = Url::parse(&opt.root_url).map_err(|e| Error::Url {
            url: opt.root_url.clone(),
            message: e.to_string(),
        })?;
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            // uploads may take arbitrarily long
            .timeout(None)
            .build()
            .map_err(|source| Error::Transport {
                context: "creating registry client",
                source,
            })?;
        let namespace = match opt.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => random_namespace(),
        };
        debug!("Using namespace {} on {}", namespace, root);
        let auth = opt
            .username
            .as_ref()
            .filter(|u| !u.is_empty())
            .map(|u| (u.clone(), opt.password.clone()));
        Ok(Self {
            client,
            root,
            namespace,
            auth,
            retries: opt.retries,
            debug,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The absolute URL of a request.
    pub fn url(&self, request: &Request) -> Result<Url> {
        let path = request.expand_path(&self.namespace);
        let url = match request.located {
            true => self.root.join(&path),
            false => Url::parse(&format!(
                "{}{}",
                self.root.as_str().trim_end_matches('/'),
                path
            )),
        };
        let mut url = url.map_err(|e| Error::Url {
            url: path.clone(),
            message: e.to_string(),
        })?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in request.query.iter() {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn send(&self, request: &Request, url: &Url, body: Body) -> reqwest::Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .headers(request.headers.clone());
        if let Some((user, password)) = self.auth.as_ref() {
            builder = builder.basic_auth(user, password.as_ref());
        }
        builder = match body {
            Body::Empty => builder,
            Body::Bytes(b) => builder.body(b),
            Body::Stream { reader, len } => {
                builder.body(reqwest::blocking::Body::sized(reader, len))
            }
        };
        let response = builder.send()?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes()?;
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

impl ProtocolClient for HttpClient {
    fn execute(&self, mut request: Request) -> Result<Response> {
        let url = self.url(&request)?;
        send_with_retries(&mut request, self.retries, |request, body| {
            if self.debug {
                debug!("{} {} body {:?}", request.method, url, body);
            }
            let result = self.send(request, &url, body);
            if self.debug {
                match &result {
                    Ok(response) => debug!("{} {} -> {}", request.method, url, response.status),
                    Err(e) => debug!("{} {} -> {}", request.method, url, e),
                }
            }
            result
        })
        .map_err(|source| Error::Transport {
            context: "sending request",
            source,
        })
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Sends `request` through `send`, re-issuing it up to `retries` times after a transport error or
/// a `429`/`5xx` answer.
///
/// Before every re-issue, the retry hook of the request (if any) is asked for a new body.
/// Without a hook, in-memory bodies are replayed and streamed bodies are not retried. The result
/// of the last attempt is returned.
pub fn send_with_retries<E: fmt::Display>(
    request: &mut Request,
    retries: u32,
    mut send: impl FnMut(&Request, Body) -> std::result::Result<Response, E>,
) -> std::result::Result<Response, E> {
    let mut body = std::mem::replace(&mut request.body, Body::Empty);
    let mut attempt = 0u32;
    loop {
        let replay = body.try_clone();
        let result = send(request, body);
        let retryable = match &result {
            Ok(response) => should_retry(response.status),
            Err(_) => true,
        };
        if !retryable || attempt >= retries {
            return result;
        }
        body = match (replay, request.on_retry.as_mut()) {
            (_, Some(hook)) => hook(),
            (Some(replay), None) => replay,
            (None, None) => return result,
        };
        attempt += 1;
        match &result {
            Ok(response) => info!(
                "Retrying {} {} after status {} (attempt {})",
                request.method, request.path, response.status, attempt
            ),
            Err(e) => info!(
                "Retrying {} {} after error: {} (attempt {})",
                request.method, request.path, e, attempt
            ),
        }
    }
}
