//! An in-memory registry for tests.
//!
//! It understands the subset of the distribution API the runners use, verifies digests the way a
//! real registry does, and can be told to fail upcoming requests to exercise retries and error
//! paths.

use crate::client::{send_with_retries, Body, ProtocolClient, Request, Response};
use crate::digest::Digest;
use crate::error::{Error, Result};
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, LOCATION};
use reqwest::{Method, StatusCode, Url};
use std::io::Read;

pub(crate) const NAMESPACE: &str = "mock/repo";

#[derive(Default)]
struct State {
    sessions: HashMap<String, Vec<u8>>,
    blobs: HashMap<String, Bytes>,
    /// reference (tag or digest) -> manifest
    manifests: HashMap<String, Bytes>,
    next_session: usize,
    log: Vec<String>,
    /// Number of upcoming `PATCH` requests answered with a 500 after reading their body.
    failing_patches: usize,
    /// Streamed bodies received by `PATCH`, including the ones that were failed.
    patch_bodies: Vec<Vec<u8>>,
    /// Upcoming requests of a method answered with a fixed status.
    forced: Vec<(Method, StatusCode)>,
}

pub(crate) struct MockRegistry {
    state: Mutex<State>,
    retries: u32,
}

fn read_body(body: Body) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    match body {
        Body::Empty => {}
        Body::Bytes(b) => data.extend_from_slice(&b),
        Body::Stream { mut reader, .. } => {
            reader.read_to_end(&mut data)?;
        }
    }
    Ok(data)
}

fn with_location(status: StatusCode, location: &str) -> Response {
    let mut response = Response::new(status);
    response.headers.insert(
        LOCATION,
        HeaderValue::from_str(location).expect("valid location"),
    );
    response
}

impl MockRegistry {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            retries: 2,
        }
    }

    pub(crate) fn fail_patches(&self, n: usize) {
        self.state.lock().failing_patches = n;
    }

    pub(crate) fn force_status(&self, method: Method, status: StatusCode) {
        self.state.lock().forced.push((method, status));
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub(crate) fn patch_bodies(&self) -> Vec<Vec<u8>> {
        self.state.lock().patch_bodies.clone()
    }

    pub(crate) fn blob_count(&self) -> usize {
        self.state.lock().blobs.len()
    }

    pub(crate) fn has_blob(&self, digest: &Digest) -> bool {
        self.state.lock().blobs.contains_key(digest.as_str())
    }

    pub(crate) fn manifest_count(&self) -> usize {
        self.state.lock().manifests.len()
    }

    fn handle(&self, request: &Request, body: Body) -> Result<Response> {
        let path = request.expand_path(NAMESPACE);
        let mut url = Url::parse("http://mock")
            .and_then(|u| u.join(&path))
            .map_err(|e| Error::Url {
                url: path.clone(),
                message: e.to_string(),
            })?;
        for (k, v) in request.query.iter() {
            url.query_pairs_mut().append_pair(k, v);
        }
        let digest = url
            .query_pairs()
            .find(|(k, _)| k == "digest")
            .map(|(_, v)| v.into_owned());
        let data = read_body(body)?;

        let mut state = self.state.lock();
        state.log.push(format!("{} {}", request.method, url.path()));

        if let Some(i) = state.forced.iter().position(|(m, _)| *m == request.method) {
            let (_, status) = state.forced.remove(i);
            return Ok(Response::new(status));
        }

        let prefix = format!("/v2/{}/", NAMESPACE);
        let route = match url.path().strip_prefix(&prefix) {
            Some(route) => route.to_string(),
            None if url.path() == "/v2/" && request.method == Method::GET => {
                let mut response = Response::new(StatusCode::OK);
                response.body = Bytes::from_static(b"{}");
                return Ok(response);
            }
            None => return Ok(Response::new(StatusCode::NOT_FOUND)),
        };

        let method = request.method.clone();
        if route == "blobs/uploads/" && method == Method::POST {
            if let Some(digest) = digest {
                return Ok(Self::commit(&mut state, data, &digest));
            }
            state.next_session += 1;
            let id = state.next_session.to_string();
            state.sessions.insert(id.clone(), Vec::new());
            let location = format!("/v2/{}/blobs/uploads/{}?_state={}", NAMESPACE, id, id);
            return Ok(with_location(StatusCode::ACCEPTED, &location));
        }

        if let Some(id) = route.strip_prefix("blobs/uploads/") {
            let id = id.to_string();
            let Some(mut session) = state.sessions.remove(&id) else {
                return Ok(Response::new(StatusCode::NOT_FOUND));
            };
            let location = format!("/v2/{}/blobs/uploads/{}?_state={}", NAMESPACE, id, id);
            if method == Method::PATCH {
                state.patch_bodies.push(data.clone());
                if state.failing_patches > 0 {
                    state.failing_patches -= 1;
                    state.sessions.insert(id, session);
                    return Ok(Response::new(StatusCode::INTERNAL_SERVER_ERROR));
                }
                session.extend_from_slice(&data);
                state.sessions.insert(id, session);
                return Ok(with_location(StatusCode::ACCEPTED, &location));
            }
            if method == Method::PUT {
                session.extend_from_slice(&data);
                return Ok(match digest {
                    Some(digest) => Self::commit(&mut state, session, &digest),
                    None => Response::new(StatusCode::BAD_REQUEST),
                });
            }
            return Ok(Response::new(StatusCode::METHOD_NOT_ALLOWED));
        }

        if let Some(reference) = route.strip_prefix("blobs/") {
            return Ok(match method {
                Method::GET => match state.blobs.get(reference) {
                    Some(blob) => {
                        let mut response = Response::new(StatusCode::OK);
                        response.body = blob.clone();
                        response
                    }
                    None => Response::new(StatusCode::NOT_FOUND),
                },
                Method::DELETE => match state.blobs.remove(reference) {
                    Some(_) => Response::new(StatusCode::ACCEPTED),
                    None => Response::new(StatusCode::NOT_FOUND),
                },
                _ => Response::new(StatusCode::METHOD_NOT_ALLOWED),
            });
        }

        if let Some(reference) = route.strip_prefix("manifests/") {
            let reference = reference.to_string();
            return Ok(match method {
                Method::PUT => {
                    let manifest = Bytes::from(data);
                    let digest = Digest::from_bytes(&manifest);
                    state.manifests.insert(reference, manifest.clone());
                    state.manifests.insert(digest.to_string(), manifest);
                    Response::new(StatusCode::CREATED)
                }
                Method::GET => match state.manifests.get(&reference) {
                    Some(manifest) => {
                        let mut response = Response::new(StatusCode::OK);
                        response.body = manifest.clone();
                        response
                    }
                    None => Response::new(StatusCode::NOT_FOUND),
                },
                Method::DELETE => {
                    let Some(manifest) = state.manifests.remove(&reference) else {
                        return Ok(Response::new(StatusCode::NOT_FOUND));
                    };
                    state.manifests.retain(|_, m| *m != manifest);
                    Response::new(StatusCode::ACCEPTED)
                }
                _ => Response::new(StatusCode::METHOD_NOT_ALLOWED),
            });
        }

        Ok(Response::new(StatusCode::NOT_FOUND))
    }

    fn commit(state: &mut State, data: Vec<u8>, digest: &str) -> Response {
        if Digest::from_bytes(&data).as_str() != digest {
            return Response::new(StatusCode::BAD_REQUEST);
        }
        state.blobs.insert(digest.to_string(), Bytes::from(data));
        with_location(
            StatusCode::CREATED,
            &format!("/v2/{}/blobs/{}", NAMESPACE, digest),
        )
    }
}

impl ProtocolClient for MockRegistry {
    fn execute(&self, mut request: Request) -> Result<Response> {
        send_with_retries(&mut request, self.retries, |request, body| {
            self.handle(request, body)
        })
    }
}
