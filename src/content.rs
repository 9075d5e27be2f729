//! Synthetic content for uploads.
//!
//! Blob payloads are pseudorandom bytes produced lazily while the request body is being sent, so
//! a multi-gigabyte upload never has to be materialized in memory. The content digest is
//! computed in the same pass: [`DigestingReader`] feeds every byte that passes through it into
//! an incremental hasher and publishes the final [`Digest`] once the declared length has been
//! read.
//!
//! Every stream owns its own random source. Streams are read from different worker threads at
//! the same time, and sharing one generator among them would make them contend on it.

use crate::digest::Digest;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use sha2::{Digest as _, Sha256};
use std::io::{self, Read};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// A random lowercase string, used for tags and generated namespaces.
pub fn random_string(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| LETTERS[rng.random_range(0..LETTERS.len())] as char)
        .collect()
}

/// A fully materialized random buffer of `len` bytes.
pub fn random_bytes(len: u64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len as usize);
    RandomReader::new(len).read_to_end(&mut buf)?;
    Ok(buf)
}

/// A length-bounded reader of pseudorandom bytes.
#[derive(Debug)]
pub struct RandomReader {
    remaining: u64,
    rng: SmallRng,
}

impl RandomReader {
    pub fn new(len: u64) -> Self {
        Self {
            remaining: len,
            rng: SmallRng::from_os_rng(),
        }
    }
}

impl Read for RandomReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = (buf.len() as u64).min(self.remaining) as usize;
        self.rng.fill_bytes(&mut buf[..len]);
        self.remaining -= len as u64;
        Ok(len)
    }
}

/// Sleeps for a fixed delay before every read except the first one.
///
/// The first read returns immediately so the upload starts without delay, later reads simulate
/// a sender with limited bandwidth.
#[derive(Debug)]
pub struct PacedReader<R> {
    inner: R,
    delay: Duration,
    used: bool,
}

impl<R: Read> PacedReader<R> {
    pub fn new(inner: R, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            used: false,
        }
    }
}

impl<R: Read> Read for PacedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.used && !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.used = true;
        self.inner.read(buf)
    }
}

/// A shared slot for the digest of a stream.
///
/// The reader is usually moved into a request body and consumed by the transport. Keeping a
/// clone of the cell lets the owner of the stream fetch the digest afterwards.
#[derive(Clone, Debug, Default)]
pub struct DigestCell(Arc<OnceLock<Digest>>);

impl DigestCell {
    /// The digest, or `None` if the stream has not been read to its end yet.
    pub fn get(&self) -> Option<Digest> {
        self.0.get().cloned()
    }

    fn set(&self, digest: Digest) {
        let _ = self.0.set(digest);
    }
}

/// Tees every byte read from `inner` into a SHA-256 hasher.
///
/// At most `len` bytes are read from `inner`. The digest is published to the [`DigestCell`] once
/// they have passed through, or when the inner reader ends early. It is never updated afterwards.
#[derive(Debug)]
pub struct DigestingReader<R> {
    inner: R,
    remaining: u64,
    hasher: Option<Sha256>,
    cell: DigestCell,
}

impl<R: Read> DigestingReader<R> {
    pub fn new(inner: R, len: u64) -> Self {
        let mut reader = Self {
            inner,
            remaining: len,
            hasher: Some(Sha256::new()),
            cell: DigestCell::default(),
        };
        if len == 0 {
            reader.finish();
        }
        reader
    }

    /// A handle to the digest that stays valid after the reader has been moved away.
    pub fn digest_cell(&self) -> DigestCell {
        self.cell.clone()
    }

    pub fn digest(&self) -> Option<Digest> {
        self.cell.get()
    }

    fn finish(&mut self) {
        if let Some(hasher) = self.hasher.take() {
            self.cell.set(Digest::from_hasher(hasher));
        }
    }
}

impl<R: Read> Read for DigestingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let cap = (buf.len() as u64).min(self.remaining) as usize;
        if cap == 0 {
            return Ok(0);
        }
        let n = self.inner.read(&mut buf[..cap])?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        self.remaining -= n as u64;
        if self.remaining == 0 || n == 0 {
            self.finish();
        }
        Ok(n)
    }
}

/// The single-use synthetic stream handed to streamed uploads.
pub type ContentStream = DigestingReader<PacedReader<RandomReader>>;

/// Creates a stream of `len` random bytes. With a non-zero `delay`, every read after the first
/// one is delayed.
pub fn generate(len: u64, delay: Duration) -> ContentStream {
    DigestingReader::new(PacedReader::new(RandomReader::new(len), delay), len)
}
