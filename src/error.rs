use crate::config::TestType;

/// Errors that abort a benchmark run or a single trial.
///
/// A trial failure is never propagated out of the executor as an `Err`; its text is recorded in
/// the trial's result instead. Everything else here is fatal to the test (or the whole run) that
/// produced it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration document is malformed or fails validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configuration names an operation type with no registered constructor.
    #[error("invalid test type: {0}")]
    UnknownOperationType(TestType),

    /// Preparing one of the trials failed, so none of them were run.
    #[error("preparing trial {index}: {source}")]
    Setup {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    /// The registry answered with a status code the operation does not accept.
    #[error("{context}: expected {expected}, got {status}")]
    Protocol {
        context: &'static str,
        expected: &'static str,
        status: u16,
    },

    /// An upload session answer carried no `Location` header to continue with.
    #[error("{context}: missing location header")]
    MissingLocation { context: &'static str },

    /// A request could not be exchanged with the registry at all.
    #[error("{context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// A URL could not be built from the root URL and a request path.
    #[error("invalid url {url}: {message}")]
    Url { url: String, message: String },

    /// The digest of a streamed body was read before the stream was exhausted.
    #[error("digest of the upload body is not available, body was not fully consumed")]
    Digest,

    /// An operation failed after part of its data was already transferred.
    #[error("{source}")]
    Partial {
        bytes: u64,
        #[source]
        source: Box<Error>,
    },

    /// A trial finished without producing a result.
    #[error("trial {index} produced no result")]
    MissingResult { index: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wraps `source` with the number of bytes moved before it happened.
    pub fn partial(bytes: u64, source: Error) -> Self {
        Error::Partial {
            bytes,
            source: Box::new(source),
        }
    }

    /// Bytes moved by the failed operation, 0 unless the error is [`Error::Partial`].
    pub fn bytes_transferred(&self) -> u64 {
        match self {
            Error::Partial { bytes, .. } => *bytes,
            _ => 0,
        }
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
