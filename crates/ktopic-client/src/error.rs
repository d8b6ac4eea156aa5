use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Admission queue full; the record was not retained
    #[error("too many messages in a queue, dropped")]
    Dropped,

    #[error("writer is closed")]
    Closed,

    #[error("error handler already set")]
    HandlerAlreadySet,

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Response too large: {0} bytes (max: {1})")]
    ResponseTooLarge(usize, usize),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ktopic_protocol::ProtocolError),

    #[error("Codec error: {0}")]
    Codec(#[from] ktopic_core::Error),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Whether a broker client may re-dial and try the request again
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionError(_) | Error::IoError(_) | Error::Timeout(_)
        )
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Dropped => io::Error::new(io::ErrorKind::WouldBlock, e),
            Error::Closed => io::Error::new(io::ErrorKind::BrokenPipe, e),
            Error::IoError(inner) => inner,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A failed delivery attempt, reported from a worker to the error handler.
///
/// `partition` is `None` when the failure happened before a partition was
/// chosen (a partition-count query).
#[derive(Error, Debug)]
#[error("produce: {error}")]
pub struct DeliveryError {
    pub topic: Arc<str>,
    pub partition: Option<u32>,
    #[source]
    pub error: Error,
}
