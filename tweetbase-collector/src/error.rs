use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    /// Connect or read timed out; the REST client retries these
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Timeout(_) => true,
            TransportError::Http(e) => e.is_timeout(),
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            TransportError::Network(_) => false,
        }
    }
}

pub type RestResult<T> = Result<T, RestError>;

#[derive(Error, Debug)]
pub enum RestError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Lookup batch of {0} exceeds the 100 item limit")]
    BatchTooLarge(usize),

    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },
}

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Error, Debug)]
pub enum StreamError {
    /// Authentication, permission or request-shape failure; reconnecting cannot help
    #[error("Unrecoverable stream error: HTTP {0}")]
    Fatal(u16),

    /// A status the backoff policy has no rule for
    #[error("Unexpected stream status: HTTP {0}")]
    Unclassified(u16),

    #[error("Stream interrupted by shutdown request")]
    Interrupted,
}

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Post {0} is already stored")]
    DuplicatePost(i64),

    #[error("Post {id} has an unparsable timestamp {value:?}: {source}")]
    InvalidTimestamp {
        id: i64,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Post {id} nests reposts deeper than {limit} levels")]
    NestingTooDeep { id: i64, limit: usize },

    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl IngestError {
    /// Whether the failure concerns only this item and a batch should carry on
    pub fn is_item_failure(&self) -> bool {
        !matches!(self, IngestError::Storage(_) | IngestError::Io(_))
    }
}
