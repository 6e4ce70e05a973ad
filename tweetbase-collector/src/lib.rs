//! Collection and storage of social media posts.
//!
//! - [`rest`]: quota-aware REST client and paginated walks
//! - [`streaming`]: reconnecting consumer of the real-time feed
//! - [`ingest`]: normalizes payloads into the relational store
//! - [`db`]: schema, repositories and aggregation queries

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod rest;
pub mod streaming;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::{Database, QueryRepository};
pub use error::{IngestError, RestError, StreamError, TransportError};
pub use ingest::{IngestReport, Ingestor};
pub use rest::RateLimitedClient;
pub use streaming::{StreamEvent, StreamFilter, StreamHandler, StreamingClient};
pub use transport::{ApiResponse, HttpTransport, StreamResponse, StreamTransport, Transport};
