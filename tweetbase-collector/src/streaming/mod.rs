pub mod backoff;
pub mod client;
pub mod event;

pub use backoff::{classify_status, Backoff, ErrorClass, StatusAction};
pub use client::{StreamFilter, StreamState, StreamingClient};
pub use event::{StreamEvent, StreamHandler};
