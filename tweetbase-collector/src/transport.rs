//! HTTP plumbing shared by the REST and streaming clients.
//!
//! The clients only see [`Transport`] and [`StreamTransport`]; the production
//! implementation is [`HttpTransport`] on top of the blocking reqwest client.

use reqwest::blocking::Client;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::config::ApiSettings;
use crate::error::TransportError;

/// A fully read single-request response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }
}

pub type LineReader = Box<dyn Iterator<Item = Result<String, TransportError>>>;
pub type LineResult = Result<String, TransportError>;

/// Lines buffered ahead of the consumer by a background reader
const READ_AHEAD: usize = 64;

enum Source {
    Lines(LineReader),
    Channel(Receiver<LineResult>),
}

/// Outcome of waiting a bounded time for the next line
#[derive(Debug)]
pub enum LineWait {
    Line(LineResult),
    /// Nothing arrived within the wait
    Idle,
    Closed,
}

/// An open long-lived response. Dropping it closes the connection.
pub struct StreamResponse {
    pub status: u16,
    source: Source,
}

impl StreamResponse {
    pub fn new(status: u16, lines: LineReader) -> Self {
        Self {
            status,
            source: Source::Lines(lines),
        }
    }

    /// Response fed by another thread. The stream ends when every sender is dropped.
    pub fn from_receiver(status: u16, receiver: Receiver<LineResult>) -> Self {
        Self {
            status,
            source: Source::Channel(receiver),
        }
    }

    /// Read `reader` line by line on a background thread, so the consumer can
    /// stop waiting without a read in progress. The thread exits on the first
    /// read error, at end of input, or once the response is dropped.
    pub fn from_reader<R>(status: u16, reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(READ_AHEAD);
        thread::spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if sender.send(line.map_err(TransportError::from)).is_err() || failed {
                    break;
                }
            }
        });
        Self::from_receiver(status, receiver)
    }

    /// Response whose body is the given lines, then end-of-stream
    pub fn from_lines<I, S>(status: u16, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        Self::new(status, Box::new(lines.into_iter().map(Ok::<String, TransportError>)))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Wait at most `wait` for the next line. In-memory bodies never report idle.
    pub fn next_within(&mut self, wait: Duration) -> LineWait {
        match &mut self.source {
            Source::Lines(lines) => match lines.next() {
                Some(line) => LineWait::Line(line),
                None => LineWait::Closed,
            },
            Source::Channel(receiver) => match receiver.recv_timeout(wait) {
                Ok(line) => LineWait::Line(line),
                Err(RecvTimeoutError::Timeout) => LineWait::Idle,
                Err(RecvTimeoutError::Disconnected) => LineWait::Closed,
            },
        }
    }
}

impl Iterator for StreamResponse {
    type Item = LineResult;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Lines(lines) => lines.next(),
            Source::Channel(receiver) => receiver.recv().ok(),
        }
    }
}

/// Single bounded requests
pub trait Transport {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<ApiResponse, TransportError>;
}

/// Long-lived line-delimited responses
pub trait StreamTransport {
    fn open(&self, url: &str, params: &[(String, String)]) -> Result<StreamResponse, TransportError>;
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Network(err.to_string())
    } else {
        TransportError::Http(err)
    }
}

/// Authenticated blocking HTTP client
pub struct HttpTransport {
    client: Client,
    stream_client: Client,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(settings: &ApiSettings, stream_stall_timeout: Duration) -> Result<Self, TransportError> {
        let user_agent = concat!("tweetbase/", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        // the blocking client applies its timeout to each body read,
        // so on the stream it bounds silence rather than total duration
        let stream_client = Client::builder()
            .user_agent(user_agent)
            .timeout(stream_stall_timeout)
            .build()?;

        if settings.bearer_token.is_none() {
            tracing::warn!("No API token configured, requests will be unauthenticated");
        }

        Ok(Self {
            client,
            stream_client,
            bearer_token: settings.bearer_token.clone(),
        })
    }

    fn authorize(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<ApiResponse, TransportError> {
        let response = self
            .authorize(self.client.get(url).query(params))
            .send()
            .map_err(classify)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().map_err(classify)?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

impl StreamTransport for HttpTransport {
    fn open(&self, url: &str, params: &[(String, String)]) -> Result<StreamResponse, TransportError> {
        let response = self
            .authorize(self.stream_client.post(url).form(params))
            .send()
            .map_err(classify)?;

        let status = response.status().as_u16();
        Ok(StreamResponse::from_reader(status, BufReader::new(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let response = ApiResponse::new(200, "[]").with_header("X-Rate-Limit-Remaining", 12);
        assert_eq!(response.header("x-rate-limit-remaining"), Some("12"));
        assert_eq!(response.header("X-RATE-LIMIT-REMAINING"), Some("12"));
        assert!(response.is_success());
    }

    #[test]
    fn test_json_body() {
        let response = ApiResponse::new(200, "[1, 2, 3]");
        let ids: Vec<i64> = response.json().unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(!ApiResponse::new(503, "").is_success());
    }

    #[test]
    fn test_stream_response_yields_lines() {
        let mut response = StreamResponse::from_lines(200, vec!["a", "", "b"]);
        assert!(response.is_success());
        let lines: Vec<String> = response.by_ref().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["a", "", "b"]);
    }

    #[test]
    fn test_reader_backed_response_goes_idle_then_closes() {
        let (sender, receiver) = mpsc::sync_channel(4);
        let mut response = StreamResponse::from_receiver(200, receiver);
        assert!(matches!(response.next_within(Duration::from_millis(10)), LineWait::Idle));

        sender.send(Ok("a".to_string())).unwrap();
        assert!(matches!(response.next_within(Duration::from_millis(10)), LineWait::Line(Ok(l)) if l == "a"));
        drop(sender);
        assert!(matches!(response.next_within(Duration::from_millis(10)), LineWait::Closed));
    }

    #[test]
    fn test_from_reader_reads_every_line() {
        let body = std::io::Cursor::new(b"one\n\ntwo\n".to_vec());
        let lines: Vec<String> = StreamResponse::from_reader(200, body)
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines, vec!["one", "", "two"]);
    }
}
