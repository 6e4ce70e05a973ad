//! Reconnect waits for the streaming client.
//!
//! Waits grow while errors keep coming and fall back to the class floor once
//! the previous error is at least [`RESET_AFTER_MINUTES`] old.

use chrono::{DateTime, Utc};
use std::time::Duration;

pub const RESET_AFTER_MINUTES: i64 = 30;

const RATE_LIMIT_FLOOR: f64 = 30.0;
const SERVER_FLOOR: f64 = 2.5;
const SERVER_CAP: f64 = 320.0;
const NETWORK_STEP: f64 = 0.25;
const NETWORK_CAP: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The platform asked us to slow down
    RateLimited,
    /// Remote fault or a disconnect notice
    Server,
    /// Connect failure, reset or stalled read
    Network,
}

impl ErrorClass {
    /// Wait for this class given the wait applied to the previous recent error
    fn wait_after(self, previous: Option<f64>) -> f64 {
        match (self, previous) {
            (ErrorClass::RateLimited, None) => RATE_LIMIT_FLOOR,
            (ErrorClass::RateLimited, Some(prev)) => prev.max(RATE_LIMIT_FLOOR) * 2.0,
            (ErrorClass::Server, None) => SERVER_FLOOR,
            (ErrorClass::Server, Some(prev)) => (prev.max(SERVER_FLOOR) * 2.0).min(SERVER_CAP),
            (ErrorClass::Network, None) => NETWORK_STEP,
            (ErrorClass::Network, Some(prev)) => (prev + NETWORK_STEP).min(NETWORK_CAP),
        }
    }
}

/// What the client should do about a connect status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Retry(ErrorClass),
    Fatal,
    Unclassified,
}

pub fn classify_status(status: u16) -> StatusAction {
    match status {
        420 | 429 => StatusAction::Retry(ErrorClass::RateLimited),
        500 | 502 | 503 | 504 => StatusAction::Retry(ErrorClass::Server),
        401 | 403 | 404 | 406 | 413 | 416 => StatusAction::Fatal,
        _ => StatusAction::Unclassified,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Backoff {
    last_error_at: Option<DateTime<Utc>>,
    last_wait: Option<Duration>,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error at `now` and return how long to wait before reconnecting
    pub fn next_wait(&mut self, class: ErrorClass, now: DateTime<Utc>) -> Duration {
        let recent = self
            .last_error_at
            .is_some_and(|at| now - at < chrono::Duration::minutes(RESET_AFTER_MINUTES));
        let previous = if recent {
            self.last_wait.map(|w| w.as_secs_f64())
        } else {
            None
        };

        let wait = Duration::from_secs_f64(class.wait_after(previous));
        self.last_error_at = Some(now);
        self.last_wait = Some(wait);
        wait
    }

    pub fn last_wait(&self) -> Option<Duration> {
        self.last_wait
    }
}
