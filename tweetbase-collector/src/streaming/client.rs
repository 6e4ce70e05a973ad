use chrono::{DateTime, Utc};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::backoff::{classify_status, Backoff, ErrorClass, StatusAction};
use super::event::{StreamEvent, StreamHandler};
use crate::clock::Clock;
use crate::error::{StreamError, StreamResult};
use crate::transport::{LineWait, StreamResponse, StreamTransport};

const SAMPLE_PATH: &str = "statuses/sample.json";
const FILTER_PATH: &str = "statuses/filter.json";
/// Longest single sleep or read wait, so shutdown is noticed promptly
const SLEEP_SLICE: Duration = Duration::from_secs(1);
/// Phrase tracked by [`StreamingClient::probe`]
const PROBE_PHRASE: &str = "if";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Streaming,
    Backoff,
    Terminated,
}

/// Which part of the feed to subscribe to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFilter {
    Sample,
    Track(Vec<String>),
    Follow(Vec<i64>),
}

impl StreamFilter {
    /// Track phrases win over followed accounts; with neither, sample the feed
    pub fn from_options(track: Vec<String>, follow: Vec<i64>) -> Self {
        if !track.is_empty() {
            StreamFilter::Track(track)
        } else if !follow.is_empty() {
            StreamFilter::Follow(follow)
        } else {
            StreamFilter::Sample
        }
    }

    fn path(&self) -> &'static str {
        match self {
            StreamFilter::Sample => SAMPLE_PATH,
            StreamFilter::Track(_) | StreamFilter::Follow(_) => FILTER_PATH,
        }
    }

    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("stall_warnings".to_string(), "true".to_string()),
            ("filter_level".to_string(), "none".to_string()),
        ];
        match self {
            StreamFilter::Sample => {}
            StreamFilter::Track(phrases) => params.push(("track".to_string(), phrases.join(","))),
            StreamFilter::Follow(ids) => params.push((
                "follow".to_string(),
                ids.iter().map(i64::to_string).collect::<Vec<_>>().join(","),
            )),
        }
        params
    }
}

/// How an open connection ended
enum Ending {
    Stopped,
    Fault(ErrorClass),
}

/// Long-lived feed consumer that reconnects with backoff
pub struct StreamingClient<T, C> {
    transport: T,
    clock: C,
    base_url: String,
    backoff: Backoff,
    state: StreamState,
    shutdown: Arc<AtomicBool>,
}

impl<T: StreamTransport, C: Clock> StreamingClient<T, C> {
    pub fn new(transport: T, clock: C, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            clock,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            backoff: Backoff::new(),
            state: StreamState::Disconnected,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned shutdown flag (e.g. one set from a signal handler)
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    fn transition(&mut self, next: StreamState) {
        if self.state != next {
            debug!("Stream state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn check_shutdown(&mut self) -> StreamResult<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            self.transition(StreamState::Terminated);
            info!("Shutdown requested, closing stream");
            return Err(StreamError::Interrupted);
        }
        Ok(())
    }

    /// Consume the feed until the handler breaks, a fatal status arrives, or shutdown.
    ///
    /// Returns `Ok(())` only when the handler asked to stop.
    pub fn run<H: StreamHandler>(&mut self, filter: &StreamFilter, handler: &mut H) -> StreamResult<()> {
        self.run_until(filter, handler, None)
    }

    fn run_until<H: StreamHandler>(
        &mut self,
        filter: &StreamFilter,
        handler: &mut H,
        deadline: Option<DateTime<Utc>>,
    ) -> StreamResult<()> {
        let url = format!("{}/{}", self.base_url, filter.path());
        let params = filter.params();

        loop {
            self.check_shutdown()?;
            if deadline.is_some_and(|d| self.clock.now() >= d) {
                self.transition(StreamState::Terminated);
                return Ok(());
            }
            self.transition(StreamState::Connecting);

            let class = match self.transport.open(&url, &params) {
                Err(e) => {
                    warn!("Stream connect failed: {}", e);
                    ErrorClass::Network
                }
                Ok(response) if !response.is_success() => self.classify_failure(response.status)?,
                Ok(response) => {
                    info!("Connected to {}", url);
                    self.transition(StreamState::Streaming);
                    match self.consume(response, handler, deadline)? {
                        Ending::Stopped => {
                            self.transition(StreamState::Terminated);
                            return Ok(());
                        }
                        Ending::Fault(class) => class,
                    }
                }
            };

            self.transition(StreamState::Backoff);
            let wait = self.backoff.next_wait(class, self.clock.now());
            warn!("Reconnecting in {:.2}s after {:?} error", wait.as_secs_f64(), class);
            self.sleep_interruptibly(wait)?;
        }
    }

    fn classify_failure(&mut self, status: u16) -> StreamResult<ErrorClass> {
        match classify_status(status) {
            StatusAction::Retry(class) => {
                warn!("Stream connect returned HTTP {}", status);
                Ok(class)
            }
            StatusAction::Fatal => {
                error!("Stream connect returned HTTP {}, giving up", status);
                self.transition(StreamState::Terminated);
                Err(StreamError::Fatal(status))
            }
            StatusAction::Unclassified => {
                error!("Stream connect returned unexpected HTTP {}", status);
                self.transition(StreamState::Terminated);
                Err(StreamError::Unclassified(status))
            }
        }
    }

    /// Read records until the connection ends. Dropping `response` closes it.
    ///
    /// Waits for each line in slices of at most [`SLEEP_SLICE`], so shutdown
    /// and the deadline are honoured on a quiet stream too.
    fn consume<H: StreamHandler>(
        &mut self,
        mut response: StreamResponse,
        handler: &mut H,
        deadline: Option<DateTime<Utc>>,
    ) -> StreamResult<Ending> {
        loop {
            let waited = response.next_within(SLEEP_SLICE);
            self.check_shutdown()?;
            if deadline.is_some_and(|d| self.clock.now() >= d) {
                return Ok(Ending::Stopped);
            }

            let line = match waited {
                LineWait::Idle => continue,
                LineWait::Closed => break,
                LineWait::Line(Ok(line)) => line,
                LineWait::Line(Err(e)) => {
                    warn!("Stream read failed: {}", e);
                    return Ok(Ending::Fault(ErrorClass::Network));
                }
            };

            let event = match StreamEvent::parse(&line) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    error!("Skipping malformed stream record: {}", e);
                    continue;
                }
            };

            if let StreamEvent::Disconnect { code, reason } = &event {
                warn!(
                    "Stream disconnected by remote (code {}): {}",
                    code,
                    reason.as_deref().unwrap_or("no reason given")
                );
                return Ok(match handler.on_event(event) {
                    ControlFlow::Break(()) => Ending::Stopped,
                    ControlFlow::Continue(()) => Ending::Fault(ErrorClass::Server),
                });
            }

            if handler.on_event(event).is_break() {
                return Ok(Ending::Stopped);
            }
        }

        warn!("Stream closed by remote");
        Ok(Ending::Fault(ErrorClass::Network))
    }

    fn sleep_interruptibly(&mut self, wait: Duration) -> StreamResult<()> {
        let mut left = wait;
        while !left.is_zero() {
            self.check_shutdown()?;
            let step = left.min(SLEEP_SLICE);
            self.clock.sleep(step);
            left -= step;
        }
        Ok(())
    }

    /// Track a common word for about `duration` and count the posts seen
    pub fn probe(&mut self, duration: Duration) -> StreamResult<usize> {
        let deadline = chrono::Duration::from_std(duration)
            .ok()
            .map(|d| self.clock.now() + d);
        let filter = StreamFilter::Track(vec![PROBE_PHRASE.to_string()]);
        let mut seen = 0;
        let mut handler = |event: StreamEvent| {
            if let StreamEvent::Post(_) = event {
                seen += 1;
            }
            ControlFlow::Continue(())
        };
        self.run_until(&filter, &mut handler, deadline)?;
        info!("Probe saw {} posts in {}s", seen, duration.as_secs());
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TransportError;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    const POST: &str = r#"{"id": 1, "text": "hi", "created_at": "Wed Oct 28 14:05:09 +0000 2015", "user": {"id": 9}}"#;

    #[derive(Clone, Default)]
    struct ScriptedStream {
        script: Rc<RefCell<VecDeque<Result<StreamResponse, TransportError>>>>,
        opened: Rc<RefCell<Vec<(String, Vec<(String, String)>)>>>,
    }

    impl ScriptedStream {
        fn push(&self, result: Result<StreamResponse, TransportError>) -> &Self {
            self.script.borrow_mut().push_back(result);
            self
        }

        fn status(&self, status: u16) -> &Self {
            self.push(Ok(StreamResponse::from_lines(status, Vec::<String>::new())))
        }

        fn lines(&self, lines: &[&str]) -> &Self {
            let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            self.push(Ok(StreamResponse::from_lines(200, lines)))
        }

        fn opened(&self) -> usize {
            self.opened.borrow().len()
        }
    }

    impl StreamTransport for ScriptedStream {
        fn open(&self, url: &str, params: &[(String, String)]) -> Result<StreamResponse, TransportError> {
            self.opened.borrow_mut().push((url.to_string(), params.to_vec()));
            // an exhausted script ends the run
            self.script
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(StreamResponse::from_lines(401, Vec::<String>::new())))
        }
    }

    fn setup() -> (ScriptedStream, ManualClock, StreamingClient<ScriptedStream, ManualClock>) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2015, 10, 28, 12, 0, 0).unwrap());
        let transport = ScriptedStream::default();
        let client = StreamingClient::new(transport.clone(), clock.clone(), "https://stream.example.test/1.1");
        (transport, clock, client)
    }

    /// Collects events; stops after `limit` posts
    fn collector(events: &mut Vec<StreamEvent>, limit: usize) -> impl FnMut(StreamEvent) -> ControlFlow<()> + '_ {
        move |event| {
            events.push(event);
            let posts = events.iter().filter(|e| matches!(e, StreamEvent::Post(_))).count();
            if posts >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }

    #[test]
    fn test_dispatches_records_and_skips_noise() {
        let (transport, clock, mut client) = setup();
        transport.lines(&["", POST, "{broken", r#"{"limit": {"track": 3}}"#, POST]);

        let mut events = Vec::new();
        client.run(&StreamFilter::Sample, &mut collector(&mut events, 2)).unwrap();

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], StreamEvent::Post(_)));
        assert!(matches!(events[1], StreamEvent::Notice(_)));
        assert_eq!(client.state(), StreamState::Terminated);
        assert!(clock.sleeps().is_empty());

        let opened = transport.opened.borrow();
        assert_eq!(opened[0].0, "https://stream.example.test/1.1/statuses/sample.json");
        assert!(opened[0].1.contains(&("stall_warnings".to_string(), "true".to_string())));
        assert!(opened[0].1.contains(&("filter_level".to_string(), "none".to_string())));
    }

    #[test]
    fn test_auth_failure_is_fatal_without_retry() {
        let (transport, clock, mut client) = setup();
        transport.status(401).lines(&[POST]);

        let mut events = Vec::new();
        let err = client.run(&StreamFilter::Sample, &mut collector(&mut events, 1)).unwrap_err();

        assert!(matches!(err, StreamError::Fatal(401)));
        assert_eq!(transport.opened(), 1);
        assert!(events.is_empty());
        assert!(clock.sleeps().is_empty());
        assert_eq!(client.state(), StreamState::Terminated);
    }

    #[test]
    fn test_unclassified_status_is_not_retried() {
        let (transport, _clock, mut client) = setup();
        transport.status(418);

        let mut events = Vec::new();
        let err = client.run(&StreamFilter::Sample, &mut collector(&mut events, 1)).unwrap_err();
        assert!(matches!(err, StreamError::Unclassified(418)));
        assert_eq!(transport.opened(), 1);
    }

    #[test]
    fn test_rate_limit_backs_off_then_reconnects() {
        let (transport, clock, mut client) = setup();
        transport.status(420).status(420).lines(&[POST]);

        let mut events = Vec::new();
        client.run(&StreamFilter::Sample, &mut collector(&mut events, 1)).unwrap();

        assert_eq!(transport.opened(), 3);
        assert_eq!(clock.total_slept(), Duration::from_secs(90));
        assert!(clock.sleeps().iter().all(|s| *s <= Duration::from_secs(1)));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_disconnect_notice_is_dispatched_and_backs_off() {
        let (transport, clock, mut client) = setup();
        transport
            .lines(&[r#"{"disconnect": {"code": 4, "reason": "duplicate stream"}}"#, POST])
            .lines(&[POST]);

        let mut events = Vec::new();
        client.run(&StreamFilter::Sample, &mut collector(&mut events, 1)).unwrap();

        assert!(matches!(events[0], StreamEvent::Disconnect { code: 4, .. }));
        assert!(matches!(events[1], StreamEvent::Post(_)));
        assert_eq!(events.len(), 2);
        assert_eq!(transport.opened(), 2);
        assert_eq!(clock.total_slept(), Duration::from_millis(2500));
    }

    #[test]
    fn test_connect_error_and_closed_stream_are_network_faults() {
        let (transport, clock, mut client) = setup();
        transport
            .push(Err(TransportError::Network("connection refused".into())))
            .lines(&[""])
            .push(Ok(StreamResponse::new(
                200,
                Box::new(vec![Err::<String, _>(TransportError::Timeout("stalled".into()))].into_iter()),
            )))
            .lines(&[POST]);

        let mut events = Vec::new();
        client.run(&StreamFilter::Sample, &mut collector(&mut events, 1)).unwrap();

        assert_eq!(transport.opened(), 4);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(750)
            ]
        );
    }

    #[test]
    fn test_shutdown_interrupts_stream() {
        let (transport, _clock, mut client) = setup();
        transport.lines(&[POST, POST, POST]);
        let shutdown = client.shutdown_handle();

        let mut seen = 0;
        let mut handler = |_event: StreamEvent| {
            seen += 1;
            shutdown.store(true, Ordering::SeqCst);
            ControlFlow::Continue(())
        };
        let err = client.run(&StreamFilter::Sample, &mut handler).unwrap_err();

        assert!(matches!(err, StreamError::Interrupted));
        assert_eq!(seen, 1);
        assert_eq!(client.state(), StreamState::Terminated);
        assert_eq!(transport.opened(), 1);
    }

    #[test]
    fn test_shutdown_interrupts_quiet_stream() {
        let (transport, _clock, mut client) = setup();
        // the sender stays alive and silent, like a connection with no traffic
        let (_sender, receiver) = std::sync::mpsc::sync_channel(1);
        transport.push(Ok(StreamResponse::from_receiver(200, receiver)));
        let shutdown = client.shutdown_handle();
        let signaller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            shutdown.store(true, Ordering::SeqCst);
        });

        let started = std::time::Instant::now();
        let mut handler = |_event: StreamEvent| ControlFlow::Continue(());
        let err = client.run(&StreamFilter::Sample, &mut handler).unwrap_err();
        signaller.join().unwrap();

        assert!(matches!(err, StreamError::Interrupted));
        assert!(started.elapsed() < SLEEP_SLICE * 3);
        assert_eq!(client.state(), StreamState::Terminated);
    }

    #[test]
    fn test_shutdown_before_connect() {
        let (transport, _clock, client) = setup();
        let flag = Arc::new(AtomicBool::new(true));
        let mut client = client.with_shutdown(Arc::clone(&flag));

        let mut handler = |_event: StreamEvent| ControlFlow::Continue(());
        let err = client.run(&StreamFilter::Sample, &mut handler).unwrap_err();
        assert!(matches!(err, StreamError::Interrupted));
        assert_eq!(transport.opened(), 0);
    }

    #[test]
    fn test_filter_params() {
        let (transport, _clock, mut client) = setup();
        let filter = StreamFilter::from_options(vec!["vote".into(), "election".into()], vec![1, 2]);
        assert_eq!(filter, StreamFilter::Track(vec!["vote".into(), "election".into()]));
        transport.status(404);

        let mut handler = |_event: StreamEvent| ControlFlow::Continue(());
        let _ = client.run(&filter, &mut handler);

        let opened = transport.opened.borrow();
        assert_eq!(opened[0].0, "https://stream.example.test/1.1/statuses/filter.json");
        assert!(opened[0].1.contains(&("track".to_string(), "vote,election".to_string())));

        assert_eq!(
            StreamFilter::from_options(vec![], vec![1, 2]).params().last(),
            Some(&("follow".to_string(), "1,2".to_string()))
        );
        assert_eq!(StreamFilter::from_options(vec![], vec![]), StreamFilter::Sample);
    }

    #[test]
    fn test_probe_counts_until_deadline() {
        let (transport, clock, mut client) = setup();
        let ticking = clock.clone();
        let lines = std::iter::repeat(POST.to_string()).take(10).map(move |line| {
            ticking.advance(chrono::Duration::seconds(10));
            Ok::<_, TransportError>(line)
        });
        transport.push(Ok(StreamResponse::new(200, Box::new(lines))));

        let seen = client.probe(Duration::from_secs(25)).unwrap();

        assert_eq!(seen, 2);
        assert_eq!(client.state(), StreamState::Terminated);
        let opened = transport.opened.borrow();
        assert!(opened[0].1.contains(&("track".to_string(), "if".to_string())));
    }
}
