// End-to-end collection: scripted API responses flow through the clients,
// into the store, and back out through the aggregation queries.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::rc::Rc;

use tweetbase_collector::config::RestSettings;
use tweetbase_collector::error::TransportError;
use tweetbase_collector::rest::AccountRef;
use tweetbase_collector::{
    ApiResponse, Database, Ingestor, ManualClock, QueryRepository, RateLimitedClient, StreamEvent,
    StreamFilter, StreamResponse, StreamTransport, StreamingClient, Transport,
};
use tweetbase_types::{Granularity, Post};

#[derive(Clone, Default)]
struct Replay {
    responses: Rc<RefCell<VecDeque<ApiResponse>>>,
    streams: Rc<RefCell<VecDeque<StreamResponse>>>,
}

impl Transport for Replay {
    fn get(&self, _url: &str, _params: &[(String, String)]) -> Result<ApiResponse, TransportError> {
        Ok(self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ApiResponse::new(200, "[]")))
    }
}

impl StreamTransport for Replay {
    fn open(&self, _url: &str, _params: &[(String, String)]) -> Result<StreamResponse, TransportError> {
        Ok(self
            .streams
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| StreamResponse::from_lines(401, Vec::<String>::new())))
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 10, 28, 12, 0, 0).unwrap()
}

fn post(id: i64, user: i64, at: DateTime<Utc>, tags: &[&str]) -> Value {
    json!({
        "id": id,
        "text": format!("post {}", id),
        "created_at": at.format("%a %b %d %H:%M:%S %z %Y").to_string(),
        "user": {"id": user, "screen_name": format!("user{}", user)},
        "entities": {
            "hashtags": tags.iter().map(|t| json!({"text": t})).collect::<Vec<_>>(),
            "urls": [],
            "user_mentions": []
        }
    })
}

fn page(posts: Vec<Value>) -> ApiResponse {
    ApiResponse::new(200, Value::Array(posts).to_string())
        .with_header("x-rate-limit-remaining", 150)
        .with_header("x-rate-limit-reset", t0().timestamp() + 900)
}

#[test]
fn test_archive_into_store_and_interval_report() {
    let db = Database::open(":memory:").unwrap();
    let ingestor = Ingestor::new(db.clone());
    let replay = Replay::default();
    let clock = ManualClock::new(t0());
    {
        let mut responses = replay.responses.borrow_mut();
        responses.push_back(page(vec![
            post(30, 1, t0() + Duration::minutes(90), &["Vote"]),
            post(20, 1, t0() + Duration::minutes(30), &["vote"]),
        ]));
        responses.push_back(page(vec![post(10, 1, t0() + Duration::minutes(5), &["VOTE", "other"])]));
        responses.push_back(page(vec![]));
    }

    let mut client = RateLimitedClient::new(replay.clone(), clock.clone(), "https://api.test/1.1", &RestSettings::default());
    let mut stored = 0;
    for page in client.archive(AccountRef::Name("user1".into())) {
        stored += ingestor.ingest_all(&page.unwrap()).unwrap().stored;
    }
    assert_eq!(stored, 3);
    assert_eq!(client.quota().remaining, 150);

    let queries = QueryRepository::new(db.pool.clone());
    let counts = queries.counts().unwrap();
    assert_eq!((counts.posts, counts.users, counts.hashtags), (3, 1, 2));

    let windows: Vec<(i64, Vec<i64>)> = queries
        .by_interval::<Post>(Granularity::Hour, Some(t0()), Some(t0() + Duration::hours(2)))
        .map(|w| {
            let (window, posts) = w.unwrap();
            (
                (window.start - t0()).num_hours(),
                posts.into_iter().map(|p| p.id).collect(),
            )
        })
        .collect();
    assert_eq!(windows, vec![(0, vec![10, 20]), (1, vec![30])]);

    let tags = queries
        .hashtag_counts(t0(), t0() + Duration::hours(2))
        .unwrap();
    assert_eq!(tags[0].item.tag, "vote");
    assert_eq!(tags[0].count, 3);
}

#[test]
fn test_hydrate_only_missing_posts() {
    let db = Database::open(":memory:").unwrap();
    let ingestor = Ingestor::new(db.clone());
    let existing: tweetbase_types::RawPost = serde_json::from_value(post(1, 1, t0(), &[])).unwrap();
    ingestor.ingest(&existing, None).unwrap();

    let replay = Replay::default();
    replay
        .responses
        .borrow_mut()
        .push_back(page(vec![post(2, 2, t0(), &[]), post(3, 2, t0(), &[])]));
    let clock = ManualClock::new(t0());
    let mut client = RateLimitedClient::new(replay, clock.clone(), "https://api.test/1.1", &RestSettings::default());

    let missing = ingestor.missing_ids(vec![1, 2, 3]).unwrap();
    assert_eq!(missing, vec![2, 3]);
    let mut stored = 0;
    for page in client.lookup_all(missing) {
        stored += ingestor.ingest_all(&page.unwrap()).unwrap().stored;
    }

    assert_eq!(stored, 2);
    assert!(ingestor.missing_ids(vec![1, 2, 3]).unwrap().is_empty());
    assert_eq!(clock.sleeps().len(), 1);
}

#[test]
fn test_stream_into_store_with_reposts() {
    let db = Database::open(":memory:").unwrap();
    let ingestor = Ingestor::new(db.clone());
    let replay = Replay::default();

    let original = post(100, 1, t0(), &["vote"]);
    let mut first = post(200, 2, t0() + Duration::minutes(1), &[]);
    first["retweeted_status"] = original.clone();
    let mut second = post(201, 3, t0() + Duration::minutes(2), &[]);
    second["retweeted_status"] = original;
    let lines = vec![
        first.to_string(),
        String::new(),
        r#"{"limit": {"track": 5}}"#.to_string(),
        second.to_string(),
        first.to_string(),
    ];
    replay.streams.borrow_mut().push_back(StreamResponse::from_lines(200, lines));

    let clock = ManualClock::new(t0());
    let mut client = StreamingClient::new(replay, clock, "https://stream.test/1.1");
    let mut outcomes = Vec::new();
    let mut notices = 0;
    let mut handler = |event: StreamEvent| {
        match event {
            StreamEvent::Post(payload) => outcomes.push(ingestor.store(&payload).unwrap()),
            StreamEvent::Notice(_) => notices += 1,
            StreamEvent::Disconnect { .. } => {}
        }
        if outcomes.len() == 3 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    };
    client
        .run(&StreamFilter::Track(vec!["vote".into()]), &mut handler)
        .unwrap();

    assert_eq!(outcomes, vec![true, true, false]);
    assert_eq!(notices, 1);

    let queries = QueryRepository::new(db.pool.clone());
    assert_eq!(queries.counts().unwrap().posts, 3);
    let top = queries.top_reposts(5).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].item.id, 100);
    assert_eq!(top[0].count, 2);
    let by_author = queries
        .repost_counts(t0(), t0() + Duration::hours(1), 5)
        .unwrap();
    assert_eq!(by_author[0].item.id, 1);
    assert_eq!(by_author[0].count, 2);
}

#[test]
fn test_file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tweets.db");
    {
        let ingestor = Ingestor::new(Database::open(&path).unwrap());
        let lines = format!("{}\n{}\n", post(1, 1, t0(), &["a"]), post(2, 1, t0(), &["A"]));
        let report = ingestor.import_json_lines(lines.as_bytes()).unwrap();
        assert_eq!(report.stored, 2);
    }

    let reopened = Database::open(&path).unwrap();
    let queries = QueryRepository::new(reopened.pool.clone());
    assert_eq!(queries.counts().unwrap().hashtags, 1);
    assert_eq!(queries.first_post().unwrap().map(|p| p.id), Some(1));
    assert_eq!(queries.last_post_by(1).unwrap().map(|p| p.id), Some(2));
}
