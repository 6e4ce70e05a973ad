use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use tweetbase_types::{RawPost, RawUser};

use super::pages::{ArchivePages, LookupPages};
use crate::clock::Clock;
use crate::config::RestSettings;
use crate::error::{RestError, RestResult};
use crate::transport::{ApiResponse, Transport};

/// Requests allowed per window before any rate-limit header has been seen
pub const INITIAL_BUDGET: u32 = 180;
/// Most ids or names a single lookup request accepts
pub const LOOKUP_BATCH_SIZE: usize = 100;
/// Page size requested from timelines and search
pub const PAGE_SIZE: u32 = 200;

const REMAINING_HEADER: &str = "x-rate-limit-remaining";
const RESET_HEADER: &str = "x-rate-limit-reset";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    UserTimeline,
    PostLookup,
    UserLookup,
    Search,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::UserTimeline => "statuses/user_timeline.json",
            Endpoint::PostLookup => "statuses/lookup.json",
            Endpoint::UserLookup => "users/lookup.json",
            Endpoint::Search => "search/tweets.json",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// An account addressed either by numeric id or by handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountRef {
    Id(i64),
    Name(String),
}

impl AccountRef {
    /// Numeric input is taken as an id, anything else as a handle
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().trim_start_matches('@');
        match raw.parse() {
            Ok(id) => AccountRef::Id(id),
            Err(_) => AccountRef::Name(raw.to_string()),
        }
    }

    fn param(&self) -> (String, String) {
        match self {
            AccountRef::Id(id) => ("user_id".to_string(), id.to_string()),
            AccountRef::Name(name) => ("screen_name".to_string(), name.clone()),
        }
    }
}

impl std::fmt::Display for AccountRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountRef::Id(id) => write!(f, "{}", id),
            AccountRef::Name(name) => write!(f, "@{}", name),
        }
    }
}

/// A batch of accounts for a single user lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountBatch {
    Ids(Vec<i64>),
    Names(Vec<String>),
}

impl AccountBatch {
    pub fn len(&self) -> usize {
        match self {
            AccountBatch::Ids(ids) => ids.len(),
            AccountBatch::Names(names) => names.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn param(&self) -> (String, String) {
        match self {
            AccountBatch::Ids(ids) => ("user_id".to_string(), join(ids)),
            AccountBatch::Names(names) => ("screen_name".to_string(), names.join(",")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    pub statuses: Vec<RawPost>,
    #[serde(default, rename = "search_metadata")]
    pub metadata: serde_json::Value,
}

/// Request budget left in the current rate-limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl Quota {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            remaining: INITIAL_BUDGET,
            reset_at: now,
        }
    }

    /// How long to hold the next request back, if at all
    pub fn wait_before_next(&self, now: DateTime<Utc>, safety_margin: u32) -> Option<Duration> {
        if self.remaining < safety_margin && self.reset_at > now {
            (self.reset_at - now).to_std().ok()
        } else {
            None
        }
    }

    /// Refresh from response headers. A missing remaining count reads as exhausted;
    /// a missing reset time keeps the previous one.
    pub fn update(&mut self, response: &ApiResponse) {
        self.remaining = response
            .header(REMAINING_HEADER)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        if let Some(reset_at) = response
            .header(RESET_HEADER)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        {
            self.reset_at = reset_at;
        }
    }
}

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn expect_success(response: ApiResponse) -> RestResult<ApiResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(RestError::Api {
            status: response.status,
            body: response.body,
        })
    }
}

/// REST client that stays inside the platform's per-window request quota.
///
/// One instance per credential set: the quota it tracks belongs to that set.
pub struct RateLimitedClient<T, C> {
    transport: T,
    clock: C,
    base_url: String,
    safety_margin: u32,
    pacing: Duration,
    quota: Quota,
}

impl<T: Transport, C: Clock> RateLimitedClient<T, C> {
    pub fn new(transport: T, clock: C, base_url: impl Into<String>, settings: &RestSettings) -> Self {
        let quota = Quota::new(clock.now());
        Self {
            transport,
            clock,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            safety_margin: settings.safety_margin,
            pacing: settings.pacing(),
            quota,
        }
    }

    /// Snapshot of the current quota
    pub fn quota(&self) -> Quota {
        self.quota
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path())
    }

    /// Issue one request, waiting out an exhausted quota first.
    ///
    /// Timeouts are retried until the request goes through. Every attempt is
    /// followed by the pacing delay. Non-success statuses are returned, not raised.
    pub fn call(&mut self, endpoint: Endpoint, params: &[(String, String)]) -> RestResult<ApiResponse> {
        let url = self.url(endpoint);
        loop {
            if let Some(wait) = self.quota.wait_before_next(self.clock.now(), self.safety_margin) {
                warn!(
                    "Rate limit nearly exhausted ({} left), waiting {}s for reset",
                    self.quota.remaining,
                    wait.as_secs()
                );
                self.clock.sleep(wait);
            }

            let result = self.transport.get(&url, params);
            self.clock.sleep(self.pacing);

            match result {
                Ok(response) => {
                    self.quota.update(&response);
                    debug!(
                        "{} -> HTTP {} ({} requests left)",
                        endpoint, response.status, self.quota.remaining
                    );
                    return Ok(response);
                }
                Err(e) if e.is_timeout() => {
                    warn!("Request to {} timed out, retrying: {}", endpoint, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// One timeline page, newest first. With `max_id`, only posts at or below it.
    pub fn user_timeline(&mut self, account: &AccountRef, max_id: Option<i64>) -> RestResult<ApiResponse> {
        let mut params = vec![account.param(), ("count".to_string(), PAGE_SIZE.to_string())];
        if let Some(max_id) = max_id {
            params.push(("max_id".to_string(), max_id.to_string()));
        }
        self.call(Endpoint::UserTimeline, &params)
    }

    /// Hydrate up to 100 posts by id
    pub fn lookup_posts(&mut self, ids: &[i64]) -> RestResult<Vec<RawPost>> {
        if ids.len() > LOOKUP_BATCH_SIZE {
            return Err(RestError::BatchTooLarge(ids.len()));
        }
        let params = [("id".to_string(), join(ids))];
        let response = expect_success(self.call(Endpoint::PostLookup, &params)?)?;
        Ok(response.json()?)
    }

    /// Resolve up to 100 accounts
    pub fn lookup_users(&mut self, batch: &AccountBatch) -> RestResult<Vec<RawUser>> {
        if batch.len() > LOOKUP_BATCH_SIZE {
            return Err(RestError::BatchTooLarge(batch.len()));
        }
        let params = [batch.param()];
        let response = expect_success(self.call(Endpoint::UserLookup, &params)?)?;
        Ok(response.json()?)
    }

    pub fn search(&mut self, query: &str) -> RestResult<SearchPage> {
        let params = [
            ("q".to_string(), query.to_string()),
            ("count".to_string(), PAGE_SIZE.to_string()),
        ];
        let response = expect_success(self.call(Endpoint::Search, &params)?)?;
        Ok(response.json()?)
    }

    /// Walk an account's archive backward, one page per item
    pub fn archive(&mut self, account: AccountRef) -> ArchivePages<'_, T, C> {
        ArchivePages::new(self, account)
    }

    /// Hydrate any number of posts, 100 per request
    pub fn lookup_all(&mut self, ids: impl IntoIterator<Item = i64>) -> LookupPages<'_, T, C, i64, RawPost> {
        LookupPages::new(self, chunk(ids), |client, ids| client.lookup_posts(ids))
    }

    /// Resolve any number of accounts by id, 100 per request
    pub fn lookup_all_users(&mut self, ids: impl IntoIterator<Item = i64>) -> LookupPages<'_, T, C, i64, RawUser> {
        LookupPages::new(self, chunk(ids), |client, ids| {
            client.lookup_users(&AccountBatch::Ids(ids.to_vec()))
        })
    }

    pub fn lookup_all_users_by_name(
        &mut self,
        names: impl IntoIterator<Item = String>,
    ) -> LookupPages<'_, T, C, String, RawUser> {
        LookupPages::new(self, chunk(names), |client, names| {
            client.lookup_users(&AccountBatch::Names(names.to_vec()))
        })
    }
}

fn chunk<I: IntoIterator>(items: I) -> Vec<Vec<I::Item>> {
    let mut batches = Vec::new();
    let mut current = Vec::with_capacity(LOOKUP_BATCH_SIZE);
    for item in items {
        current.push(item);
        if current.len() == LOOKUP_BATCH_SIZE {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(LOOKUP_BATCH_SIZE)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
