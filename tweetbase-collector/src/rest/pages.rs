//! Lazy multi-request walks over the REST endpoints

use tracing::{info, warn};

use tweetbase_types::RawPost;

use super::client::{AccountRef, RateLimitedClient};
use crate::clock::Clock;
use crate::error::RestResult;
use crate::transport::Transport;

/// Pages of one account's archive, newest first.
///
/// Ends after an empty page or a non-success response. An error is yielded
/// once and ends the walk.
pub struct ArchivePages<'a, T, C> {
    client: &'a mut RateLimitedClient<T, C>,
    account: AccountRef,
    max_id: Option<i64>,
    done: bool,
}

impl<'a, T: Transport, C: Clock> ArchivePages<'a, T, C> {
    pub(super) fn new(client: &'a mut RateLimitedClient<T, C>, account: AccountRef) -> Self {
        Self {
            client,
            account,
            max_id: None,
            done: false,
        }
    }

    fn fetch(&mut self) -> RestResult<Option<Vec<RawPost>>> {
        let response = self.client.user_timeline(&self.account, self.max_id)?;
        if !response.is_success() {
            warn!(
                "Archive walk for {} stopped on HTTP {}: {}",
                self.account, response.status, response.body
            );
            return Ok(None);
        }

        let posts: Vec<RawPost> = response.json()?;
        let Some(oldest) = posts.iter().map(|p| p.id).min() else {
            return Ok(None);
        };
        self.max_id = Some(oldest - 1);

        info!(
            "Fetched {} posts from {} ({} requests left)",
            posts.len(),
            self.account,
            self.client.quota().remaining
        );
        Ok(Some(posts))
    }
}

impl<T: Transport, C: Clock> Iterator for ArchivePages<'_, T, C> {
    type Item = RestResult<Vec<RawPost>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fetch() {
            Ok(Some(page)) => Some(Ok(page)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

type Fetch<T, C, K, V> = fn(&mut RateLimitedClient<T, C>, &[K]) -> RestResult<Vec<V>>;

/// One lookup request per batch of at most 100 keys, issued as the iterator advances
pub struct LookupPages<'a, T, C, K, V> {
    client: &'a mut RateLimitedClient<T, C>,
    batches: std::vec::IntoIter<Vec<K>>,
    fetch: Fetch<T, C, K, V>,
}

impl<'a, T: Transport, C: Clock, K, V> LookupPages<'a, T, C, K, V> {
    pub(super) fn new(
        client: &'a mut RateLimitedClient<T, C>,
        batches: Vec<Vec<K>>,
        fetch: Fetch<T, C, K, V>,
    ) -> Self {
        Self {
            client,
            batches: batches.into_iter(),
            fetch,
        }
    }
}

impl<T: Transport, C: Clock, K, V> Iterator for LookupPages<'_, T, C, K, V> {
    type Item = RestResult<Vec<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.batches.next()?;
        let result = (self.fetch)(self.client, &batch);
        if let Ok(found) = &result {
            info!(
                "Looked up {} of {} ({} requests left)",
                found.len(),
                batch.len(),
                self.client.quota().remaining
            );
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.batches.size_hint()
    }
}
