//! Counting and ranking queries over the stored posts.
//!
//! All range arguments are UTC instants and ranges are half-open `[start, stop)`.
//! Stored timestamps are naive UTC, so comparisons happen on their textual form.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};
use std::collections::HashMap;
use std::marker::PhantomData;

use tweetbase_types::{
    to_storage_bound, Counted, EntityCounts, Granularity, Hashtag, Post, Url, User, Window,
};

use super::connection::DbPool;
use super::repositories::post_repository::{map_post, POST_COLUMNS};

/// 2015-10-27 00:00 UTC-7, as seconds since the epoch
const DEFAULT_RANGE_START: i64 = 1_445_929_200;
/// 2015-11-02 23:59 UTC-7
const DEFAULT_RANGE_STOP: i64 = 1_446_533_940;

/// Default interval range: 2015-10-27 00:00 to 2015-11-02 23:59, UTC-7
pub fn default_range() -> (DateTime<Utc>, DateTime<Utc>) {
    let epoch = DateTime::<Utc>::default();
    (
        epoch + Duration::seconds(DEFAULT_RANGE_START),
        epoch + Duration::seconds(DEFAULT_RANGE_STOP),
    )
}

/// An entity with a timestamp column that interval queries can partition on
pub trait TimedEntity: Sized {
    /// `FROM` clause, aliased
    const SOURCE: &'static str;
    const COLUMNS: &'static str;
    /// Fully qualified timestamp column
    const TIME_COLUMN: &'static str;
    const ORDER: &'static str;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

impl TimedEntity for Post {
    const SOURCE: &'static str = "posts p";
    const COLUMNS: &'static str = POST_COLUMNS;
    const TIME_COLUMN: &'static str = "p.created_at";
    const ORDER: &'static str = "p.created_at ASC, p.id ASC";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        map_post(row)
    }
}

/// Lazy sequence of consecutive windows and the entities falling into each.
///
/// Every `next` issues one query. Windows that would end after `stop` are
/// never produced, so a trailing partial window is dropped.
pub struct IntervalIter<E> {
    pool: DbPool,
    next_start: DateTime<Utc>,
    stop: DateTime<Utc>,
    step: Duration,
    _entity: PhantomData<E>,
}

impl<E: TimedEntity> IntervalIter<E> {
    fn fetch(&self, window: &Window) -> Result<Vec<E>> {
        let conn = self.pool.get().context("Failed to get database connection from pool")?;
        let query = format!(
            "SELECT {} FROM {} WHERE {col} >= ? AND {col} < ? ORDER BY {}",
            E::COLUMNS,
            E::SOURCE,
            E::ORDER,
            col = E::TIME_COLUMN,
        );
        let mut stmt = conn.prepare(&query)?;
        let items = stmt
            .query_map(params![to_storage_bound(&window.start), to_storage_bound(&window.stop)], E::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }
}

impl<E: TimedEntity> Iterator for IntervalIter<E> {
    type Item = Result<(Window, Vec<E>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let window = Window::new(self.next_start, self.next_start + self.step);
        if window.stop > self.stop {
            return None;
        }
        self.next_start = window.stop;
        Some(self.fetch(&window).map(|items| (window, items)))
    }
}

pub struct QueryRepository {
    pool: DbPool,
}

impl QueryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Total row count per entity type
    pub fn counts(&self) -> Result<EntityCounts> {
        let conn = self.pool.get()?;
        let counts = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM posts),
                    (SELECT COUNT(*) FROM users),
                    (SELECT COUNT(*) FROM hashtags),
                    (SELECT COUNT(*) FROM urls)",
            [],
            |row| {
                Ok(EntityCounts {
                    posts: row.get(0)?,
                    users: row.get(1)?,
                    hashtags: row.get(2)?,
                    urls: row.get(3)?,
                })
            },
        )?;
        Ok(counts)
    }

    /// Partition `[start, stop)` into windows of `granularity`.
    /// Missing bounds fall back to [`default_range`].
    pub fn by_interval<E: TimedEntity>(
        &self,
        granularity: Granularity,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
    ) -> IntervalIter<E> {
        let (default_start, default_stop) = default_range();
        IntervalIter {
            pool: self.pool.clone(),
            next_start: start.unwrap_or(default_start),
            stop: stop.unwrap_or(default_stop),
            step: granularity.duration(),
            _entity: PhantomData,
        }
    }

    /// Users ordered by how often they were mentioned in `[start, stop)`
    pub fn mention_counts(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> Result<Vec<Counted<User>>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT u.id, u.name, COUNT(*) AS n
             FROM post_mentions pm
             JOIN posts p ON pm.post_id = p.id
             JOIN users u ON pm.user_id = u.id
             WHERE p.created_at >= ? AND p.created_at < ?
             GROUP BY u.id
             ORDER BY n DESC",
        )?;
        let rows = stmt
            .query_map(params![to_storage_bound(&start), to_storage_bound(&stop)], |row| {
                Ok(Counted::new(
                    User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    },
                    row.get(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Urls ordered by how many posts in `[start, stop)` linked them
    pub fn url_counts(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> Result<Vec<Counted<Url>>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT pu.url, COUNT(*) AS n
             FROM post_urls pu
             JOIN posts p ON pu.post_id = p.id
             WHERE p.created_at >= ? AND p.created_at < ?
             GROUP BY pu.url
             ORDER BY n DESC",
        )?;
        let rows = stmt
            .query_map(params![to_storage_bound(&start), to_storage_bound(&stop)], |row| {
                Ok(Counted::new(Url { url: row.get(0)? }, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Hashtags ordered by how many posts in `[start, stop)` used them
    pub fn hashtag_counts(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> Result<Vec<Counted<Hashtag>>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT ph.tag, COUNT(*) AS n
             FROM post_hashtags ph
             JOIN posts p ON ph.post_id = p.id
             WHERE p.created_at >= ? AND p.created_at < ?
             GROUP BY ph.tag
             ORDER BY n DESC",
        )?;
        let rows = stmt
            .query_map(params![to_storage_bound(&start), to_storage_bound(&stop)], |row| {
                Ok(Counted::new(Hashtag { tag: row.get(0)? }, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most reposted authors: for each author, the number of reposts in
    /// `[start, stop)` whose original they wrote. Top `n`, ties in the order
    /// the author was first encountered (scanning reposts by id).
    pub fn repost_counts(&self, start: DateTime<Utc>, stop: DateTime<Utc>, n: usize) -> Result<Vec<Counted<User>>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT u.id, u.name
             FROM posts r
             JOIN posts p ON r.repost_of = p.id
             JOIN users u ON p.author_id = u.id
             WHERE r.created_at >= ? AND r.created_at < ?
             ORDER BY r.id ASC",
        )?;
        let authors = stmt
            .query_map(params![to_storage_bound(&start), to_storage_bound(&stop)], |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tally: Vec<Counted<User>> = Vec::new();
        let mut slot: HashMap<i64, usize> = HashMap::new();
        for author in authors {
            match slot.get(&author.id) {
                Some(&i) => tally[i].count += 1,
                None => {
                    slot.insert(author.id, tally.len());
                    tally.push(Counted::new(author, 1));
                }
            }
        }

        // stable sort keeps first-seen order among equal counts
        tally.sort_by(|a, b| b.count.cmp(&a.count));
        tally.truncate(n);
        Ok(tally)
    }

    /// The `n` most reposted posts over the whole store
    pub fn top_reposts(&self, n: usize) -> Result<Vec<Counted<Post>>> {
        let conn = self.pool.get()?;
        let query = format!(
            "SELECT {}, COUNT(*) AS n
             FROM posts r
             JOIN posts p ON r.repost_of = p.id
             GROUP BY p.id
             ORDER BY n DESC, p.id ASC
             LIMIT ?",
            POST_COLUMNS
        );
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
            .query_map([n as i64], |row| Ok(Counted::new(map_post(row)?, row.get(7)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Users with at least one post, by descending post count then name
    pub fn post_counts_per_user(&self) -> Result<Vec<Counted<User>>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT u.id, u.name, COUNT(p.id) AS n
             FROM users u
             JOIN posts p ON p.author_id = u.id
             GROUP BY u.id
             ORDER BY n DESC, u.name ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Counted::new(
                    User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    },
                    row.get(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Earliest post by timestamp
    pub fn first_post(&self) -> Result<Option<Post>> {
        self.single_post("ORDER BY p.created_at ASC, p.id ASC", None)
    }

    /// Latest post by timestamp
    pub fn last_post(&self) -> Result<Option<Post>> {
        self.single_post("ORDER BY p.created_at DESC, p.id DESC", None)
    }

    /// A user's first post (lowest id)
    pub fn first_post_by(&self, user_id: i64) -> Result<Option<Post>> {
        self.single_post("ORDER BY p.id ASC", Some(user_id))
    }

    /// A user's latest post (highest id)
    pub fn last_post_by(&self, user_id: i64) -> Result<Option<Post>> {
        self.single_post("ORDER BY p.id DESC", Some(user_id))
    }

    fn single_post(&self, order: &str, author: Option<i64>) -> Result<Option<Post>> {
        let conn = self.pool.get()?;
        let filter = if author.is_some() { "WHERE p.author_id = ?" } else { "" };
        let query = format!("SELECT {} FROM posts p {} {} LIMIT 1", POST_COLUMNS, filter, order);
        let mut stmt = conn.prepare(&query)?;
        let mut rows = match author {
            Some(id) => stmt.query_map([id], map_post)?,
            None => stmt.query_map([], map_post)?,
        };
        let post = rows.next().transpose()?;
        Ok(post)
    }
}
