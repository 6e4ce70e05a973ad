//! Turns inbound payloads into stored rows.
//!
//! Each payload is written in a single transaction together with its author,
//! tags, links, mentions, reply target and any embedded original post.

use anyhow::Context;
use rusqlite::Connection;
use std::collections::{BTreeSet, HashSet};
use std::io::BufRead;
use tracing::{debug, error, info};

use tweetbase_types::{Hashtag, Post, RawPost, Url, User};

use crate::db::repositories::{HashtagRepository, PostRepository, UrlRepository, UserRepository};
use crate::db::Database;
use crate::error::{IngestError, IngestResult};

/// Deepest chain of embedded reposts accepted in one payload
pub const MAX_REPOST_DEPTH: usize = 16;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub stored: usize,
    pub rejected: usize,
}

impl IngestReport {
    fn record(&mut self, stored: bool) {
        if stored {
            self.stored += 1;
        } else {
            self.rejected += 1;
        }
    }
}

/// Lower-case and deduplicate, in sorted order
pub fn fold_unique<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    values
        .into_iter()
        .map(str::to_lowercase)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn is_duplicate_key(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(e, _)) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

#[derive(Clone)]
pub struct Ingestor {
    db: Database,
}

impl Ingestor {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store one payload atomically.
    ///
    /// `author` replaces the payload's own user; it must already be stored.
    pub fn ingest(&self, payload: &RawPost, author: Option<&User>) -> IngestResult<Post> {
        let mut conn = self.db.connection()?;
        let tx = conn
            .transaction()
            .context("Failed to begin ingest transaction")?;
        let post = ingest_in(&tx, payload, author.map(|u| u.id), 0)?;
        tx.commit()
            .with_context(|| format!("Failed to commit post {}", post.id))?;
        debug!("Stored post {}", post.id);
        Ok(post)
    }

    /// Ingest, reporting per-item failures as `Ok(false)`
    pub fn store(&self, payload: &RawPost) -> IngestResult<bool> {
        match self.ingest(payload, None) {
            Ok(_) => Ok(true),
            Err(e) if e.is_item_failure() => {
                error!("Rejected post {}: {}", payload.id, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn ingest_all<'a>(&self, payloads: impl IntoIterator<Item = &'a RawPost>) -> IngestResult<IngestReport> {
        let mut report = IngestReport::default();
        for payload in payloads {
            report.record(self.store(payload)?);
        }
        Ok(report)
    }

    /// Ingest one JSON payload per line. Blank lines are skipped, unparsable
    /// lines count as rejected.
    pub fn import_json_lines<R: BufRead>(&self, reader: R) -> IngestResult<IngestReport> {
        let mut report = IngestReport::default();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RawPost>(&line) {
                Ok(payload) => report.record(self.store(&payload)?),
                Err(e) => {
                    error!("Skipping line {}: {}", index + 1, IngestError::Payload(e));
                    report.rejected += 1;
                }
            }
        }
        info!("Imported {} posts, rejected {}", report.stored, report.rejected);
        Ok(report)
    }

    /// The given ids not yet stored, in input order without repeats
    pub fn missing_ids(&self, ids: impl IntoIterator<Item = i64>) -> IngestResult<Vec<i64>> {
        let ids: Vec<i64> = ids.into_iter().collect();
        let conn = self.db.connection()?;
        let stored = PostRepository::new(&conn).existing_ids(&ids)?;
        let mut seen = HashSet::new();
        Ok(ids
            .into_iter()
            .filter(|id| !stored.contains(id) && seen.insert(*id))
            .collect())
    }
}

fn ingest_in(conn: &Connection, payload: &RawPost, author: Option<i64>, depth: usize) -> IngestResult<Post> {
    if depth > MAX_REPOST_DEPTH {
        return Err(IngestError::NestingTooDeep {
            id: payload.id,
            limit: MAX_REPOST_DEPTH,
        });
    }

    let posts = PostRepository::new(conn);
    if posts.exists(payload.id)? {
        return Err(IngestError::DuplicatePost(payload.id));
    }

    let users = UserRepository::new(conn);
    let author_id = match author {
        Some(id) => id,
        None => users.get_or_create(payload.user.id, payload.user.handle())?.id,
    };

    let tags_repo = HashtagRepository::new(conn);
    let tags = fold_unique(payload.entities.hashtags.iter().map(|h| h.text.as_str()))
        .iter()
        .map(|tag| tags_repo.get_or_create(tag))
        .collect::<anyhow::Result<Vec<Hashtag>>>()?;

    let urls_repo = UrlRepository::new(conn);
    let urls = fold_unique(
        payload
            .entities
            .urls
            .iter()
            .filter_map(|u| u.expanded_url.as_deref()),
    )
    .iter()
    .map(|url| urls_repo.get_or_create(url))
    .collect::<anyhow::Result<Vec<Url>>>()?;

    let mut mentioned = Vec::new();
    let mut seen_mentions = HashSet::new();
    for mention in &payload.entities.mentions {
        if seen_mentions.insert((mention.id, mention.handle())) {
            let user = users.get_or_create(mention.id, mention.handle())?;
            if !mentioned.contains(&user.id) {
                mentioned.push(user.id);
            }
        }
    }

    let created_at = payload
        .created_at_utc()
        .map_err(|source| IngestError::InvalidTimestamp {
            id: payload.id,
            value: payload.created_at.clone(),
            source,
        })?;

    let (reply_to_user_id, reply_to_post_id) = match payload.in_reply_to_user_id {
        Some(user_id) => {
            users.get_or_create(user_id, payload.in_reply_to_name.as_deref())?;
            (Some(user_id), payload.in_reply_to_status_id)
        }
        None => (None, None),
    };

    let repost_of = match payload.reposted_status.as_deref() {
        Some(original) if posts.exists(original.id)? => Some(original.id),
        Some(original) => Some(ingest_in(conn, original, None, depth + 1)?.id),
        None => None,
    };

    let post = Post {
        id: payload.id,
        author_id,
        text: payload.text.clone(),
        created_at,
        reply_to_user_id,
        reply_to_post_id,
        repost_of,
    };
    posts.create(&post).map_err(|e| {
        if is_duplicate_key(&e) {
            IngestError::DuplicatePost(post.id)
        } else {
            IngestError::Storage(e)
        }
    })?;

    tags_repo.link_post(post.id, &tags)?;
    urls_repo.link_post(post.id, &urls)?;
    posts.add_mentions(post.id, &mentioned)?;

    Ok(post)
}
