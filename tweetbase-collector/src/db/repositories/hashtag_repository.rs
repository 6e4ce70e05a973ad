use anyhow::{Context, Result};
use rusqlite::Connection;

use tweetbase_types::Hashtag;

pub struct HashtagRepository<'c> {
    conn: &'c Connection,
}

impl<'c> HashtagRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Get or create a hashtag. The caller is expected to pass case-folded text.
    pub fn get_or_create(&self, tag: &str) -> Result<Hashtag> {
        self.conn
            .execute("INSERT OR IGNORE INTO hashtags (tag) VALUES (?)", [tag])
            .with_context(|| format!("Failed to create hashtag {}", tag))?;
        Ok(Hashtag {
            tag: tag.to_string(),
        })
    }

    /// Link a post to hashtags that already exist
    pub fn link_post(&self, post_id: i64, tags: &[Hashtag]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("INSERT OR IGNORE INTO post_hashtags (post_id, tag) VALUES (?, ?)")?;
        for hashtag in tags {
            stmt.execute((post_id, &hashtag.tag))
                .with_context(|| format!("Failed to link post {} to hashtag {}", post_id, hashtag.tag))?;
        }
        Ok(())
    }

    /// Get hashtags for a post
    pub fn get_by_post(&self, post_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag FROM post_hashtags WHERE post_id = ? ORDER BY tag")?;

        let hashtags = stmt
            .query_map([post_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(hashtags)
    }

    /// Ids of all posts using a hashtag, oldest id first
    pub fn get_posts(&self, tag: &str) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT post_id FROM post_hashtags WHERE tag = ? ORDER BY post_id")?;

        let ids = stmt
            .query_map([tag.to_lowercase()], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    pub fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM hashtags", [], |row| row.get(0))?;
        Ok(count)
    }
}
