use anyhow::{Context, Result};
use rusqlite::{params_from_iter, types::Type, Connection, OptionalExtension, Row};
use std::collections::HashSet;

use tweetbase_types::{from_storage, Post, STORAGE_FORMAT};

/// Stays under SQLite's default bound-parameter limit
const ID_QUERY_CHUNK: usize = 500;

/// Column list shared by every query that materializes a [`Post`]
pub(crate) const POST_COLUMNS: &str =
    "p.id, p.author_id, p.text, p.created_at, p.reply_to_user_id, p.reply_to_post_id, p.repost_of";

/// Map a row selected with [`POST_COLUMNS`] (starting at column 0)
pub(crate) fn map_post(row: &Row<'_>) -> rusqlite::Result<Post> {
    let created_at: String = row.get(3)?;
    let created_at = from_storage(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(Post {
        id: row.get(0)?,
        author_id: row.get(1)?,
        text: row.get(2)?,
        created_at,
        reply_to_user_id: row.get(4)?,
        reply_to_post_id: row.get(5)?,
        repost_of: row.get(6)?,
    })
}

pub struct PostRepository<'c> {
    conn: &'c Connection,
}

impl<'c> PostRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert a new post. Fails with a constraint violation if the id is taken;
    /// an existing row is never overwritten.
    pub fn create(&self, post: &Post) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO posts (id, author_id, text, created_at, reply_to_user_id, reply_to_post_id, repost_of)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                (
                    post.id,
                    post.author_id,
                    &post.text,
                    post.created_at.format(STORAGE_FORMAT).to_string(),
                    post.reply_to_user_id,
                    post.reply_to_post_id,
                    post.repost_of,
                ),
            )
            .with_context(|| format!("Failed to create post {}", post.id))?;
        Ok(())
    }

    pub fn exists(&self, post_id: i64) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM posts WHERE id = ?", [post_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Get a single post by ID
    pub fn get_by_id(&self, post_id: i64) -> Result<Option<Post>> {
        let query = format!("SELECT {} FROM posts p WHERE p.id = ?", POST_COLUMNS);
        let post = self
            .conn
            .query_row(&query, [post_id], map_post)
            .optional()?;
        Ok(post)
    }

    /// Get posts by a specific user, oldest id first
    pub fn get_by_author(&self, author_id: i64) -> Result<Vec<Post>> {
        let query = format!(
            "SELECT {} FROM posts p WHERE p.author_id = ? ORDER BY p.id ASC",
            POST_COLUMNS
        );
        let mut stmt = self.conn.prepare(&query)?;
        let posts = stmt
            .query_map([author_id], map_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Posts that re-share `post_id`
    pub fn get_reposts_of(&self, post_id: i64) -> Result<Vec<Post>> {
        let query = format!(
            "SELECT {} FROM posts p WHERE p.repost_of = ? ORDER BY p.id ASC",
            POST_COLUMNS
        );
        let mut stmt = self.conn.prepare(&query)?;
        let posts = stmt
            .query_map([post_id], map_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Record mentions of already stored users
    pub fn add_mentions(&self, post_id: i64, user_ids: &[i64]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("INSERT OR IGNORE INTO post_mentions (post_id, user_id) VALUES (?, ?)")?;
        for user_id in user_ids {
            stmt.execute((post_id, user_id))
                .with_context(|| format!("Failed to link post {} to mentioned user {}", post_id, user_id))?;
        }
        Ok(())
    }

    pub fn get_mentions(&self, post_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM post_mentions WHERE post_id = ? ORDER BY user_id")?;
        let ids = stmt
            .query_map([post_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// The subset of `ids` that is stored. Queried in chunks of
    /// [`ID_QUERY_CHUNK`] so the cost follows the input, not the table.
    pub fn existing_ids(&self, ids: &[i64]) -> Result<HashSet<i64>> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(ID_QUERY_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT id FROM posts WHERE id IN ({})", placeholders))?;
            let rows = stmt.query_map(params_from_iter(chunk), |row| row.get::<_, i64>(0))?;
            for id in rows {
                found.insert(id?);
            }
        }
        Ok(found)
    }

    pub fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Post count for a user
    pub fn count_by_author(&self, author_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE author_id = ?",
            [author_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
