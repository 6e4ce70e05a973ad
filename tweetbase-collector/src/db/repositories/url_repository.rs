use anyhow::{Context, Result};
use rusqlite::Connection;

use tweetbase_types::Url;

pub struct UrlRepository<'c> {
    conn: &'c Connection,
}

impl<'c> UrlRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Get or create a url. The caller is expected to pass case-folded text.
    pub fn get_or_create(&self, url: &str) -> Result<Url> {
        self.conn
            .execute("INSERT OR IGNORE INTO urls (url) VALUES (?)", [url])
            .with_context(|| format!("Failed to create url {}", url))?;
        Ok(Url {
            url: url.to_string(),
        })
    }

    pub fn link_post(&self, post_id: i64, urls: &[Url]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("INSERT OR IGNORE INTO post_urls (post_id, url) VALUES (?, ?)")?;
        for url in urls {
            stmt.execute((post_id, &url.url))
                .with_context(|| format!("Failed to link post {} to url {}", post_id, url.url))?;
        }
        Ok(())
    }

    pub fn get_by_post(&self, post_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM post_urls WHERE post_id = ? ORDER BY url")?;

        let urls = stmt
            .query_map([post_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(urls)
    }

    pub fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM urls", [], |row| row.get(0))?;
        Ok(count)
    }
}
