use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use tweetbase_types::User;

pub struct UserRepository<'c> {
    conn: &'c Connection,
}

impl<'c> UserRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Get or create a user by id.
    ///
    /// The name is only written when the row is created; an existing user
    /// keeps the name it was first seen with.
    pub fn get_or_create(&self, id: i64, name: Option<&str>) -> Result<User> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO users (id, name) VALUES (?, ?)",
                (id, name),
            )
            .with_context(|| format!("Failed to create user {}", id))?;

        self.get_by_id(id)?
            .with_context(|| format!("User {} missing after insert", id))
    }

    /// Get user by ID
    pub fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row("SELECT id, name FROM users WHERE id = ?", [id], |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .optional()?;
        Ok(user)
    }

    /// All users carrying `name`. Names are not unique, so this can return
    /// several distinct accounts.
    pub fn find_by_name(&self, name: &str) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM users WHERE name = ? ORDER BY id")?;

        let users = stmt
            .query_map([name], |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }

    pub fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }
}
