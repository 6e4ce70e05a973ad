use anyhow::{Context, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use super::schema::SCHEMA;

/// SQLite in-memory database identifier
const MEMORY_DB_PATH: &str = ":memory:";

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Database wrapper with connection pooling support
#[derive(Clone)]
pub struct Database {
    pub pool: DbPool,
}

impl Database {
    /// Open (or create) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let in_memory = Self::is_memory_path(path.as_ref());
        let manager = Self::create_connection_manager(path)?
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));

        // Every connection to ":memory:" is a separate database, so the pool
        // must never hand out more than one.
        let builder = Pool::builder();
        let builder = if in_memory { builder.max_size(1) } else { builder };
        let pool = builder
            .build(manager)
            .context("Failed to create database connection pool")?;
        Ok(Self { pool })
    }

    fn is_memory_path(path: &Path) -> bool {
        path.to_string_lossy()
            .trim()
            .eq_ignore_ascii_case(MEMORY_DB_PATH)
    }

    /// Create appropriate connection manager based on path
    ///
    /// # Arguments
    /// * `path` - Database file path or ":memory:" for in-memory database
    fn create_connection_manager<P: AsRef<Path>>(path: P) -> Result<SqliteConnectionManager> {
        if Self::is_memory_path(path.as_ref()) {
            Ok(SqliteConnectionManager::memory())
        } else {
            Ok(SqliteConnectionManager::file(path))
        }
    }

    /// Create an in-memory database (useful for testing)
    pub fn in_memory() -> Result<Self> {
        Self::new(MEMORY_DB_PATH)
    }

    /// Open the database and create any missing tables
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Self::new(path)?;
        db.initialize()?;
        Ok(db)
    }

    /// Initialize the database schema. Safe to run on an existing store.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        tracing::debug!("Database schema initialized");
        Ok(())
    }

    /// Get a connection from the pool
    pub fn connection(&self) -> Result<DbConnection> {
        self.pool
            .get()
            .context("Failed to get database connection from pool")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::TABLES;

    #[test]
    fn test_database_creation() {
        let db = Database::in_memory().expect("Failed to create database");
        db.initialize().expect("Failed to initialize schema");

        let conn = db.connection().expect("Failed to get connection");
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .expect("Failed to prepare statement");

        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("Failed to query tables")
            .collect::<Result<Vec<_>, _>>()
            .expect("Failed to collect tables");

        for table in TABLES {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let db = Database::in_memory().expect("Failed to create database");
        db.initialize().expect("first initialize");
        db.initialize().expect("second initialize");
    }

    #[test]
    fn test_memory_database_detection() {
        let memory_paths = [":memory:", " :memory: ", ":MEMORY:", " :Memory: "];

        for path in &memory_paths {
            let db = Database::new(path).expect("Failed to create memory database");
            db.initialize().expect("Failed to initialize schema");

            // Schema created through one checkout must be visible to the next
            let conn = db.connection().expect("Failed to get connection");
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
                .expect("posts table should be visible");
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("tweets.db");

        {
            let db = Database::open(&path).expect("Failed to open file database");
            let conn = db.connection().expect("Failed to get connection");
            conn.execute("INSERT INTO users (id, name) VALUES (1, 'one')", [])
                .expect("Failed to insert user");
        }

        let db = Database::open(&path).expect("Failed to reopen file database");
        let conn = db.connection().expect("Failed to get connection");
        let name: String = conn
            .query_row("SELECT name FROM users WHERE id = 1", [], |row| row.get(0))
            .expect("user should persist");
        assert_eq!(name, "one");
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::open(":memory:").expect("Failed to open database");
        let conn = db.connection().expect("Failed to get connection");
        let result = conn.execute(
            "INSERT INTO posts (id, author_id, text, created_at) VALUES (1, 999, 'x', '2015-10-27 00:00:00')",
            [],
        );
        assert!(result.is_err(), "unknown author must be rejected");
    }
}
