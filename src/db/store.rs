//! SQLite key-value store implementation.

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error for key {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Minimal persistence interface used by the registry and the status store.
pub trait KeyValueStore: Send + Sync {
    /// All keys currently stored, in ascending order.
    fn list_keys(&self) -> Result<Vec<String>, DbError>;
    /// The raw value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>, DbError>;
    /// Insert or overwrite the value stored under `key`.
    fn put(&self, key: &str, value: &str) -> Result<(), DbError>;
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn
            .lock()
            .map_err(|_| DbError::Unavailable("connection mutex poisoned".to_string()))
    }

    /// Number of stored records, the status snapshot included.
    pub fn count(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM kv", [], |r| r.get(0))?)
    }
}

impl KeyValueStore for Store {
    fn list_keys(&self) -> Result<Vec<String>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key ASC")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqlResult<Vec<String>>>()?;
        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Option<String>, DbError> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
             value=excluded.value, updated_at=strftime('%Y-%m-%d %H:%M:%f', 'now')",
            params![key, value],
        )?;
        Ok(())
    }
}
