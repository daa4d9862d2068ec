//! Local key-value store for the persisted owner id
//!
//! Exactly one value matters: the owner id the assistant service assigned to
//! this client, remembered across sessions and re-sent verbatim in the next
//! `hello`. It lives in a tiny `SQLite` key-value table under the data
//! directory, behind a pooled connection so the repo handle is cheap to clone.

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OptionalExtension;

use crate::{Error, Result};

/// Fixed key under which the owner id is persisted
const OWNER_ID_KEY: &str = "owner_id";

/// Store connection pool
pub type StorePool = Pool<SqliteConnectionManager>;

/// Pooled store connection
pub type StoreConn = PooledConnection<SqliteConnectionManager>;

/// Open the store at the given path, creating it if absent.
///
/// # Errors
///
/// Returns error if the database cannot be opened or initialized
pub fn init<P: AsRef<Path>>(path: P) -> Result<StorePool> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder()
        .max_size(2)
        .build(manager)
        .map_err(|e| Error::Store(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Store(e.to_string()))?;
    create_schema(&conn)?;

    tracing::debug!("owner id store initialized");
    Ok(pool)
}

/// Open an in-memory store (for testing).
///
/// # Errors
///
/// Returns error if the database cannot be initialized
pub fn init_memory() -> Result<StorePool> {
    // One connection only: each in-memory connection is its own database
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Store(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Store(e.to_string()))?;
    create_schema(&conn)?;

    Ok(pool)
}

fn create_schema(conn: &StoreConn) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Repository for the locally remembered owner profile
#[derive(Clone)]
pub struct ProfileRepo {
    pool: StorePool,
}

impl ProfileRepo {
    /// Create a repo over an initialized pool
    #[must_use]
    pub fn new(pool: StorePool) -> Self {
        Self { pool }
    }

    /// The remembered owner id, if one has been assigned.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn owner_id(&self) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                [OWNER_ID_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Persist the owner id, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    pub fn set_owner_id(&self, owner_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [OWNER_ID_KEY, owner_id],
        )?;
        tracing::debug!(owner_id, "persisted owner id");
        Ok(())
    }

    /// Forget the remembered owner id.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    pub fn clear_owner_id(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", [OWNER_ID_KEY])?;
        Ok(())
    }

    fn conn(&self) -> Result<StoreConn> {
        self.pool.get().map_err(|e| Error::Store(e.to_string()))
    }
}
