//! KV store seam.
//!
//! The third `MemorySubstrate` engine. Keys are prefixed by the canonical
//! `uuid` shared with the graph and vector stores, so a caller can namespace
//! arbitrary auxiliary state (ShortTermCache spill, adapter session tokens,
//! tool-call scratch data) under one entity without colliding with another
//! entity's keys.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Pluggable key-value engine.
#[async_trait]
pub trait KVStore: Send + Sync {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Every key currently stored under the `uuid:` prefix.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Build the conventional `{uuid}:{suffix}` key used across the runtime.
pub fn scoped_key(id: Uuid, suffix: &str) -> String {
    format!("{id}:{suffix}")
}

/// SQLite-backed KV store.
pub struct SqliteKVStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
)";

impl SqliteKVStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::LockError("kv store connection lock poisoned".into()))
    }
}

#[async_trait]
impl KVStore for SqliteKVStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.lock()?
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(Error::from)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock()?
            .execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE key LIKE ?")?;
        let pattern = format!("{prefix}%");
        let keys = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}
