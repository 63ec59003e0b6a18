//! Durable key/value blobs

use crate::error::Result;
use crate::util::now_millis;
use libsql::{params, Connection};

/// Trait for key/value storage operations (async)
#[allow(async_fn_in_trait)]
pub trait KvRepository {
    /// Load the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key` if present
    async fn remove(&self, key: &str) -> Result<()>;
}

/// libSQL implementation of `KvRepository`
pub struct LibSqlKvRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlKvRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl KvRepository for LibSqlKvRepository<'_> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM kv_store WHERE key = ?", [key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                params![key, value, now_millis()],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv_store WHERE key = ?", [key])
            .await?;
        Ok(())
    }
}
