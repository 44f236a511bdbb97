//! Key-value storage for client-side durable state.

use std::future::Future;
use std::pin::Pin;

use dashmap::DashMap;
use tokio_rusqlite::Connection;

use crate::core::config::StorageConfig;
use crate::core::errors::{ClientError, ClientResult};

/// Boxed future type for key-value store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// String key-value store.
pub trait KvStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, key: &str) -> StoreFuture<'_, ClientResult<Option<String>>>;

    /// Insert or replace a value.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn set(&self, key: &str, value: String) -> StoreFuture<'_, ClientResult<()>>;

    /// Remove a value; removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn remove(&self, key: &str) -> StoreFuture<'_, ClientResult<()>>;
}

/// `SQLite` implementation of the key-value store.
pub struct SqliteKvStore {
    conn: Connection,
    table: String,
}

impl SqliteKvStore {
    /// Open (or create) the store at the configured path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open(config: &StorageConfig) -> ClientResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::init(conn, &config.kv_table).await
    }

    /// Open a throwaway in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory(table: &str) -> ClientResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, table).await
    }

    async fn init(conn: Connection, table: &str) -> ClientResult<Self> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ClientError::InvalidConfig(format!(
                "invalid table name: {table}"
            )));
        }

        let table = table.to_string();
        let table_name = table.clone();
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> StoreFuture<'_, ClientResult<Option<String>>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let value = self
                .conn
                .call(move |conn| {
                    let mut stmt =
                        conn.prepare(&format!("SELECT value FROM {table} WHERE key = ?1"))?;
                    let mut rows = stmt.query(rusqlite::params![key])?;
                    match rows.next()? {
                        Some(row) => Ok(Some(row.get::<_, String>(0)?)),
                        None => Ok(None),
                    }
                })
                .await?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: String) -> StoreFuture<'_, ClientResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let updated_at = chrono::Utc::now().timestamp_millis();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT OR REPLACE INTO {table} (key, value, updated_at)
                             VALUES (?1, ?2, ?3)"
                        ),
                        rusqlite::params![key, value, updated_at],
                    )?;
                    Ok(())
                })
                .await?;

            Ok(())
        })
    }

    fn remove(&self, key: &str) -> StoreFuture<'_, ClientResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table.clone();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!("DELETE FROM {table} WHERE key = ?1"),
                        rusqlite::params![key],
                    )?;
                    Ok(())
                })
                .await?;

            Ok(())
        })
    }
}

/// In-process store, used when no database is wanted.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, String>,
}

impl MemoryKvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> StoreFuture<'_, ClientResult<Option<String>>> {
        let value = self.entries.get(key).map(|v| v.value().clone());
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &str, value: String) -> StoreFuture<'_, ClientResult<()>> {
        self.entries.insert(key.to_string(), value);
        Box::pin(async move { Ok(()) })
    }

    fn remove(&self, key: &str) -> StoreFuture<'_, ClientResult<()>> {
        self.entries.remove(key);
        Box::pin(async move { Ok(()) })
    }
}
