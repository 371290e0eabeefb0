use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use searchbot_config::Store;
use searchbot_kernel::Clock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("value encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("store.sqlite_path is required for sqlite store")]
    MissingPath,
}

/// Key-value store with per-entry expiry.
///
/// Never fails to the caller: backend errors are logged, reads degrade to
/// absent and writes are dropped. Same-key writes are last-write-wins.
pub struct SessionStore {
    backend: Mutex<StoreBackend>,
    clock: Arc<dyn Clock>,
}

enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

#[derive(Default)]
struct MemoryStore {
    entries: HashMap<String, MemoryEntry>,
}

struct MemoryEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

struct SqliteStore {
    conn: Connection,
}

impl SessionStore {
    pub fn open(cfg: &Store, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let backend = if cfg.kind == "sqlite" {
            let path = cfg.sqlite_path.as_deref().ok_or(StoreError::MissingPath)?;
            StoreBackend::Sqlite(SqliteStore::new(path)?)
        } else {
            StoreBackend::Memory(MemoryStore::default())
        };
        Ok(Self {
            backend: Mutex::new(backend),
            clock,
        })
    }

    pub fn memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            backend: Mutex::new(StoreBackend::Memory(MemoryStore::default())),
            clock,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut backend = self.backend.lock().await;
        match backend.get(key, now) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(key, error = %err, "session store read failed");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) {
        // a TTL past the representable range means no expiry
        let expires_at = ttl.and_then(|ttl| self.clock.now().checked_add_signed(ttl));
        let mut backend = self.backend.lock().await;
        if let Err(err) = backend.set(key, value, expires_at) {
            tracing::error!(key, error = %err, "session store write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        let mut backend = self.backend.lock().await;
        if let Err(err) = backend.delete(key) {
            tracing::error!(key, error = %err, "session store delete failed");
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }
}

impl StoreBackend {
    fn get(&mut self, key: &str, now: DateTime<Utc>) -> Result<Option<Value>, StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                let expired = match store.entries.get(key) {
                    None => return Ok(None),
                    Some(entry) => entry.expires_at.is_some_and(|at| at <= now),
                };
                if expired {
                    store.entries.remove(key);
                    return Ok(None);
                }
                Ok(store.entries.get(key).map(|entry| entry.value.clone()))
            }
            StoreBackend::Sqlite(store) => store.get(key, now),
        }
    }

    fn set(
        &mut self,
        key: &str,
        value: &Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                store.entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: value.clone(),
                        expires_at,
                    },
                );
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.set(key, value, expires_at),
        }
    }

    fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                store.entries.remove(key);
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.delete(key),
        }
    }
}

impl SqliteStore {
    fn new(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value_json TEXT NOT NULL,
                expires_at INTEGER
            );
            ",
        )?;
        Ok(Self { conn })
    }

    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Value>, StoreError> {
        let row: Option<(String, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT value_json, expires_at FROM kv WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((_, Some(expires_at))) if expires_at <= now.timestamp_millis() => {
                self.delete(key)?;
                Ok(None)
            }
            Some((json, _)) => Ok(Some(serde_json::from_str(&json)?)),
        }
    }

    fn set(
        &self,
        key: &str,
        value: &Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO kv(key, value_json, expires_at) VALUES (?1, ?2, ?3)",
            params![key, json, expires_at.map(|at| at.timestamp_millis())],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}
