use crate::infrastructure::error::EngineError;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Generic async string key-value persistence. The calendar store keeps its
/// whole day mapping as one JSON blob under one fixed key, so this is the
/// only durability seam the engine needs.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, EngineError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), EngineError>;
    async fn remove(&self, key: &str) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, EngineError> {
        self.entries
            .lock()
            .map_err(|error| EngineError::Storage(format!("key-value lock poisoned: {error}")))
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), EngineError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), EngineError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Durable implementation over a single sqlite table. A connection is opened
/// per operation and the blocking work runs off the async executor.
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    db_path: PathBuf,
}

impl SqliteKeyValueStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, EngineError> {
        Connection::open(&self.db_path).map_err(EngineError::from)
    }

    async fn run_blocking<T, F>(&self, operation: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(Connection) -> Result<T, EngineError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || operation(store.connect()?))
            .await
            .map_err(|error| EngineError::Storage(format!("storage task failed: {error}")))?
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let key = key.to_string();
        self.run_blocking(move |connection| {
            connection
                .query_row(
                    "SELECT value FROM key_value WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(EngineError::from)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), EngineError> {
        let key = key.to_string();
        let value = value.to_string();
        self.run_blocking(move |connection| {
            connection.execute(
                "INSERT INTO key_value (key, value)
                 VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), EngineError> {
        let key = key.to_string();
        self.run_blocking(move |connection| {
            connection.execute("DELETE FROM key_value WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}
