use super::{announce, KeyValueStore, StorageChange, StoreMap, CHANGE_FEED_CAPACITY};
use crate::error::StoreError;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::info;

/// Durable store backed by a single SQLite table of JSON values.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    feed: broadcast::Sender<StorageChange>,
}

impl SqliteStore {
    pub fn open(db_path: impl Into<String>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        info!("SQLite store initialized at {}", db_path);
        let (feed, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            feed,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, keys: &[&str]) -> Result<StoreMap, StoreError> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached("SELECT value FROM kv_store WHERE key = ?1")?;
            let mut out = StoreMap::new();
            for key in keys {
                let raw: Option<String> = stmt.query_row([&key], |row| row.get(0)).optional()?;
                if let Some(raw) = raw {
                    out.insert(key, serde_json::from_str(&raw)?);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn set(&self, items: StoreMap) -> Result<(), StoreError> {
        let rows: Vec<(String, String)> = items
            .iter()
            .map(|(k, v)| serde_json::to_string(v).map(|raw| (k.clone(), raw)))
            .collect::<Result<_, serde_json::Error>>()?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                )?;
                let now = unix_millis();
                for (key, value) in &rows {
                    stmt.execute(params![key, value, now])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        announce(&self.feed, &items);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.feed.subscribe()
    }
}
