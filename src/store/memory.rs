use super::{announce, KeyValueStore, StorageChange, StoreMap, CHANGE_FEED_CAPACITY};
use crate::error::StoreError;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

/// Volatile store, used for tests and `storage.backend = "memory"`.
pub struct MemoryStore {
    values: RwLock<FxHashMap<String, Value>>,
    feed: broadcast::Sender<StorageChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            values: RwLock::new(FxHashMap::default()),
            feed,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<StoreMap, StoreError> {
        let values = self.values.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| values.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, items: StoreMap) -> Result<(), StoreError> {
        {
            let mut values = self.values.write().await;
            for (k, v) in &items {
                values.insert(k.clone(), v.clone());
            }
        }
        announce(&self.feed, &items);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.feed.subscribe()
    }
}
